use std::fmt;
use std::fs;
use std::path::Path;

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::{ChatError, Result};

/// Long-term X25519 key pair of the local identity.
#[derive(Clone)]
pub struct LocalKeys {
    secret: StaticSecret,
    public: PublicKey,
}

impl LocalKeys {
    pub fn generate() -> Self {
        Self::from_secret(StaticSecret::random_from_rng(OsRng))
    }

    pub fn from_secret(secret: StaticSecret) -> Self {
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn secret_key(&self) -> &StaticSecret {
        &self.secret
    }

    /// Loads the secret key stored as hex at `path`, or generates one and
    /// writes it there.
    pub fn load_or_generate(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let encoded = fs::read_to_string(path)?;
            let bytes: [u8; 32] = hex::decode(encoded.trim())
                .map_err(|e| ChatError::InvalidKey(format!("{}: {e}", path.display())))?
                .try_into()
                .map_err(|_| {
                    ChatError::InvalidKey(format!("{}: expected 32 bytes", path.display()))
                })?;
            log::info!("Loaded persisted chat key from {}", path.display());
            Ok(Self::from_secret(StaticSecret::from(bytes)))
        } else {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let keys = Self::generate();
            fs::write(path, hex::encode(keys.secret.to_bytes()))?;
            log::info!("Generated new chat key and saved to {}", path.display());
            Ok(keys)
        }
    }
}

impl fmt::Debug for LocalKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalKeys")
            .field("public", &hex::encode(self.public.as_bytes()))
            .finish_non_exhaustive()
    }
}
