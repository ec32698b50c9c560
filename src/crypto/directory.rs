use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use x25519_dalek::PublicKey;

use crate::common::UserId;

/// Looks up the current public key of a peer.
pub trait KeyResolver {
    fn resolve(&self, user: &UserId) -> Option<PublicKey>;
}

impl<R: KeyResolver + ?Sized> KeyResolver for Arc<R> {
    fn resolve(&self, user: &UserId) -> Option<PublicKey> {
        (**self).resolve(user)
    }
}

impl KeyResolver for HashMap<UserId, PublicKey> {
    fn resolve(&self, user: &UserId) -> Option<PublicKey> {
        self.get(user).copied()
    }
}

/// Public keys learned from presence announcements.
///
/// Every announcement is trusted: a new key for a known user replaces the old
/// one and is logged at warn level.
#[derive(Debug, Default)]
pub struct KeyDirectory {
    keys: RwLock<HashMap<UserId, PublicKey>>,
}

impl KeyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `key` for `user`; returns true if it differs from what was known.
    pub fn insert(&self, user: UserId, key: PublicKey) -> bool {
        let mut keys = self.keys.write().unwrap_or_else(PoisonError::into_inner);
        match keys.insert(user, key) {
            Some(previous) if previous.as_bytes() == key.as_bytes() => false,
            Some(_) => {
                log::warn!("Public key of {user} replaced by a new announcement");
                true
            }
            None => true,
        }
    }

    pub fn len(&self) -> usize {
        self.keys.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyResolver for KeyDirectory {
    fn resolve(&self, user: &UserId) -> Option<PublicKey> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user)
            .copied()
    }
}
