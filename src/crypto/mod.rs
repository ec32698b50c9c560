//! Direct message encryption.

pub mod directory;
pub mod gate;
pub mod keys;

pub use directory::{KeyDirectory, KeyResolver};
pub use gate::{EncryptedMessage, EncryptionGate, open_sealed};
pub use keys::LocalKeys;
