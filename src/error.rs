use thiserror::Error;

use crate::common::{MessageId, UserId};

/// Errors raised by the chat core.
///
/// None of these are fatal to the process. Key resolution and encryption
/// failures abort a single send; the rest are informational or recoverable.
#[derive(Error, Debug)]
pub enum ChatError {
    /// A direct message recipient has no resolvable public key. Nothing was
    /// encrypted for any recipient.
    #[error("no public key for recipient(s): {}", join_ids(.missing))]
    KeyResolution { missing: Vec<UserId> },

    /// An address token used neither the `@` nor the `#` convention.
    #[error("unknown channel prefix in `{0}`")]
    UnknownChannelPrefix(String),

    /// The same message id arrived more than once.
    #[error("duplicate message {0}")]
    DuplicateMessageObserved(MessageId),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    /// The local identity holds no sealed box in a direct message.
    #[error("message {0} is not addressed to this identity")]
    NotARecipient(MessageId),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ChatError>;

fn join_ids(ids: &[UserId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
