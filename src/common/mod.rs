pub mod commands;
pub mod encoding;
pub mod events;
pub mod types;
pub mod wire;

pub use commands::NetworkCommand;
pub use events::{ChatEvent, NetworkEvent};
pub use types::{
    Attachment, AttachmentType, ChannelAddress, ChatMessage, ChatUser, MessageId, Presence,
    PresenceStatus, Recipients, UserId,
};
pub use wire::{PresenceAnnouncement, SealedBox, WireFrame, WireMessage, decode_frame, encode_frame};
