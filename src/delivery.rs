//! Decides whether a message is meant for a given identity.
//!
//! Global and room messages reach everyone who receives the bytes; room
//! scoping is left to the transport subscription or the presentation layer.
//! Direct messages reach exactly the listed recipients. The sender is not
//! added implicitly, so a client that wants to display its own direct
//! messages lists itself among the recipients.

use crate::common::{ChannelAddress, ChatMessage, UserId};

/// Returns true when `recipient` is an intended receiver of `message`.
pub fn is_received(message: &ChatMessage, recipient: &UserId) -> bool {
    channel_admits(&message.channel, recipient)
}

/// Same rule as [`is_received`], applied to a bare channel address so it can
/// be evaluated on an envelope before it is decrypted.
pub fn channel_admits(channel: &ChannelAddress, recipient: &UserId) -> bool {
    match channel {
        ChannelAddress::Global | ChannelAddress::Room { .. } => true,
        ChannelAddress::DirectMessage { recipients } => recipients.contains(recipient),
    }
}

impl ChatMessage {
    pub fn is_received_by(&self, recipient: &UserId) -> bool {
        is_received(self, recipient)
    }
}
