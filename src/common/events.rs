use super::types::{ChatMessage, MessageId, Presence};
use super::wire::WireFrame;

/// Events raised by the network task towards the chat core.
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    FrameReceived(WireFrame),
    PeerConnected(String),
    PeerDisconnected(String),
}

/// Events surfaced by the chat core to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// A message this identity is meant to receive, including local echoes.
    MessageAdded(ChatMessage),
    /// A peer appeared, renamed itself or changed status.
    PresenceChanged(Presence),
    /// An outgoing message could not be sent.
    SendFailed { message_id: MessageId, reason: String },
}
