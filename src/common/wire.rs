use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::encoding::{hex_array, hex_array_opt, hex_vec};
use super::types::{
    Attachment, ChannelAddress, ChatMessage, ChatUser, MessageId, Presence, PresenceStatus, UserId,
};
use crate::error::Result;

/// Ciphertext for one direct message recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedBox {
    #[serde(with = "hex_array")]
    pub ephemeral_public: [u8; 32],
    #[serde(with = "hex_array")]
    pub nonce: [u8; 12],
    #[serde(with = "hex_vec")]
    pub ciphertext: Vec<u8>,
}

/// Message envelope as published on the mesh.
///
/// Routing metadata always travels in the clear. A direct message carries
/// `sealed` instead of `content`/`attachments`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub id: MessageId,
    pub timestamp: DateTime<Utc>,
    pub author: ChatUser,
    #[serde(default, skip_serializing_if = "ChannelAddress::is_global")]
    pub channel: ChannelAddress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replied_to_message_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sealed: Option<BTreeMap<UserId, SealedBox>>,
}

impl WireMessage {
    /// Envelope carrying the message in plaintext.
    pub fn plain(message: ChatMessage) -> Self {
        Self {
            id: message.id,
            timestamp: message.timestamp,
            author: message.author,
            channel: message.channel,
            content: Some(message.content),
            attachments: message.attachments,
            replied_to_message_id: message.replied_to_message_id,
            sealed: None,
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.is_some()
    }

    /// Rebuilds the application message from a plaintext envelope.
    /// Returns `None` for sealed envelopes or ones missing content.
    pub fn into_plain(self) -> Option<ChatMessage> {
        if self.sealed.is_some() {
            return None;
        }
        Some(ChatMessage {
            id: self.id,
            timestamp: self.timestamp,
            author: self.author,
            content: self.content?,
            channel: self.channel,
            attachments: self.attachments,
            replied_to_message_id: self.replied_to_message_id,
        })
    }
}

/// Presence announcement as published on the mesh. `public_key` lets peers
/// resolve keys for direct messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceAnnouncement {
    pub user: ChatUser,
    pub status: PresenceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "hex_array_opt")]
    pub public_key: Option<[u8; 32]>,
}

impl PresenceAnnouncement {
    pub fn new(presence: Presence, public_key: Option<[u8; 32]>) -> Self {
        Self {
            user: presence.user,
            status: presence.status,
            public_key,
        }
    }

    pub fn presence(&self) -> Presence {
        Presence::new(self.user.clone(), self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WireFrame {
    Message(WireMessage),
    Presence(PresenceAnnouncement),
}

pub fn encode_frame(frame: &WireFrame) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(frame)?)
}

pub fn decode_frame(bytes: &[u8]) -> Result<WireFrame> {
    Ok(serde_json::from_slice(bytes)?)
}
