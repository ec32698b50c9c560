use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::encoding::hex_vec;

/// Identity of a peer, stable for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for UserId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier generated once when a message is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for MessageId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A peer as it announces itself. A later announcement with the same id and
/// another display name is a rename, not a new user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatUser {
    pub id: UserId,
    pub display_name: String,
}

impl ChatUser {
    pub fn new(id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }
}

/// Non-empty set of direct message recipients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "BTreeSet<UserId>", into = "BTreeSet<UserId>")]
pub struct Recipients(BTreeSet<UserId>);

impl Recipients {
    /// Returns `None` when `ids` is empty.
    pub fn new(ids: impl IntoIterator<Item = UserId>) -> Option<Self> {
        let set: BTreeSet<UserId> = ids.into_iter().collect();
        if set.is_empty() { None } else { Some(Self(set)) }
    }

    pub fn single(id: UserId) -> Self {
        Self(BTreeSet::from([id]))
    }

    pub fn contains(&self, id: &UserId) -> bool {
        self.0.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &UserId> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Adds `id`; returns false if it was already present.
    pub fn insert(&mut self, id: UserId) -> bool {
        self.0.insert(id)
    }

    /// The peer of a two-party conversation, if this set names exactly one id.
    pub fn counterpart(&self) -> Option<UserId> {
        if self.0.len() == 1 {
            self.0.first().copied()
        } else {
            None
        }
    }
}

impl TryFrom<BTreeSet<UserId>> for Recipients {
    type Error = String;

    fn try_from(set: BTreeSet<UserId>) -> Result<Self, Self::Error> {
        if set.is_empty() {
            Err("direct message recipient set must not be empty".to_string())
        } else {
            Ok(Self(set))
        }
    }
}

impl From<Recipients> for BTreeSet<UserId> {
    fn from(recipients: Recipients) -> Self {
        recipients.0
    }
}

/// Where a message is addressed.
///
/// `Global` is the default and is never written on the wire: an envelope
/// without a channel is a global message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChannelAddress {
    #[default]
    Global,
    /// Named broadcast group. Membership is not tracked here.
    Room { name: String },
    #[serde(rename = "dm")]
    DirectMessage { recipients: Recipients },
}

impl ChannelAddress {
    pub fn room(name: impl Into<String>) -> Self {
        ChannelAddress::Room { name: name.into() }
    }

    pub fn direct(recipients: Recipients) -> Self {
        ChannelAddress::DirectMessage { recipients }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, ChannelAddress::Global)
    }

    pub fn recipients(&self) -> Option<&Recipients> {
        match self {
            ChannelAddress::DirectMessage { recipients } => Some(recipients),
            ChannelAddress::Global | ChannelAddress::Room { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttachmentType {
    File,
    Image,
    VoiceNote,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: AttachmentType,
    pub name: String,
    #[serde(with = "hex_vec")]
    pub content: Vec<u8>,
}

impl Attachment {
    pub fn new(kind: AttachmentType, name: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            name: name.into(),
            content,
        }
    }
}

/// A chat message as seen by the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub timestamp: DateTime<Utc>,
    pub author: ChatUser,
    pub content: String,
    #[serde(default, skip_serializing_if = "ChannelAddress::is_global")]
    pub channel: ChannelAddress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replied_to_message_id: Option<MessageId>,
}

impl ChatMessage {
    /// Creates a message with a fresh id stamped with the current time.
    pub fn new(author: ChatUser, content: impl Into<String>, channel: ChannelAddress) -> Self {
        Self {
            id: MessageId::new(),
            timestamp: Utc::now(),
            author,
            content: content.into(),
            channel,
            attachments: None,
            replied_to_message_id: None,
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = Some(attachments);
        self
    }

    pub fn replying_to(mut self, message_id: MessageId) -> Self {
        self.replied_to_message_id = Some(message_id);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    #[default]
    Online,
    Away,
    Offline,
}

impl PresenceStatus {
    pub fn description(&self) -> &'static str {
        match self {
            PresenceStatus::Online => "Online",
            PresenceStatus::Away => "Away",
            PresenceStatus::Offline => "Offline",
        }
    }
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl FromStr for PresenceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "online" => Ok(PresenceStatus::Online),
            "away" => Ok(PresenceStatus::Away),
            "offline" => Ok(PresenceStatus::Offline),
            other => Err(format!("unknown presence status `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    pub user: ChatUser,
    pub status: PresenceStatus,
}

impl Presence {
    pub fn new(user: ChatUser, status: PresenceStatus) -> Self {
        Self { user, status }
    }
}
