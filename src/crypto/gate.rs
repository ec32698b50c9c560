//! Per-recipient encryption of direct messages.
//!
//! Each recipient gets its own sealed box:
//!
//! ```text
//! ephemeral   <- X25519.generate()
//! shared      <- ECDH(ephemeral, recipient_public)
//! key         <- HKDF-SHA256(salt, shared, info || ephemeral_public || recipient_public)
//! header      <- JSON { id, timestamp (µs), author, channel, repliedToMessageId }
//! ciphertext  <- ChaCha20-Poly1305(key, random nonce, payload, aad = header || recipient)
//! ```
//!
//! The AAD binds each box to the clear envelope it travels in. Moving a box to
//! another message or recipient fails authentication, and so does rewriting
//! the visible recipient list, timestamp or reply target.

use std::collections::BTreeMap;

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use chrono::{DateTime, Utc};
use hkdf::Hkdf;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey};

use super::directory::KeyResolver;
use super::keys::LocalKeys;
use crate::common::{
    Attachment, ChannelAddress, ChatMessage, ChatUser, MessageId, SealedBox, UserId, WireMessage,
};
use crate::error::{ChatError, Result};

const HKDF_SALT: &[u8] = b"distributed-chat/dm/v1";
const HKDF_INFO: &[u8] = b"sealed-box-key";
const NONCE_SIZE: usize = 12;

/// Clear envelope fields every sealed box is bound to.
///
/// `Recipients` is an ordered set, so the encoding is the same on both ends.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BoundHeader<'a> {
    id: &'a MessageId,
    timestamp: i64,
    author: &'a UserId,
    channel: &'a ChannelAddress,
    replied_to_message_id: Option<&'a MessageId>,
}

impl<'a> BoundHeader<'a> {
    fn of_message(message: &'a ChatMessage) -> Self {
        Self {
            id: &message.id,
            timestamp: message.timestamp.timestamp_micros(),
            author: &message.author.id,
            channel: &message.channel,
            replied_to_message_id: message.replied_to_message_id.as_ref(),
        }
    }

    fn of_envelope(envelope: &'a WireMessage) -> Self {
        Self {
            id: &envelope.id,
            timestamp: envelope.timestamp.timestamp_micros(),
            author: &envelope.author.id,
            channel: &envelope.channel,
            replied_to_message_id: envelope.replied_to_message_id.as_ref(),
        }
    }

    fn associated_data(&self, recipient: &UserId) -> Result<Vec<u8>> {
        let mut aad = serde_json::to_vec(self)?;
        aad.extend_from_slice(recipient.as_bytes());
        Ok(aad)
    }
}

/// The secret part of a direct message.
#[derive(Debug, Serialize, Deserialize)]
struct SealedPayload {
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    attachments: Option<Vec<Attachment>>,
}

/// A direct message ready for transmission: plaintext routing metadata and
/// one sealed box per recipient. It has no plaintext content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedMessage {
    pub id: MessageId,
    pub timestamp: DateTime<Utc>,
    pub author: ChatUser,
    pub channel: ChannelAddress,
    pub replied_to_message_id: Option<MessageId>,
    pub sealed: BTreeMap<UserId, SealedBox>,
}

impl From<EncryptedMessage> for WireMessage {
    fn from(message: EncryptedMessage) -> Self {
        WireMessage {
            id: message.id,
            timestamp: message.timestamp,
            author: message.author,
            channel: message.channel,
            content: None,
            attachments: None,
            replied_to_message_id: message.replied_to_message_id,
            sealed: Some(message.sealed),
        }
    }
}

/// Decides whether an outgoing message needs encryption and performs it.
///
/// Holds no mutable state of its own; key lookups go through the resolver.
#[derive(Debug, Clone)]
pub struct EncryptionGate<R> {
    resolver: R,
}

impl<R: KeyResolver> EncryptionGate<R> {
    pub fn new(resolver: R) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Returns `None` for global and room messages, which travel in the clear.
    ///
    /// For a direct message every recipient key is resolved before anything
    /// is encrypted. One unresolved key fails the whole call with
    /// [`ChatError::KeyResolution`] naming every missing recipient.
    pub fn encrypted_if_needed(&self, message: &ChatMessage) -> Result<Option<EncryptedMessage>> {
        let recipients = match &message.channel {
            ChannelAddress::Global | ChannelAddress::Room { .. } => return Ok(None),
            ChannelAddress::DirectMessage { recipients } => recipients,
        };

        let mut resolved = Vec::with_capacity(recipients.len());
        let mut missing = Vec::new();
        for id in recipients.iter() {
            match self.resolver.resolve(id) {
                Some(key) => resolved.push((*id, key)),
                None => missing.push(*id),
            }
        }
        if !missing.is_empty() {
            return Err(ChatError::KeyResolution { missing });
        }

        let payload = serde_json::to_vec(&SealedPayload {
            content: message.content.clone(),
            attachments: message.attachments.clone(),
        })?;

        let header = BoundHeader::of_message(message);
        let sealed = resolved
            .into_iter()
            .map(|(id, key)| {
                let aad = header.associated_data(&id)?;
                seal(&payload, &key, &aad).map(|sealed| (id, sealed))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        Ok(Some(EncryptedMessage {
            id: message.id,
            timestamp: message.timestamp,
            author: message.author.clone(),
            channel: message.channel.clone(),
            replied_to_message_id: message.replied_to_message_id,
            sealed,
        }))
    }
}

/// Decrypts the box addressed to `me` and rebuilds the message.
pub fn open_sealed(envelope: &WireMessage, me: &UserId, keys: &LocalKeys) -> Result<ChatMessage> {
    let sealed = envelope
        .sealed
        .as_ref()
        .ok_or_else(|| ChatError::Decryption(format!("message {} is not sealed", envelope.id)))?;
    let sealed_box = sealed
        .get(me)
        .ok_or(ChatError::NotARecipient(envelope.id))?;

    let aad = BoundHeader::of_envelope(envelope).associated_data(me)?;
    let plaintext = unseal(sealed_box, keys, &aad)?;
    let payload: SealedPayload = serde_json::from_slice(&plaintext)
        .map_err(|e| ChatError::Decryption(format!("malformed payload: {e}")))?;

    Ok(ChatMessage {
        id: envelope.id,
        timestamp: envelope.timestamp,
        author: envelope.author.clone(),
        content: payload.content,
        channel: envelope.channel.clone(),
        attachments: payload.attachments,
        replied_to_message_id: envelope.replied_to_message_id,
    })
}

fn derive_key(shared: &[u8; 32], ephemeral: &[u8; 32], recipient: &[u8; 32]) -> Result<[u8; 32]> {
    let mut info = Vec::with_capacity(HKDF_INFO.len() + 64);
    info.extend_from_slice(HKDF_INFO);
    info.extend_from_slice(ephemeral);
    info.extend_from_slice(recipient);

    let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), shared);
    let mut key = [0u8; 32];
    hk.expand(&info, &mut key)
        .map_err(|_| ChatError::Encryption("key derivation failed".to_string()))?;
    Ok(key)
}

fn seal(plaintext: &[u8], recipient: &PublicKey, aad: &[u8]) -> Result<SealedBox> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(recipient);
    if !shared.was_contributory() {
        return Err(ChatError::Encryption("recipient key has low order".to_string()));
    }

    let key = derive_key(shared.as_bytes(), ephemeral_public.as_bytes(), recipient.as_bytes())?;
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let cipher = ChaCha20Poly1305::new_from_slice(&key)
        .map_err(|e| ChatError::Encryption(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad })
        .map_err(|e| ChatError::Encryption(e.to_string()))?;

    Ok(SealedBox {
        ephemeral_public: *ephemeral_public.as_bytes(),
        nonce,
        ciphertext,
    })
}

fn unseal(sealed: &SealedBox, keys: &LocalKeys, aad: &[u8]) -> Result<Vec<u8>> {
    let ephemeral_public = PublicKey::from(sealed.ephemeral_public);
    let shared = keys.secret_key().diffie_hellman(&ephemeral_public);
    if !shared.was_contributory() {
        return Err(ChatError::Decryption("ephemeral key has low order".to_string()));
    }

    let key = derive_key(
        shared.as_bytes(),
        &sealed.ephemeral_public,
        keys.public_key().as_bytes(),
    )
    .map_err(|e| ChatError::Decryption(e.to_string()))?;

    let cipher = ChaCha20Poly1305::new_from_slice(&key)
        .map_err(|e| ChatError::Decryption(e.to_string()))?;
    cipher
        .decrypt(
            Nonce::from_slice(&sealed.nonce),
            Payload {
                msg: &sealed.ciphertext,
                aad,
            },
        )
        .map_err(|_| ChatError::Decryption("authentication failed".to_string()))
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashMap};

    use super::*;
    use crate::common::{AttachmentType, Recipients};

    struct Peer {
        id: UserId,
        keys: LocalKeys,
    }

    impl Peer {
        fn new() -> Self {
            Self {
                id: UserId::new(),
                keys: LocalKeys::generate(),
            }
        }
    }

    fn directory(peers: &[&Peer]) -> HashMap<UserId, PublicKey> {
        peers.iter().map(|p| (p.id, *p.keys.public_key())).collect()
    }

    fn dm(to: &[&Peer]) -> ChatMessage {
        let recipients = Recipients::new(to.iter().map(|p| p.id)).unwrap();
        ChatMessage::new(
            ChatUser::new(UserId::new(), "alice"),
            "meet at noon",
            ChannelAddress::direct(recipients),
        )
    }

    #[test]
    fn broadcast_messages_pass_through() {
        let gate = EncryptionGate::new(HashMap::<UserId, PublicKey>::new());
        let author = ChatUser::new(UserId::new(), "alice");

        for channel in [ChannelAddress::Global, ChannelAddress::room("general")] {
            let message = ChatMessage::new(author.clone(), "hi", channel);
            assert!(gate.encrypted_if_needed(&message).unwrap().is_none());
        }
    }

    #[test]
    fn direct_message_is_sealed_for_exactly_its_recipients() {
        let (u1, u2) = (Peer::new(), Peer::new());
        let bystander = Peer::new();
        let gate = EncryptionGate::new(directory(&[&u1, &u2, &bystander]));
        let message = dm(&[&u1, &u2]);

        let encrypted = gate.encrypted_if_needed(&message).unwrap().unwrap();
        let keys: BTreeSet<UserId> = encrypted.sealed.keys().copied().collect();
        assert_eq!(keys, BTreeSet::from([u1.id, u2.id]));

        let envelope = WireMessage::from(encrypted);
        assert!(envelope.content.is_none());
        assert!(envelope.attachments.is_none());

        let raw = serde_json::to_string(&envelope).unwrap();
        assert!(!raw.contains("meet at noon"));
    }

    #[test]
    fn unresolved_recipient_fails_whole_message() {
        let (u1, u2) = (Peer::new(), Peer::new());
        let gate = EncryptionGate::new(directory(&[&u1]));

        match gate.encrypted_if_needed(&dm(&[&u1, &u2])) {
            Err(ChatError::KeyResolution { missing }) => assert_eq!(missing, vec![u2.id]),
            other => panic!("expected key resolution failure, got {other:?}"),
        }
    }

    #[test]
    fn each_recipient_opens_its_own_box() {
        let (u1, u2) = (Peer::new(), Peer::new());
        let gate = EncryptionGate::new(directory(&[&u1, &u2]));
        let message = dm(&[&u1, &u2]).with_attachments(vec![Attachment::new(
            AttachmentType::File,
            "plan.txt",
            b"north gate".to_vec(),
        )]);

        let envelope = WireMessage::from(gate.encrypted_if_needed(&message).unwrap().unwrap());

        for peer in [&u1, &u2] {
            assert_eq!(open_sealed(&envelope, &peer.id, &peer.keys).unwrap(), message);
        }
    }

    #[test]
    fn outsider_cannot_open() {
        let u1 = Peer::new();
        let outsider = Peer::new();
        let gate = EncryptionGate::new(directory(&[&u1]));
        let envelope = WireMessage::from(gate.encrypted_if_needed(&dm(&[&u1])).unwrap().unwrap());

        assert!(matches!(
            open_sealed(&envelope, &outsider.id, &outsider.keys),
            Err(ChatError::NotARecipient(_))
        ));
        // right slot, wrong private key
        assert!(matches!(
            open_sealed(&envelope, &u1.id, &outsider.keys),
            Err(ChatError::Decryption(_))
        ));
    }

    #[test]
    fn tampering_is_detected() {
        let u1 = Peer::new();
        let gate = EncryptionGate::new(directory(&[&u1]));
        let mut envelope =
            WireMessage::from(gate.encrypted_if_needed(&dm(&[&u1])).unwrap().unwrap());

        let mut flipped = envelope.clone();
        if let Some(sealed) = flipped.sealed.as_mut() {
            let sealed_box = sealed.get_mut(&u1.id).unwrap();
            sealed_box.ciphertext[0] ^= 0x01;
        }
        assert!(open_sealed(&flipped, &u1.id, &u1.keys).is_err());

        // the box is bound to its envelope id
        envelope.id = MessageId::new();
        assert!(open_sealed(&envelope, &u1.id, &u1.keys).is_err());
    }

    #[test]
    fn rewritten_envelope_fields_are_detected() {
        let (u1, u2) = (Peer::new(), Peer::new());
        let gate = EncryptionGate::new(directory(&[&u1, &u2]));
        let message = dm(&[&u1]).replying_to(MessageId::new());
        let envelope = WireMessage::from(gate.encrypted_if_needed(&message).unwrap().unwrap());
        assert!(open_sealed(&envelope, &u1.id, &u1.keys).is_ok());

        let mut widened = envelope.clone();
        widened.channel = ChannelAddress::direct(Recipients::new([u1.id, u2.id]).unwrap());
        assert!(matches!(
            open_sealed(&widened, &u1.id, &u1.keys),
            Err(ChatError::Decryption(_))
        ));

        let mut rethreaded = envelope.clone();
        rethreaded.replied_to_message_id = Some(MessageId::new());
        assert!(open_sealed(&rethreaded, &u1.id, &u1.keys).is_err());

        let mut backdated = envelope;
        backdated.timestamp -= chrono::Duration::seconds(60);
        assert!(open_sealed(&backdated, &u1.id, &u1.keys).is_err());
    }
}
