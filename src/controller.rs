use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use x25519_dalek::PublicKey;

use crate::common::{
    ChannelAddress, ChatEvent, ChatMessage, ChatUser, MessageId, NetworkEvent, Presence,
    PresenceAnnouncement, PresenceStatus, WireFrame, WireMessage, encode_frame,
};
use crate::config::ControllerConfig;
use crate::crypto::{EncryptionGate, KeyDirectory, LocalKeys, open_sealed};
use crate::delivery::channel_admits;
use crate::error::{ChatError, Result};
use crate::network::ChatTransport;
use crate::presence::PresenceRegistry;

/// Connects the local identity to the mesh.
///
/// Cheap to clone; clones share the same registry, keys and transport, so
/// the controller can be driven from the inbound task and the UI at once.
pub struct ChatController<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ChatController<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<T> {
    local: RwLock<Presence>,
    keys: LocalKeys,
    registry: Arc<PresenceRegistry>,
    gate: EncryptionGate<Arc<KeyDirectory>>,
    transport: T,
    events: mpsc::Sender<ChatEvent>,
    recent: Mutex<RecentIds>,
    config: ControllerConfig,
}

impl<T: ChatTransport + 'static> ChatController<T> {
    pub fn new(
        user: ChatUser,
        keys: LocalKeys,
        registry: Arc<PresenceRegistry>,
        directory: Arc<KeyDirectory>,
        transport: T,
        events: mpsc::Sender<ChatEvent>,
        config: ControllerConfig,
    ) -> Self {
        directory.insert(user.id, *keys.public_key());
        Self {
            inner: Arc::new(Inner {
                local: RwLock::new(Presence::new(user, PresenceStatus::Online)),
                keys,
                registry,
                gate: EncryptionGate::new(directory),
                transport,
                events,
                recent: Mutex::new(RecentIds::new(config.dedup_window)),
                config,
            }),
        }
    }

    pub fn local_user(&self) -> ChatUser {
        self.local_presence().user
    }

    pub fn local_presence(&self) -> Presence {
        self.inner
            .local
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn registry(&self) -> &Arc<PresenceRegistry> {
        &self.inner.registry
    }

    pub fn key_directory(&self) -> &Arc<KeyDirectory> {
        self.inner.gate.resolver()
    }

    pub fn update_name(&self, name: impl Into<String>) {
        self.inner
            .local
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .user
            .display_name = name.into();
        self.announce();
    }

    pub fn update_status(&self, status: PresenceStatus) {
        self.inner
            .local
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .status = status;
        self.announce();
    }

    /// Broadcasts the local presence together with the public key.
    pub fn announce(&self) {
        let announcement = PresenceAnnouncement::new(
            self.local_presence(),
            Some(*self.inner.keys.public_key().as_bytes()),
        );
        match encode_frame(&WireFrame::Presence(announcement)) {
            Ok(bytes) => self.inner.transport.send(bytes),
            Err(err) => log::warn!("Failed to encode presence announcement: {err}"),
        }
    }

    /// Creates and sends a message authored by the local identity.
    pub async fn send(
        &self,
        content: impl Into<String>,
        channel: ChannelAddress,
    ) -> Result<MessageId> {
        let message = ChatMessage::new(self.local_user(), content, channel);
        let id = message.id;
        self.send_message(message).await?;
        Ok(id)
    }

    /// Encrypts direct messages, publishes the envelope and echoes the message
    /// locally when the local identity is one of its receivers.
    ///
    /// On failure nothing is published and a [`ChatEvent::SendFailed`] is
    /// emitted besides the returned error.
    pub async fn send_message(&self, message: ChatMessage) -> Result<()> {
        let envelope = match self.seal(&message) {
            Ok(envelope) => envelope,
            Err(err) => {
                log::warn!("Could not send message {}: {err}", message.id);
                self.emit(ChatEvent::SendFailed {
                    message_id: message.id,
                    reason: err.to_string(),
                })
                .await;
                return Err(err);
            }
        };

        let bytes = encode_frame(&WireFrame::Message(envelope))?;
        self.remember(message.id);
        self.inner.transport.send(bytes);

        let me = self.local_user().id;
        if message.is_received_by(&me) {
            self.emit(ChatEvent::MessageAdded(message)).await;
        }
        Ok(())
    }

    fn seal(&self, message: &ChatMessage) -> Result<WireMessage> {
        Ok(match self.inner.gate.encrypted_if_needed(message)? {
            Some(encrypted) => encrypted.into(),
            None => WireMessage::plain(message.clone()),
        })
    }

    pub async fn handle_event(&self, event: NetworkEvent) {
        match event {
            NetworkEvent::FrameReceived(frame) => self.handle_frame(frame).await,
            NetworkEvent::PeerConnected(peer) => {
                log::info!("Peer connected: {peer}");
                // let newcomers learn about us without waiting for the next heartbeat
                self.announce();
            }
            NetworkEvent::PeerDisconnected(peer) => {
                log::info!("Peer disconnected: {peer}");
            }
        }
    }

    /// Applies one inbound frame. Safe to call repeatedly with the same frame.
    pub async fn handle_frame(&self, frame: WireFrame) {
        match frame {
            WireFrame::Presence(announcement) => self.handle_presence(announcement).await,
            WireFrame::Message(envelope) => self.handle_message(envelope).await,
        }
    }

    async fn handle_presence(&self, announcement: PresenceAnnouncement) {
        if announcement.user.id == self.local_user().id {
            return;
        }
        if let Some(key) = announcement.public_key {
            self.key_directory()
                .insert(announcement.user.id, PublicKey::from(key));
        }

        let presence = announcement.presence();
        if self.inner.registry.register(presence.clone()) {
            self.emit(ChatEvent::PresenceChanged(presence)).await;
        }
    }

    async fn handle_message(&self, envelope: WireMessage) {
        let me = self.local_user().id;
        if !channel_admits(&envelope.channel, &me) {
            log::trace!("Message {} is not addressed to us", envelope.id);
            return;
        }
        if self.seen(&envelope.id) {
            log::debug!("{}", ChatError::DuplicateMessageObserved(envelope.id));
            return;
        }

        // only a copy that opens is remembered, so a corrupt one cannot shadow it
        let message = if envelope.is_sealed() {
            match open_sealed(&envelope, &me, &self.inner.keys) {
                Ok(message) => message,
                Err(err) => {
                    log::warn!(
                        "Could not open message {} from {}: {err}",
                        envelope.id,
                        envelope.author.display_name
                    );
                    return;
                }
            }
        } else {
            let id = envelope.id;
            match envelope.into_plain() {
                Some(message) => message,
                None => {
                    log::warn!("Message {id} carries neither content nor sealed boxes");
                    return;
                }
            }
        };

        if !self.remember(message.id) {
            log::debug!("{}", ChatError::DuplicateMessageObserved(message.id));
            return;
        }
        self.emit(ChatEvent::MessageAdded(message)).await;
    }

    /// Starts consuming network events. Also re-announces presence every
    /// `presence_interval` (the first announcement goes out immediately).
    pub fn spawn(&self, mut inbound: mpsc::Receiver<NetworkEvent>) -> Subscription {
        let controller = self.clone();
        let interval = self.inner.config.presence_interval;
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let mut ticker = (!interval.is_zero()).then(|| tokio::time::interval(interval));
            if ticker.is_none() {
                controller.announce();
            }

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    event = inbound.recv() => match event {
                        Some(event) => controller.handle_event(event).await,
                        None => break,
                    },
                    _ = next_tick(&mut ticker) => controller.announce(),
                }
            }
            log::debug!("Chat controller subscription ended");
        });

        Subscription {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Marks `id` as seen; returns false if it already was.
    fn remember(&self, id: MessageId) -> bool {
        self.inner
            .recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .observe(id)
    }

    fn seen(&self, id: &MessageId) -> bool {
        self.inner
            .recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }

    async fn emit(&self, event: ChatEvent) {
        if self.inner.events.send(event).await.is_err() {
            log::debug!("Application stopped listening for chat events");
        }
    }
}

async fn next_tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Handle on the inbound event loop. No callbacks fire after
/// [`Subscription::shutdown`] returns; dropping the handle aborts the loop.
pub struct Subscription {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    log::warn!("Chat controller task failed: {err}");
                }
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Bounded memory of recently seen message ids.
struct RecentIds {
    capacity: usize,
    order: VecDeque<MessageId>,
    seen: HashSet<MessageId>,
}

impl RecentIds {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    fn contains(&self, id: &MessageId) -> bool {
        self.seen.contains(id)
    }

    fn observe(&mut self, id: MessageId) -> bool {
        if self.capacity == 0 {
            return true;
        }
        if !self.seen.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }
}
