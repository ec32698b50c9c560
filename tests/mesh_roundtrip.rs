//! Three controllers wired through an in-memory broadcast hub.

use std::sync::Arc;
use std::time::Duration;

use distributed_chat::common::{
    ChannelAddress, ChatEvent, ChatUser, NetworkEvent, PresenceStatus, Recipients, UserId,
    decode_frame,
};
use distributed_chat::config::ControllerConfig;
use distributed_chat::crypto::{KeyDirectory, LocalKeys};
use distributed_chat::network::ChatTransport;
use distributed_chat::{ChannelParser, ChatController, PresenceRegistry, Subscription};
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Delivers every frame to all other peers, twice, to mimic a redundant mesh.
struct HubTransport {
    index: usize,
    peers: Arc<Vec<mpsc::Sender<NetworkEvent>>>,
}

impl ChatTransport for HubTransport {
    fn send(&self, encoded: Vec<u8>) {
        let frame = decode_frame(&encoded).expect("controller publishes valid frames");
        for (i, peer) in self.peers.iter().enumerate() {
            if i == self.index {
                continue;
            }
            for _ in 0..2 {
                let _ = peer.try_send(NetworkEvent::FrameReceived(frame.clone()));
            }
        }
    }
}

struct Node {
    controller: ChatController<HubTransport>,
    events: mpsc::Receiver<ChatEvent>,
    _subscription: Subscription,
}

impl Node {
    async fn next_event(&mut self) -> ChatEvent {
        timeout(Duration::from_secs(2), self.events.recv())
            .await
            .expect("timed out waiting for chat event")
            .expect("event channel closed")
    }

    async fn expect_silence(&mut self) {
        let result = timeout(Duration::from_millis(150), self.events.recv()).await;
        assert!(result.is_err(), "unexpected event {result:?}");
    }

    fn id(&self) -> UserId {
        self.controller.local_user().id
    }
}

fn mesh(names: &[&str]) -> Vec<Node> {
    let (senders, receivers): (Vec<_>, Vec<_>) =
        names.iter().map(|_| mpsc::channel(64)).unzip();
    let senders = Arc::new(senders);

    let config = ControllerConfig {
        presence_interval: Duration::ZERO,
        dedup_window: 64,
    };

    names
        .iter()
        .zip(receivers)
        .enumerate()
        .map(|(index, (name, inbound))| {
            let (tx, events) = mpsc::channel(64);
            let controller = ChatController::new(
                ChatUser::new(UserId::new(), *name),
                LocalKeys::generate(),
                Arc::new(PresenceRegistry::new()),
                Arc::new(KeyDirectory::new()),
                HubTransport {
                    index,
                    peers: Arc::clone(&senders),
                },
                tx,
                config,
            );
            let subscription = controller.spawn(inbound);
            Node {
                controller,
                events,
                _subscription: subscription,
            }
        })
        .collect()
}

async fn settle_presence(nodes: &mut [Node]) {
    let expected = nodes.len() - 1;
    for node in nodes.iter_mut() {
        for _ in 0..expected {
            assert!(matches!(node.next_event().await, ChatEvent::PresenceChanged(_)));
        }
        node.expect_silence().await;
    }
}

#[tokio::test]
async fn peers_discover_each_other_once() {
    let mut nodes = mesh(&["alice", "bob", "carol"]);
    settle_presence(&mut nodes).await;

    let bob_id = nodes[1].id();
    let seen = nodes[0].controller.registry().get(&bob_id).unwrap();
    assert_eq!(seen.user.display_name, "bob");
    assert_eq!(seen.status, PresenceStatus::Online);

    nodes[1].controller.update_status(PresenceStatus::Away);
    match nodes[0].next_event().await {
        ChatEvent::PresenceChanged(p) => {
            assert_eq!(p.user.id, bob_id);
            assert_eq!(p.status, PresenceStatus::Away);
        }
        other => panic!("unexpected event {other:?}"),
    }
    nodes[0].expect_silence().await;
}

#[tokio::test]
async fn direct_message_is_private_and_room_message_is_public() {
    let mut nodes = mesh(&["alice", "bob", "carol"]);
    settle_presence(&mut nodes).await;

    let parser = ChannelParser::default();
    let mut parsed = parser.parse_message("@bob lunch?", nodes[0].controller.registry());
    assert_eq!(
        parsed.channel,
        ChannelAddress::direct(Recipients::single(nodes[1].id()))
    );
    if let ChannelAddress::DirectMessage { recipients } = &mut parsed.channel {
        recipients.insert(nodes[0].id());
    }
    nodes[0]
        .controller
        .send(parsed.content, parsed.channel)
        .await
        .unwrap();

    for node in [0, 1] {
        match nodes[node].next_event().await {
            ChatEvent::MessageAdded(message) => assert_eq!(message.content, "lunch?"),
            other => panic!("unexpected event {other:?}"),
        }
    }
    nodes[2].expect_silence().await;

    let parsed = parser.parse_message("#general hello all", nodes[2].controller.registry());
    nodes[2]
        .controller
        .send(parsed.content, parsed.channel)
        .await
        .unwrap();
    for node in nodes.iter_mut() {
        match node.next_event().await {
            ChatEvent::MessageAdded(message) => {
                assert_eq!(message.content, "hello all");
                assert_eq!(message.channel, ChannelAddress::room("general"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        node.expect_silence().await;
    }
}

#[tokio::test]
async fn unknown_recipient_key_blocks_the_send() {
    let mut nodes = mesh(&["alice", "bob"]);
    settle_presence(&mut nodes).await;

    let recipients = Recipients::new([nodes[1].id(), UserId::new()]).unwrap();
    let result = nodes[0]
        .controller
        .send("for two", ChannelAddress::direct(recipients))
        .await;

    assert!(result.is_err());
    assert!(matches!(
        nodes[0].next_event().await,
        ChatEvent::SendFailed { .. }
    ));
    nodes[1].expect_silence().await;
}
