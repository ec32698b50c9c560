use std::error::Error;
use std::time::Duration;

use futures::StreamExt;
use libp2p::gossipsub;
use libp2p::mdns;
use libp2p::multiaddr::Protocol;
use libp2p::swarm::{Config as SwarmConfig, SwarmEvent};
use libp2p::{Multiaddr, PeerId, Swarm, identity};
use tokio::sync::mpsc;

use crate::common::{NetworkCommand, NetworkEvent, decode_frame};

use super::behavior::{ChatBehavior, ChatBehaviorEvent, build_behavior};
use super::transport::build_transport;

/// How long the swarm keeps running after the command channel closes, so the
/// last queued publishes reach connected peers.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Network task: publishes frames on the chat topic and hands every decoded
/// inbound frame to the core.
pub struct P2PClient {
    event_sender: mpsc::Sender<NetworkEvent>,
    command_receiver: mpsc::Receiver<NetworkCommand>,
    bootstrap_peers: Vec<(PeerId, Multiaddr)>,
    topic_name: String,
    listen_addr: String,
}

impl P2PClient {
    pub fn new(
        event_sender: mpsc::Sender<NetworkEvent>,
        command_receiver: mpsc::Receiver<NetworkCommand>,
        bootstrap_peers: Vec<(PeerId, Multiaddr)>,
        topic_name: impl Into<String>,
        listen_addr: impl Into<String>,
    ) -> Self {
        Self {
            event_sender,
            command_receiver,
            bootstrap_peers,
            topic_name: topic_name.into(),
            listen_addr: listen_addr.into(),
        }
    }

    /// Runs until the command channel closes, then flushes for
    /// [`SHUTDOWN_GRACE`] before returning.
    pub async fn run(mut self) -> Result<(), Box<dyn Error>> {
        let local_key = identity::Keypair::generate_ed25519();
        let local_peer_id = PeerId::from(local_key.public());
        log::info!("Local PeerID: {local_peer_id:?}");

        let transport = build_transport(&local_key)?;
        let (behavior, topic) = build_behavior(&local_key, local_peer_id, &self.topic_name)?;

        let mut swarm = Swarm::new(
            transport,
            behavior,
            local_peer_id,
            SwarmConfig::with_tokio_executor(),
        );

        swarm.listen_on(self.listen_addr.parse()?)?;

        for (peer_id, addr) in std::mem::take(&mut self.bootstrap_peers) {
            log::info!("Dialing bootstrap peer {peer_id} at {addr}");
            swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
            if let Err(err) = swarm.dial(addr) {
                log::warn!("Failed to dial bootstrap peer {peer_id}: {err}");
            }
        }

        log::info!("Network event loop started on topic {}", self.topic_name);

        loop {
            tokio::select! {
                command = self.command_receiver.recv() => {
                    match command {
                        Some(command) => self.handle_command(command, &mut swarm, &topic),
                        None => break,
                    }
                }
                event = swarm.select_next_some() => {
                    self.handle_swarm_event(event, &mut swarm).await;
                }
            }
        }

        let deadline = tokio::time::sleep(SHUTDOWN_GRACE);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                _ = swarm.select_next_some() => {}
            }
        }

        log::info!("Network event loop stopped");
        Ok(())
    }

    fn handle_command(
        &mut self,
        command: NetworkCommand,
        swarm: &mut Swarm<ChatBehavior>,
        topic: &gossipsub::IdentTopic,
    ) {
        match command {
            NetworkCommand::Publish(bytes) => {
                // Nobody subscribed yet is an expected error on a fresh mesh.
                if let Err(err) = swarm.behaviour_mut().gossipsub.publish(topic.clone(), bytes) {
                    log::warn!("Publish error: {err:?}");
                }
            }
            NetworkCommand::ConnectToPeer { address } => match address.parse::<Multiaddr>() {
                Ok(addr) => {
                    log::info!("Attempting to connect to peer at {addr}");
                    let mut addr_clone = addr.clone();
                    if let Some(Protocol::P2p(peer_id)) = addr_clone.pop() {
                        swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
                    }
                    if let Err(err) = swarm.dial(addr) {
                        log::error!("Failed to dial peer: {err}");
                    }
                }
                Err(err) => {
                    log::error!("Invalid multiaddr '{address}': {err}");
                }
            },
        }
    }

    async fn handle_swarm_event(
        &mut self,
        event: SwarmEvent<ChatBehaviorEvent>,
        swarm: &mut Swarm<ChatBehavior>,
    ) {
        match event {
            SwarmEvent::Behaviour(ChatBehaviorEvent::Gossipsub(gossipsub::Event::Message {
                propagation_source,
                message,
                ..
            })) => match decode_frame(&message.data) {
                Ok(frame) => self.emit(NetworkEvent::FrameReceived(frame)).await,
                Err(err) => {
                    log::warn!("Dropping undecodable frame from {propagation_source}: {err}");
                }
            },
            SwarmEvent::Behaviour(ChatBehaviorEvent::Mdns(mdns::Event::Discovered(list))) => {
                for (peer_id, _) in list {
                    swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
                }
            }
            SwarmEvent::Behaviour(ChatBehaviorEvent::Mdns(mdns::Event::Expired(list))) => {
                for (peer_id, _) in list {
                    swarm
                        .behaviour_mut()
                        .gossipsub
                        .remove_explicit_peer(&peer_id);
                }
            }
            SwarmEvent::NewListenAddr { address, .. } => {
                log::info!("Listening on {address:?}");
            }
            SwarmEvent::ConnectionEstablished {
                peer_id,
                num_established,
                ..
            } => {
                log::debug!("Connection established with {peer_id}");
                if let Some(event) = peer_link_event(peer_id, num_established.get(), true) {
                    self.emit(event).await;
                }
            }
            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                ..
            } => {
                log::debug!("Connection closed with {peer_id}");
                if let Some(event) = peer_link_event(peer_id, num_established, false) {
                    self.emit(event).await;
                }
            }
            _ => {}
        }
    }

    async fn emit(&self, event: NetworkEvent) {
        if let Err(err) = self.event_sender.send(event).await {
            log::debug!("Chat core no longer listening: {err}");
        }
    }
}

/// Reports a peer once per link, however it was reached (mDNS, bootstrap or
/// an explicit dial): on its first connection and after its last one closes.
/// `connections` is the count after the change.
fn peer_link_event(peer_id: PeerId, connections: u32, opened: bool) -> Option<NetworkEvent> {
    match (opened, connections) {
        (true, 1) => Some(NetworkEvent::PeerConnected(peer_id.to_string())),
        (false, 0) => Some(NetworkEvent::PeerDisconnected(peer_id.to_string())),
        _ => None,
    }
}

/// Splits `/ip4/.../tcp/.../p2p/<PeerId>` entries into dialable pairs,
/// skipping malformed ones.
pub fn parse_bootstrap_peers(entries: &[String]) -> Vec<(PeerId, Multiaddr)> {
    entries
        .iter()
        .filter_map(|entry| {
            let mut addr: Multiaddr = match entry.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    log::warn!("Invalid multiaddr `{entry}`: {err}");
                    return None;
                }
            };

            let peer_id = match addr.pop() {
                Some(Protocol::P2p(peer)) => peer,
                _ => {
                    log::warn!("Multiaddr `{entry}` missing /p2p/PeerId suffix");
                    return None;
                }
            };

            Some((peer_id, addr))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_entries_need_peer_suffix() {
        let peer = PeerId::random();
        let entries = vec![
            format!("/ip4/10.0.0.1/tcp/4001/p2p/{peer}"),
            "/ip4/10.0.0.2/tcp/4001".to_string(),
            "not an address".to_string(),
        ];

        let parsed = parse_bootstrap_peers(&entries);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].0, peer);
        assert_eq!(parsed[0].1, "/ip4/10.0.0.1/tcp/4001".parse::<Multiaddr>().unwrap());
    }

    #[test]
    fn peer_is_reported_on_first_and_last_connection_only() {
        let peer = PeerId::random();

        assert!(matches!(
            peer_link_event(peer, 1, true),
            Some(NetworkEvent::PeerConnected(id)) if id == peer.to_string()
        ));
        assert!(peer_link_event(peer, 2, true).is_none());
        assert!(peer_link_event(peer, 1, false).is_none());
        assert!(matches!(
            peer_link_event(peer, 0, false),
            Some(NetworkEvent::PeerDisconnected(id)) if id == peer.to_string()
        ));
    }
}
