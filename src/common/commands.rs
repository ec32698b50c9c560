/// Commands handed from the chat core down to the network task.
#[derive(Debug, Clone)]
pub enum NetworkCommand {
    /// Broadcast an encoded frame on the chat topic. Best effort, no acknowledgement.
    Publish(Vec<u8>),
    /// Dial a peer manually by multiaddr, e.g. `/ip4/192.168.1.1/tcp/9000/p2p/12D3KooW...`
    ConnectToPeer { address: String },
}
