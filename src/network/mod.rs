//! Mesh transport adapter: libp2p gossipsub with mDNS discovery.

pub mod adapter;
pub mod behavior;
pub mod client;
pub mod transport;

pub use adapter::{ChatTransport, MeshTransport};
pub use client::{P2PClient, parse_bootstrap_peers};
