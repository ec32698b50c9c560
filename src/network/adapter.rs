use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::common::NetworkCommand;

/// Outbound half of the mesh as seen by the chat core.
///
/// `send` is fire-and-forget: delivery is best effort, unordered and may
/// duplicate. Failures are logged by the implementation, never returned.
pub trait ChatTransport: Send + Sync {
    fn send(&self, encoded: Vec<u8>);
}

impl<T: ChatTransport + ?Sized> ChatTransport for Arc<T> {
    fn send(&self, encoded: Vec<u8>) {
        (**self).send(encoded)
    }
}

/// Transport backed by the libp2p network task.
#[derive(Debug, Clone)]
pub struct MeshTransport {
    commands: mpsc::Sender<NetworkCommand>,
}

impl MeshTransport {
    pub fn new(commands: mpsc::Sender<NetworkCommand>) -> Self {
        Self { commands }
    }

    /// Asks the network task to dial `address`.
    pub fn connect(&self, address: impl Into<String>) {
        self.submit(NetworkCommand::ConnectToPeer {
            address: address.into(),
        });
    }

    fn submit(&self, command: NetworkCommand) {
        match self.commands.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::warn!("Network command queue full; dropping outgoing command");
            }
            Err(TrySendError::Closed(_)) => {
                log::warn!("Network task stopped; dropping outgoing command");
            }
        }
    }
}

impl ChatTransport for MeshTransport {
    fn send(&self, encoded: Vec<u8>) {
        self.submit(NetworkCommand::Publish(encoded));
    }
}
