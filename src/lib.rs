//! Addressing, presence and direct message encryption for a serverless chat
//! running over a broadcast mesh.

pub mod addressing;
pub mod common;
pub mod config;
pub mod controller;
pub mod crypto;
pub mod delivery;
pub mod error;
pub mod network;
pub mod presence;

pub use addressing::{ChannelParser, ParsedInput};
pub use controller::{ChatController, Subscription};
pub use delivery::is_received;
pub use error::{ChatError, Result};
pub use presence::PresenceRegistry;
