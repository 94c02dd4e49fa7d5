//! Peer-to-peer synchronization
//!
//! Framed command messages, the peer registry with its pending block-fetch
//! queue, and the node server that answers and issues requests.

pub mod message;
pub mod registry;
pub mod server;

pub use message::{Message, COMMAND_LENGTH, NODE_VERSION};
pub use registry::PeerRegistry;
pub use server::Server;
