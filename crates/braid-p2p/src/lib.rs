//! Peer transport (§6.2): the wire contract laggers and peers use to
//! exchange catchup chains, hash-tree batches, and freshly-authored joints.
//!
//! GossipSub broadcasts new joints to all connected peers. Kademlia DHT
//! handles peer discovery and bootstrap. Identify and Ping maintain
//! connection metadata and liveness.

pub mod config;
pub mod message;
pub mod network;

pub use config::P2pConfig;
pub use message::{HistoryOrder, LightAaResponsesRequest, LightHistoryRequest, P2pMessage};
pub use network::{P2pHandle, P2pNetwork};
