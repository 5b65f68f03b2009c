pub mod events;
pub mod peer;
pub mod pending;

pub use events::{ChunkReceived, ClientEvent};
pub use peer::PeerClient;
pub use pending::{PendingRequest, PendingRequests};
