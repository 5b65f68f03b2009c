use crate::network::protocol::RequestResult;
use uuid::Uuid;

/// Notifications raised by a [`PeerClient`](crate::client::PeerClient).
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Lifecycle message such as "connected" or "server disconnected".
    Notice(String),
    TextReceived {
        source: String,
        message: String,
    },
    ImageChunk(ChunkReceived),
    FileChunk(ChunkReceived),
    /// An incoming image or file ended before its last byte. Chunks already
    /// reported for it are all there will be.
    TransferAborted {
        source: String,
        name: String,
        reason: String,
    },
    RequestResult {
        request_id: Option<Uuid>,
        result: RequestResult,
    },
    Error {
        context: String,
        message: String,
    },
    /// The primary channel is gone; the client has closed itself.
    Disconnected,
}

/// One piece of an incoming image or file.
#[derive(Debug, Clone)]
pub struct ChunkReceived {
    pub source: String,
    pub name: String,
    pub total_size: u64,
    pub data: Vec<u8>,
}
