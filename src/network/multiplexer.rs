use crate::network::framing;
use crate::{RelayError, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Opens relay connections on behalf of one peer id.
///
/// The relay treats the first connection for an id as the primary channel
/// and every further connection with the same id as a secondary channel, so
/// opening a channel is the same handshake either way.
#[derive(Debug, Clone)]
pub struct ChannelMultiplexer {
    peer_id: String,
    server_addr: SocketAddr,
    handshake_timeout: Duration,
    active_secondaries: Arc<AtomicUsize>,
}

/// A secondary connection. Counted as active until dropped or closed.
#[derive(Debug)]
pub struct SecondaryChannel {
    stream: TcpStream,
    local_port: u16,
    _active: ActiveGuard,
}

#[derive(Debug)]
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ChannelMultiplexer {
    pub fn new(
        peer_id: impl Into<String>,
        server_addr: SocketAddr,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            peer_id: peer_id.into(),
            server_addr,
            handshake_timeout,
            active_secondaries: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    /// Connects and completes the handshake, waiting at most the handshake
    /// timeout for the acknowledgement byte.
    pub async fn open_channel(&self) -> Result<TcpStream> {
        let mut stream = TcpStream::connect(self.server_addr).await?;
        stream.set_nodelay(true)?;

        framing::send_handshake(&mut stream, &self.peer_id).await?;

        match timeout(self.handshake_timeout, framing::read_ack(&mut stream)).await {
            Ok(Ok(())) => {
                debug!(
                    "Channel for {} established on local port {}",
                    self.peer_id,
                    stream.local_addr()?.port()
                );
                Ok(stream)
            }
            Ok(Err(e)) => {
                warn!("Handshake for {} failed: {}", self.peer_id, e);
                Err(e)
            }
            Err(_) => {
                warn!("Handshake for {} timed out", self.peer_id);
                Err(RelayError::HandshakeTimeout)
            }
        }
    }

    pub async fn open_secondary(&self) -> Result<SecondaryChannel> {
        let stream = self.open_channel().await?;
        let local_port = stream.local_addr()?.port();
        self.active_secondaries.fetch_add(1, Ordering::SeqCst);
        Ok(SecondaryChannel {
            stream,
            local_port,
            _active: ActiveGuard(self.active_secondaries.clone()),
        })
    }

    pub fn active_secondaries(&self) -> usize {
        self.active_secondaries.load(Ordering::SeqCst)
    }
}

impl SecondaryChannel {
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub async fn close(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!("Secondary channel {} shutdown: {}", self.local_port, e);
        }
    }
}
