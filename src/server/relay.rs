use crate::config::ServerSettings;
use crate::network::framing;
use crate::network::protocol::{
    ControlCommand, DataKind, Envelope, RequestParameter, TransferHeader,
};
use crate::network::registry::{Channel, PeerRegistry};
use crate::server::events::ServerEvent;
use crate::server::handler::DatabaseHandler;
use crate::transfer::TransferProgress;
use crate::{RelayError, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// The relay: accepts peer connections and forwards envelopes between them.
///
/// The first connection a peer id makes is its primary channel. Any further
/// connection under the same id while the primary is alive becomes a
/// secondary channel, used for one file transfer at a time.
#[derive(Clone)]
pub struct RelayServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    settings: ServerSettings,
    registry: Arc<PeerRegistry>,
    handler: Option<Arc<dyn DatabaseHandler>>,
    events: mpsc::UnboundedSender<ServerEvent>,
    running: Mutex<Option<Running>>,
}

struct Running {
    addr: SocketAddr,
    shutdown: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Primary,
    Secondary,
}

impl RelayServer {
    pub fn new(
        settings: ServerSettings,
        handler: Option<Arc<dyn DatabaseHandler>>,
    ) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let server = Self {
            inner: Arc::new(ServerInner {
                settings,
                registry: Arc::new(PeerRegistry::new()),
                handler,
                events,
                running: Mutex::new(None),
            }),
        };
        (server, events_rx)
    }

    pub fn registry(&self) -> Arc<PeerRegistry> {
        self.inner.registry.clone()
    }

    pub async fn is_open(&self) -> bool {
        self.inner.running.lock().await.is_some()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.running.lock().await.as_ref().map(|r| r.addr)
    }

    /// Binds and starts accepting. Opening a running server returns the
    /// address it is already bound to.
    pub async fn open(&self) -> Result<SocketAddr> {
        let mut running = self.inner.running.lock().await;
        if let Some(running) = running.as_ref() {
            return Ok(running.addr);
        }

        self.inner.settings.validate()?;
        let bind_addr = self.inner.settings.get_bind_address()?;
        let listener = TcpListener::bind(bind_addr).await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();

        let inner = self.inner.clone();
        let token = shutdown.clone();
        tokio::spawn(async move {
            inner.accept_loop(listener, token).await;
        });

        *running = Some(Running { addr, shutdown });
        info!("Relay listening on {}", addr);
        self.inner.emit(ServerEvent::Started { addr });
        Ok(addr)
    }

    /// Stops accepting and disconnects every peer. Returns false if the
    /// server was not running.
    pub async fn close(&self) -> bool {
        let Some(running) = self.inner.running.lock().await.take() else {
            return false;
        };
        running.shutdown.cancel();

        for peer_id in self.inner.registry.remove_all().await {
            self.inner.emit(ServerEvent::PeerOffline {
                peer_id,
                graceful: true,
            });
        }

        info!("Relay on {} stopped", running.addr);
        self.inner.emit(ServerEvent::Stopped);
        true
    }

    /// Disconnects one peer and all of its channels.
    pub async fn close_peer(&self, peer_id: &str) -> bool {
        if !self.inner.registry.remove_primary(peer_id).await {
            return false;
        }
        info!("Disconnected peer {}", peer_id);
        self.inner.emit(ServerEvent::PeerOffline {
            peer_id: peer_id.to_string(),
            graceful: true,
        });
        true
    }

    pub async fn peer_ids(&self) -> Vec<String> {
        self.inner.registry.peer_ids().await
    }

    /// The peer's address once per channel, primary first.
    pub async fn peer_endpoints(&self, peer_id: &str) -> Vec<SocketAddr> {
        self.inner.registry.endpoints(peer_id).await
    }
}

impl ServerInner {
    fn emit(&self, event: ServerEvent) {
        let _ = self.events.send(event);
    }

    fn report(&self, context: String, err: &RelayError) {
        self.emit(ServerEvent::Error {
            context,
            message: err.to_string(),
        });
    }

    fn transfer_failed(&self, envelope: &Envelope, reason: String) {
        warn!(
            "Transfer {} -> {} failed: {}",
            envelope.source, envelope.target, reason
        );
        self.emit(ServerEvent::TransferFailed {
            source: envelope.source.clone(),
            target: envelope.target.clone(),
            reason,
        });
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, endpoint)) => {
                        debug!("Accepted connection from {}", endpoint);
                        let inner = self.clone();
                        let token = shutdown.clone();
                        tokio::spawn(async move {
                            inner.handle_connection(stream, endpoint, token).await;
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        self.report("accept".to_string(), &RelayError::from(e));
                    }
                },
            }
        }
        debug!("Accept loop stopped");
    }

    async fn handle_connection(
        self: Arc<Self>,
        mut stream: TcpStream,
        endpoint: SocketAddr,
        shutdown: CancellationToken,
    ) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", endpoint, e);
        }

        let handshake = timeout(
            self.settings.handshake_timeout(),
            framing::read_handshake(&mut stream),
        )
        .await
        .unwrap_or(Err(RelayError::HandshakeTimeout));

        let peer_id = match handshake {
            Ok(peer_id) => peer_id,
            Err(e) => {
                warn!("Handshake from {} failed: {}", endpoint, e);
                self.report(format!("handshake from {}", endpoint), &e);
                return;
            }
        };

        if let Err(e) = framing::send_ack(&mut stream).await {
            warn!("Failed to acknowledge {} at {}: {}", peer_id, endpoint, e);
            return;
        }

        let (reader, writer) = stream.into_split();
        let port = endpoint.port();
        let channel = Channel::new(port, writer);

        let role = if self.registry.register(&peer_id, endpoint, channel.clone()).await {
            info!("Peer {} online from {}", peer_id, endpoint);
            self.emit(ServerEvent::PeerOnline {
                peer_id: peer_id.clone(),
                endpoint,
            });
            Role::Primary
        } else if self.registry.add_secondary(&peer_id, channel.clone()).await {
            debug!("Peer {} opened secondary channel {}", peer_id, port);
            self.emit(ServerEvent::ChannelOpened {
                peer_id: peer_id.clone(),
                port,
            });
            Role::Secondary
        } else {
            warn!("Could not register channel {} for {}", port, peer_id);
            channel.close();
            return;
        };

        let served = tokio::select! {
            _ = shutdown.cancelled() => Ok(()),
            _ = channel.closed() => Ok(()),
            served = self.serve(role, &peer_id, port, reader) => served,
        };

        let graceful = match &served {
            Ok(()) => true,
            Err(e) => {
                debug!("Channel {} of {} ended: {}", port, peer_id, e);
                false
            }
        };

        match role {
            Role::Primary => {
                // A reconnected peer must not be torn down by its old connection.
                let current = self.registry.primary(&peer_id).await.map(|c| c.port());
                if current == Some(port) && self.registry.remove_primary(&peer_id).await {
                    info!("Peer {} offline", peer_id);
                    self.emit(ServerEvent::PeerOffline { peer_id, graceful });
                }
            }
            Role::Secondary => {
                if self.registry.remove_secondary(&peer_id, port).await {
                    debug!("Secondary channel {} of {} closed", port, peer_id);
                    self.emit(ServerEvent::ChannelClosed {
                        peer_id,
                        port,
                        graceful,
                    });
                }
            }
        }
    }

    async fn serve(
        self: &Arc<Self>,
        role: Role,
        peer_id: &str,
        port: u16,
        mut reader: OwnedReadHalf,
    ) -> Result<()> {
        match role {
            Role::Primary => self.serve_primary(peer_id, &mut reader).await,
            Role::Secondary => self.serve_secondary(peer_id, port, &mut reader).await,
        }
    }

    /// Header loop of a primary channel. Undecodable headers are dropped and
    /// the loop continues; read failures end the channel.
    async fn serve_primary(
        self: &Arc<Self>,
        peer_id: &str,
        reader: &mut OwnedReadHalf,
    ) -> Result<()> {
        let mut buf = vec![0u8; self.settings.buffer_size];
        loop {
            let Some(frame) = framing::read_frame(reader, self.settings.max_frame_size).await?
            else {
                return Ok(());
            };

            let envelope = match Envelope::decode(&frame, frame.len()) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!("Dropping undecodable envelope from {}: {}", peer_id, e);
                    self.report(format!("decode from {}", peer_id), &e);
                    continue;
                }
            };

            match envelope.kind {
                DataKind::Text => self.forward_text(&envelope, &frame).await?,
                DataKind::Image => {
                    // Without a size the body cannot be skipped, so the channel ends.
                    let header = envelope.transfer_header()?;
                    self.relay_image(&envelope, &frame, &header, reader, &mut buf).await?;
                }
                DataKind::Request => self.dispatch_request(peer_id, envelope),
                DataKind::File => {
                    let header = envelope.transfer_header()?;
                    warn!(
                        "Dropping file {} from {} sent on its primary channel",
                        header.name, peer_id
                    );
                    self.relay_body(&frame, header.size, reader, None, &mut buf)
                        .await?;
                }
                other => debug!("Dropping {:?} envelope from {}", other, peer_id),
            }
        }
    }

    /// A secondary channel either carries a single outgoing file, or answers
    /// an `AddSocket` negotiation and then only receives until it closes.
    async fn serve_secondary(
        &self,
        peer_id: &str,
        port: u16,
        reader: &mut OwnedReadHalf,
    ) -> Result<()> {
        let max_frame = self.settings.max_frame_size;
        let Some(frame) = framing::read_frame(reader, max_frame).await? else {
            return Ok(());
        };

        let envelope = Envelope::decode(&frame, frame.len())?;
        match (envelope.kind, envelope.request_id) {
            (DataKind::File, _) => {
                let header = envelope.transfer_header()?;
                self.relay_file(&envelope, &frame, &header, reader).await
            }
            (DataKind::Request, Some(negotiation)) if is_add_socket(&envelope) => {
                if !self.registry.answer(peer_id, port, negotiation).await {
                    return Err(RelayError::Transfer(format!(
                        "unexpected answer {} from {} on channel {}",
                        negotiation, peer_id, port
                    )));
                }
                debug!("Channel {} of {} answers {}", port, peer_id, negotiation);
                match framing::read_frame(reader, max_frame).await? {
                    None => Ok(()),
                    Some(_) => Err(RelayError::Transfer(format!(
                        "{} wrote on receiving channel {}",
                        peer_id, port
                    ))),
                }
            }
            (kind, _) => Err(RelayError::Transfer(format!(
                "{:?} header from {} on secondary channel {}",
                kind, peer_id, port
            ))),
        }
    }

    async fn forward_text(&self, envelope: &Envelope, frame: &[u8]) -> Result<()> {
        let Some(target) = self.registry.primary(&envelope.target).await else {
            debug!(
                "Text from {} to unknown peer {} dropped",
                envelope.source, envelope.target
            );
            return Ok(());
        };

        if let Err(e) = target.send(&framing::frame_bytes(frame)?).await {
            warn!("Forwarding text to {} failed: {}", envelope.target, e);
            self.drop_target(&envelope.target, target.port(), Role::Primary).await;
        }
        Ok(())
    }

    async fn relay_image(
        &self,
        envelope: &Envelope,
        frame: &[u8],
        header: &TransferHeader,
        reader: &mut OwnedReadHalf,
        buf: &mut [u8],
    ) -> Result<()> {
        let target = self.registry.primary(&envelope.target).await;
        let relayed = self
            .relay_body(frame, header.size, reader, target.as_ref(), buf)
            .await;

        match (target, relayed) {
            (None, relayed) => {
                self.transfer_failed(envelope, format!("unknown peer {}", envelope.target));
                relayed.map(|_| ())
            }
            (Some(target), Err(e)) => {
                // The target already holds a partial body; its stream cannot recover.
                self.drop_target(&envelope.target, target.port(), Role::Primary).await;
                self.transfer_failed(envelope, e.to_string());
                Err(e)
            }
            (Some(target), Ok(Some(e))) => {
                self.drop_target(&envelope.target, target.port(), Role::Primary).await;
                self.transfer_failed(envelope, e.to_string());
                Ok(())
            }
            (Some(_), Ok(None)) => {
                debug!(
                    "Relayed image {} ({} bytes) {} -> {}",
                    header.name, header.size, envelope.source, envelope.target
                );
                Ok(())
            }
        }
    }

    /// Asks the target for a fresh secondary channel, waits for the channel
    /// that answers this negotiation, then streams the body into it.
    async fn relay_file(
        &self,
        envelope: &Envelope,
        frame: &[u8],
        header: &TransferHeader,
        reader: &mut OwnedReadHalf,
    ) -> Result<()> {
        let target_id = envelope.target.as_str();
        let Some(primary) = self.registry.primary(target_id).await else {
            let err = RelayError::Forward(format!("unknown peer {}", target_id));
            self.transfer_failed(envelope, err.to_string());
            return Err(err);
        };

        let negotiation = Uuid::new_v4();
        let request = Envelope::add_socket(&envelope.source, target_id, negotiation);
        if let Err(e) = send_envelope(&primary, &request).await {
            self.drop_target(target_id, primary.port(), Role::Primary).await;
            self.transfer_failed(envelope, e.to_string());
            return Err(e);
        }

        let Some(secondary) = self
            .registry
            .wait_for_answer(target_id, negotiation, self.settings.secondary_grace())
            .await
        else {
            let err = RelayError::NegotiationTimeout(target_id.to_string());
            self.transfer_failed(envelope, err.to_string());
            return Err(err);
        };
        debug!(
            "Relaying {} from {} to {} over port {}",
            header.name,
            envelope.source,
            target_id,
            secondary.port()
        );

        let mut buf = vec![0u8; self.settings.buffer_size];
        match self
            .relay_body(frame, header.size, reader, Some(&secondary), &mut buf)
            .await
        {
            Ok(None) => {
                info!(
                    "Relayed file {} ({} bytes) {} -> {}",
                    header.name, header.size, envelope.source, target_id
                );
                Ok(())
            }
            Ok(Some(e)) => {
                self.drop_target(target_id, secondary.port(), Role::Secondary).await;
                self.transfer_failed(envelope, e.to_string());
                Ok(())
            }
            Err(e) => {
                self.drop_target(target_id, secondary.port(), Role::Secondary).await;
                self.transfer_failed(envelope, e.to_string());
                Err(e)
            }
        }
    }

    /// Copies the header frame and exactly `size` body bytes from `reader` to
    /// `target`, holding the target's writer throughout.
    ///
    /// The body is always drained from the source. `Err` means the source
    /// failed; `Ok(Some(_))` means only the target did.
    async fn relay_body(
        &self,
        frame: &[u8],
        size: u64,
        reader: &mut OwnedReadHalf,
        target: Option<&Channel>,
        buf: &mut [u8],
    ) -> Result<Option<RelayError>> {
        let mut failure = None;
        let mut lock = match target {
            Some(channel) => match channel.lock().await {
                Ok(lock) => Some(lock),
                Err(e) => {
                    failure = Some(e);
                    None
                }
            },
            None => None,
        };

        let framed = framing::frame_bytes(frame)?;
        let write_failed = match lock.as_mut() {
            Some(lock) => lock.write(&framed).await.err(),
            None => None,
        };
        if let Some(e) = write_failed {
            failure = Some(e);
            lock = None;
        }

        let mut progress = TransferProgress::new(size);
        while !progress.is_complete() {
            let n = framing::read_body_chunk(reader, buf, progress.remaining()).await?;
            progress.advance(n as u64)?;

            let write_failed = match lock.as_mut() {
                Some(lock) => lock.write(&buf[..n]).await.err(),
                None => None,
            };
            if let Some(e) = write_failed {
                failure = Some(e);
                lock = None;
            }
        }
        Ok(failure)
    }

    fn dispatch_request(self: &Arc<Self>, peer_id: &str, envelope: Envelope) {
        match envelope.request_parameter() {
            Ok(RequestParameter::Database {
                operation,
                argument,
            }) => {
                let Some(handler) = self.handler.clone() else {
                    warn!("No database handler for {} from {}", operation, peer_id);
                    return;
                };
                let inner = self.clone();
                tokio::spawn(async move {
                    let result = handler
                        .handle(&operation, &argument, envelope.payload.clone())
                        .await;
                    let Some(result) = result else {
                        debug!("{} from {} produced no result", operation, envelope.source);
                        return;
                    };
                    let reply = Envelope::request_result(&envelope, result);
                    inner.deliver(&envelope.source, &reply).await;
                });
            }
            Ok(RequestParameter::Control(command)) => {
                warn!("Ignoring control command {:?} sent by {}", command, peer_id);
            }
            Err(e) => {
                warn!("Invalid request from {}: {}", peer_id, e);
                self.report(format!("request from {}", peer_id), &e);
            }
        }
    }

    async fn deliver(&self, peer_id: &str, envelope: &Envelope) {
        let Some(channel) = self.registry.primary(peer_id).await else {
            debug!("{} went away before its reply was ready", peer_id);
            return;
        };
        if let Err(e) = send_envelope(&channel, envelope).await {
            warn!("Delivering reply to {} failed: {}", peer_id, e);
            if matches!(e, RelayError::Serialization(_)) {
                self.report(format!("reply to {}", peer_id), &e);
            } else {
                self.drop_target(peer_id, channel.port(), Role::Primary).await;
            }
        }
    }

    /// Tears down a target whose channel could not be written. A primary
    /// failure takes the whole peer with it.
    async fn drop_target(&self, peer_id: &str, port: u16, role: Role) {
        match role {
            Role::Primary => {
                if self.registry.remove_primary(peer_id).await {
                    warn!("Peer {} dropped after forward failure", peer_id);
                    self.emit(ServerEvent::PeerOffline {
                        peer_id: peer_id.to_string(),
                        graceful: false,
                    });
                }
            }
            Role::Secondary => {
                if self.registry.remove_secondary(peer_id, port).await {
                    self.emit(ServerEvent::ChannelClosed {
                        peer_id: peer_id.to_string(),
                        port,
                        graceful: false,
                    });
                }
            }
        }
    }
}

fn is_add_socket(envelope: &Envelope) -> bool {
    matches!(
        envelope.request_parameter(),
        Ok(RequestParameter::Control(ControlCommand::AddSocket))
    )
}

async fn send_envelope(channel: &Channel, envelope: &Envelope) -> Result<()> {
    let data = envelope.encode()?;
    channel.send(&framing::frame_bytes(&data)?).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    fn local_settings() -> ServerSettings {
        ServerSettings {
            bind_address: "127.0.0.1".to_string(),
            port: 0,
            secondary_grace_ms: 200,
            ..ServerSettings::default()
        }
    }

    async fn connect(addr: SocketAddr, peer_id: &str) -> TcpStream {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        framing::send_handshake(&mut stream, peer_id).await.unwrap();
        framing::read_ack(&mut stream).await.unwrap();
        stream
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<ServerEvent>) -> ServerEvent {
        timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let (server, mut events) = RelayServer::new(local_settings(), None);
        let addr = server.open().await.unwrap();
        assert_eq!(server.open().await.unwrap(), addr);
        assert_eq!(next_event(&mut events).await, ServerEvent::Started { addr });

        assert!(server.close().await);
        assert!(!server.close().await);
        assert_eq!(next_event(&mut events).await, ServerEvent::Stopped);
        assert!(!server.is_open().await);
    }

    #[tokio::test]
    async fn test_second_connection_becomes_secondary() {
        let (server, mut events) = RelayServer::new(local_settings(), None);
        let addr = server.open().await.unwrap();
        next_event(&mut events).await;

        let _primary = connect(addr, "alice").await;
        assert!(matches!(
            next_event(&mut events).await,
            ServerEvent::PeerOnline { peer_id, .. } if peer_id == "alice"
        ));

        let secondary = connect(addr, "alice").await;
        let port = secondary.local_addr().unwrap().port();
        assert_eq!(
            next_event(&mut events).await,
            ServerEvent::ChannelOpened {
                peer_id: "alice".to_string(),
                port
            }
        );
        assert_eq!(server.peer_ids().await, vec!["alice".to_string()]);
        assert_eq!(server.peer_endpoints("alice").await.len(), 2);

        drop(secondary);
        assert_eq!(
            next_event(&mut events).await,
            ServerEvent::ChannelClosed {
                peer_id: "alice".to_string(),
                port,
                graceful: true
            }
        );
        assert_eq!(server.peer_endpoints("alice").await.len(), 1);
    }

    #[tokio::test]
    async fn test_close_peer_disconnects() {
        let (server, mut events) = RelayServer::new(local_settings(), None);
        let addr = server.open().await.unwrap();
        next_event(&mut events).await;

        let mut stream = connect(addr, "bob").await;
        next_event(&mut events).await;

        assert!(server.close_peer("bob").await);
        assert!(!server.close_peer("bob").await);
        assert_eq!(
            next_event(&mut events).await,
            ServerEvent::PeerOffline {
                peer_id: "bob".to_string(),
                graceful: true
            }
        );

        let closed = timeout(Duration::from_secs(2), framing::read_frame(&mut stream, 1024))
            .await
            .unwrap();
        assert!(matches!(closed, Ok(None) | Err(_)));
        assert!(server.peer_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_open_rejects_zero_buffer() {
        let settings = ServerSettings {
            buffer_size: 0,
            ..local_settings()
        };
        let (server, _events) = RelayServer::new(settings, None);
        assert!(matches!(server.open().await, Err(RelayError::Config(_))));
        assert!(!server.is_open().await);
    }

    #[tokio::test]
    async fn test_file_header_on_primary_is_skipped() {
        let (server, mut events) = RelayServer::new(local_settings(), None);
        let addr = server.open().await.unwrap();
        next_event(&mut events).await;

        let mut alice = connect(addr, "alice").await;
        next_event(&mut events).await;
        let mut bob = connect(addr, "bob").await;
        next_event(&mut events).await;

        let header = TransferHeader::new("x.bin", 8);
        let file = Envelope::file("alice", "bob", &header);
        framing::write_envelope(&mut alice, &file).await.unwrap();
        alice.write_all(&[0xFF; 8]).await.unwrap();
        let text = Envelope::text("alice", "bob", "after");
        framing::write_envelope(&mut alice, &text).await.unwrap();

        let frame = timeout(Duration::from_secs(2), framing::read_frame(&mut bob, 1 << 20))
            .await
            .unwrap()
            .unwrap()
            .expect("text frame");
        let received = Envelope::decode(&frame, frame.len()).unwrap();
        assert_eq!(received.kind, DataKind::Text);
        assert_eq!(received.parameter, "after");
        assert_eq!(
            server.peer_ids().await,
            vec!["alice".to_string(), "bob".to_string()]
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_garbage_header_is_dropped() {
        let (server, mut events) = RelayServer::new(local_settings(), None);
        let addr = server.open().await.unwrap();
        next_event(&mut events).await;

        let mut alice = connect(addr, "alice").await;
        next_event(&mut events).await;

        framing::write_frame(&mut alice, b"not an envelope").await.unwrap();
        assert!(matches!(
            next_event(&mut events).await,
            ServerEvent::Error { .. }
        ));
        assert!(server.registry().contains("alice").await);
    }
}
