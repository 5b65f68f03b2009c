use crate::client::events::{ChunkReceived, ClientEvent};
use crate::client::pending::{PendingRequest, PendingRequests};
use crate::config::ClientSettings;
use crate::network::framing;
use crate::network::multiplexer::ChannelMultiplexer;
use crate::network::protocol::{
    ControlCommand, DataKind, Envelope, Payload, RequestParameter, RequestResult, TransferHeader,
};
use crate::transfer::TransferProgress;
use crate::{RelayError, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A named peer connected to the relay.
///
/// Owns one primary channel for text, images, control and requests, and
/// opens secondary channels on demand for files. Everything the client
/// receives is reported through the event receiver returned by
/// [`PeerClient::new`].
#[derive(Clone)]
pub struct PeerClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    settings: ClientSettings,
    multiplexer: ChannelMultiplexer,
    open: AtomicBool,
    primary: Mutex<Option<OwnedWriteHalf>>,
    shutdown: std::sync::Mutex<CancellationToken>,
    pending: Arc<PendingRequests>,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl PeerClient {
    pub fn new(
        settings: ClientSettings,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>)> {
        settings.validate()?;
        framing::validate_peer_id(&settings.peer_id)?;
        let server_addr = settings.get_server_address()?;
        let multiplexer = ChannelMultiplexer::new(
            settings.peer_id.clone(),
            server_addr,
            settings.handshake_timeout(),
        );
        let (events, events_rx) = mpsc::unbounded_channel();

        let client = Self {
            inner: Arc::new(ClientInner {
                settings,
                multiplexer,
                open: AtomicBool::new(false),
                primary: Mutex::new(None),
                shutdown: std::sync::Mutex::new(CancellationToken::new()),
                pending: Arc::new(PendingRequests::new()),
                events,
            }),
        };
        Ok((client, events_rx))
    }

    pub fn peer_id(&self) -> &str {
        &self.inner.settings.peer_id
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.primary.lock().await.is_some()
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn active_secondaries(&self) -> usize {
        self.inner.multiplexer.active_secondaries()
    }

    /// Returns false if the client was already open.
    pub fn open(&self) -> bool {
        if self
            .inner
            .open
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        *self.inner.shutdown_token() = CancellationToken::new();
        self.inner.notice("Client opened");
        true
    }

    /// Returns false if the client was already closed.
    pub async fn close(&self) -> bool {
        let closed = self.inner.shut_down().await;
        if closed {
            self.inner.notice("Client closed");
        }
        closed
    }

    /// Connects the primary channel and starts its receive loop.
    pub async fn connect(&self) -> Result<()> {
        if !self.is_open() {
            return Err(RelayError::ClientClosed);
        }
        if self.is_connected().await {
            return Ok(());
        }

        self.inner.notice("Connecting to relay");
        let stream = match self.inner.multiplexer.open_channel().await {
            Ok(stream) => stream,
            Err(e) => {
                self.inner.notice("Unable to connect to relay");
                self.inner.report("connect", &e);
                return Err(e);
            }
        };

        let (reader, writer) = stream.into_split();
        *self.inner.primary.lock().await = Some(writer);

        let token = self.inner.shutdown_token().clone();
        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.run_primary(reader, token).await;
        });

        info!("Peer {} connected to relay", self.peer_id());
        self.inner.notice("Connected to relay");
        Ok(())
    }

    pub async fn send_text(&self, target: &str, message: &str) -> Result<()> {
        let envelope = Envelope::text(self.peer_id(), target, message);
        self.inner.send_primary(&envelope).await.inspect_err(|e| {
            self.inner.report("send text", e);
        })
    }

    /// Sends an image over the primary channel: header first, then the raw
    /// bytes in paced chunks.
    pub async fn send_image(&self, target: &str, path: impl AsRef<Path>) -> Result<()> {
        let result = self.inner.send_image(target, path.as_ref()).await;
        if let Err(e) = &result {
            self.inner.report("send image", e);
        }
        result
    }

    /// Streams a file over a freshly opened secondary channel so the primary
    /// channel stays free.
    pub async fn send_file(&self, target: &str, path: impl AsRef<Path>) -> Result<()> {
        let result = self.inner.send_file(target, path.as_ref()).await;
        if let Err(e) = &result {
            self.inner.report("send file", e);
        }
        result
    }

    /// Sends a database request and returns without waiting for the reply.
    /// The reply arrives as [`ClientEvent::RequestResult`] and through the
    /// returned handle.
    pub async fn send_request(
        &self,
        payload: Payload,
        operation: &str,
        argument: &str,
    ) -> Result<PendingRequest> {
        if !self.is_open() {
            return Err(RelayError::ClientClosed);
        }

        let id = Uuid::new_v4();
        let settings = &self.inner.settings;
        if settings.serialize_requests {
            let idle = self
                .inner
                .pending
                .wait_idle(settings.request_poll(), Some(settings.request_timeout()))
                .await;
            if !idle {
                return Err(RelayError::RequestTimeout(id));
            }
        }

        let pending = self.inner.pending.register(id);
        let envelope =
            Envelope::database_request(self.peer_id(), operation, argument, payload, id);
        if let Err(e) = self.inner.send_primary(&envelope).await {
            self.inner.pending.cancel(id);
            self.inner.report("send request", &e);
            return Err(e);
        }
        debug!("Request {} ({}) sent", id, operation);
        Ok(pending)
    }

    /// Sends a request and waits up to the configured timeout for its result.
    pub async fn request(
        &self,
        payload: Payload,
        operation: &str,
        argument: &str,
    ) -> Result<RequestResult> {
        let pending = self.send_request(payload, operation, argument).await?;
        pending.wait(self.inner.settings.request_timeout()).await
    }
}

impl ClientInner {
    fn emit(&self, event: ClientEvent) {
        // Nobody listening is not an error for the client.
        let _ = self.events.send(event);
    }

    fn notice(&self, message: &str) {
        self.emit(ClientEvent::Notice(message.to_string()));
    }

    fn report(&self, context: &str, err: &RelayError) {
        warn!("{}: {}", context, err);
        self.emit(ClientEvent::Error {
            context: context.to_string(),
            message: err.to_string(),
        });
    }

    fn transfer_aborted(&self, source: &str, name: &str, err: &RelayError) {
        warn!("Transfer {} from {} aborted: {}", name, source, err);
        self.emit(ClientEvent::TransferAborted {
            source: source.to_string(),
            name: name.to_string(),
            reason: err.to_string(),
        });
    }

    fn shutdown_token(&self) -> std::sync::MutexGuard<'_, CancellationToken> {
        self.shutdown.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn shut_down(&self) -> bool {
        if self
            .open
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.shutdown_token().cancel();
        if let Some(mut writer) = self.primary.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.pending.clear();
        true
    }

    async fn send_primary(&self, envelope: &Envelope) -> Result<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(RelayError::ClientClosed);
        }
        let mut primary = self.primary.lock().await;
        let writer = primary.as_mut().ok_or(RelayError::NotConnected)?;
        framing::write_envelope(writer, envelope).await
    }

    async fn pace(delay_ms: u64) {
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    }

    async fn send_image(&self, target: &str, path: &Path) -> Result<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(RelayError::ClientClosed);
        }
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| RelayError::FileOperation(format!("Failed to read {:?}: {}", path, e)))?;
        if data.is_empty() {
            return Err(RelayError::FileOperation(format!("{:?} is empty", path)));
        }
        let header = TransferHeader::new(file_name(path)?, data.len() as u64);
        let envelope = Envelope::image(&self.settings.peer_id, target, &header);

        // Hold the primary writer so nothing lands between header and body.
        let mut primary = self.primary.lock().await;
        let writer = primary.as_mut().ok_or(RelayError::NotConnected)?;

        framing::write_envelope(writer, &envelope).await?;
        Self::pace(self.settings.header_delay_ms).await;

        let mut progress = TransferProgress::new(header.size);
        for chunk in data.chunks(self.settings.chunk_size) {
            writer.write_all(chunk).await?;
            progress.advance(chunk.len() as u64)?;
            Self::pace(self.settings.chunk_delay_ms).await;
        }
        writer.flush().await?;

        info!("Sent image {} ({} bytes) to {}", header.name, header.size, target);
        Ok(())
    }

    async fn send_file(&self, target: &str, path: &Path) -> Result<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(RelayError::ClientClosed);
        }
        if self.primary.lock().await.is_none() {
            return Err(RelayError::NotConnected);
        }
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| RelayError::FileOperation(format!("Failed to open {:?}: {}", path, e)))?;
        let size = file.metadata().await?.len();
        if size == 0 {
            return Err(RelayError::FileOperation(format!("{:?} is empty", path)));
        }
        let header = TransferHeader::new(file_name(path)?, size);
        let envelope = Envelope::file(&self.settings.peer_id, target, &header);

        let mut channel = self.multiplexer.open_secondary().await?;
        debug!(
            "Streaming {} to {} over secondary port {}",
            header.name,
            target,
            channel.local_port()
        );

        let result = async {
            let stream = channel.stream_mut();
            framing::write_envelope(stream, &envelope).await?;

            let mut buf = vec![0u8; self.settings.chunk_size];
            let mut progress = TransferProgress::new(size);
            while !progress.is_complete() {
                let want = buf.len().min(progress.remaining() as usize);
                let n = file.read(&mut buf[..want]).await?;
                if n == 0 {
                    return Err(RelayError::Transfer(format!(
                        "{} ended after {} of {} bytes",
                        header.name,
                        progress.accumulated(),
                        size
                    )));
                }
                stream.write_all(&buf[..n]).await?;
                progress.advance(n as u64)?;
                Self::pace(self.settings.chunk_delay_ms).await;
            }
            stream.flush().await?;
            Ok(())
        }
        .await;

        channel.close().await;
        if result.is_ok() {
            info!("Sent file {} ({} bytes) to {}", header.name, size, target);
        }
        result
    }

    async fn run_primary(self: Arc<Self>, mut reader: OwnedReadHalf, token: CancellationToken) {
        let mut buf = vec![0u8; self.settings.chunk_size];
        loop {
            let received = tokio::select! {
                _ = token.cancelled() => return,
                received = self.receive_primary(&mut reader, &mut buf, &token) => received,
            };

            match received {
                Ok(true) => continue,
                Ok(false) => {
                    info!("Relay closed the primary channel");
                    break;
                }
                Err(e) if e.is_connection_loss() => {
                    info!("Primary channel lost: {}", e);
                    break;
                }
                Err(e) => {
                    error!("Primary channel failed: {}", e);
                    self.report("primary channel", &e);
                    break;
                }
            }
        }

        if self.shut_down().await {
            self.notice("Server disconnected");
            self.emit(ClientEvent::Disconnected);
        }
    }

    /// Handles one header and any body that follows it. Returns false when
    /// the relay closed the connection cleanly.
    async fn receive_primary(
        self: &Arc<Self>,
        reader: &mut OwnedReadHalf,
        buf: &mut [u8],
        token: &CancellationToken,
    ) -> Result<bool> {
        let max_frame = self.settings.max_frame_size;
        let Some(frame) = framing::read_frame(reader, max_frame).await? else {
            return Ok(false);
        };

        let envelope = match Envelope::decode(&frame, frame.len()) {
            Ok(envelope) => envelope,
            Err(e) => {
                // The frame is consumed, so the stream is still aligned.
                self.report("decode", &e);
                return Ok(true);
            }
        };

        match envelope.kind {
            DataKind::Text => self.emit(ClientEvent::TextReceived {
                source: envelope.source,
                message: envelope.parameter,
            }),
            DataKind::Image => {
                let header = envelope.transfer_header()?;
                let received = receive_body(reader, buf, header.size, None, |data| {
                    self.emit(ClientEvent::ImageChunk(ChunkReceived {
                        source: envelope.source.clone(),
                        name: header.name.clone(),
                        total_size: header.size,
                        data,
                    }))
                })
                .await;
                if let Err(e) = received {
                    self.transfer_aborted(&envelope.source, &header.name, &e);
                    return Err(e);
                }
            }
            DataKind::Request => self.handle_request(envelope, token),
            other => {
                warn!(
                    "Ignoring {:?} envelope from {} on primary channel",
                    other, envelope.source
                );
            }
        }
        Ok(true)
    }

    fn handle_request(self: &Arc<Self>, envelope: Envelope, token: &CancellationToken) {
        match envelope.request_parameter() {
            Ok(RequestParameter::Control(ControlCommand::AddSocket)) => {
                let Some(negotiation) = envelope.request_id else {
                    warn!("AddSocket from {} carries no negotiation id", envelope.source);
                    return;
                };
                let inner = self.clone();
                let token = token.clone();
                tokio::spawn(async move {
                    inner.run_secondary(envelope, negotiation, token).await;
                });
            }
            Ok(RequestParameter::Control(ControlCommand::RequestResult)) => {
                let Payload::RequestResult(result) = envelope.payload else {
                    warn!("RequestResult without a result payload");
                    return;
                };
                if let Some(id) = envelope.request_id {
                    if !self.pending.resolve(id, result.clone()) {
                        debug!("No waiter for request {}", id);
                    }
                }
                self.emit(ClientEvent::RequestResult {
                    request_id: envelope.request_id,
                    result,
                });
            }
            Ok(RequestParameter::Database { operation, .. }) => {
                warn!("Unexpected database request {} delivered to client", operation);
            }
            Err(e) => self.report("request", &e),
        }
    }

    /// Opens a secondary channel in answer to `request` and receives the
    /// file the relay streams into it.
    async fn run_secondary(
        self: Arc<Self>,
        request: Envelope,
        negotiation: Uuid,
        token: CancellationToken,
    ) {
        let mut channel = match self.multiplexer.open_secondary().await {
            Ok(channel) => channel,
            Err(e) => {
                self.report("open secondary channel", &e);
                return;
            }
        };
        let port = channel.local_port();
        debug!("Secondary channel {} opened for negotiation {}", port, negotiation);

        let answer = Envelope::add_socket(&self.settings.peer_id, &request.source, negotiation);
        let result = match framing::write_envelope(channel.stream_mut(), &answer).await {
            Ok(()) => tokio::select! {
                _ = token.cancelled() => Ok(()),
                result = self.receive_secondary(channel.stream_mut()) => result,
            },
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.report("secondary channel", &e);
        }
        channel.close().await;
        debug!("Secondary channel {} closed", port);
    }

    /// A secondary channel carries exactly one file, then closes.
    async fn receive_secondary<R>(&self, reader: &mut R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let idle = self.settings.secondary_idle_timeout();
        let frame = timeout(idle, framing::read_frame(reader, self.settings.max_frame_size))
            .await
            .map_err(|_| RelayError::Transfer("Secondary channel idle".to_string()))??
            .ok_or_else(|| {
                RelayError::Transfer("Secondary channel closed before header".to_string())
            })?;

        let envelope = Envelope::decode(&frame, frame.len())?;
        if envelope.kind != DataKind::File {
            return Err(RelayError::Transfer(format!(
                "Unexpected {:?} envelope on secondary channel",
                envelope.kind
            )));
        }
        let header = envelope.transfer_header()?;

        let mut buf = vec![0u8; self.settings.chunk_size];
        let received = receive_body(reader, &mut buf, header.size, Some(idle), |data| {
            self.emit(ClientEvent::FileChunk(ChunkReceived {
                source: envelope.source.clone(),
                name: header.name.clone(),
                total_size: header.size,
                data,
            }))
        })
        .await;
        if let Err(e) = received {
            self.transfer_aborted(&envelope.source, &header.name, &e);
            return Err(e);
        }

        info!(
            "Received file {} ({} bytes) from {}",
            header.name, header.size, envelope.source
        );
        Ok(())
    }
}

/// Reads exactly `size` body bytes, handing each piece to `on_chunk`.
async fn receive_body<R, F>(
    reader: &mut R,
    buf: &mut [u8],
    size: u64,
    idle: Option<Duration>,
    mut on_chunk: F,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    F: FnMut(Vec<u8>),
{
    let mut progress = TransferProgress::new(size);
    while !progress.is_complete() {
        let read = framing::read_body_chunk(reader, buf, progress.remaining());
        let n = match idle {
            Some(idle) => timeout(idle, read)
                .await
                .map_err(|_| RelayError::Transfer("Body stalled".to_string()))??,
            None => read.await?,
        };
        progress.advance(n as u64)?;
        on_chunk(buf[..n].to_vec());
    }
    Ok(())
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| RelayError::FileOperation(format!("Invalid file name {:?}", path)))
}
