use crate::{RelayError, Result};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, Notify, OwnedMutexGuard, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

pub type ChannelWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Write side of one connection held by the relay, keyed by the remote port.
#[derive(Clone)]
pub struct Channel {
    port: u16,
    writer: Arc<Mutex<ChannelWriter>>,
    closed: CancellationToken,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("port", &self.port)
            .field("closed", &self.closed.is_cancelled())
            .finish()
    }
}

/// Exclusive hold on a channel's writer. Used to keep a header and its body
/// contiguous on the wire.
pub struct ChannelLock {
    guard: OwnedMutexGuard<ChannelWriter>,
    closed: CancellationToken,
}

impl Channel {
    pub fn new<W>(port: u16, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            port,
            writer: Arc::new(Mutex::new(Box::new(writer))),
            closed: CancellationToken::new(),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn send(&self, bytes: &[u8]) -> Result<()> {
        let mut lock = self.lock().await?;
        lock.write(bytes).await
    }

    pub async fn lock(&self) -> Result<ChannelLock> {
        if self.closed.is_cancelled() {
            return Err(RelayError::Forward(format!("channel {} is closed", self.port)));
        }
        let guard = self.writer.clone().lock_owned().await;
        Ok(ChannelLock {
            guard,
            closed: self.closed.clone(),
        })
    }

    /// Marks the channel closed and shuts down its write side if nobody is
    /// mid-write. The connection's receive loop observes [`Channel::closed`].
    pub fn close(&self) {
        self.closed.cancel();
        if let Ok(mut writer) = self.writer.clone().try_lock_owned() {
            tokio::spawn(async move {
                let _ = writer.shutdown().await;
            });
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub async fn closed(&self) {
        self.closed.cancelled().await
    }
}

impl ChannelLock {
    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(RelayError::Forward("channel closed mid-write".to_string()));
        }
        self.guard.write_all(bytes).await?;
        self.guard.flush().await?;
        Ok(())
    }
}

#[derive(Debug)]
struct PeerRecord {
    endpoint: SocketAddr,
    /// Index 0 is the primary channel.
    channels: Vec<Channel>,
    /// Secondary ports that answered a negotiation, by negotiation id.
    answers: HashMap<Uuid, u16>,
}

impl PeerRecord {
    fn close_all(&self) {
        for channel in &self.channels {
            channel.close();
        }
    }
}

/// Connected peers and their channels. Shared by every connection task.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<String, PeerRecord>>,
    changed: Notify,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `channel` as the primary channel of `peer_id`. Fails when the
    /// peer already has one.
    pub async fn register(&self, peer_id: &str, endpoint: SocketAddr, channel: Channel) -> bool {
        if peer_id.is_empty() {
            return false;
        }
        let mut peers = self.peers.write().await;
        if peers.contains_key(peer_id) {
            return false;
        }
        peers.insert(
            peer_id.to_string(),
            PeerRecord {
                endpoint,
                channels: vec![channel],
                answers: HashMap::new(),
            },
        );
        drop(peers);
        self.changed.notify_waiters();
        true
    }

    /// Adds a secondary channel to an already registered peer. Fails for
    /// unknown peers and for ports the peer already uses.
    pub async fn add_secondary(&self, peer_id: &str, channel: Channel) -> bool {
        let mut peers = self.peers.write().await;
        let Some(record) = peers.get_mut(peer_id) else {
            return false;
        };
        if record.channels.iter().any(|c| c.port() == channel.port()) {
            return false;
        }
        record.channels.push(channel);
        drop(peers);
        self.changed.notify_waiters();
        true
    }

    /// Removes the peer and closes every one of its channels.
    pub async fn remove_primary(&self, peer_id: &str) -> bool {
        let removed = self.peers.write().await.remove(peer_id);
        match removed {
            Some(record) => {
                debug!(
                    "Closing {} channel(s) of peer {}",
                    record.channels.len(),
                    peer_id
                );
                record.close_all();
                self.changed.notify_waiters();
                true
            }
            None => false,
        }
    }

    /// Removes and closes one secondary channel. The primary channel can only
    /// go away with the whole peer.
    pub async fn remove_secondary(&self, peer_id: &str, port: u16) -> bool {
        let mut peers = self.peers.write().await;
        let Some(record) = peers.get_mut(peer_id) else {
            return false;
        };
        let Some(index) = record
            .channels
            .iter()
            .skip(1)
            .position(|c| c.port() == port)
            .map(|i| i + 1)
        else {
            return false;
        };
        let channel = record.channels.remove(index);
        record.answers.retain(|_, answered| *answered != port);
        drop(peers);
        channel.close();
        self.changed.notify_waiters();
        true
    }

    /// Removes every peer, returning the ids that were connected.
    pub async fn remove_all(&self) -> Vec<String> {
        let drained: Vec<(String, PeerRecord)> = self.peers.write().await.drain().collect();
        let mut ids = Vec::with_capacity(drained.len());
        for (id, record) in drained {
            record.close_all();
            ids.push(id);
        }
        self.changed.notify_waiters();
        ids.sort();
        ids
    }

    pub async fn contains(&self, peer_id: &str) -> bool {
        self.peers.read().await.contains_key(peer_id)
    }

    pub async fn primary(&self, peer_id: &str) -> Option<Channel> {
        self.peers
            .read()
            .await
            .get(peer_id)
            .and_then(|record| record.channels.first().cloned())
    }

    pub async fn channel(&self, peer_id: &str, port: u16) -> Option<Channel> {
        self.peers
            .read()
            .await
            .get(peer_id)
            .and_then(|record| record.channels.iter().find(|c| c.port() == port).cloned())
    }

    pub async fn channels(&self, peer_id: &str) -> Vec<Channel> {
        self.peers
            .read()
            .await
            .get(peer_id)
            .map(|record| record.channels.clone())
            .unwrap_or_default()
    }

    pub async fn ports(&self, peer_id: &str) -> Vec<u16> {
        self.peers
            .read()
            .await
            .get(peer_id)
            .map(|record| record.channels.iter().map(Channel::port).collect())
            .unwrap_or_default()
    }

    pub async fn endpoint(&self, peer_id: &str) -> Option<SocketAddr> {
        self.peers.read().await.get(peer_id).map(|r| r.endpoint)
    }

    /// The peer's address paired with every channel port it holds.
    pub async fn endpoints(&self, peer_id: &str) -> Vec<SocketAddr> {
        self.peers
            .read()
            .await
            .get(peer_id)
            .map(|record| {
                record
                    .channels
                    .iter()
                    .map(|c| SocketAddr::new(record.endpoint.ip(), c.port()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn peer_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.peers.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// Records that the secondary channel `port` of `peer_id` was opened in
    /// answer to negotiation `negotiation`. Fails for unknown peers, for
    /// ports that are not secondaries of the peer and for ids already
    /// answered.
    pub async fn answer(&self, peer_id: &str, port: u16, negotiation: Uuid) -> bool {
        let mut peers = self.peers.write().await;
        let Some(record) = peers.get_mut(peer_id) else {
            return false;
        };
        if !record.channels.iter().skip(1).any(|c| c.port() == port)
            || record.answers.contains_key(&negotiation)
        {
            return false;
        }
        record.answers.insert(negotiation, port);
        drop(peers);
        self.changed.notify_waiters();
        true
    }

    /// Waits until `peer_id` answers negotiation `negotiation` and returns
    /// the answering secondary channel. Gives up after `timeout`, as soon as
    /// the peer disappears, or when the answering channel closes first.
    pub async fn wait_for_answer(
        &self,
        peer_id: &str,
        negotiation: Uuid,
        timeout: Duration,
    ) -> Option<Channel> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut peers = self.peers.write().await;
                let record = peers.get_mut(peer_id)?;
                if let Some(port) = record.answers.remove(&negotiation) {
                    return record.channels.iter().find(|c| c.port() == port).cloned();
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                // An answer may have landed between the last check and the deadline.
                let mut peers = self.peers.write().await;
                let record = peers.get_mut(peer_id)?;
                let port = record.answers.remove(&negotiation)?;
                return record.channels.iter().find(|c| c.port() == port).cloned();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn channel(port: u16) -> (Channel, tokio::io::DuplexStream) {
        let (local, remote) = duplex(1024);
        (Channel::new(port, local), remote)
    }

    #[tokio::test]
    async fn test_second_registration_never_adds_primary() {
        let registry = PeerRegistry::new();
        let (first, _r1) = channel(5000);
        let (second, _r2) = channel(5001);

        assert!(registry.register("alice", addr(5000), first).await);
        assert!(!registry.register("alice", addr(5001), second.clone()).await);
        // The relay falls back to a secondary channel for the same id.
        assert!(registry.add_secondary("alice", second).await);

        let channels = registry.channels("alice").await;
        assert_eq!(channels.len(), 2);
        assert_eq!(registry.primary("alice").await.unwrap().port(), 5000);
        assert_eq!(registry.ports("alice").await, vec![5000, 5001]);
        assert_eq!(registry.peer_ids().await, vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_secondary_rules() {
        let registry = PeerRegistry::new();
        let (unknown, _r) = channel(6000);
        assert!(!registry.add_secondary("ghost", unknown).await);

        let (primary, _r1) = channel(6001);
        let (dup, _r2) = channel(6001);
        registry.register("bob", addr(6001), primary).await;
        assert!(!registry.add_secondary("bob", dup).await);

        assert!(!registry.remove_secondary("bob", 6001).await);
        assert!(registry.contains("bob").await);
    }

    #[tokio::test]
    async fn test_remove_primary_closes_everything() {
        let registry = PeerRegistry::new();
        let (primary, mut remote_primary) = channel(7000);
        let (secondary, _r) = channel(7001);

        registry.register("carol", addr(7000), primary.clone()).await;
        registry.add_secondary("carol", secondary.clone()).await;

        assert!(registry.remove_primary("carol").await);
        assert!(!registry.remove_primary("carol").await);
        assert!(primary.is_closed());
        assert!(secondary.is_closed());
        assert!(registry.is_empty().await);

        let mut buf = [0u8; 4];
        assert_eq!(remote_primary.read(&mut buf).await.unwrap(), 0);
        assert!(primary.send(b"late").await.is_err());
    }

    #[tokio::test]
    async fn test_remove_secondary_keeps_peer() {
        let registry = PeerRegistry::new();
        let (primary, _r1) = channel(7100);
        let (secondary, _r2) = channel(7101);

        registry.register("dave", addr(7100), primary.clone()).await;
        registry.add_secondary("dave", secondary.clone()).await;

        assert!(registry.remove_secondary("dave", 7101).await);
        assert!(secondary.is_closed());
        assert!(!primary.is_closed());
        assert_eq!(registry.ports("dave").await, vec![7100]);
        assert_eq!(
            registry.endpoints("dave").await,
            vec![SocketAddr::from(([127, 0, 0, 1], 7100))]
        );
    }

    #[tokio::test]
    async fn test_send_reaches_remote() {
        let (primary, mut remote) = channel(7200);
        primary.send(b"ping").await.unwrap();

        let mut buf = [0u8; 4];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_wait_for_answer_ignores_unrelated_secondaries() {
        let registry = Arc::new(PeerRegistry::new());
        let (primary, _r1) = channel(8000);
        registry.register("erin", addr(8000), primary).await;

        let negotiation = Uuid::new_v4();
        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .wait_for_answer("erin", negotiation, Duration::from_secs(5))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        // Erin's own outgoing file channel must not be taken as the answer.
        let (outgoing, _r2) = channel(8001);
        registry.add_secondary("erin", outgoing).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        let (answering, _r3) = channel(8002);
        registry.add_secondary("erin", answering).await;
        assert!(!registry.answer("erin", 8000, negotiation).await);
        assert!(registry.answer("erin", 8002, negotiation).await);

        let found = waiter.await.unwrap().expect("answering channel");
        assert_eq!(found.port(), 8002);
    }

    #[tokio::test]
    async fn test_wait_for_answer_times_out() {
        let registry = PeerRegistry::new();
        let (primary, _r1) = channel(8100);
        let (secondary, _r2) = channel(8101);
        registry.register("frank", addr(8100), primary).await;
        registry.add_secondary("frank", secondary).await;

        let started = tokio::time::Instant::now();
        let found = registry
            .wait_for_answer("frank", Uuid::new_v4(), Duration::from_millis(50))
            .await;
        assert!(found.is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));

        assert!(registry
            .wait_for_answer("nobody", Uuid::new_v4(), Duration::from_secs(5))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_closed_answer_is_forgotten() {
        let registry = PeerRegistry::new();
        let (primary, _r1) = channel(8200);
        let (secondary, _r2) = channel(8201);
        registry.register("gina", addr(8200), primary).await;
        registry.add_secondary("gina", secondary).await;

        let negotiation = Uuid::new_v4();
        assert!(registry.answer("gina", 8201, negotiation).await);
        assert!(registry.remove_secondary("gina", 8201).await);

        assert!(registry
            .wait_for_answer("gina", negotiation, Duration::from_millis(20))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_remove_all() {
        let registry = PeerRegistry::new();
        let (a, _ra) = channel(9000);
        let (b, _rb) = channel(9001);
        registry.register("b", addr(9001), b).await;
        registry.register("a", addr(9000), a.clone()).await;

        assert_eq!(registry.remove_all().await, vec!["a".to_string(), "b".to_string()]);
        assert!(a.is_closed());
        assert_eq!(registry.len().await, 0);
    }
}
