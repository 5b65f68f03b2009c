use crate::network::protocol::RequestResult;
use crate::{RelayError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

/// Outstanding database requests keyed by correlation id.
///
/// Registration, resolution and cancellation all take the same lock, so a
/// reply can never race with the removal of its entry.
#[derive(Debug, Default)]
pub struct PendingRequests {
    slots: Mutex<HashMap<Uuid, oneshot::Sender<RequestResult>>>,
}

/// Handle returned to the caller of a request.
#[derive(Debug)]
pub struct PendingRequest {
    id: Uuid,
    receiver: oneshot::Receiver<RequestResult>,
    table: Arc<PendingRequests>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(self: &Arc<Self>, id: Uuid) -> PendingRequest {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(id, tx);
        PendingRequest {
            id,
            receiver: rx,
            table: self.clone(),
        }
    }

    /// Hands `result` to the waiter for `id`. Returns false for unknown ids.
    pub fn resolve(&self, id: Uuid, result: RequestResult) -> bool {
        match self.lock().remove(&id) {
            Some(tx) => {
                if tx.send(result).is_err() {
                    debug!("Waiter for request {} went away", id);
                }
                true
            }
            None => false,
        }
    }

    pub fn cancel(&self, id: Uuid) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Drops every waiter; their `wait` calls fail with `ClientClosed`.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Polls every `poll` until no request is outstanding. Returns false if
    /// `limit` passes first; `None` waits forever.
    pub async fn wait_idle(&self, poll: Duration, limit: Option<Duration>) -> bool {
        let started = tokio::time::Instant::now();
        while !self.is_empty() {
            if let Some(limit) = limit {
                if started.elapsed() >= limit {
                    return false;
                }
            }
            tokio::time::sleep(poll).await;
        }
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, oneshot::Sender<RequestResult>>> {
        // A poisoned table only means a waiter panicked; the map itself is intact.
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PendingRequest {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Waits for the reply. On timeout the entry is removed so a late reply is
    /// ignored.
    pub async fn wait(self, limit: Duration) -> Result<RequestResult> {
        match tokio::time::timeout(limit, self.receiver).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(RelayError::ClientClosed),
            Err(_) => {
                self.table.cancel(self.id);
                Err(RelayError::RequestTimeout(self.id))
            }
        }
    }
}
