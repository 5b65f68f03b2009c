use crate::transfer::TransferProgress;
use crate::{RelayError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

struct TrackedTransfer {
    progress: TransferProgress,
    sink: BufWriter<File>,
    destination: PathBuf,
}

/// Writes sized transfers to disk as their chunks arrive, keyed by name.
#[derive(Default)]
pub struct TransferTracker {
    active: HashMap<String, TrackedTransfer>,
}

impl TransferTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens `destination` for `name` unless that name is already tracked.
    /// Returns whether a new transfer was started.
    pub async fn begin(
        &mut self,
        name: &str,
        total: u64,
        destination: impl AsRef<Path>,
    ) -> Result<bool> {
        if self.active.contains_key(name) {
            return Ok(false);
        }

        let destination = destination.as_ref().to_path_buf();
        if let Some(parent) = destination.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    RelayError::FileOperation(format!("Failed to create {:?}: {}", parent, e))
                })?;
            }
        }

        let file = File::create(&destination).await.map_err(|e| {
            RelayError::FileOperation(format!("Failed to create {:?}: {}", destination, e))
        })?;

        debug!("Tracking {} ({} bytes) -> {:?}", name, total, destination);
        self.active.insert(
            name.to_string(),
            TrackedTransfer {
                progress: TransferProgress::new(total),
                sink: BufWriter::new(file),
                destination,
            },
        );
        Ok(true)
    }

    /// Appends `data` to the transfer. Returns `true` once the declared total
    /// is reached, at which point the sink is flushed, closed and untracked.
    ///
    /// Data that would overrun the total aborts the transfer.
    pub async fn advance(&mut self, name: &str, data: &[u8]) -> Result<bool> {
        let transfer = self
            .active
            .get_mut(name)
            .ok_or_else(|| RelayError::Transfer(format!("No transfer named {}", name)))?;

        if let Err(e) = transfer.progress.check(data.len() as u64) {
            warn!("Aborting transfer {}: {}", name, e);
            self.end(name).await?;
            return Err(e);
        }

        transfer.sink.write_all(data).await.map_err(|e| {
            RelayError::FileOperation(format!("Failed to write {:?}: {}", transfer.destination, e))
        })?;
        let completed = transfer.progress.advance(data.len() as u64)?;

        if completed {
            info!(
                "Transfer {} complete ({} bytes) at {:?}",
                name,
                transfer.progress.total(),
                transfer.destination
            );
            self.end(name).await?;
        }
        Ok(completed)
    }

    /// Flushes, closes and forgets the transfer, complete or not.
    pub async fn end(&mut self, name: &str) -> Result<()> {
        if let Some(mut transfer) = self.active.remove(name) {
            transfer.sink.flush().await?;
            transfer.sink.into_inner().sync_all().await?;
        }
        Ok(())
    }

    pub fn is_tracked(&self, name: &str) -> bool {
        self.active.contains_key(name)
    }

    pub fn progress(&self, name: &str) -> Option<TransferProgress> {
        self.active.get(name).map(|t| t.progress)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_chunks_complete_and_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in").join("photo.png");
        let mut tracker = TransferTracker::new();

        assert!(tracker.begin("photo.png", 6, &path).await.unwrap());
        assert!(!tracker.begin("photo.png", 6, &path).await.unwrap());

        assert!(!tracker.advance("photo.png", b"abc").await.unwrap());
        assert_eq!(tracker.progress("photo.png").unwrap().accumulated(), 3);
        assert!(tracker.advance("photo.png", b"def").await.unwrap());

        assert!(!tracker.is_tracked("photo.png"));
        assert_eq!(std::fs::read(&path).unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn test_overrun_aborts_without_completing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.pdf");
        let mut tracker = TransferTracker::new();

        tracker.begin("report.pdf", 4, &path).await.unwrap();
        tracker.advance("report.pdf", b"ab").await.unwrap();

        let err = tracker.advance("report.pdf", b"cde").await.unwrap_err();
        assert!(matches!(err, RelayError::SizeInvariant { .. }));
        assert!(!tracker.is_tracked("report.pdf"));
        assert_eq!(std::fs::read(&path).unwrap(), b"ab");
    }

    #[tokio::test]
    async fn test_end_forgets_partial_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = TransferTracker::new();

        tracker
            .begin("movie.mkv", 100, dir.path().join("movie.mkv"))
            .await
            .unwrap();
        tracker.advance("movie.mkv", &[0u8; 10]).await.unwrap();
        tracker.end("movie.mkv").await.unwrap();

        assert!(tracker.is_empty());
        assert!(tracker.advance("movie.mkv", &[0u8; 1]).await.is_err());
    }
}
