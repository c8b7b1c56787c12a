//! Write-through of session snapshots to the remote store.
//!
//! One worker runs per signed-in identity. It keeps at most one write in
//! flight and always sends the newest snapshot, so a slow write can never
//! land after a newer one.

use crate::models::{Notification, WatchlistItem};
use crate::store::RemoteStore;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Monotonic per identity; later snapshots supersede earlier ones.
    pub seq: u64,
    pub watchlist: Vec<WatchlistItem>,
    pub notifications: Vec<Notification>,
}

pub struct WriteThrough {
    uid: String,
    seq: u64,
    snapshots: watch::Sender<Option<Arc<Snapshot>>>,
    acked: watch::Receiver<u64>,
}

impl WriteThrough {
    /// Starts the writer for `uid`. Must be called from within a tokio
    /// runtime. The worker exits once the handle is dropped and any write in
    /// flight has finished.
    pub fn spawn(store: Arc<dyn RemoteStore>, uid: impl Into<String>) -> Self {
        let uid = uid.into();
        let (snapshots, pending) = watch::channel(None);
        let (ack, acked) = watch::channel(0);
        tokio::spawn(run(store, uid.clone(), pending, ack));

        Self {
            uid,
            seq: 0,
            snapshots,
            acked,
        }
    }

    /// Queues the full snapshot for writing and returns its sequence number.
    pub fn push(&mut self, watchlist: &[WatchlistItem], notifications: &[Notification]) -> u64 {
        self.seq += 1;
        self.snapshots.send_replace(Some(Arc::new(Snapshot {
            seq: self.seq,
            watchlist: watchlist.to_vec(),
            notifications: notifications.to_vec(),
        })));
        self.seq
    }

    /// Waits until the latest queued snapshot has been written or its write
    /// attempt failed.
    pub async fn wait_synced(&mut self) {
        let target = self.seq;
        if self.acked.wait_for(|acked| *acked >= target).await.is_err() {
            debug!("Writer for {} stopped before catching up", self.uid);
        }
    }
}

async fn run(
    store: Arc<dyn RemoteStore>,
    uid: String,
    mut pending: watch::Receiver<Option<Arc<Snapshot>>>,
    ack: watch::Sender<u64>,
) {
    while pending.changed().await.is_ok() {
        let Some(snapshot) = pending.borrow_and_update().clone() else {
            continue;
        };

        match store
            .save_user_data(&uid, &snapshot.watchlist, &snapshot.notifications)
            .await
        {
            Ok(()) => debug!("Saved snapshot {} for {}", snapshot.seq, uid),
            Err(e) => error!("Failed to save snapshot {} for {}: {}", snapshot.seq, uid, e),
        }
        ack.send_replace(snapshot.seq);
    }

    info!("Write-through for {} stopped", uid);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn item(id: u32) -> WatchlistItem {
        let show = serde_json::from_str(&format!(r#"{{"id": {}, "name": "Show {}"}}"#, id, id)).unwrap();
        WatchlistItem::new(show, Utc::now())
    }

    #[tokio::test]
    async fn test_latest_snapshot_wins() {
        let store = Arc::new(MemoryStore::new());
        let mut writer = WriteThrough::spawn(store.clone(), "u1");

        writer.push(&[item(1)], &[]);
        writer.push(&[item(2), item(1)], &[]);
        let seq = writer.push(&[item(3), item(2), item(1)], &[]);
        writer.wait_synced().await;

        assert_eq!(seq, 3);
        let stored = store.stored("u1").unwrap();
        assert_eq!(stored.watchlist.len(), 3);
        assert!(store.save_count() <= 3);
    }

    #[tokio::test]
    async fn test_nothing_written_without_push() {
        let store = Arc::new(MemoryStore::new());
        let mut writer = WriteThrough::spawn(store.clone(), "u1");
        writer.wait_synced().await;
        drop(writer);
        tokio::task::yield_now().await;

        assert_eq!(store.save_count(), 0);
        assert!(store.stored("u1").is_none());
    }
}
