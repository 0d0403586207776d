//! Change feed for committed document writes.
//!
//! Every backend publishes one [`DocumentChange`] per committed write, in
//! commit order per document. Subscribers that fall behind are told how many
//! changes they missed and must re-read the documents they care about.

use serde_json::Value;
use tokio::sync::broadcast;

use tether_core::config::defaults::CHANGE_FEED_CAPACITY;

/// A committed write. `document` is `None` for deletions.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
    pub path: String,
    pub document: Option<Value>,
}

/// What a subscriber observes on the feed.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Changed(DocumentChange),
    /// Some changes were dropped; re-read before trusting local state.
    Lagged(u64),
}

/// Broadcast feed shared by a store and its subscribers.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<DocumentChange>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::with_capacity(CHANGE_FEED_CAPACITY)
    }

    /// The capacity determines how many changes are buffered for slow subscribers.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish a committed change. Dropped silently when nobody listens.
    pub fn publish(&self, path: &str, document: Option<Value>) {
        let _ = self.tx.send(DocumentChange {
            path: path.to_string(),
            document,
        });
    }

    pub fn subscribe(&self) -> ChangeReceiver {
        ChangeReceiver {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of a [`ChangeFeed`].
pub struct ChangeReceiver {
    rx: broadcast::Receiver<DocumentChange>,
}

impl ChangeReceiver {
    /// Receive the next event. Returns `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        match self.rx.recv().await {
            Ok(change) => Some(ChangeEvent::Changed(change)),
            Err(broadcast::error::RecvError::Lagged(missed)) => Some(ChangeEvent::Lagged(missed)),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Receive the next change under `prefix`, passing lag notices through.
    pub async fn recv_under(&mut self, prefix: &str) -> Option<ChangeEvent> {
        loop {
            match self.recv().await? {
                ChangeEvent::Changed(change) if !change.path.starts_with(prefix) => continue,
                event => return Some(event),
            }
        }
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        match self.rx.try_recv() {
            Ok(change) => Some(ChangeEvent::Changed(change)),
            Err(broadcast::error::TryRecvError::Lagged(missed)) => Some(ChangeEvent::Lagged(missed)),
            Err(_) => None,
        }
    }
}
