//! Sync status events.

use parking_lot::RwLock;
use tokio::sync::broadcast;

/// Status of the most recent sync activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// A cycle is running.
    Syncing,
    /// The last cycle completed.
    Success {
        /// Entries written to the shared log.
        pushed: usize,
        /// Entries received from the shared log.
        pulled: usize,
        /// Warnings raised while integrating.
        warnings: usize,
    },
    /// The last cycle failed after retries.
    Fail {
        /// Error description.
        reason: String,
        /// Whether a later trigger may succeed without user action.
        retryable: bool,
    },
}

/// Broadcasts status events and remembers the latest one.
///
/// Events published while nobody listens are dropped; slow listeners skip
/// to the newest events.
pub struct StatusBus {
    sender: broadcast::Sender<SyncStatus>,
    last: RwLock<Option<SyncStatus>>,
}

impl StatusBus {
    /// Creates a bus buffering up to `capacity` events per listener.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            last: RwLock::new(None),
        }
    }

    /// Publishes an event.
    pub fn publish(&self, status: SyncStatus) {
        *self.last.write() = Some(status.clone());
        let _ = self.sender.send(status);
    }

    /// Subscribes to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncStatus> {
        self.sender.subscribe()
    }

    /// Returns the latest event.
    pub fn last(&self) -> Option<SyncStatus> {
        self.last.read().clone()
    }
}
