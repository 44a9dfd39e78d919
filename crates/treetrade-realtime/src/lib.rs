//! Change-notification fan-out. The backend publishes one [`ChangeEvent`]
//! per committed write; clients subscribe to the tables they care about.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use uuid::Uuid;

use treetrade_types::events::{ChangeEvent, Table};

const CHANNEL_CAPACITY: usize = 1024;

/// Broadcasts change events to every live subscription.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// All subscriptions share one channel and filter on receipt
    broadcast_tx: broadcast::Sender<ChangeEvent>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(DispatcherInner { broadcast_tx }),
        }
    }

    /// Subscribe to events from the given tables.
    pub fn subscribe(&self, tables: &[Table]) -> Subscription {
        let id = Uuid::new_v4();
        debug!("Subscription {} opened for {:?}", id, tables);
        Subscription {
            id,
            tables: tables.iter().copied().collect(),
            rx: self.inner.broadcast_tx.subscribe(),
        }
    }

    /// Publish an event. Returns how many subscriptions were live; having
    /// none is not an error.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        self.inner.broadcast_tx.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.broadcast_tx.receiver_count()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// A table-filtered view of the event stream. Dropping it unsubscribes.
pub struct Subscription {
    id: Uuid,
    tables: HashSet<Table>,
    rx: broadcast::Receiver<ChangeEvent>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next event for a subscribed table, or `None` once the dispatcher
    /// is gone.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if self.tables.contains(&event.table()) {
                        return Some(event);
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    warn!("Subscription {} lagged by {} events", self.id, n);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        debug!("Subscription {} closed", self.id);
    }
}
