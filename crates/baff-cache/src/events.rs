//! Notifications raised by stores and the version manager.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::trace;

/// Receiving half handed to a subscriber.
pub type EventReceiver = mpsc::UnboundedReceiver<CacheEvent>;

/// Cache notification delivered to view-layer subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum CacheEvent {
    /// A store completed a successful load.
    PostFetch {
        /// Key of the loaded store.
        store_key: String,
        /// True on the first completion since the store was (re)loaded or flushed.
        first_load: bool,
        /// Server-side total reported by the fetch.
        total: Option<usize>,
        /// Raw response metadata.
        meta: Value,
    },
    /// A store's records were cleared.
    Flush {
        /// Key of the flushed store.
        store_key: String,
        /// True when the flush was forced by a failed master load.
        invalid: bool,
    },
    /// A master load completed or failed.
    MasterLoad {
        /// Master entity type.
        entity_type: String,
        /// Master entity id.
        entity_id: String,
        /// True when the master could not be loaded.
        failed: bool,
    },
}

/// Synchronous fan-out of [`CacheEvent`]s.
///
/// Every subscriber has its own unbounded queue, so a subscriber that drains
/// late still sees every event, in publish order. Publishing never blocks and
/// every event is enqueued for all current subscribers before `publish`
/// returns. Dropped receivers are pruned on the next publish.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<CacheEvent>>>>,
}

impl EventBus {
    /// Create a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<CacheEvent>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new subscriber. It receives events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> EventReceiver {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.lock().push(sender);
        receiver
    }

    /// Number of live subscribers as of the last publish.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Publish an event to every current subscriber.
    pub fn publish(&self, event: CacheEvent) {
        trace!(?event, "Publishing cache event");
        // Held across the sends so concurrent publishers keep one global order.
        self.lock().retain(|sender| sender.send(event.clone()).is_ok());
    }
}
