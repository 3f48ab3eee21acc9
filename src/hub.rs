//! Per-user fan-out of viewer events.
//!
//! Each subscriber owns a bounded queue it drains at its own pace. Writes use
//! `try_send`: a full or closed queue removes the subscriber atomically, so a
//! slow viewer can never stall the session worker. Replay-on-join is handed
//! to the subscriber as a pre-built event list, outside the live queue, so a
//! long conversation log cannot overflow a fresh subscriber's buffer.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::events::{ConversationEntry, ViewerEvent};

/// A viewer's handle on the event stream.
pub struct ViewerSubscription {
    /// Subscriber identity, usable with [`FanoutHub::remove_subscriber`].
    pub id: Uuid,
    /// Events to deliver before anything from `events`: the synthetic
    /// `connected` event followed by the conversation replay, in order.
    pub initial: Vec<ViewerEvent>,
    /// Live events, in hub arrival order.
    pub events: mpsc::Receiver<ViewerEvent>,
}

/// Per-user broadcast hub. Outlives sessions; subscribers come and go.
pub struct FanoutHub {
    user_id: String,
    buffer: usize,
    subscribers: Mutex<HashMap<Uuid, mpsc::Sender<ViewerEvent>>>,
}

impl FanoutHub {
    /// Create a hub for one user with the given per-subscriber buffer.
    #[must_use]
    pub fn new(user_id: impl Into<String>, buffer: usize) -> Self {
        Self {
            user_id: user_id.into(),
            buffer: buffer.max(1),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Add a subscriber, replaying `entries` ahead of live events.
    ///
    /// The caller is responsible for snapshotting `entries` in the same
    /// serialized step that registers the subscriber, which is what makes the
    /// replay boundary exact.
    pub fn subscribe(&self, entries: &[ConversationEntry]) -> ViewerSubscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = Uuid::new_v4();

        let mut initial = Vec::with_capacity(entries.len() + 1);
        initial.push(ViewerEvent::Connected {
            user_id: self.user_id.clone(),
        });
        initial.extend(entries.iter().cloned().map(ViewerEvent::Translation));

        self.lock().insert(id, tx);
        debug!(user = %self.user_id, subscriber = %id, replay = entries.len(), "viewer subscribed");

        ViewerSubscription {
            id,
            initial,
            events: rx,
        }
    }

    /// Remove a subscriber explicitly (viewer disconnect).
    pub fn remove_subscriber(&self, id: Uuid) {
        if self.lock().remove(&id).is_some() {
            debug!(user = %self.user_id, subscriber = %id, "viewer unsubscribed");
        }
    }

    /// Broadcast one event to every live subscriber.
    ///
    /// Subscribers whose queue is full or closed are dropped here; their
    /// disconnect is otherwise detected lazily on this write.
    pub fn broadcast(&self, event: &ViewerEvent) {
        let mut subscribers = self.lock();
        subscribers.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(err) => {
                debug!(
                    user = %self.user_id,
                    subscriber = %id,
                    "dropping viewer: {err}"
                );
                false
            }
        });
    }

    /// Current number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, mpsc::Sender<ViewerEvent>>> {
        match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
