//! Events the session pushes to the UI layer.
//!
//! The app shell subscribes with [`crate::Session::events`] and re-renders
//! on whatever it cares about. Sending never blocks the session: with no
//! subscriber attached, events are dropped.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use ginmai_shared::types::{MomentId, UserId};

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    MomentAdded { moment_id: MomentId },
    MomentUpdated { moment_id: MomentId },
    MomentRemoved { moment_id: MomentId },
    /// The nearby list was replaced by a fresh snapshot.
    MomentsResynced { count: usize },
    GuestJoined { moment_id: MomentId, user_id: UserId, name: String },
    GuestCancelled { moment_id: MomentId, user_id: UserId, name: String },
    GuestArrived { moment_id: MomentId, user_id: UserId, name: String },
    GuestRunningLate { moment_id: MomentId, user_id: UserId, name: String },
    GuestsResynced { moment_id: MomentId, count: usize },
    ReminderScheduled { moment_id: MomentId },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            trace!("no UI subscriber, event dropped");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
