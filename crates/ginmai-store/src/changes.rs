//! Change notification for the `moments` and `connections` tables.
//!
//! Every committed mutation is published on a [`ChangeFeed`] after the
//! transaction commits. Several [`crate::Database`] handles opened on the same
//! file can share one feed. Delivery is best-effort: a subscriber that falls
//! behind sees `RecvError::Lagged` and must refetch a snapshot.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use ginmai_shared::constants::CHANGE_FEED_CAPACITY;
use ginmai_shared::types::MomentId;

use crate::models::{Connection, Moment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// The row image carried by a change. For deletes this is the last image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", content = "record", rename_all = "snake_case")]
pub enum ChangedRow {
    Moment(Moment),
    Connection(Connection),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowChange {
    pub kind: ChangeKind,
    pub row: ChangedRow,
}

impl RowChange {
    pub fn moment(kind: ChangeKind, moment: Moment) -> Self {
        Self {
            kind,
            row: ChangedRow::Moment(moment),
        }
    }

    pub fn connection(kind: ChangeKind, connection: Connection) -> Self {
        Self {
            kind,
            row: ChangedRow::Connection(connection),
        }
    }

    /// The moment this change concerns, for per-moment filtering.
    pub fn moment_id(&self) -> MomentId {
        match &self.row {
            ChangedRow::Moment(m) => m.id,
            ChangedRow::Connection(c) => c.moment_id,
        }
    }

    pub fn is_moment(&self) -> bool {
        matches!(self.row, ChangedRow::Moment(_))
    }
}

#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<RowChange>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::with_capacity(CHANGE_FEED_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RowChange> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub(crate) fn publish(&self, change: RowChange) {
        // No subscribers is the common case for CLI tools and tests.
        let _ = self.tx.send(change);
    }

    pub(crate) fn publish_all(&self, changes: Vec<RowChange>) {
        for change in changes {
            self.publish(change);
        }
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}
