//! Outbound notification seam.
//!
//! The engine hands every host/guest notification to a [`Notifier`]. Delivery
//! is best-effort: a failed send is logged and never fails the operation that
//! triggered it.

use std::sync::Mutex;

use async_trait::async_trait;

use ginmai_shared::notify::Notification;
use ginmai_shared::types::UserId;
use ginmai_shared::GinmaiError;

/// Who a notification is for, and where to deliver it if known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub user_id: UserId,
    pub push_token: Option<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to: &Recipient, notification: &Notification) -> Result<(), GinmaiError>;
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, to: &Recipient, notification: &Notification) -> Result<(), GinmaiError> {
        tracing::info!(
            user = %to.user_id,
            kind = ?notification.kind,
            title = %notification.title,
            "notification (not delivered)"
        );
        Ok(())
    }
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<(Recipient, Notification)>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications sent so far, oldest first.
    pub fn sent(&self) -> Vec<(Recipient, Notification)> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    /// Notifications addressed to one user.
    pub fn sent_to(&self, user: UserId) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|(to, _)| to.user_id == user)
            .map(|(_, n)| n)
            .collect()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn send(&self, to: &Recipient, notification: &Notification) -> Result<(), GinmaiError> {
        self.sent
            .lock()
            .map_err(|_| GinmaiError::unavailable("notification log poisoned"))?
            .push((to.clone(), notification.clone()));
        Ok(())
    }
}
