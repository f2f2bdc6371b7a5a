//! Push-notification transport.
//!
//! Payloads are POSTed as JSON to a push gateway (Expo-style `to`/`title`/
//! `body`/`data`). Users without a registered push token are skipped.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use ginmai_shared::notify::Notification;
use ginmai_shared::GinmaiError;
use ginmai_store::{Notifier, Recipient};

const PUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct PushMessage<'a> {
    to: &'a str,
    title: &'a str,
    body: &'a str,
    data: &'a serde_json::Value,
    sound: &'static str,
}

#[derive(Clone)]
pub struct PushNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl PushNotifier {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, GinmaiError> {
        let client = reqwest::Client::builder()
            .timeout(PUSH_TIMEOUT)
            .build()
            .map_err(|e| GinmaiError::unavailable(format!("push client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl Notifier for PushNotifier {
    async fn send(&self, to: &Recipient, notification: &Notification) -> Result<(), GinmaiError> {
        let Some(token) = to.push_token.as_deref() else {
            debug!(user = %to.user_id, kind = ?notification.kind, "no push token, skipping");
            return Ok(());
        };

        let message = PushMessage {
            to: token,
            title: &notification.title,
            body: &notification.body,
            data: &notification.data,
            sound: "default",
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&message)
            .send()
            .await
            .map_err(|e| GinmaiError::unavailable(format!("push gateway unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(GinmaiError::unavailable(format!(
                "push gateway returned {}",
                response.status()
            )));
        }

        info!(user = %to.user_id, kind = ?notification.kind, "push notification sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ginmai_shared::types::{MomentId, UserId};

    use super::*;

    #[tokio::test]
    async fn test_missing_token_is_skipped() {
        // Unroutable endpoint: the call must not even try to connect.
        let notifier = PushNotifier::new("http://127.0.0.1:9/push").unwrap();
        let to = Recipient {
            user_id: UserId::new(),
            push_token: None,
        };
        let n = Notification::guest_joined(MomentId::new(), "Ploy");
        assert!(notifier.send(&to, &n).await.is_ok());
    }

    #[test]
    fn test_message_shape() {
        let n = Notification::guest_arrived(MomentId::new(), "Ploy");
        let message = PushMessage {
            to: "ExponentPushToken[abc]",
            title: &n.title,
            body: &n.body,
            data: &n.data,
            sound: "default",
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["to"], "ExponentPushToken[abc]");
        assert_eq!(json["data"]["type"], "guest_arrived");
    }
}
