//! Notification payloads handed to the push transport or the local scheduler.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::types::{MomentId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    GuestJoined,
    GuestArrived,
    GuestCancelled,
    GuestRunningLate,
    RunningLateReminder,
    EatAgainMatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    /// Structured payload the receiving app uses for deep links.
    pub data: serde_json::Value,
}

impl Notification {
    fn new(kind: NotificationKind, title: &str, body: String, data: serde_json::Value) -> Self {
        let mut data = data;
        if let Some(map) = data.as_object_mut() {
            map.insert("type".into(), json!(kind));
        }
        Self {
            kind,
            title: title.to_string(),
            body,
            data,
        }
    }

    pub fn guest_joined(moment_id: MomentId, guest_name: &str) -> Self {
        Self::new(
            NotificationKind::GuestJoined,
            "New guest! 🎉",
            format!("{guest_name} wants to join your lunch"),
            json!({ "momentId": moment_id }),
        )
    }

    pub fn guest_arrived(moment_id: MomentId, guest_name: &str) -> Self {
        Self::new(
            NotificationKind::GuestArrived,
            "Guest arrived!",
            format!("{guest_name} is here"),
            json!({ "momentId": moment_id }),
        )
    }

    pub fn guest_cancelled(moment_id: MomentId, guest_name: &str) -> Self {
        Self::new(
            NotificationKind::GuestCancelled,
            "Guest cancelled",
            format!("{guest_name} can't make it anymore"),
            json!({ "momentId": moment_id }),
        )
    }

    pub fn guest_running_late(moment_id: MomentId, guest_name: &str) -> Self {
        Self::new(
            NotificationKind::GuestRunningLate,
            "Running late",
            format!("{guest_name} is running a few minutes late"),
            json!({ "momentId": moment_id }),
        )
    }

    pub fn running_late_reminder(moment_id: MomentId, place: &str) -> Self {
        Self::new(
            NotificationKind::RunningLateReminder,
            "Your meal starts soon",
            format!("Your lunch at {place} starts in 10 minutes. Running late?"),
            json!({ "momentId": moment_id, "action": "check_late_status" }),
        )
    }

    pub fn eat_again_match(matched_user: UserId, matched_name: &str) -> Self {
        Self::new(
            NotificationKind::EatAgainMatch,
            "You matched! 🎉",
            format!("You and {matched_name} want to eat again!"),
            json!({ "userId": matched_user }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_carries_type_tag() {
        let moment = MomentId::new();
        let n = Notification::guest_joined(moment, "Ploy");
        assert_eq!(n.data["type"], "guest_joined");
        assert_eq!(n.data["momentId"], moment.to_string());
        assert_eq!(n.body, "Ploy wants to join your lunch");
    }

    #[test]
    fn test_reminder_mentions_place() {
        let n = Notification::running_late_reminder(MomentId::new(), "Jay Fai");
        assert!(n.body.contains("Jay Fai"));
        assert_eq!(n.data["action"], "check_late_status");
    }
}
