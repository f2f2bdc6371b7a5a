//! Request and error bodies exchanged between the client core and the HTTP
//! API. Response bodies are the store's own model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;
use crate::types::{DurationClass, MomentId, Rating, ReportCategory, UserId};

/// Header carrying the identity provider's user id (`Bearer <uuid>`).
pub const AUTH_HEADER: &str = "authorization";

/// SSE event name for a committed row change.
pub const SSE_EVENT_CHANGE: &str = "change";

/// SSE event name telling the subscriber it missed events and must refetch.
pub const SSE_EVENT_RESYNC: &str = "resync";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateMomentRequest {
    pub host_name: String,
    pub starts_at: DateTime<Utc>,
    pub duration: DurationClass,
    pub location: GeoPoint,
    #[serde(default)]
    pub place_name: Option<String>,
    #[serde(default)]
    pub area_name: Option<String>,
    pub seats_total: u8,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NearbyQuery {
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub radius_km: Option<f64>,
    #[serde(default)]
    pub include_full: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub about_user: UserId,
    pub rating: Rating,
    #[serde(default)]
    pub eat_again: Option<bool>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRequest {
    pub first_name: String,
    #[serde(default)]
    pub push_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRequest {
    pub reported_user_id: UserId,
    #[serde(default)]
    pub moment_id: Option<MomentId>,
    pub category: ReportCategory,
    #[serde(default)]
    pub description: Option<String>,
}

/// JSON body of every non-2xx API response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearby_query_defaults() {
        let q: NearbyQuery = serde_json::from_str(r#"{"lat":13.7,"lng":100.5}"#).unwrap();
        assert_eq!(q.radius_km, None);
        assert!(!q.include_full);
    }

    #[test]
    fn test_create_request_optional_fields() {
        let body = r#"{
            "host_name": "Nok",
            "starts_at": "2026-10-17T12:00:00Z",
            "duration": "quick",
            "location": {"lat": 13.7, "lng": 100.5},
            "seats_total": 2
        }"#;
        let req: CreateMomentRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.duration, DurationClass::Quick);
        assert!(req.note.is_none());
    }
}
