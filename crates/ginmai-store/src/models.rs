//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the HTTP layer and to the client core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ginmai_shared::constants::{DEFAULT_RADIUS_KM, EXPIRY_BUFFER_MINUTES, MAX_NOTE_CHARS, MAX_SEATS, MIN_SEATS};
use ginmai_shared::types::{
    BlockId, ConnectionId, ConnectionStatus, DurationClass, FeedbackId, MatchId, MomentId,
    MomentStatus, Rating, ReportCategory, ReportId, ReportStatus, UserId,
};
use ginmai_shared::GeoPoint;

use crate::error::{Result, StoreError};

// ---------------------------------------------------------------------------
// Moment
// ---------------------------------------------------------------------------

/// A host's open invitation to share a meal at a place and time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Moment {
    pub id: MomentId,
    /// `None` only for legacy rows authored without a persisted identity.
    pub host_id: Option<UserId>,
    pub host_name: String,
    pub starts_at: DateTime<Utc>,
    pub duration: DurationClass,
    /// Always later than `starts_at`.
    pub expires_at: DateTime<Utc>,
    pub location: GeoPoint,
    pub place_name: Option<String>,
    pub area_name: Option<String>,
    pub seats_total: u8,
    pub seats_taken: u8,
    pub note: Option<String>,
    pub status: MomentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Moment {
    pub fn seats_left(&self) -> u8 {
        self.seats_total.saturating_sub(self.seats_taken)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether the moment belongs in an "active" listing at `now`.
    pub fn is_listable_at(&self, now: DateTime<Utc>, include_full: bool) -> bool {
        let status_ok = match self.status {
            MomentStatus::Active => true,
            MomentStatus::Full => include_full,
            MomentStatus::Completed | MomentStatus::Cancelled => false,
        };
        status_ok && !self.is_expired_at(now)
    }

    pub fn is_hosted_by(&self, user: UserId) -> bool {
        self.host_id == Some(user)
    }

    /// Human label for reminders and notifications.
    pub fn place_label(&self) -> &str {
        self.place_name
            .as_deref()
            .or(self.area_name.as_deref())
            .unwrap_or("your location")
    }
}

/// Input for [`crate::Database::create_moment`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewMoment {
    pub host_id: Option<UserId>,
    pub host_name: String,
    pub starts_at: DateTime<Utc>,
    pub duration: DurationClass,
    pub location: GeoPoint,
    pub place_name: Option<String>,
    pub area_name: Option<String>,
    pub seats_total: u8,
    pub note: Option<String>,
}

impl NewMoment {
    /// `starts_at + nominal duration + buffer`.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.starts_at + self.duration.nominal() + chrono::Duration::minutes(EXPIRY_BUFFER_MINUTES)
    }

    /// Check shape and ranges; returns the validated host id.
    pub fn validate(&self) -> Result<UserId> {
        let host = self
            .host_id
            .ok_or_else(|| StoreError::validation("a moment needs a signed-in host"))?;

        if self.host_name.trim().is_empty() {
            return Err(StoreError::validation("host name must not be empty"));
        }
        if !(MIN_SEATS..=MAX_SEATS).contains(&self.seats_total) {
            return Err(StoreError::validation(format!(
                "seats must be between {MIN_SEATS} and {MAX_SEATS}"
            )));
        }
        if !self.location.is_valid() {
            return Err(StoreError::validation("location is not a valid coordinate"));
        }
        validate_note(self.note.as_deref())?;

        Ok(host)
    }
}

pub(crate) fn validate_note(note: Option<&str>) -> Result<()> {
    match note {
        Some(n) if n.chars().count() > MAX_NOTE_CHARS => Err(StoreError::validation(format!(
            "note must be at most {MAX_NOTE_CHARS} characters"
        ))),
        _ => Ok(()),
    }
}

/// Parameters of an "active moments near me" listing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveQuery {
    pub center: GeoPoint,
    pub radius_km: f64,
    /// Viewer whose blocks are applied, if signed in.
    pub viewer: Option<UserId>,
    pub include_full: bool,
}

impl ActiveQuery {
    pub fn near(center: GeoPoint) -> Self {
        Self {
            center,
            radius_km: DEFAULT_RADIUS_KM,
            viewer: None,
            include_full: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// One user's participation record against one moment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Connection {
    pub id: ConnectionId,
    pub moment_id: MomentId,
    pub user_id: UserId,
    pub status: ConnectionStatus,
    pub joined_at: DateTime<Utc>,
    pub arrived_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub running_late: bool,
    pub running_late_at: Option<DateTime<Utc>>,
}

/// A guest as seen from the host's live view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Guest {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub display_name: String,
    pub joined_at: DateTime<Utc>,
    pub status: ConnectionStatus,
    pub running_late: bool,
}

// ---------------------------------------------------------------------------
// Feedback and matches
// ---------------------------------------------------------------------------

/// One user's private rating of another after a shared moment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Feedback {
    pub id: FeedbackId,
    pub moment_id: MomentId,
    pub from_user: UserId,
    pub about_user: UserId,
    pub rating: Rating,
    pub eat_again: Option<bool>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for [`crate::Database::record_feedback`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFeedback {
    pub moment_id: MomentId,
    pub from_user: UserId,
    pub about_user: UserId,
    pub rating: Rating,
    pub eat_again: Option<bool>,
    pub note: Option<String>,
}

/// Symmetric "eat again" link. `user_a < user_b` always holds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EatAgainMatch {
    pub id: MatchId,
    pub user_a: UserId,
    pub user_b: UserId,
    pub moment_id: MomentId,
    pub matched_at: DateTime<Utc>,
}

impl EatAgainMatch {
    pub fn other(&self, me: UserId) -> UserId {
        if self.user_a == me {
            self.user_b
        } else {
            self.user_a
        }
    }
}

/// Order a pair so the same two users always map to the same row.
pub fn canonical_pair(a: UserId, b: UserId) -> (UserId, UserId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Result of a match detection pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MatchOutcome {
    Created { matched: EatAgainMatch },
    AlreadyMatched,
    NotReciprocated,
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        !matches!(self, MatchOutcome::NotReciprocated)
    }
}

/// Feedback plus whether it completed a mutual match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedbackOutcome {
    pub feedback: Feedback,
    pub matched: bool,
}

/// A counterpart the user has matched with, aggregated over moments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchedUser {
    pub user_id: UserId,
    pub first_name: String,
    pub total_meals_together: u32,
    pub last_meal_together: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub first_name: String,
    pub push_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Counts derived from moments and connections on read.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserStats {
    pub meals_hosted: u32,
    pub meals_joined: u32,
    pub no_shows: u32,
}

// ---------------------------------------------------------------------------
// Safety
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    pub id: BlockId,
    pub blocker_id: UserId,
    pub blocked_id: UserId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Report {
    pub id: ReportId,
    pub reporter_id: UserId,
    pub reported_user_id: UserId,
    pub moment_id: Option<MomentId>,
    pub category: ReportCategory,
    pub description: Option<String>,
    pub status: ReportStatus,
    pub created_at: DateTime<Utc>,
}
