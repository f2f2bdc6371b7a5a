use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Stable opaque user id issued by the identity provider after phone
    /// verification.
    UserId
);
uuid_id!(MomentId);
uuid_id!(ConnectionId);
uuid_id!(FeedbackId);
uuid_id!(MatchId);
uuid_id!(BlockId);
uuid_id!(ReportId);

/// Error returned when a stored or wire string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

string_enum!(
    /// Nominal length class a host picks when publishing a moment.
    DurationClass, "duration class" {
        Quick => "quick",
        Normal => "normal",
        Long => "long",
    }
);

impl DurationClass {
    /// Nominal meal length in minutes (30 / 60 / 120).
    pub fn nominal_minutes(&self) -> i64 {
        match self {
            Self::Quick => 30,
            Self::Normal => 60,
            Self::Long => 120,
        }
    }

    pub fn nominal(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.nominal_minutes())
    }
}

string_enum!(
    MomentStatus, "moment status" {
        Active => "active",
        Full => "full",
        Completed => "completed",
        Cancelled => "cancelled",
    }
);

impl MomentStatus {
    /// Whether the moment still accepts joins and leaves.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Active | Self::Full)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

string_enum!(
    ConnectionStatus, "connection status" {
        Confirmed => "confirmed",
        Cancelled => "cancelled",
        NoShow => "no_show",
        Completed => "completed",
        Arrived => "arrived",
    }
);

impl ConnectionStatus {
    /// Statuses that hold a seat. At most one such row may exist per
    /// (moment, user) pair.
    pub fn holds_seat(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Arrived)
    }

    /// Statuses that count as "has joined" for ledger queries.
    pub fn counts_as_joined(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Arrived | Self::Completed)
    }
}

string_enum!(
    Rating, "rating" {
        Great => "great",
        Okay => "okay",
        Nope => "nope",
    }
);

string_enum!(
    ReportCategory, "report category" {
        NoShow => "no_show",
        InappropriateBehavior => "inappropriate_behavior",
        Harassment => "harassment",
        FakeProfile => "fake_profile",
        SafetyConcern => "safety_concern",
        Other => "other",
    }
);

string_enum!(
    ReportStatus, "report status" {
        Pending => "pending",
        Reviewing => "reviewing",
        Resolved => "resolved",
        Dismissed => "dismissed",
    }
);
