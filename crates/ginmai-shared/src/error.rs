use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Expected, recoverable business-rule rejections.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conflict {
    #[error("This moment is full")]
    Full,

    #[error("You can't join your own moment")]
    AlreadyHost,

    #[error("You've already joined this moment")]
    AlreadyJoined,

    #[error("You've already left feedback for this person")]
    DuplicateFeedback,

    #[error("This moment is no longer open")]
    MomentClosed,

    #[error("You can't join this moment")]
    Blocked,

    #[error("You didn't share this moment with them")]
    NotConnected,
}

impl Conflict {
    pub fn code(&self) -> &'static str {
        match self {
            Conflict::Full => "full",
            Conflict::AlreadyHost => "already_host",
            Conflict::AlreadyJoined => "already_joined",
            Conflict::DuplicateFeedback => "duplicate_feedback",
            Conflict::MomentClosed => "moment_closed",
            Conflict::Blocked => "blocked",
            Conflict::NotConnected => "not_connected",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Some(match code {
            "full" => Conflict::Full,
            "already_host" => Conflict::AlreadyHost,
            "already_joined" => Conflict::AlreadyJoined,
            "duplicate_feedback" => Conflict::DuplicateFeedback,
            "moment_closed" => Conflict::MomentClosed,
            "blocked" => Conflict::Blocked,
            "not_connected" => Conflict::NotConnected,
            _ => return None,
        })
    }
}

/// Error taxonomy shared by the store, the server and the client.
///
/// Only [`GinmaiError::Unavailable`] is an infrastructure failure worth
/// retrying; every other variant is terminal for the call that produced it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GinmaiError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(#[from] Conflict),

    #[error("Not allowed: {0}")]
    Unauthorized(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl GinmaiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Machine-readable code carried in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            GinmaiError::Validation(_) => "validation",
            GinmaiError::NotFound(_) => "not_found",
            GinmaiError::Conflict(c) => c.code(),
            GinmaiError::Unauthorized(_) => "unauthorized",
            GinmaiError::Unavailable(_) => "unavailable",
        }
    }

    /// Rebuild an error from an API error body.
    pub fn from_wire(code: &str, message: String) -> Self {
        if let Some(conflict) = Conflict::from_code(code) {
            return GinmaiError::Conflict(conflict);
        }
        match code {
            "validation" => GinmaiError::Validation(message),
            "not_found" => GinmaiError::NotFound(message),
            "unauthorized" => GinmaiError::Unauthorized(message),
            _ => GinmaiError::Unavailable(message),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, GinmaiError::Unavailable(_))
    }

    pub fn conflict(&self) -> Option<Conflict> {
        match self {
            GinmaiError::Conflict(c) => Some(*c),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, GinmaiError>;
