//! Reliability scoring.
//!
//! A user's reliability is derived from cumulative meal counts: the share of
//! meals (hosted plus joined) that did not end in a no-show, bucketed into a
//! discrete label. The scorer is pure and total over all inputs.

use serde::{Deserialize, Serialize};

use crate::constants::{NEW_USER_MEAL_THRESHOLD, WARNING_MIN_MEALS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReliabilityLabel {
    New,
    Reliable,
    Good,
    Fair,
    Warning,
}

impl ReliabilityLabel {
    pub fn badge(&self) -> &'static str {
        match self {
            ReliabilityLabel::New => "🆕",
            ReliabilityLabel::Reliable => "⭐",
            ReliabilityLabel::Good => "✅",
            ReliabilityLabel::Fair => "👍",
            ReliabilityLabel::Warning => "⚠️",
        }
    }

    /// Hex colour used by badge renderers.
    pub fn color(&self) -> &'static str {
        match self {
            ReliabilityLabel::Reliable => "#22C55E",
            ReliabilityLabel::Good => "#3B82F6",
            ReliabilityLabel::Fair => "#F59E0B",
            ReliabilityLabel::Warning => "#EF4444",
            ReliabilityLabel::New => "#9CA3AF",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ReliabilityLabel::Reliable => "Very reliable - rarely misses meals",
            ReliabilityLabel::Good => "Generally reliable",
            ReliabilityLabel::Fair => "Sometimes doesn't show up",
            ReliabilityLabel::Warning => "Often doesn't show up",
            ReliabilityLabel::New => "New to GinMai",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityStats {
    pub meals_completed: u64,
    pub no_shows: u64,
    pub total_meals: u64,
    /// 0.0 to 1.0
    pub score: f64,
    /// 0 to 100
    pub percentage: u8,
    pub label: ReliabilityLabel,
}

impl ReliabilityStats {
    /// Whether the profile should carry a visible reliability warning.
    pub fn should_show_warning(&self) -> bool {
        self.total_meals >= WARNING_MIN_MEALS && self.score < 0.60
    }
}

/// Score a user from their cumulative counts.
///
/// `no_shows` larger than the number of meals is inconsistent data; it clamps
/// the score to zero and always yields [`ReliabilityLabel::Warning`].
pub fn score(meals_hosted: u32, meals_joined: u32, no_shows: u32) -> ReliabilityStats {
    let total = u64::from(meals_hosted) + u64::from(meals_joined);
    let no_shows = u64::from(no_shows);
    let completed = total.saturating_sub(no_shows);

    let score = if total > 0 {
        completed as f64 / total as f64
    } else {
        1.0
    };

    let label = if no_shows > total {
        ReliabilityLabel::Warning
    } else if total < NEW_USER_MEAL_THRESHOLD {
        ReliabilityLabel::New
    } else if score >= 0.95 {
        ReliabilityLabel::Reliable
    } else if score >= 0.80 {
        ReliabilityLabel::Good
    } else if score >= 0.60 {
        ReliabilityLabel::Fair
    } else {
        ReliabilityLabel::Warning
    };

    ReliabilityStats {
        meals_completed: completed,
        no_shows,
        total_meals: total,
        score,
        percentage: (score * 100.0).round().clamp(0.0, 100.0) as u8,
        label,
    }
}
