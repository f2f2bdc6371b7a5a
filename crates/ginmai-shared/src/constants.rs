/// Application name
pub const APP_NAME: &str = "GinMai";

/// Seat capacity bounds for a single moment
pub const MIN_SEATS: u8 = 1;
pub const MAX_SEATS: u8 = 4;

/// Maximum length of a moment note or feedback note, in characters
pub const MAX_NOTE_CHARS: usize = 140;

/// Grace period added after the nominal meal length before a moment expires
pub const EXPIRY_BUFFER_MINUTES: i64 = 60;

/// Reminders fire this long before a moment starts
pub const REMINDER_LEAD_MINUTES: i64 = 10;

/// Reminders closer than this to "now" are not scheduled at all
pub const REMINDER_MIN_DELAY_SECS: i64 = 30;

/// Default discovery radius for nearby moments
pub const DEFAULT_RADIUS_KM: f64 = 5.0;

/// Display name used when a user's profile cannot be resolved
pub const FALLBACK_DISPLAY_NAME: &str = "Guest";

/// Area label used when reverse geocoding fails
pub const FALLBACK_AREA_NAME: &str = "Nearby";

/// Users with fewer meals than this are labeled "New"
pub const NEW_USER_MEAL_THRESHOLD: u64 = 3;

/// Minimum meals before a low reliability score is surfaced as a warning
pub const WARNING_MIN_MEALS: u64 = 5;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Capacity of the in-process change feed
pub const CHANGE_FEED_CAPACITY: usize = 1024;
