//! # ginmai-client
//!
//! Client core for the GinMai apps. The UI shell owns rendering and platform
//! services; this crate owns everything between a tap and the backend:
//!
//! - a [`MomentBackend`] seam with an HTTP implementation and a local-only,
//!   best-effort one
//! - live "near me" and guest views fed by realtime change streams
//! - join reconciliation after lost replies
//! - "running late?" reminders through the platform's local scheduler
//!
//! The shell installs its own `tracing` subscriber; this crate only emits.

pub mod backend;
pub mod config;
pub mod events;
pub mod geocode;
pub mod http;
pub mod identity;
pub mod local;
pub mod realtime;
pub mod reminders;
pub mod session;
pub mod sse;

pub use backend::{connect, FeedEvent, FeedStream, MomentBackend};
pub use config::{BackendMode, ClientConfig};
pub use events::SessionEvent;
pub use geocode::{Geocoder, NoGeocoder};
pub use identity::{IdentityProvider, StaticIdentity};
pub use reminders::{LocalScheduler, ReminderHandle, TokioScheduler};
pub use session::{JoinOutcome, Session};
