//! # ginmai-store
//!
//! Durable storage for GinMai moments, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle with typed operations
//! for every domain model, a [`ChangeFeed`] that publishes committed moment
//! and connection changes, and the async [`MomentEngine`] used by the server
//! and by the client's local-only mode.
//!
//! Capacity consistency lives here: every seat change runs in one
//! `BEGIN IMMEDIATE` transaction together with the connection row it belongs
//! to, so any number of handles on the same file cannot overbook a moment.

pub mod changes;
pub mod connections;
pub mod database;
pub mod engine;
pub mod feedback;
pub mod migrations;
pub mod models;
pub mod moments;
pub mod notifier;
pub mod safety;
pub mod users;

mod error;
mod rows;

pub use changes::{ChangeFeed, ChangeKind, ChangedRow, RowChange};
pub use database::Database;
pub use engine::MomentEngine;
pub use error::StoreError;
pub use models::*;
pub use notifier::{LogNotifier, MemoryNotifier, Notifier, Recipient};
pub use safety::NewReport;
