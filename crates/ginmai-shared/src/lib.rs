//! # ginmai-shared
//!
//! Vocabulary shared by every GinMai crate: identifiers and status enums,
//! the error taxonomy, the reliability scorer, notification templates and
//! the HTTP request bodies.

pub mod constants;
pub mod error;
pub mod geo;
pub mod notify;
pub mod protocol;
pub mod reliability;
pub mod types;

pub use error::{Conflict, GinmaiError};
pub use geo::GeoPoint;
