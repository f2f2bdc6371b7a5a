//! Reverse geocoding for a new moment's area label.

use async_trait::async_trait;
use tracing::debug;

use ginmai_shared::constants::FALLBACK_AREA_NAME;
use ginmai_shared::{GeoPoint, GinmaiError};

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Human area name for `at`, e.g. "Sathorn". `Ok(None)` when unknown.
    async fn reverse_geocode(&self, at: GeoPoint) -> Result<Option<String>, GinmaiError>;
}

/// Geocoder for platforms without one; every lookup is unknown.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGeocoder;

#[async_trait]
impl Geocoder for NoGeocoder {
    async fn reverse_geocode(&self, _at: GeoPoint) -> Result<Option<String>, GinmaiError> {
        Ok(None)
    }
}

/// Area label for `at`. Never fails: lookups that error or come back blank
/// fall back to a generic label.
pub async fn area_label(geocoder: &dyn Geocoder, at: GeoPoint) -> String {
    match geocoder.reverse_geocode(at).await {
        Ok(Some(name)) if !name.trim().is_empty() => name.trim().to_string(),
        Ok(_) => FALLBACK_AREA_NAME.to_string(),
        Err(e) => {
            debug!(error = %e, "reverse geocoding failed");
            FALLBACK_AREA_NAME.to_string()
        }
    }
}
