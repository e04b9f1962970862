//! Transit accessibility.
//!
//! No GTFS feed is wired up yet, so every query gets the placeholder
//! summary with null counts. It never fails and is never cached.

use smallbiz_map_features_models::TransitSummary;

/// Transit summary around a raw (unquantized) coordinate.
#[must_use]
pub fn transit_summary(_lat: f64, _lon: f64, _radius_m: u32) -> TransitSummary {
    TransitSummary::placeholder()
}
