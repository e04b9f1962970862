#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Feature bundle types for the smallbiz map.
//!
//! Defines the per-source value types produced by the upstream adapters,
//! the merged [`FeatureBundle`] returned for every hover query, the
//! structured [`SourceNote`] recorded when a source degrades, and the
//! coordinate [`grid`] used to key caches.

pub mod grid;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub use grid::{GRID_PRECISION_DIGITS, GridKey, quantize};

/// Smallest accepted search radius in meters.
pub const MIN_RADIUS_M: u32 = 100;

/// Largest accepted search radius in meters.
pub const MAX_RADIUS_M: u32 = 2000;

/// Radius used when a caller does not supply one.
pub const DEFAULT_RADIUS_M: u32 = 500;

/// Bucket for crime records that carry no type label.
pub const UNKNOWN_CRIME_TYPE: &str = "UNKNOWN";

/// Note attached to the transit placeholder until stop data is wired in.
pub const TRANSIT_PENDING_NOTE: &str = "GTFS pending";

/// Maximum number of characters kept in a [`SourceNote`] message.
pub const NOTE_MESSAGE_MAX_CHARS: usize = 180;

/// A query rejected before any source is contacted.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    /// Radius outside `[MIN_RADIUS_M, MAX_RADIUS_M]`.
    #[error("radius {radius_m} m is outside 100..=2000")]
    RadiusOutOfRange {
        /// The rejected radius.
        radius_m: u32,
    },

    /// Latitude not finite or outside `[-90, 90]`.
    #[error("latitude {lat} is outside -90..=90")]
    LatitudeOutOfRange {
        /// The rejected latitude.
        lat: f64,
    },

    /// Longitude not finite or outside `[-180, 180]`.
    #[error("longitude {lon} is outside -180..=180")]
    LongitudeOutOfRange {
        /// The rejected longitude.
        lon: f64,
    },
}

/// A validated "what is around this point" query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureQuery {
    /// Raw latitude as supplied by the caller.
    pub lat: f64,
    /// Raw longitude as supplied by the caller.
    pub lon: f64,
    /// Search radius in meters.
    pub radius_m: u32,
}

impl FeatureQuery {
    /// Validates and builds a query.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] if the radius or either coordinate is out of
    /// range.
    pub fn new(lat: f64, lon: f64, radius_m: u32) -> Result<Self, QueryError> {
        if !(MIN_RADIUS_M..=MAX_RADIUS_M).contains(&radius_m) {
            return Err(QueryError::RadiusOutOfRange { radius_m });
        }
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(QueryError::LatitudeOutOfRange { lat });
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(QueryError::LongitudeOutOfRange { lon });
        }
        Ok(Self { lat, lon, radius_m })
    }

    /// The grid cell this query is served from.
    #[must_use]
    pub fn grid_key(&self) -> GridKey {
        quantize(self.lat, self.lon, GRID_PRECISION_DIGITS)
    }
}

/// The upstream sources that contribute to a [`FeatureBundle`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SourceName {
    /// Census Bureau coordinate → tract lookup.
    CensusGeo,
    /// American Community Survey tract estimates.
    CensusAcs,
    /// `OpenStreetMap` points of interest via Overpass.
    Poi,
    /// Police department crime statistics.
    Crime,
    /// Transit stops (placeholder).
    Transit,
}

impl SourceName {
    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::CensusGeo,
            Self::CensusAcs,
            Self::Poi,
            Self::Crime,
            Self::Transit,
        ]
    }
}

/// Category of an upstream fetch failure.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FetchErrorKind {
    /// Network failure or timeout.
    Transport,
    /// The upstream answered with a non-success status.
    UpstreamStatus,
    /// The body could not be parsed or had an unexpected shape.
    MalformedResponse,
}

/// Diagnostic recorded for a source that fell back to its default value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceNote {
    /// What kind of failure occurred.
    pub kind: FetchErrorKind,
    /// Human-readable detail, at most [`NOTE_MESSAGE_MAX_CHARS`] characters.
    pub message: String,
}

impl SourceNote {
    /// Builds a note, truncating `message` to [`NOTE_MESSAGE_MAX_CHARS`].
    #[must_use]
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = match message.char_indices().nth(NOTE_MESSAGE_MAX_CHARS) {
            Some((cut, _)) => message[..cut].to_string(),
            None => message,
        };
        Self { kind, message }
    }
}

/// Administrative identifiers for the Census tract containing a point.
///
/// Empty when the geocoder found no tract; that is a normal outcome for
/// points in water or outside the US, not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeoIdentity {
    /// Two-digit state FIPS code.
    pub state_fips: Option<String>,
    /// Three-digit county FIPS code.
    pub county_fips: Option<String>,
    /// Six-digit tract code.
    pub tract: Option<String>,
}

impl GeoIdentity {
    /// An identity with every code present.
    #[must_use]
    pub fn new(
        state_fips: impl Into<String>,
        county_fips: impl Into<String>,
        tract: impl Into<String>,
    ) -> Self {
        Self {
            state_fips: Some(state_fips.into()),
            county_fips: Some(county_fips.into()),
            tract: Some(tract.into()),
        }
    }

    /// Whether no tract was resolved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tract_id().is_none()
    }

    /// The fully-qualified tract, if every code is present.
    #[must_use]
    pub fn tract_id(&self) -> Option<TractId> {
        Some(TractId {
            state_fips: self.state_fips.clone()?,
            county_fips: self.county_fips.clone()?,
            tract: self.tract.clone()?,
        })
    }
}

/// A fully-qualified Census tract, the key for demographic lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TractId {
    /// Two-digit state FIPS code.
    pub state_fips: String,
    /// Three-digit county FIPS code.
    pub county_fips: String,
    /// Six-digit tract code.
    pub tract: String,
}

/// ACS estimates for one tract. Each field is parsed independently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemographicProfile {
    /// Total population (`B01003_001E`).
    pub population: Option<u64>,
    /// Median household income in dollars (`B19013_001E`).
    pub median_household_income: Option<u64>,
}

/// Point-of-interest categories counted around a query point.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PoiCategory {
    /// `amenity=restaurant`
    Restaurants,
    /// `amenity=bar`
    Bars,
    /// `amenity=cafe`
    Cafes,
    /// Any feature tagged `shop`.
    Shops,
}

impl PoiCategory {
    /// Returns all variants of this enum, in query order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Restaurants, Self::Bars, Self::Cafes, Self::Shops]
    }

    /// The `OpenStreetMap` tag filter selecting this category.
    #[must_use]
    pub const fn osm_filter(self) -> &'static str {
        match self {
            Self::Restaurants => r#""amenity"="restaurant""#,
            Self::Bars => r#""amenity"="bar""#,
            Self::Cafes => r#""amenity"="cafe""#,
            Self::Shops => r#""shop""#,
        }
    }
}

/// Feature counts per [`PoiCategory`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoiCounts {
    /// Restaurants within the radius.
    pub restaurants: u64,
    /// Bars within the radius.
    pub bars: u64,
    /// Cafes within the radius.
    pub cafes: u64,
    /// Shops within the radius.
    pub shops: u64,
}

impl PoiCounts {
    #[cfg(test)]
    const fn get(&self, category: PoiCategory) -> u64 {
        match category {
            PoiCategory::Restaurants => self.restaurants,
            PoiCategory::Bars => self.bars,
            PoiCategory::Cafes => self.cafes,
            PoiCategory::Shops => self.shops,
        }
    }

    /// Sets the count for one category.
    pub const fn set(&mut self, category: PoiCategory, count: u64) {
        match category {
            PoiCategory::Restaurants => self.restaurants = count,
            PoiCategory::Bars => self.bars = count,
            PoiCategory::Cafes => self.cafes = count,
            PoiCategory::Shops => self.shops = count,
        }
    }
}

/// Crime counts over the trailing three months.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrimeSummary {
    /// Total incidents within the radius.
    pub total_last_3mo: u64,
    /// Incidents per crime-type label. Unlabeled incidents are counted
    /// under [`UNKNOWN_CRIME_TYPE`].
    pub by_type: BTreeMap<String, u64>,
}

/// Transit accessibility around the query point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitSummary {
    /// Distance to the nearest stop.
    pub nearest_stop_m: Option<u64>,
    /// Number of stops within the radius.
    pub stops_within_radius: Option<u64>,
    /// Status note.
    pub note: String,
}

impl TransitSummary {
    /// The fixed placeholder served until stop data is available.
    #[must_use]
    pub fn placeholder() -> Self {
        Self {
            nearest_stop_m: None,
            stops_within_radius: None,
            note: TRANSIT_PENDING_NOTE.to_string(),
        }
    }
}

/// The `census` section of a [`FeatureBundle`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CensusSection {
    /// Two-digit state FIPS code.
    pub state_fips: Option<String>,
    /// Three-digit county FIPS code.
    pub county_fips: Option<String>,
    /// Six-digit tract code.
    pub tract: Option<String>,
    /// Total population.
    pub population: Option<u64>,
    /// Median household income in dollars.
    pub median_household_income: Option<u64>,
}

impl CensusSection {
    /// Merges a tract identity with its (optional) demographics.
    #[must_use]
    pub fn new(geo: GeoIdentity, demographics: Option<DemographicProfile>) -> Self {
        let demographics = demographics.unwrap_or_default();
        Self {
            state_fips: geo.state_fips,
            county_fips: geo.county_fips,
            tract: geo.tract,
            population: demographics.population,
            median_household_income: demographics.median_household_income,
        }
    }
}

/// The `poi` section of a [`FeatureBundle`]; all `None` when the source
/// failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoiSection {
    /// Restaurants within the radius.
    pub restaurants: Option<u64>,
    /// Bars within the radius.
    pub bars: Option<u64>,
    /// Cafes within the radius.
    pub cafes: Option<u64>,
    /// Shops within the radius.
    pub shops: Option<u64>,
}

impl From<PoiCounts> for PoiSection {
    fn from(counts: PoiCounts) -> Self {
        Self {
            restaurants: Some(counts.restaurants),
            bars: Some(counts.bars),
            cafes: Some(counts.cafes),
            shops: Some(counts.shops),
        }
    }
}

/// The `crime` section of a [`FeatureBundle`]; `total_last_3mo` is `None`
/// and `by_type` empty when the source failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrimeSection {
    /// Total incidents within the radius.
    pub total_last_3mo: Option<u64>,
    /// Incidents per crime-type label.
    pub by_type: BTreeMap<String, u64>,
}

impl From<CrimeSummary> for CrimeSection {
    fn from(summary: CrimeSummary) -> Self {
        Self {
            total_last_3mo: Some(summary.total_last_3mo),
            by_type: summary.by_type,
        }
    }
}

/// Occupancy and hit-rate counters for one source's result cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Entries currently stored.
    pub entries: usize,
    /// Maximum entries before LRU eviction.
    pub capacity: usize,
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that ran the upstream computation.
    pub misses: u64,
}

/// Everything known about the area around one query point.
///
/// Every key is always present; values the sources could not supply are
/// `null`, and each degraded source has an entry in [`notes`](Self::notes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureBundle {
    /// Latitude as supplied by the caller (not quantized).
    pub lat: f64,
    /// Longitude as supplied by the caller (not quantized).
    pub lon: f64,
    /// Search radius in meters.
    pub radius_m: u32,
    /// Tract identity and demographics.
    pub census: CensusSection,
    /// Point-of-interest counts.
    pub poi: PoiSection,
    /// Crime counts.
    pub crime: CrimeSection,
    /// Transit accessibility.
    pub transit: TransitSummary,
    /// Failure diagnostics per degraded source.
    pub notes: BTreeMap<SourceName, SourceNote>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn radius_bounds_are_inclusive() {
        assert!(FeatureQuery::new(39.29, -76.61, MIN_RADIUS_M).is_ok());
        assert!(FeatureQuery::new(39.29, -76.61, MAX_RADIUS_M).is_ok());
        assert_eq!(
            FeatureQuery::new(39.29, -76.61, 99),
            Err(QueryError::RadiusOutOfRange { radius_m: 99 })
        );
        assert_eq!(
            FeatureQuery::new(39.29, -76.61, 2001),
            Err(QueryError::RadiusOutOfRange { radius_m: 2001 })
        );
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(matches!(
            FeatureQuery::new(90.5, 0.0, 500),
            Err(QueryError::LatitudeOutOfRange { .. })
        ));
        assert!(matches!(
            FeatureQuery::new(f64::NAN, 0.0, 500),
            Err(QueryError::LatitudeOutOfRange { .. })
        ));
        assert!(matches!(
            FeatureQuery::new(0.0, -180.5, 500),
            Err(QueryError::LongitudeOutOfRange { .. })
        ));
    }

    #[test]
    fn source_names_serialize_snake_case() {
        let names: Vec<String> = SourceName::all().iter().map(ToString::to_string).collect();
        assert_eq!(
            names,
            vec!["census_geo", "census_acs", "poi", "crime", "transit"]
        );
        assert_eq!("census_acs".parse::<SourceName>(), Ok(SourceName::CensusAcs));
    }

    #[test]
    fn note_message_is_truncated_on_char_boundary() {
        let long = "é".repeat(NOTE_MESSAGE_MAX_CHARS + 20);
        let note = SourceNote::new(FetchErrorKind::Transport, long);
        assert_eq!(note.message.chars().count(), NOTE_MESSAGE_MAX_CHARS);

        let short = SourceNote::new(FetchErrorKind::Transport, "timed out");
        assert_eq!(short.message, "timed out");
    }

    #[test]
    fn partial_geo_identity_is_empty() {
        let geo = GeoIdentity {
            state_fips: Some("24".to_string()),
            county_fips: None,
            tract: Some("040100".to_string()),
        };
        assert!(geo.is_empty());
        assert!(GeoIdentity::default().is_empty());
        assert!(!GeoIdentity::new("24", "510", "040100").is_empty());
    }

    #[test]
    fn bundle_serializes_nulls_not_omissions() {
        let bundle = FeatureBundle {
            lat: 39.2904,
            lon: -76.6122,
            radius_m: 500,
            census: CensusSection::default(),
            poi: PoiSection::default(),
            crime: CrimeSection::default(),
            transit: TransitSummary::placeholder(),
            notes: BTreeMap::from([(
                SourceName::Crime,
                SourceNote::new(FetchErrorKind::Transport, "connection reset"),
            )]),
        };
        let json = serde_json::to_value(&bundle).unwrap();

        assert!(json["census"]["population"].is_null());
        assert!(json["census"]["tract"].is_null());
        assert!(json["poi"]["shops"].is_null());
        assert!(json["crime"]["total_last_3mo"].is_null());
        assert_eq!(json["crime"]["by_type"], serde_json::json!({}));
        assert!(json["transit"]["nearest_stop_m"].is_null());
        assert_eq!(json["transit"]["note"], "GTFS pending");
        assert_eq!(json["notes"]["crime"]["kind"], "transport");
        assert_eq!(json["notes"]["crime"]["message"], "connection reset");

        let mut keys: Vec<&str> = json
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "census", "crime", "lat", "lon", "notes", "poi", "radius_m", "transit"
            ]
        );
    }

    #[test]
    fn poi_counts_get_and_set_by_category() {
        let mut counts = PoiCounts::default();
        for (i, cat) in PoiCategory::all().iter().enumerate() {
            counts.set(*cat, i as u64 + 1);
        }
        assert_eq!(counts.get(PoiCategory::Restaurants), 1);
        assert_eq!(counts.get(PoiCategory::Shops), 4);
        assert_eq!(PoiSection::from(counts).cafes, Some(3));
    }
}
