#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! API request and response types for the smallbiz map server.
//!
//! The feature bundle itself is served as-is from
//! [`smallbiz_map_features_models::FeatureBundle`]; the types here cover the
//! query string and the service endpoints around it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use smallbiz_map_features_models::{CacheStats, DEFAULT_RADIUS_M, SourceName};

/// Query parameters for the features endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct FeaturesQueryParams {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Search radius in meters.
    #[serde(default = "default_radius")]
    pub radius: u32,
}

const fn default_radius() -> u32 {
    DEFAULT_RADIUS_M
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiHealth {
    /// Whether the service is healthy.
    pub healthy: bool,
    /// Service version.
    pub version: String,
    /// Result cache counters per upstream source.
    pub caches: BTreeMap<SourceName, CacheStats>,
}

/// Error body for rejected requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// What was wrong with the request.
    pub error: String,
}

impl ApiError {
    /// Wraps an error message.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
