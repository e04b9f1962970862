//! Upstream source adapters.
//!
//! Each adapter turns one upstream API into a typed answer. Adapters know
//! nothing about caching or rate limiting; those are applied around them
//! by [`SourceChannel`](crate::channel::SourceChannel).

pub mod arcgis_crime;
pub mod census_acs;
pub mod census_geo;
pub mod overpass;
pub mod transit;

use std::sync::Arc;

use async_trait::async_trait;
use smallbiz_map_features_models::{
    CrimeSummary, DemographicProfile, GeoIdentity, GridKey, PoiCounts, TractId,
};

use crate::FetchError;
use crate::config::{ConfigError, FeaturesConfig};
use crate::http::build_client;

/// Resolves a grid cell to its census state, county and tract.
#[async_trait]
pub trait GeographySource: Send + Sync {
    /// Looks up the geographies containing the cell's center.
    ///
    /// A point outside any tract yields an empty [`GeoIdentity`], not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if the upstream request fails.
    async fn geographies(&self, key: GridKey) -> Result<GeoIdentity, FetchError>;
}

/// Looks up demographic estimates for a census tract.
#[async_trait]
pub trait DemographicsSource: Send + Sync {
    /// Fetches population and median household income for `tract`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if the request fails or the table has no
    /// data row.
    async fn demographics(&self, tract: &TractId) -> Result<DemographicProfile, FetchError>;
}

/// Counts points of interest around a grid cell.
#[async_trait]
pub trait PoiSource: Send + Sync {
    /// Counts each [`PoiCategory`](smallbiz_map_features_models::PoiCategory)
    /// within `radius_m` meters of the cell's center.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if any category's request fails.
    async fn poi_counts(&self, key: GridKey, radius_m: u32) -> Result<PoiCounts, FetchError>;
}

/// Summarizes recent crime around a grid cell.
#[async_trait]
pub trait CrimeStatsSource: Send + Sync {
    /// Counts incidents within `radius_m` meters of the cell's center,
    /// in total and per crime type.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if either request fails.
    async fn crime_summary(&self, key: GridKey, radius_m: u32) -> Result<CrimeSummary, FetchError>;
}

/// The adapters an [`Aggregator`](crate::Aggregator) fans out to.
#[derive(Clone)]
pub struct SourceSet {
    /// Coordinate → tract lookup.
    pub geography: Arc<dyn GeographySource>,
    /// Tract → demographics lookup.
    pub demographics: Arc<dyn DemographicsSource>,
    /// POI counts.
    pub poi: Arc<dyn PoiSource>,
    /// Crime statistics.
    pub crime: Arc<dyn CrimeStatsSource>,
}

impl SourceSet {
    /// The live HTTP adapters, sharing one client.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::HttpClient`] if the client cannot be built.
    pub fn http(config: &FeaturesConfig) -> Result<Self, ConfigError> {
        let client = build_client(&config.user_agent)?;
        Ok(Self {
            geography: Arc::new(census_geo::CensusGeographies::new(
                client.clone(),
                config.census_geo.clone(),
            )),
            demographics: Arc::new(census_acs::AcsDemographics::new(
                client.clone(),
                config.census_acs.clone(),
            )),
            poi: Arc::new(overpass::OverpassPoi::new(client.clone(), config.poi.clone())),
            crime: Arc::new(arcgis_crime::ArcGisCrime::new(client, config.crime.clone())),
        })
    }
}

impl std::fmt::Debug for SourceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceSet").finish_non_exhaustive()
    }
}
