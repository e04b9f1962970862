//! Fan-out over every source and assembly of the [`FeatureBundle`].
//!
//! A request moves through the sources as follows:
//!
//! ```text
//! validate ─┬─ geocode ──(tract?)── demographics ─┐
//!           ├─ poi ───────────────────────────────┤
//!           ├─ crime ─────────────────────────────┼─ assemble
//!           └─ transit ───────────────────────────┘
//! ```
//!
//! The four branches run concurrently. Any source error is replaced by that
//! source's fallback section and recorded in the bundle's `notes`; only
//! invalid input fails the request as a whole.

use std::collections::BTreeMap;

use smallbiz_map_features_models::{
    CacheStats, CensusSection, CrimeSection, CrimeSummary, DemographicProfile, FeatureBundle,
    FeatureQuery, GeoIdentity, GridKey, PoiCounts, PoiSection, QueryError, SourceName, SourceNote,
    TractId,
};

use crate::FetchError;
use crate::channel::SourceChannel;
use crate::config::{ConfigError, FeaturesConfig};
use crate::sources::SourceSet;
use crate::sources::transit::transit_summary;

type Notes = BTreeMap<SourceName, SourceNote>;

/// Owns the per-source channels and answers feature queries.
#[derive(Debug)]
pub struct Aggregator {
    sources: SourceSet,
    geography: SourceChannel<GridKey, GeoIdentity>,
    demographics: SourceChannel<TractId, DemographicProfile>,
    poi: SourceChannel<(GridKey, u32), PoiCounts>,
    crime: SourceChannel<(GridKey, u32), CrimeSummary>,
}

impl Aggregator {
    /// Wraps `sources` in channels built from `config`'s policies.
    #[must_use]
    pub fn new(sources: SourceSet, config: &FeaturesConfig) -> Self {
        Self {
            sources,
            geography: SourceChannel::new(SourceName::CensusGeo, &config.census_geo.policy),
            demographics: SourceChannel::new(SourceName::CensusAcs, &config.census_acs.policy),
            poi: SourceChannel::new(SourceName::Poi, &config.poi.policy),
            crime: SourceChannel::new(SourceName::Crime, &config.crime.policy),
        }
    }

    /// An aggregator over the live HTTP sources.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the HTTP client cannot be built.
    pub fn from_config(config: &FeaturesConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(SourceSet::http(config)?, config))
    }

    /// Everything known about the area within `radius_m` of a point.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] if the radius or coordinates are out of
    /// range. No source is contacted in that case. Source failures never
    /// produce an error; they degrade the bundle instead.
    pub async fn get_features(
        &self,
        lat: f64,
        lon: f64,
        radius_m: u32,
    ) -> Result<FeatureBundle, QueryError> {
        let query = FeatureQuery::new(lat, lon, radius_m)?;
        Ok(self.aggregate(query).await)
    }

    /// Collects every source for an already validated query.
    pub async fn aggregate(&self, query: FeatureQuery) -> FeatureBundle {
        let key = query.grid_key();
        let radius_m = query.radius_m;
        log::debug!(
            "features: ({}, {}) r={radius_m} m in cell {key}",
            query.lat,
            query.lon
        );

        let ((census, census_failure), poi, crime, transit) = tokio::join!(
            self.collect_census(key),
            self.poi
                .call((key, radius_m), || self.sources.poi.poi_counts(key, radius_m)),
            self.crime
                .call((key, radius_m), || self.sources.crime.crime_summary(key, radius_m)),
            async { transit_summary(query.lat, query.lon, radius_m) },
        );

        let mut notes = Notes::new();
        if let Some((source, e)) = census_failure {
            degrade(&mut notes, source, &e, key);
        }
        let poi = isolate(&mut notes, SourceName::Poi, poi, key)
            .map_or_else(PoiSection::default, PoiSection::from);
        let crime = isolate(&mut notes, SourceName::Crime, crime, key)
            .map_or_else(CrimeSection::default, CrimeSection::from);

        FeatureBundle {
            lat: query.lat,
            lon: query.lon,
            radius_m,
            census,
            poi,
            crime,
            transit,
            notes,
        }
    }

    /// Cache counters per cached source.
    #[must_use]
    pub fn cache_stats(&self) -> BTreeMap<SourceName, CacheStats> {
        BTreeMap::from([
            (self.geography.name(), self.geography.stats()),
            (self.demographics.name(), self.demographics.stats()),
            (self.poi.name(), self.poi.stats()),
            (self.crime.name(), self.crime.stats()),
        ])
    }

    /// Geocode, then demographics for the resolved tract.
    ///
    /// Returns the census section and the failing source, if any.
    async fn collect_census(&self, key: GridKey) -> (CensusSection, Option<(SourceName, FetchError)>) {
        let geo = match self
            .geography
            .call(key, || self.sources.geography.geographies(key))
            .await
        {
            Ok(geo) => geo,
            Err(e) => return (CensusSection::default(), Some((SourceName::CensusGeo, e))),
        };

        let Some(tract) = geo.tract_id() else {
            log::debug!("census_geo: no tract at {key}, skipping demographics");
            return (CensusSection::new(geo, None), None);
        };
        log::debug!(
            "census_geo: {key} is tract {}{}{}",
            tract.state_fips,
            tract.county_fips,
            tract.tract
        );

        match self
            .demographics
            .call(tract.clone(), || self.sources.demographics.demographics(&tract))
            .await
        {
            Ok(profile) => (CensusSection::new(geo, Some(profile)), None),
            Err(e) => (CensusSection::new(geo, None), Some((SourceName::CensusAcs, e))),
        }
    }
}

fn isolate<T>(
    notes: &mut Notes,
    source: SourceName,
    result: Result<T, FetchError>,
    key: GridKey,
) -> Option<T> {
    match result {
        Ok(value) => {
            log::debug!("{source}: ok for {key}");
            Some(value)
        }
        Err(e) => {
            degrade(notes, source, &e, key);
            None
        }
    }
}

fn degrade(notes: &mut Notes, source: SourceName, e: &FetchError, key: GridKey) {
    log::warn!("{source} unavailable for {key}, using fallback: {e}");
    notes.insert(source, e.note());
}
