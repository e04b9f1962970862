//! US Census Bureau geographies lookup.
//!
//! Resolves a coordinate to its state, county and tract FIPS codes via
//! `GET {base}/geographies/coordinates`. No API key required.
//!
//! See <https://geocoding.geo.census.gov/geocoder/Geocoding_Services_API.html>

use async_trait::async_trait;
use smallbiz_map_features_models::{GeoIdentity, GridKey};

use super::GeographySource;
use crate::FetchError;
use crate::config::CensusGeoConfig;
use crate::http::send_json;

/// Live [`GeographySource`] backed by the Census geocoder.
#[derive(Debug, Clone)]
pub struct CensusGeographies {
    client: reqwest::Client,
    config: CensusGeoConfig,
}

impl CensusGeographies {
    /// Creates a client for the configured endpoint.
    #[must_use]
    pub const fn new(client: reqwest::Client, config: CensusGeoConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl GeographySource for CensusGeographies {
    async fn geographies(&self, key: GridKey) -> Result<GeoIdentity, FetchError> {
        let url = format!("{}/geographies/coordinates", self.config.policy.base_url);
        let params = query_params(key, &self.config);

        let body = send_json(
            || {
                self.client
                    .get(&url)
                    .query(&params)
                    .timeout(self.config.policy.timeout())
            },
            self.config.policy.retry_policy(),
            "census_geo",
        )
        .await?;

        let geo = parse_geographies(&body);
        if geo.is_empty() {
            log::debug!("census_geo: no tract at {key}");
        }
        Ok(geo)
    }
}

/// Query parameters locating the cell center. The geocoder takes `x` as
/// longitude and `y` as latitude.
#[must_use]
pub fn query_params(key: GridKey, config: &CensusGeoConfig) -> Vec<(&'static str, String)> {
    vec![
        ("x", key.lon().to_string()),
        ("y", key.lat().to_string()),
        ("benchmark", config.benchmark.clone()),
        ("vintage", config.vintage.clone()),
        ("format", "json".to_string()),
    ]
}

/// Extracts the first state, county and tract record.
///
/// Returns an empty identity unless all three are present.
#[must_use]
pub fn parse_geographies(body: &serde_json::Value) -> GeoIdentity {
    let geographies = &body["result"]["geographies"];
    let first_field = |layer: &str, field: &str| -> Option<String> {
        let value = &geographies[layer][0][field];
        value
            .as_str()
            .map(String::from)
            .or_else(|| value.as_u64().map(|n| n.to_string()))
    };

    match (
        first_field("States", "STATE"),
        first_field("Counties", "COUNTY"),
        first_field("Census Tracts", "TRACT"),
    ) {
        (Some(state), Some(county), Some(tract)) => GeoIdentity::new(state, county, tract),
        _ => GeoIdentity::default(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use smallbiz_map_features_models::quantize;

    use super::*;
    use crate::FeaturesConfig;

    #[test]
    fn query_puts_longitude_in_x() {
        let config = FeaturesConfig::embedded().census_geo;
        let params = query_params(quantize(39.2904, -76.6122, 3), &config);
        assert_eq!(
            params,
            vec![
                ("x", "-76.612".to_string()),
                ("y", "39.29".to_string()),
                ("benchmark", config.benchmark.clone()),
                ("vintage", config.vintage.clone()),
                ("format", "json".to_string()),
            ]
        );
    }

    fn baltimore_response() -> serde_json::Value {
        json!({
            "result": {
                "input": {
                    "location": { "x": -76.612, "y": 39.29 }
                },
                "geographies": {
                    "States": [{ "STATE": "24", "NAME": "Maryland" }],
                    "Counties": [{ "COUNTY": "510", "NAME": "Baltimore city" }],
                    "Census Tracts": [{ "TRACT": "040100", "NAME": "Census Tract 401" }]
                }
            }
        })
    }

    #[test]
    fn parses_first_record_of_each_layer() {
        let geo = parse_geographies(&baltimore_response());
        assert_eq!(geo, GeoIdentity::new("24", "510", "040100"));
        assert!(!geo.is_empty());
    }

    #[test]
    fn empty_tract_list_is_not_an_error() {
        let mut body = baltimore_response();
        body["result"]["geographies"]["Census Tracts"] = json!([]);
        assert_eq!(parse_geographies(&body), GeoIdentity::default());
    }

    #[test]
    fn missing_shape_yields_empty_identity() {
        assert!(parse_geographies(&json!({})).is_empty());
        assert!(parse_geographies(&json!({ "result": { "geographies": {} } })).is_empty());
        assert!(parse_geographies(&json!({ "errors": ["Invalid benchmark"] })).is_empty());
    }

    #[test]
    fn missing_county_empties_the_whole_identity() {
        let mut body = baltimore_response();
        body["result"]["geographies"]
            .as_object_mut()
            .unwrap()
            .remove("Counties");
        let geo = parse_geographies(&body);
        assert_eq!(geo.state_fips, None);
        assert_eq!(geo.tract, None);
    }
}
