//! American Community Survey 5-year estimates via the Census Data API.
//!
//! The API answers with a JSON table: a header row of column names followed
//! by one row per matched geography, every cell a string.
//!
//! ```text
//! [["B19013_001E","B01003_001E","state","county","tract"],
//!  ["52813","3104","24","510","040100"]]
//! ```

use async_trait::async_trait;
use smallbiz_map_features_models::{DemographicProfile, TractId};

use super::DemographicsSource;
use crate::FetchError;
use crate::config::CensusAcsConfig;
use crate::http::send_json;

/// Median household income in the past 12 months.
pub const MEDIAN_INCOME_VAR: &str = "B19013_001E";

/// Total population.
pub const POPULATION_VAR: &str = "B01003_001E";

/// Live [`DemographicsSource`] backed by the ACS 5-year table.
#[derive(Debug, Clone)]
pub struct AcsDemographics {
    client: reqwest::Client,
    config: CensusAcsConfig,
}

impl AcsDemographics {
    /// Creates a client for the configured survey endpoint.
    #[must_use]
    pub const fn new(client: reqwest::Client, config: CensusAcsConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl DemographicsSource for AcsDemographics {
    async fn demographics(&self, tract: &TractId) -> Result<DemographicProfile, FetchError> {
        let params = query_params(tract);

        let body = send_json(
            || {
                self.client
                    .get(&self.config.policy.base_url)
                    .query(&params)
                    .timeout(self.config.policy.timeout())
            },
            self.config.policy.retry_policy(),
            "census_acs",
        )
        .await?;

        parse_acs(&body)
    }
}

/// Query parameters selecting both estimates for one tract.
#[must_use]
pub fn query_params(tract: &TractId) -> Vec<(&'static str, String)> {
    vec![
        ("get", format!("{MEDIAN_INCOME_VAR},{POPULATION_VAR}")),
        ("for", format!("tract:{}", tract.tract)),
        (
            "in",
            format!("state:{} county:{}", tract.state_fips, tract.county_fips),
        ),
    ]
}

/// Reads the first data row of an ACS table by column name.
///
/// # Errors
///
/// Returns [`FetchError::MalformedResponse`] if the table lacks a header
/// row or a data row.
pub fn parse_acs(body: &serde_json::Value) -> Result<DemographicProfile, FetchError> {
    let rows = body
        .as_array()
        .ok_or_else(|| FetchError::malformed("ACS response is not a table"))?;
    let (Some(header), Some(values)) = (
        rows.first().and_then(serde_json::Value::as_array),
        rows.get(1).and_then(serde_json::Value::as_array),
    ) else {
        return Err(FetchError::malformed(format!(
            "ACS table has {} rows, expected a header and a value row",
            rows.len()
        )));
    };

    let column = |name: &str| -> Option<u64> {
        let index = header.iter().position(|h| h.as_str() == Some(name))?;
        parse_estimate(values.get(index)?)
    };

    Ok(DemographicProfile {
        population: column(POPULATION_VAR),
        median_household_income: column(MEDIAN_INCOME_VAR),
    })
}

/// Parses one estimate cell. Suppressed estimates are published as negative
/// sentinels (e.g. `-666666666`) and become `None`.
fn parse_estimate(cell: &serde_json::Value) -> Option<u64> {
    match cell {
        serde_json::Value::String(s) => s.trim().parse().ok(),
        serde_json::Value::Number(n) => n.as_u64(),
        _ => None,
    }
}
