//! Crime counts from an `ArcGIS` `FeatureServer` layer.
//!
//! Two spatial queries are made against the layer's `/query` endpoint, both
//! a point buffer of `distance` meters around the cell:
//!
//! 1. `returnCountOnly=true` for the total number of incidents.
//! 2. A grouped statistics query counting `id_field` per `type_field`.
//!
//! `ArcGIS` reports query errors with HTTP 200 and an `{"error": {...}}`
//! body, so every response is checked for that before parsing.

use std::collections::BTreeMap;
use std::future::Future;

use async_trait::async_trait;
use smallbiz_map_features_models::{CrimeSummary, GridKey, UNKNOWN_CRIME_TYPE};

use super::CrimeStatsSource;
use crate::FetchError;
use crate::config::ArcGisCrimeConfig;
use crate::http::send_json;

/// Output field name for the per-type count statistic.
const COUNT_FIELD: &str = "ct";

/// Live [`CrimeStatsSource`] backed by an `ArcGIS` feature layer.
#[derive(Debug, Clone)]
pub struct ArcGisCrime {
    client: reqwest::Client,
    config: ArcGisCrimeConfig,
}

impl ArcGisCrime {
    /// Creates a client for the configured layer.
    #[must_use]
    pub const fn new(client: reqwest::Client, config: ArcGisCrimeConfig) -> Self {
        Self { client, config }
    }

    async fn query(
        &self,
        params: &[(&str, String)],
        label: &str,
    ) -> Result<serde_json::Value, FetchError> {
        send_json(
            || {
                self.client
                    .get(&self.config.policy.base_url)
                    .query(params)
                    .timeout(self.config.policy.timeout())
            },
            self.config.policy.retry_policy(),
            label,
        )
        .await
    }
}

#[async_trait]
impl CrimeStatsSource for ArcGisCrime {
    async fn crime_summary(&self, key: GridKey, radius_m: u32) -> Result<CrimeSummary, FetchError> {
        summarize(
            key,
            radius_m,
            &self.config.type_field,
            &self.config.id_field,
            |params, label| async move { self.query(&params, label).await },
        )
        .await
    }
}

/// Runs the count query then the grouped query through `query` and merges
/// them into a [`CrimeSummary`].
///
/// `query` receives the request parameters and a log label. Each response
/// is checked for an embedded error; a failed count query means the grouped
/// query is never sent.
///
/// # Errors
///
/// Returns the first transport, status, embedded or parse error.
pub async fn summarize<F, Fut>(
    key: GridKey,
    radius_m: u32,
    type_field: &str,
    id_field: &str,
    mut query: F,
) -> Result<CrimeSummary, FetchError>
where
    F: FnMut(Vec<(&'static str, String)>, &'static str) -> Fut,
    Fut: Future<Output = Result<serde_json::Value, FetchError>>,
{
    let mut count_params = spatial_params(key, radius_m);
    count_params.push(("returnCountOnly", "true".to_string()));
    let body = query(count_params, "crime/count").await?;
    check_embedded_error(&body)?;
    let total = parse_count(&body)?;

    let mut group_params = spatial_params(key, radius_m);
    group_params.extend(group_by_params(type_field, id_field));
    let body = query(group_params, "crime/by_type").await?;
    check_embedded_error(&body)?;
    let by_type = parse_group_counts(&body, type_field);

    let grouped: u64 = by_type.values().sum();
    if grouped != total {
        log::debug!("crime: total {total} differs from grouped sum {grouped} at {key}");
    }

    Ok(CrimeSummary {
        total_last_3mo: total,
        by_type,
    })
}

/// Parameters selecting features within `radius_m` of the cell center.
#[must_use]
pub fn spatial_params(key: GridKey, radius_m: u32) -> Vec<(&'static str, String)> {
    vec![
        ("where", "1=1".to_string()),
        ("geometry", format!("{},{}", key.lon(), key.lat())),
        ("geometryType", "esriGeometryPoint".to_string()),
        ("inSR", "4326".to_string()),
        ("spatialRel", "esriSpatialRelIntersects".to_string()),
        ("distance", radius_m.to_string()),
        ("units", "esriSRUnit_Meter".to_string()),
        ("f", "json".to_string()),
    ]
}

/// Parameters for counting `id_field` grouped by `type_field`.
#[must_use]
pub fn group_by_params(type_field: &str, id_field: &str) -> Vec<(&'static str, String)> {
    let out_statistics = serde_json::json!([{
        "statisticType": "count",
        "onStatisticField": id_field,
        "outStatisticFieldName": COUNT_FIELD,
    }]);
    vec![
        ("groupByFieldsForStatistics", type_field.to_string()),
        ("outStatistics", out_statistics.to_string()),
        ("outFields", type_field.to_string()),
        ("returnGeometry", "false".to_string()),
    ]
}

/// Converts an embedded `{"error": {"code", "message"}}` body into an error.
///
/// # Errors
///
/// Returns [`FetchError::UpstreamStatus`] carrying the embedded code.
pub fn check_embedded_error(body: &serde_json::Value) -> Result<(), FetchError> {
    let Some(error) = body.get("error") else {
        return Ok(());
    };
    let status = error
        .get("code")
        .and_then(serde_json::Value::as_u64)
        .and_then(|code| u16::try_from(code).ok())
        .unwrap_or(500);
    let message = error
        .get("message")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("ArcGIS error")
        .to_string();
    Err(FetchError::UpstreamStatus { status, message })
}

/// Reads the `count` of a `returnCountOnly` response.
///
/// # Errors
///
/// Returns [`FetchError::MalformedResponse`] if `count` is missing or not
/// an unsigned integer.
pub fn parse_count(body: &serde_json::Value) -> Result<u64, FetchError> {
    body.get("count")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| FetchError::malformed(format!("ArcGIS count missing: {body}")))
}

/// Sums grouped statistics per crime-type label.
///
/// Features with a missing, null or empty label count toward
/// [`UNKNOWN_CRIME_TYPE`]. A response without `features` yields an empty
/// map.
#[must_use]
pub fn parse_group_counts(body: &serde_json::Value, type_field: &str) -> BTreeMap<String, u64> {
    let mut by_type = BTreeMap::new();
    let Some(features) = body.get("features").and_then(serde_json::Value::as_array) else {
        return by_type;
    };

    for feature in features {
        let attributes = &feature["attributes"];
        let label = attributes[type_field]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN_CRIME_TYPE);
        let count = attributes[COUNT_FIELD].as_u64().unwrap_or(0);
        *by_type.entry(label.to_string()).or_insert(0) += count;
    }
    by_type
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use smallbiz_map_features_models::quantize;

    use super::*;

    #[test]
    fn spatial_params_put_longitude_first() {
        let params = spatial_params(quantize(39.2904, -76.6122, 3), 500);
        let get = |name: &str| {
            params
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("geometry"), Some("-76.612,39.29"));
        assert_eq!(get("distance"), Some("500"));
        assert_eq!(get("units"), Some("esriSRUnit_Meter"));
        assert_eq!(get("inSR"), Some("4326"));
    }

    #[test]
    fn group_by_counts_id_field() {
        let params = group_by_params("CRIME_TYPE", "OBJECTID");
        let stats = &params
            .iter()
            .find(|(k, _)| *k == "outStatistics")
            .unwrap()
            .1;
        let stats: serde_json::Value = serde_json::from_str(stats).unwrap();
        assert_eq!(stats[0]["statisticType"], "count");
        assert_eq!(stats[0]["onStatisticField"], "OBJECTID");
        assert_eq!(stats[0]["outStatisticFieldName"], "ct");
    }

    #[test]
    fn parses_count() {
        assert_eq!(parse_count(&json!({ "count": 42 })), Ok(42));
        assert_eq!(parse_count(&json!({ "count": 0 })), Ok(0));
    }

    #[test]
    fn missing_or_negative_count_is_malformed() {
        for body in [json!({}), json!({ "count": -1 }), json!({ "count": "12" })] {
            assert!(
                matches!(parse_count(&body), Err(FetchError::MalformedResponse { .. })),
                "{body}"
            );
        }
    }

    #[test]
    fn groups_by_label_with_unknown_fallback() {
        let body = json!({
            "features": [
                { "attributes": { "CRIME_TYPE": "LARCENY", "ct": 12 } },
                { "attributes": { "CRIME_TYPE": "COMMON ASSAULT", "ct": 5 } },
                { "attributes": { "CRIME_TYPE": null, "ct": 2 } },
                { "attributes": { "CRIME_TYPE": "", "ct": 1 } },
                { "attributes": { "ct": 3 } }
            ]
        });
        let by_type = parse_group_counts(&body, "CRIME_TYPE");
        assert_eq!(by_type.get("LARCENY"), Some(&12));
        assert_eq!(by_type.get("COMMON ASSAULT"), Some(&5));
        assert_eq!(by_type.get(UNKNOWN_CRIME_TYPE), Some(&6));
        assert_eq!(by_type.values().sum::<u64>(), 23);
    }

    #[test]
    fn missing_features_is_empty() {
        assert!(parse_group_counts(&json!({}), "CRIME_TYPE").is_empty());
        assert!(parse_group_counts(&json!({ "features": [] }), "CRIME_TYPE").is_empty());
    }

    #[test]
    fn embedded_error_becomes_upstream_status() {
        let body = json!({
            "error": {
                "code": 400,
                "message": "Unable to complete operation.",
                "details": ["Invalid query parameters."]
            }
        });
        assert_eq!(
            check_embedded_error(&body),
            Err(FetchError::UpstreamStatus {
                status: 400,
                message: "Unable to complete operation.".to_string(),
            })
        );
        assert_eq!(check_embedded_error(&json!({ "count": 3 })), Ok(()));
    }

    type Sent = Vec<(&'static str, Vec<(&'static str, String)>)>;

    /// Answers each query with the next body in `bodies`, recording what
    /// was sent.
    async fn summarize_with(
        bodies: Vec<serde_json::Value>,
    ) -> (Result<CrimeSummary, FetchError>, Sent) {
        let mut bodies = bodies.into_iter();
        let mut sent = Vec::new();
        let result = summarize(
            quantize(39.2904, -76.6122, 3),
            500,
            "CRIME_TYPE",
            "OBJECTID",
            |params, label| {
                sent.push((label, params));
                let body = bodies.next().ok_or_else(|| FetchError::Transport {
                    message: "no more responses".to_string(),
                });
                async move { body }
            },
        )
        .await;
        (result, sent)
    }

    fn param<'a>(params: &'a [(&'static str, String)], name: &str) -> Option<&'a str> {
        params
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    #[tokio::test]
    async fn merges_count_and_grouped_queries() {
        let (result, sent) = summarize_with(vec![
            json!({ "count": 17 }),
            json!({
                "features": [
                    { "attributes": { "CRIME_TYPE": "LARCENY", "ct": 12 } },
                    { "attributes": { "CRIME_TYPE": "BURGLARY", "ct": 5 } }
                ]
            }),
        ])
        .await;

        let summary = result.unwrap();
        assert_eq!(summary.total_last_3mo, 17);
        assert_eq!(summary.by_type.get("LARCENY"), Some(&12));
        assert_eq!(summary.by_type.get("BURGLARY"), Some(&5));

        let labels: Vec<_> = sent.iter().map(|(label, _)| *label).collect();
        assert_eq!(labels, ["crime/count", "crime/by_type"]);

        let (_, count_params) = &sent[0];
        assert_eq!(param(count_params, "returnCountOnly"), Some("true"));
        assert_eq!(param(count_params, "groupByFieldsForStatistics"), None);

        let (_, group_params) = &sent[1];
        assert_eq!(param(group_params, "returnCountOnly"), None);
        assert_eq!(param(group_params, "groupByFieldsForStatistics"), Some("CRIME_TYPE"));
        assert_eq!(param(group_params, "distance"), Some("500"));
    }

    #[tokio::test]
    async fn embedded_error_in_count_skips_grouped_query() {
        let (result, sent) = summarize_with(vec![
            json!({ "error": { "code": 498, "message": "Invalid token." } }),
            json!({ "features": [] }),
        ])
        .await;

        assert_eq!(
            result,
            Err(FetchError::UpstreamStatus {
                status: 498,
                message: "Invalid token.".to_string(),
            })
        );
        assert_eq!(sent.len(), 1);
    }

    #[tokio::test]
    async fn embedded_error_in_grouped_query_fails_the_summary() {
        let (result, sent) = summarize_with(vec![
            json!({ "count": 4 }),
            json!({ "error": { "code": 400, "message": "Unable to complete operation." } }),
        ])
        .await;

        assert!(matches!(
            result,
            Err(FetchError::UpstreamStatus { status: 400, .. })
        ));
        assert_eq!(sent.len(), 2);
    }

    #[tokio::test]
    async fn transport_failure_on_count_skips_grouped_query() {
        let (result, sent) = summarize_with(vec![]).await;
        assert!(matches!(result, Err(FetchError::Transport { .. })));
        assert_eq!(sent.len(), 1);
    }
}
