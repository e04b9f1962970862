//! `OpenStreetMap` point-of-interest counts via the Overpass API.
//!
//! One Overpass QL query is posted per [`PoiCategory`], counting nodes,
//! ways and relations carrying the category's tag within the radius. The
//! queries run in category order and the first failure aborts the call.

use std::future::Future;

use async_trait::async_trait;
use smallbiz_map_features_models::{GridKey, PoiCategory, PoiCounts};

use super::PoiSource;
use crate::FetchError;
use crate::config::OverpassConfig;
use crate::http::send_json;

/// Live [`PoiSource`] backed by an Overpass interpreter.
#[derive(Debug, Clone)]
pub struct OverpassPoi {
    client: reqwest::Client,
    config: OverpassConfig,
}

impl OverpassPoi {
    /// Creates a client for the configured interpreter.
    #[must_use]
    pub const fn new(client: reqwest::Client, config: OverpassConfig) -> Self {
        Self { client, config }
    }

    async fn count(
        &self,
        key: GridKey,
        radius_m: u32,
        category: PoiCategory,
    ) -> Result<u64, FetchError> {
        let query = build_query(key, radius_m, category, self.config.query_timeout_secs);
        let label = format!("poi/{category}");

        let body = send_json(
            || {
                self.client
                    .post(&self.config.policy.base_url)
                    .body(query.clone())
                    .timeout(self.config.policy.timeout())
            },
            self.config.policy.retry_policy(),
            &label,
        )
        .await?;

        count_elements(&body)
    }
}

#[async_trait]
impl PoiSource for OverpassPoi {
    async fn poi_counts(&self, key: GridKey, radius_m: u32) -> Result<PoiCounts, FetchError> {
        collect_counts(|category| async move {
            let n = self.count(key, radius_m, category).await?;
            log::trace!("poi: {n} {category} within {radius_m} m of {key}");
            Ok(n)
        })
        .await
    }
}

/// Runs `count` for each [`PoiCategory`] in order and gathers the results.
///
/// Stops at the first failing category; later categories are never queried.
///
/// # Errors
///
/// Returns the first error produced by `count`.
pub async fn collect_counts<F, Fut>(mut count: F) -> Result<PoiCounts, FetchError>
where
    F: FnMut(PoiCategory) -> Fut,
    Fut: Future<Output = Result<u64, FetchError>>,
{
    let mut counts = PoiCounts::default();
    for &category in PoiCategory::all() {
        counts.set(category, count(category).await?);
    }
    Ok(counts)
}

/// Builds the Overpass QL union counting one category around a cell.
#[must_use]
pub fn build_query(key: GridKey, radius_m: u32, category: PoiCategory, timeout_secs: u32) -> String {
    let filter = category.osm_filter();
    let mut query = format!("[out:json][timeout:{timeout_secs}];\n(\n");
    for element in ["node", "way", "relation"] {
        query.push_str(&format!("  {element}(around:{radius_m},{key})[{filter}];\n"));
    }
    query.push_str(");\nout ids;\n");
    query
}

/// Counts the `elements` of an Overpass response.
///
/// A body without an `elements` array counts as zero. Overpass reports
/// query failures (timeouts, memory exhaustion) in a `remark` next to a
/// truncated result; those are malformed, not empty.
///
/// # Errors
///
/// Returns [`FetchError::MalformedResponse`] if the body is not an object
/// or carries a runtime error remark.
pub fn count_elements(body: &serde_json::Value) -> Result<u64, FetchError> {
    let object = body
        .as_object()
        .ok_or_else(|| FetchError::malformed("Overpass response is not an object"))?;

    if let Some(remark) = object.get("remark").and_then(serde_json::Value::as_str)
        && remark.contains("runtime error")
    {
        return Err(FetchError::malformed(format!("Overpass: {remark}")));
    }

    Ok(object
        .get("elements")
        .and_then(serde_json::Value::as_array)
        .map_or(0, |elements| elements.len() as u64))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use smallbiz_map_features_models::quantize;

    use super::*;

    #[test]
    fn query_unions_all_element_types() {
        let key = quantize(39.2904, -76.6122, 3);
        let query = build_query(key, 500, PoiCategory::Restaurants, 25);

        assert!(query.starts_with("[out:json][timeout:25];"));
        assert!(query.contains(r#"node(around:500,39.290,-76.612)["amenity"="restaurant"];"#));
        assert!(query.contains(r#"way(around:500,39.290,-76.612)["amenity"="restaurant"];"#));
        assert!(query.contains(r#"relation(around:500,39.290,-76.612)["amenity"="restaurant"];"#));
        assert!(query.trim_end().ends_with("out ids;"));
    }

    #[test]
    fn shop_filter_matches_any_value() {
        let key = quantize(39.2904, -76.6122, 3);
        let query = build_query(key, 250, PoiCategory::Shops, 25);
        assert!(query.contains(r#"node(around:250,39.290,-76.612)["shop"];"#));
    }

    #[test]
    fn counts_elements() {
        let body = json!({
            "version": 0.6,
            "elements": [
                { "type": "node", "id": 1 },
                { "type": "way", "id": 2 },
                { "type": "relation", "id": 3 }
            ]
        });
        assert_eq!(count_elements(&body), Ok(3));
    }

    #[test]
    fn missing_elements_counts_as_zero() {
        assert_eq!(count_elements(&json!({ "version": 0.6 })), Ok(0));
        assert_eq!(count_elements(&json!({ "elements": [] })), Ok(0));
    }

    #[test]
    fn runtime_error_remark_is_malformed() {
        let body = json!({
            "elements": [],
            "remark": "runtime error: Query timed out in \"query\" at line 3 after 26 seconds."
        });
        assert!(matches!(
            count_elements(&body),
            Err(FetchError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn non_object_body_is_malformed() {
        assert!(count_elements(&json!([1, 2, 3])).is_err());
    }

    #[tokio::test]
    async fn collects_every_category_in_order() {
        let mut seen = Vec::new();
        let counts = collect_counts(|category| {
            seen.push(category);
            let n = seen.len() as u64 * 10;
            async move { Ok(n) }
        })
        .await
        .unwrap();

        assert_eq!(seen, PoiCategory::all());
        assert_eq!(
            counts,
            PoiCounts {
                restaurants: 10,
                bars: 20,
                cafes: 30,
                shops: 40,
            }
        );
    }

    #[tokio::test]
    async fn first_failing_category_stops_the_remaining_queries() {
        let mut calls = 0;
        let result = collect_counts(|_| {
            calls += 1;
            async {
                Err(FetchError::Transport {
                    message: "connection reset".to_string(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(FetchError::Transport { .. })));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn failure_midway_discards_earlier_counts() {
        let mut seen = Vec::new();
        let result = collect_counts(|category| {
            seen.push(category);
            let fail = category == PoiCategory::Cafes;
            async move {
                if fail {
                    Err(FetchError::malformed("Overpass: runtime error"))
                } else {
                    Ok(5)
                }
            }
        })
        .await;

        assert!(matches!(result, Err(FetchError::MalformedResponse { .. })));
        assert_eq!(seen.last(), Some(&PoiCategory::Cafes));
        assert!(!seen.contains(&PoiCategory::Shops));
    }
}
