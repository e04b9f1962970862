#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Multi-source feature aggregation for the smallbiz map.
//!
//! A hover query `(lat, lon, radius)` is fanned out to four upstream
//! providers and merged into one [`FeatureBundle`]:
//!
//! 1. **Census geographies**: coordinate → state/county/tract.
//! 2. **ACS 5-year**: tract → population and median household income.
//!    Only consulted when step 1 resolved a tract.
//! 3. **Overpass**: restaurant/bar/cafe/shop counts within the radius.
//! 4. **Baltimore Police `ArcGIS`**: crime totals and per-type counts.
//!
//! Each source sits behind a [`channel::SourceChannel`]: a sliding-window
//! [`rate_limit::RateLimiter`] followed by an LRU [`cache::ResultCache`]
//! keyed on the grid-quantized inputs. The [`aggregator::Aggregator`] owns
//! every channel, runs the sources concurrently, and converts any source
//! failure into a fallback value plus a [`SourceNote`], so a single
//! flaky upstream never breaks the response.

pub mod aggregator;
pub mod cache;
pub mod channel;
pub mod config;
pub mod http;
pub mod rate_limit;
pub mod sources;

pub use aggregator::Aggregator;
pub use config::{ConfigError, FeaturesConfig};
pub use smallbiz_map_features_models::{FeatureBundle, FetchErrorKind, QueryError, SourceNote};

/// Errors from a single upstream fetch.
///
/// Carries messages rather than the underlying `reqwest` error so that a
/// failure can be cloned into notes and logs and reproduced in tests.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Network failure or timeout before a response arrived.
    #[error("transport error: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
    },

    /// The upstream answered with a non-success status, either as the
    /// HTTP status or embedded in an otherwise successful body.
    #[error("upstream returned status {status}: {message}")]
    UpstreamStatus {
        /// Status code reported by the upstream.
        status: u16,
        /// Body preview or upstream error message.
        message: String,
    },

    /// The body was not valid JSON or lacked the expected structure.
    #[error("malformed response: {message}")]
    MalformedResponse {
        /// Description of what was wrong.
        message: String,
    },
}

impl FetchError {
    /// Shorthand for a [`FetchError::MalformedResponse`].
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            message: message.into(),
        }
    }

    /// The failure category.
    #[must_use]
    pub const fn kind(&self) -> FetchErrorKind {
        match self {
            Self::Transport { .. } => FetchErrorKind::Transport,
            Self::UpstreamStatus { .. } => FetchErrorKind::UpstreamStatus,
            Self::MalformedResponse { .. } => FetchErrorKind::MalformedResponse,
        }
    }

    /// Whether retrying the same request could plausibly succeed
    /// (transport failures, HTTP 429 and 5xx).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::UpstreamStatus { status, .. } => *status == 429 || *status >= 500,
            Self::MalformedResponse { .. } => false,
        }
    }

    /// The diagnostic recorded in a bundle's `notes` for this failure.
    #[must_use]
    pub fn note(&self) -> SourceNote {
        SourceNote::new(self.kind(), self.to_string())
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return Self::malformed(e.to_string());
        }
        if let Some(status) = e.status() {
            return Self::UpstreamStatus {
                status: status.as_u16(),
                message: e.to_string(),
            };
        }
        Self::Transport {
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        Self::malformed(format!("invalid JSON: {e}"))
    }
}
