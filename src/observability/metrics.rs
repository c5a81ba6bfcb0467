//! Metrics for the mirror
//!
//! Names live in one enum so recording sites and the exporter agree on them.
//! Recording is a no-op until [`init`] installs the Prometheus recorder.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::fmt;
use tracing::info;

/// Enum representing all metric names used by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Fetch metrics
    FetchSuccess,
    FetchAlreadyMirrored,
    FetchSkippedSameDay,
    FetchError,
    FetchBytes,

    // Upload metrics
    UploadSuccess,
    UploadError,

    // Resolve metrics
    Resolve,

    // HTTP metrics
    HttpRateLimited,
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::FetchSuccess => "mirror_fetch_success_total",
            MetricName::FetchAlreadyMirrored => "mirror_fetch_already_mirrored_total",
            MetricName::FetchSkippedSameDay => "mirror_fetch_skipped_same_day_total",
            MetricName::FetchError => "mirror_fetch_error_total",
            MetricName::FetchBytes => "mirror_fetch_bytes",
            MetricName::UploadSuccess => "mirror_upload_success_total",
            MetricName::UploadError => "mirror_upload_error_total",
            MetricName::Resolve => "mirror_resolve_total",
            MetricName::HttpRateLimited => "mirror_http_rate_limited_total",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            MetricName::FetchSuccess => "Issues downloaded from upstream and stored",
            MetricName::FetchAlreadyMirrored => "Fetches that found the issue already mirrored",
            MetricName::FetchSkippedSameDay => "Fetches skipped because today's issue is known",
            MetricName::FetchError => "Failed fetches by error kind",
            MetricName::FetchBytes => "Bytes written per downloaded issue",
            MetricName::UploadSuccess => "Files mirrored through the upload endpoint",
            MetricName::UploadError => "Failed uploads by error kind",
            MetricName::Resolve => "Latest resolutions by path taken",
            MetricName::HttpRateLimited => "Requests rejected by the rate limiter",
        }
    }

    pub fn all_metrics() -> impl Iterator<Item = MetricName> {
        use MetricName::*;
        [
            FetchSuccess,
            FetchAlreadyMirrored,
            FetchSkippedSameDay,
            FetchError,
            FetchBytes,
            UploadSuccess,
            UploadError,
            Resolve,
            HttpRateLimited,
        ]
        .into_iter()
    }
}

/// Installs the Prometheus recorder and returns the handle used by `/metrics`.
pub fn init() -> Result<PrometheusHandle, Box<dyn std::error::Error + Send + Sync>> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {}", e))?;

    for name in MetricName::all_metrics() {
        match name {
            MetricName::FetchBytes => {
                ::metrics::describe_histogram!(name.as_str(), name.description())
            }
            _ => ::metrics::describe_counter!(name.as_str(), name.description()),
        }
    }

    info!("Metrics system initialized");
    Ok(handle)
}

pub mod fetch {
    use super::MetricName;

    pub fn success(bytes: u64) {
        ::metrics::counter!(MetricName::FetchSuccess.as_str()).increment(1);
        ::metrics::histogram!(MetricName::FetchBytes.as_str()).record(bytes as f64);
    }

    pub fn already_mirrored() {
        ::metrics::counter!(MetricName::FetchAlreadyMirrored.as_str()).increment(1);
    }

    pub fn skipped_same_day() {
        ::metrics::counter!(MetricName::FetchSkippedSameDay.as_str()).increment(1);
    }

    pub fn error(kind: &'static str) {
        ::metrics::counter!(MetricName::FetchError.as_str(), "kind" => kind).increment(1);
    }
}

pub mod upload {
    use super::MetricName;

    pub fn success() {
        ::metrics::counter!(MetricName::UploadSuccess.as_str()).increment(1);
    }

    pub fn error(kind: &'static str) {
        ::metrics::counter!(MetricName::UploadError.as_str(), "kind" => kind).increment(1);
    }
}

pub mod resolve {
    use super::MetricName;

    /// `path` is one of `today`, `yesterday`, `scan`, `empty`.
    pub fn resolved(path: &'static str) {
        ::metrics::counter!(MetricName::Resolve.as_str(), "path" => path).increment(1);
    }
}

pub mod http {
    use super::MetricName;

    pub fn rate_limited() {
        ::metrics::counter!(MetricName::HttpRateLimited.as_str()).increment(1);
    }
}
