use reqwest::Url;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::app::fetch_use_case::check_length;
use crate::app::ports::{ObjectStorePort, UpstreamClientPort, UpstreamResponse};
use crate::constants::MAX_REDIRECTS;
use crate::domain::Issue;
use crate::error::{MirrorError, Result};
use crate::observability::metrics;

/// Where an uploaded file ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uploaded {
    pub key: String,
    pub public_name: String,
    pub bytes: u64,
}

/// Mirrors an arbitrary upstream URL on demand.
///
/// The file is named after the last redirect target (or the URL itself).
/// Dated upstream names are stored under their issue key; anything else is
/// stored under its raw name at the bucket root. The latest issue is left
/// alone, and nothing is skipped when the key already exists.
pub struct UrlUploader {
    client: Arc<dyn UpstreamClientPort>,
    store: Arc<dyn ObjectStorePort>,
    user_agent: String,
}

impl UrlUploader {
    pub fn new(
        client: Arc<dyn UpstreamClientPort>,
        store: Arc<dyn ObjectStorePort>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self { client, store, user_agent: user_agent.into() }
    }

    pub async fn upload(&self, url: &Url, cancel: &CancellationToken) -> Result<Uploaded> {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(MirrorError::Cancelled),
            res = self.run(url) => res,
        };
        if let Err(e) = &result {
            metrics::upload::error(e.kind());
        }
        result
    }

    async fn run(&self, url: &Url) -> Result<Uploaded> {
        let mut current = url.clone();
        for _ in 0..=MAX_REDIRECTS {
            let response = self.client.send(&current, &self.user_agent).await?;
            if response.is_ok() {
                return self.store_response(&current, response).await;
            }
            if !response.is_redirect() {
                return Err(MirrorError::Upstream { status: response.status });
            }
            current = response
                .location
                .as_deref()
                .and_then(|location| current.join(location).ok())
                .ok_or_else(|| MirrorError::MissingLocation { url: current.to_string() })?;
            debug!(url = %current, "Following redirect");
        }
        Err(MirrorError::TooManyRedirects { max: MAX_REDIRECTS })
    }

    async fn store_response(&self, url: &Url, response: UpstreamResponse) -> Result<Uploaded> {
        let filename = url.path().rsplit('/').next().unwrap_or_default();
        if filename.is_empty() {
            return Err(MirrorError::MissingFilename { url: url.to_string() });
        }
        let (key, public_name) = match Issue::from_upstream_name(filename) {
            Ok(issue) => (issue.storage_key(), issue.public_name()),
            Err(_) => (filename.to_string(), filename.to_string()),
        };

        let expected = response.content_length;
        let disposition = format!("attachment; filename={public_name}");
        let bytes = self
            .store
            .put(&key, response.body, response.content_type.as_deref(), &disposition)
            .await?;
        check_length(&key, expected, bytes);

        info!(key = %key, url = %url, bytes, "Loaded file");
        metrics::upload::success();
        Ok(Uploaded { key, public_name, bytes })
    }
}
