use chrono::{Local, NaiveDate};
use reqwest::Url;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::app::latest::LatestCache;
use crate::app::ports::{ObjectStorePort, UpstreamClientPort, UpstreamResponse};
use crate::constants::MAX_REDIRECTS;
use crate::domain::Issue;
use crate::error::{MirrorError, Result};
use crate::observability::metrics;

/// Where the redirect walk stands after each upstream response.
#[derive(Debug)]
pub(crate) enum FetchState {
    /// `url` is the next request to make; `issue` is parsed from the last hop.
    Following {
        url: Url,
        hops: usize,
        issue: Option<Issue>,
    },
    /// A redirect pointed at an issue the store already holds.
    ShortCircuited { issue: Issue },
    /// The upstream answered 200; `url` is the URL that produced the body.
    TerminalSuccess {
        url: Url,
        issue: Option<Issue>,
        response: UpstreamResponse,
    },
    TerminalFailure { status: u16 },
}

/// Downloads the current issue from upstream into the store.
///
/// There is no single-flight guard. The same-day check only deduplicates
/// sequential triggers; a forced refresh racing a scheduled one may download
/// twice, which is harmless because both write the same key.
pub struct UpstreamFetcher {
    client: Arc<dyn UpstreamClientPort>,
    store: Arc<dyn ObjectStorePort>,
    latest: LatestCache,
    url: Url,
    user_agent: String,
    today: fn() -> NaiveDate,
}

impl UpstreamFetcher {
    pub fn new(
        client: Arc<dyn UpstreamClientPort>,
        store: Arc<dyn ObjectStorePort>,
        latest: LatestCache,
        url: Url,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            client,
            store,
            latest,
            url,
            user_agent: user_agent.into(),
            today: local_today,
        }
    }

    /// Overrides the calendar used for the same-day check.
    pub fn with_today(mut self, today: fn() -> NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn latest(&self) -> &LatestCache {
        &self.latest
    }

    /// Mirrors the upstream issue. `force` skips the same-day check and the
    /// already-mirrored short-circuit.
    pub async fn fetch(&self, force: bool, cancel: &CancellationToken) -> Result<Issue> {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(MirrorError::Cancelled),
            res = self.run(force) => res,
        };
        if let Err(e) = &result {
            metrics::fetch::error(e.kind());
        }
        result
    }

    async fn run(&self, force: bool) -> Result<Issue> {
        if !force {
            if let Some(latest) = self.latest.load() {
                if latest.date() == (self.today)() {
                    debug!(issue = %latest, "Today's issue already mirrored, skipping fetch");
                    metrics::fetch::skipped_same_day();
                    return Ok(latest);
                }
            }
        }

        let mut state = FetchState::Following {
            url: self.url.clone(),
            hops: 0,
            issue: None,
        };
        loop {
            state = match state {
                FetchState::Following { url, hops, issue } => {
                    let response = self.client.send(&url, &self.user_agent).await?;
                    self.advance(url, hops, issue, response, force).await?
                }
                FetchState::ShortCircuited { issue } => {
                    info!(issue = %issue, "File already exists");
                    metrics::fetch::already_mirrored();
                    self.latest.store(issue.clone());
                    return Ok(issue);
                }
                FetchState::TerminalFailure { status } => {
                    return Err(MirrorError::Upstream { status });
                }
                FetchState::TerminalSuccess { url, issue, response } => {
                    return self.upload(url, issue, response).await;
                }
            };
        }
    }

    /// Computes the next state from the response to a request for `url`.
    pub(crate) async fn advance(
        &self,
        url: Url,
        hops: usize,
        issue: Option<Issue>,
        response: UpstreamResponse,
        force: bool,
    ) -> Result<FetchState> {
        if response.is_ok() {
            return Ok(FetchState::TerminalSuccess { url, issue, response });
        }
        if !response.is_redirect() {
            return Ok(FetchState::TerminalFailure { status: response.status });
        }

        let target = response
            .location
            .as_deref()
            .and_then(|location| url.join(location).ok())
            .ok_or_else(|| MirrorError::MissingLocation { url: url.to_string() })?;
        if hops >= MAX_REDIRECTS {
            return Err(MirrorError::TooManyRedirects { max: MAX_REDIRECTS });
        }

        let issue = Issue::from_upstream_name(target.path())?;
        debug!(url = %target, issue = %issue, "Following redirect");

        if !force && self.is_mirrored(&issue).await {
            return Ok(FetchState::ShortCircuited { issue });
        }
        Ok(FetchState::Following {
            url: target,
            hops: hops + 1,
            issue: Some(issue),
        })
    }

    /// Existence check errors count as "not mirrored".
    async fn is_mirrored(&self, issue: &Issue) -> bool {
        let key = issue.storage_key();
        match self.store.exists(&key).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!(key = %key, error = %e, "Existence check failed, downloading anyway");
                false
            }
        }
    }

    async fn upload(
        &self,
        url: Url,
        issue: Option<Issue>,
        response: UpstreamResponse,
    ) -> Result<Issue> {
        // Without any redirect the request URL itself has to name the issue.
        let issue = match issue {
            Some(issue) => issue,
            None => Issue::from_upstream_name(url.path())
                .or_else(|e| Issue::from_public_name(url.path()).map_err(|_| e))?,
        };

        let expected = response.content_length;
        let disposition = format!("attachment; filename={}", issue.public_name());
        let written = self
            .store
            .put(
                &issue.storage_key(),
                response.body,
                response.content_type.as_deref(),
                &disposition,
            )
            .await?;
        check_length(&issue.storage_key(), expected, written);

        info!(issue = %issue, url = %url, bytes = written, "Loaded file");
        metrics::fetch::success(written);
        self.latest.store(issue.clone());
        Ok(issue)
    }
}

/// A short body usually means the upstream cut the transfer. Returns `false`
/// when a declared length was not met.
pub(crate) fn check_length(key: &str, expected: Option<u64>, written: u64) -> bool {
    match expected {
        Some(expected) if expected != written => {
            warn!(key, expected, written, "Stored size differs from Content-Length");
            false
        }
        _ => true,
    }
}

fn local_today() -> NaiveDate {
    Local::now().date_naive()
}
