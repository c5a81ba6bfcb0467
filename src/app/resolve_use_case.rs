use chrono::{Local, NaiveDate};
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::app::latest::LatestCache;
use crate::app::ports::ObjectStorePort;
use crate::constants::LIST_PREFIX;
use crate::domain::Issue;
use crate::error::{MirrorError, Result};
use crate::observability::metrics;

/// Finds the newest issue in the store, independent of anything cached.
///
/// Today's and yesterday's keys are checked first; only when both are missing
/// is the whole keyspace listed.
pub struct LatestResolver {
    store: Arc<dyn ObjectStorePort>,
    extension: String,
    today: fn() -> NaiveDate,
}

impl LatestResolver {
    pub fn new(store: Arc<dyn ObjectStorePort>, extension: impl Into<String>) -> Self {
        Self {
            store,
            extension: extension.into(),
            today: || Local::now().date_naive(),
        }
    }

    pub fn with_today(mut self, today: fn() -> NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// `Ok(None)` means the store holds no issue at all.
    pub async fn resolve(&self, cancel: &CancellationToken) -> Result<Option<Issue>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(MirrorError::Cancelled),
            res = self.run() => res,
        }
    }

    /// Resolves and seeds `latest` when an issue is found.
    pub async fn resolve_into(
        &self,
        latest: &LatestCache,
        cancel: &CancellationToken,
    ) -> Result<Option<Issue>> {
        let found = self.resolve(cancel).await?;
        if let Some(issue) = &found {
            latest.store(issue.clone());
        }
        Ok(found)
    }

    async fn run(&self) -> Result<Option<Issue>> {
        let today = (self.today)();
        let candidates = [Some(("today", today)), today.pred_opt().map(|d| ("yesterday", d))];

        for (path, date) in candidates.into_iter().flatten() {
            let issue = Issue::from_date(date, self.extension.clone());
            if self.store.exists(&issue.storage_key()).await? {
                info!(issue = %issue, path, "Found latest file");
                metrics::resolve::resolved(path);
                return Ok(Some(issue));
            }
        }

        let newest = self.scan().await?;
        match &newest {
            Some(issue) => {
                info!(issue = %issue, path = "scan", "Found latest file");
                metrics::resolve::resolved("scan");
            }
            None => metrics::resolve::resolved("empty"),
        }
        Ok(newest)
    }

    async fn scan(&self) -> Result<Option<Issue>> {
        let mut keys = self.store.list(LIST_PREFIX, true);
        let mut newest: Option<Issue> = None;
        let mut scanned = 0usize;

        while let Some(item) = keys.next().await {
            let key = item?;
            scanned += 1;
            let Ok(issue) = Issue::from_storage_key(&key) else {
                continue;
            };
            if issue.extension() != self.extension {
                continue;
            }
            if newest.as_ref().map_or(true, |n| issue.date() > n.date()) {
                newest = Some(issue);
            }
        }

        debug!(scanned, prefix = LIST_PREFIX, "Scanned store for latest file");
        Ok(newest)
    }
}
