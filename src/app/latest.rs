use arc_swap::ArcSwapOption;
use std::sync::Arc;

use crate::domain::Issue;

/// Process-wide slot holding the newest known issue.
///
/// Empty until the first successful resolve or fetch, overwritten on every
/// write after that and never cleared. Reads never block. There is no
/// compare-and-swap: two fetches finishing out of order can leave an older
/// issue in the slot until the next write.
#[derive(Clone, Default)]
pub struct LatestCache {
    slot: Arc<ArcSwapOption<Issue>>,
}

impl LatestCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self) -> Option<Issue> {
        self.slot.load_full().map(|issue| (*issue).clone())
    }

    pub fn store(&self, issue: Issue) {
        self.slot.store(Some(Arc::new(issue)));
    }
}

impl std::fmt::Debug for LatestCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LatestCache").field(&self.load()).finish()
    }
}
