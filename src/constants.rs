/// Shared constants for the mirror

/// Redirect hops followed before giving up on an upstream fetch.
pub const MAX_REDIRECTS: usize = 10;

/// Listing prefix for the full-store scan: every key of this century.
pub const LIST_PREFIX: &str = "20";

/// Extension the resolver expects on stored issues unless configured otherwise.
pub const DEFAULT_ISSUE_EXTENSION: &str = ".pdf";

pub const CACHE_CONTROL_VALUE: &str = "public, max-age=86400";

/// Grace period for in-flight requests after a shutdown signal.
pub const SHUTDOWN_GRACE_SECS: u64 = 30;

pub const UPSTREAM_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Per-hop upstream deadline unless configured otherwise.
pub const DEFAULT_UPSTREAM_TIMEOUT: &str = "5m";
