pub mod ports;
pub mod latest;
pub mod fetch_use_case;
pub mod resolve_use_case;
pub mod upload_use_case;

#[cfg(test)]
pub(crate) mod mock;

pub use fetch_use_case::UpstreamFetcher;
pub use latest::LatestCache;
pub use resolve_use_case::LatestResolver;
pub use upload_use_case::{Uploaded, UrlUploader};
