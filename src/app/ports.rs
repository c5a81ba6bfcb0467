use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use reqwest::Url;

use crate::error::{MirrorError, StoreError};

/// Body bytes flowing between the upstream, the store and HTTP responses.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

// Store-side port
#[async_trait]
pub trait ObjectStorePort: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
    async fn get(&self, key: &str) -> Result<StoredObject, StoreError>;
    /// Streams `body` into `key`, returning the number of bytes written.
    async fn put(
        &self,
        key: &str,
        body: ByteStream,
        content_type: Option<&str>,
        content_disposition: &str,
    ) -> Result<u64, StoreError>;
    /// Lazily lists keys under `prefix`. Dropping the stream abandons the listing.
    fn list(
        &self,
        prefix: &str,
        recursive: bool,
    ) -> BoxStream<'static, Result<String, StoreError>>;
}

#[derive(Clone, Debug)]
pub struct ObjectInfo {
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub e_tag: Option<String>,
    pub content_type: Option<String>,
}

pub struct StoredObject {
    pub info: ObjectInfo,
    pub body: ByteStream,
}

// Upstream-side port
#[async_trait]
pub trait UpstreamClientPort: Send + Sync {
    /// Performs a single request. Redirects are returned, never followed.
    async fn send(&self, url: &Url, user_agent: &str) -> Result<UpstreamResponse, MirrorError>;
}

pub struct UpstreamResponse {
    pub status: u16,
    pub location: Option<String>,
    pub content_type: Option<String>,
    /// Declared body size. `None` when unknown or when the body is decoded.
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

impl UpstreamResponse {
    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

impl std::fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("location", &self.location)
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}
