//! In-memory doubles for the app ports, shared by the use case tests.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Url;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::app::ports::{
    ByteStream, ObjectInfo, ObjectStorePort, StoredObject, UpstreamClientPort, UpstreamResponse,
};
use crate::error::{MirrorError, StoreError};

struct Canned {
    status: u16,
    location: Option<String>,
    body: Vec<u8>,
    content_type: Option<String>,
}

/// Scripted upstream: each URL answers with a fixed response.
#[derive(Default)]
pub struct MockUpstream {
    routes: HashMap<String, Canned>,
    fallback_redirect: Option<String>,
    stalled: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl MockUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn redirect(mut self, url: &str, location: &str) -> Self {
        self.routes.insert(
            url.to_string(),
            Canned {
                status: 302,
                location: Some(location.to_string()),
                body: Vec::new(),
                content_type: None,
            },
        );
        self
    }

    pub fn respond(self, url: &str, status: u16, body: &[u8]) -> Self {
        self.respond_with(url, status, body, None)
    }

    pub fn respond_typed(self, url: &str, status: u16, body: &[u8], content_type: &str) -> Self {
        self.respond_with(url, status, body, Some(content_type.to_string()))
    }

    fn respond_with(
        mut self,
        url: &str,
        status: u16,
        body: &[u8],
        content_type: Option<String>,
    ) -> Self {
        self.routes.insert(
            url.to_string(),
            Canned { status, location: None, body: body.to_vec(), content_type },
        );
        self
    }

    /// Requests for `url` never get an answer.
    pub fn stall(mut self, url: &str) -> Self {
        self.stalled.insert(url.to_string());
        self
    }

    /// Every unknown URL redirects to `location`.
    pub fn redirect_always(mut self, location: &str) -> Self {
        self.fallback_redirect = Some(location.to_string());
        self
    }

    pub fn redirect_response(location: &str) -> UpstreamResponse {
        UpstreamResponse {
            status: 302,
            location: Some(location.to_string()),
            content_type: None,
            content_length: None,
            body: body_stream(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl UpstreamClientPort for MockUpstream {
    async fn send(&self, url: &Url, _user_agent: &str) -> Result<UpstreamResponse, MirrorError> {
        self.calls.lock().unwrap().push(url.to_string());
        if self.stalled.contains(url.as_str()) {
            futures::future::pending::<()>().await;
        }
        let response = match (self.routes.get(url.as_str()), &self.fallback_redirect) {
            (Some(canned), _) => UpstreamResponse {
                status: canned.status,
                location: canned.location.clone(),
                content_type: canned.content_type.clone(),
                content_length: Some(canned.body.len() as u64),
                body: body_stream(canned.body.clone()),
            },
            (None, Some(location)) => Self::redirect_response(location),
            (None, None) => UpstreamResponse {
                status: 404,
                location: None,
                content_type: None,
                content_length: None,
                body: body_stream(Vec::new()),
            },
        };
        Ok(response)
    }
}

#[derive(Clone, Debug)]
pub struct PutCall {
    pub key: String,
    pub content_type: Option<String>,
    pub content_disposition: String,
}

/// Bucket double backed by a sorted map, with switchable failures.
#[derive(Default)]
pub struct MockStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    puts: Mutex<Vec<PutCall>>,
    exists_calls: AtomicUsize,
    fail_exists: bool,
    fail_put: bool,
    fail_list: bool,
    endless_list: bool,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(self, key: &str, bytes: &[u8]) -> Self {
        self.objects.lock().unwrap().insert(key.to_string(), bytes.to_vec());
        self
    }

    pub fn failing_exists(mut self) -> Self {
        self.fail_exists = true;
        self
    }

    pub fn failing_put(mut self) -> Self {
        self.fail_put = true;
        self
    }

    pub fn failing_list(mut self) -> Self {
        self.fail_list = true;
        self
    }

    /// Listings yield the stored keys and then never finish.
    pub fn endless_list(mut self) -> Self {
        self.endless_list = true;
        self
    }

    pub fn puts(&self) -> Vec<PutCall> {
        self.puts.lock().unwrap().clone()
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn exists_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStorePort for MockStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_exists {
            return Err(StoreError::Body("exists failed".to_string()));
        }
        Ok(self.objects.lock().unwrap().contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<StoredObject, StoreError> {
        let bytes = self
            .object(key)
            .ok_or_else(|| StoreError::NotFound { key: key.to_string() })?;
        Ok(StoredObject {
            info: ObjectInfo {
                size: bytes.len() as u64,
                last_modified: Utc::now(),
                e_tag: Some("etag-1".to_string()),
                content_type: Some("application/pdf".to_string()),
            },
            body: body_stream(bytes),
        })
    }

    async fn put(
        &self,
        key: &str,
        mut body: ByteStream,
        content_type: Option<&str>,
        content_disposition: &str,
    ) -> Result<u64, StoreError> {
        self.puts.lock().unwrap().push(PutCall {
            key: key.to_string(),
            content_type: content_type.map(str::to_string),
            content_disposition: content_disposition.to_string(),
        });
        if self.fail_put {
            return Err(StoreError::Body("put failed".to_string()));
        }
        let mut buf = Vec::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk.map_err(|e| StoreError::Body(e.to_string()))?);
        }
        let written = buf.len() as u64;
        self.objects.lock().unwrap().insert(key.to_string(), buf);
        Ok(written)
    }

    fn list(
        &self,
        prefix: &str,
        recursive: bool,
    ) -> BoxStream<'static, Result<String, StoreError>> {
        let keys: Vec<Result<String, StoreError>> = self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .filter(|k| recursive || !k[prefix.len()..].contains('/'))
            .cloned()
            .map(Ok)
            .collect();
        let tail = if self.fail_list {
            vec![Err(StoreError::Body("listing failed".to_string()))]
        } else {
            Vec::new()
        };
        let listing = stream::iter(keys.into_iter().chain(tail));
        if self.endless_list {
            listing.chain(stream::pending()).boxed()
        } else {
            listing.boxed()
        }
    }
}

pub fn body_stream(bytes: Vec<u8>) -> ByteStream {
    stream::once(async move { Ok(Bytes::from(bytes)) }).boxed()
}
