use crate::app::ports::{UpstreamClientPort, UpstreamResponse};
use crate::error::MirrorError;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{CONTENT_TYPE, LOCATION, USER_AGENT};
use reqwest::{redirect, Url};
use std::io;
use std::time::Duration;

use crate::constants::UPSTREAM_CONNECT_TIMEOUT_SECS;

/// reqwest-backed upstream transport. Redirects are handed back to the
/// caller so every hop can be inspected.
pub struct ReqwestUpstream {
    client: reqwest::Client,
}

impl ReqwestUpstream {
    /// `timeout` bounds each hop from connect until its body has been read.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .connect_timeout(Duration::from_secs(UPSTREAM_CONNECT_TIMEOUT_SECS))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl UpstreamClientPort for ReqwestUpstream {
    async fn send(&self, url: &Url, user_agent: &str) -> Result<UpstreamResponse, MirrorError> {
        let resp = self
            .client
            .get(url.clone())
            .header(USER_AGENT, user_agent)
            .send()
            .await?;
        let status = resp.status().as_u16();
        let headers = resp.headers();
        let location = headers
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let content_length = resp.content_length();
        let body = resp
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
            .boxed();
        Ok(UpstreamResponse { status, location, content_type, content_length, body })
    }
}
