use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args};
use croner::Cron;
use reqwest::Url;
use std::net::SocketAddr;
use std::time::Duration;

use crate::constants::{DEFAULT_ISSUE_EXTENSION, DEFAULT_UPSTREAM_TIMEOUT};
use crate::infra::user_agent::{load_user_agent, USER_AGENT_LIST_URL};

/// Service configuration. Every option can also be set through the
/// environment variable named next to it (a `.env` file is honoured).
#[derive(Debug, Clone, Args)]
pub struct Config {
    /// The address to listen for HTTP requests on
    #[arg(long, env = "LISTEN_ADDRESS", default_value = "0.0.0.0:8080")]
    pub listen_address: SocketAddr,

    /// Redirect requests to `/` to the latest issue
    #[arg(long, env = "REDIRECT_TO_LATEST", default_value_t = true, action = ArgAction::Set)]
    pub redirect_to_latest: bool,

    /// S3-compatible API endpoint
    #[arg(long, env = "S3_ENDPOINT")]
    pub s3_endpoint: String,

    /// S3 region
    #[arg(long, env = "S3_REGION", default_value = "us-east-1")]
    pub s3_region: String,

    /// S3 bucket name
    #[arg(long, env = "S3_BUCKET")]
    pub s3_bucket: String,

    /// Check for an updated issue on startup
    #[arg(long, env = "UPDATE_ON_STARTUP", default_value_t = true, action = ArgAction::Set)]
    pub update_on_startup: bool,

    /// Update cron schedule (5 fields). Leave blank to disable
    #[arg(long, env = "UPDATE_CRON", default_value = "0 8 * * 1-6")]
    pub update_cron: String,

    /// Authorization key for `/api/update`. Leave blank to disable the endpoint
    #[arg(long, env = "UPDATE_AUTH_KEY", default_value = "", hide_env_values = true)]
    pub update_auth_key: String,

    /// Authorization key for `/api/upload`. Leave blank to disable the endpoint
    #[arg(long, env = "UPLOAD_AUTH_KEY", default_value = "", hide_env_values = true)]
    pub upload_auth_key: String,

    /// URL to fetch issues from
    #[arg(long, env = "UPDATE_URL")]
    pub update_url: Url,

    /// Deadline for each upstream request, body included
    #[arg(
        long,
        env = "UPDATE_TIMEOUT",
        default_value = DEFAULT_UPSTREAM_TIMEOUT,
        value_parser = humantime::parse_duration
    )]
    pub update_timeout: Duration,

    /// User agent for upstream requests. Loaded from a public list if empty
    #[arg(long, env = "UPDATE_USER_AGENT", default_value = "")]
    pub update_user_agent: String,

    /// Extension of stored issues, used when resolving the latest one
    #[arg(long, env = "ISSUE_EXTENSION", default_value = DEFAULT_ISSUE_EXTENSION)]
    pub issue_extension: String,

    /// HTTP rate limit requests per window and client
    #[arg(long, env = "LIMIT_REQUESTS", default_value_t = 5)]
    pub limit_requests: u32,

    /// HTTP rate limit window
    #[arg(
        long,
        env = "LIMIT_WINDOW",
        default_value = "10s",
        value_parser = humantime::parse_duration
    )]
    pub limit_window: Duration,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.s3_endpoint.trim().is_empty() {
            bail!("S3_ENDPOINT must not be empty");
        }
        if self.s3_bucket.trim().is_empty() {
            bail!("S3_BUCKET must not be empty");
        }
        if !self.issue_extension.is_empty() && !self.issue_extension.starts_with('.') {
            bail!("ISSUE_EXTENSION must start with '.', got {:?}", self.issue_extension);
        }
        if self.limit_requests == 0 || self.limit_window.is_zero() {
            bail!("LIMIT_REQUESTS and LIMIT_WINDOW must be positive");
        }
        if self.update_timeout.is_zero() {
            bail!("UPDATE_TIMEOUT must be positive");
        }
        self.schedule()?;
        Ok(())
    }

    pub fn update_auth_key(&self) -> Option<&str> {
        Some(self.update_auth_key.as_str()).filter(|k| !k.is_empty())
    }

    pub fn upload_auth_key(&self) -> Option<&str> {
        Some(self.upload_auth_key.as_str()).filter(|k| !k.is_empty())
    }

    /// `None` when scheduled updates are disabled.
    pub fn schedule(&self) -> Result<Option<Cron>> {
        let expr = self.update_cron.trim();
        if expr.is_empty() {
            return Ok(None);
        }
        let cron = Cron::new(expr)
            .parse()
            .with_context(|| format!("Invalid UPDATE_CRON {expr:?}"))?;
        Ok(Some(cron))
    }

    pub async fn user_agent(&self) -> Result<String> {
        if !self.update_user_agent.is_empty() {
            return Ok(self.update_user_agent.clone());
        }
        load_user_agent(USER_AGENT_LIST_URL).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        config: Config,
    }

    fn parse(extra: &[&str]) -> Config {
        let mut args = vec![
            "issue_mirror",
            "--s3-endpoint",
            "http://localhost:9000",
            "--s3-bucket",
            "issues",
            "--update-url",
            "https://upstream.test/latest",
        ];
        args.extend_from_slice(extra);
        TestCli::try_parse_from(args).unwrap().config
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert_eq!(config.listen_address, "0.0.0.0:8080".parse().unwrap());
        assert!(config.redirect_to_latest);
        assert!(config.update_on_startup);
        assert_eq!(config.update_cron, "0 8 * * 1-6");
        assert_eq!(config.update_auth_key(), None);
        assert_eq!(config.issue_extension, ".pdf");
        assert_eq!(config.limit_requests, 5);
        assert_eq!(config.limit_window, Duration::from_secs(10));
        assert_eq!(config.update_timeout, Duration::from_secs(300));
        assert_eq!(config.upload_auth_key(), None);
        config.validate().unwrap();
    }

    #[test]
    fn test_overrides() {
        let config = parse(&[
            "--redirect-to-latest",
            "false",
            "--update-auth-key",
            "secret",
            "--upload-auth-key",
            "other",
            "--update-cron",
            "",
            "--limit-window",
            "1m",
        ]);
        assert!(!config.redirect_to_latest);
        assert_eq!(config.update_auth_key(), Some("secret"));
        assert_eq!(config.upload_auth_key(), Some("other"));
        assert!(config.schedule().unwrap().is_none());
        assert_eq!(config.limit_window, Duration::from_secs(60));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(parse(&["--update-cron", "not a cron"]).validate().is_err());
        assert!(parse(&["--issue-extension", "pdf"]).validate().is_err());
        assert!(parse(&["--limit-requests", "0"]).validate().is_err());
        assert!(parse(&["--update-timeout", "0s"]).validate().is_err());
    }

    #[tokio::test]
    async fn test_configured_user_agent_skips_download() {
        let config = parse(&["--update-user-agent", "Mozilla/5.0 pinned"]);
        assert_eq!(config.user_agent().await.unwrap(), "Mozilla/5.0 pinned");
    }
}
