use anyhow::{bail, Context};
use tracing::info;

/// Browser user agents, most common first.
pub const USER_AGENT_LIST_URL: &str =
    "https://raw.githubusercontent.com/jnrbsn/user-agents/refs/heads/main/user-agents.json";

/// Fetches the list at `url` and returns its first entry.
pub async fn load_user_agent(url: &str) -> anyhow::Result<String> {
    let resp = reqwest::get(url)
        .await
        .with_context(|| format!("Failed to fetch user agent list from {url}"))?;
    if !resp.status().is_success() {
        bail!("upstream error: {}", resp.status());
    }

    let agents: Vec<String> = resp.json().await.context("Malformed user agent list")?;
    let agent = agents.into_iter().next().context("User agent list is empty")?;
    info!(user_agent = %agent, "Loaded user agent");
    Ok(agent)
}
