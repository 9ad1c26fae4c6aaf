use std::time::Duration;

use anyhow::{Context, Result, ensure};
use reqwest::Url;
use tracing::instrument;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Loads the channel list from an `http(s)` URL or, failing that, from a local file
///
/// # Errors
/// Errors when the list cannot be downloaded or read
#[instrument(skip(client))]
pub async fn load(client: &reqwest::Client, source: &str) -> Result<String> {
    match Url::parse(source) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => fetch(client, url).await,
        _ => tokio::fs::read_to_string(source)
            .await
            .with_context(|| format!("Reading channel list from {source}")),
    }
}

async fn fetch(client: &reqwest::Client, url: Url) -> Result<String> {
    let res = client
        .get(url.clone())
        .timeout(FETCH_TIMEOUT)
        .send()
        .await
        .with_context(|| format!("Fetching channel list from {url}"))?;

    ensure!(
        res.status().is_success(),
        "Fetching channel list from {url} returned {}",
        res.status()
    );

    res.text().await.context("Decoding channel list")
}
