use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{
    Url,
    header::{ACCEPT, CONNECTION, HeaderMap, HeaderValue, REFERER, USER_AGENT},
};
use rlimit::Resource;
use tracing::{debug, warn};

/// Browser identification presented to stream origins. Many IPTV hosts refuse
/// requests that don't look like they come from a regular browser.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Returns `true` when `candidate` is an absolute URL with both a scheme and a host.
///
/// Never fails; anything unparsable is simply not a URL.
#[must_use]
pub fn is_valid_url(candidate: &str) -> bool {
    Url::parse(candidate).is_ok_and(|url| {
        !url.scheme().is_empty() && url.host_str().is_some_and(|host| !host.is_empty())
    })
}

/// Each probe worker holds a socket open, so warn when the file limit is in
/// the same ballpark as the requested parallelism.
pub fn warn_ulimit(parallelism: usize) {
    let Ok((limit, _)) = rlimit::getrlimit(Resource::NOFILE) else {
        debug!("Unable to read the open file limit");
        return;
    };

    let wanted = u64::try_from(parallelism).unwrap_or(u64::MAX).saturating_mul(4);
    if limit <= wanted {
        warn!(
            "Your file limit ({limit}) is low for {parallelism} parallel probes and may cause connection errors. Consider raising your file limit via `ulimit -n 10240`"
        );
    }
}

/// HTTP client used to fetch the source channel list.
///
/// # Errors
/// Errors when the TLS backend cannot be initialized
pub fn init_http_client() -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!(
            "{}/{} (+{})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_REPOSITORY")
        ))
        .context("Building User-Agent header")?,
    );

    reqwest::Client::builder()
        .default_headers(headers)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("Building source HTTP client")
}

/// HTTP client used to probe streams.
///
/// Every request asks the origin to close the connection and no idle
/// connection is kept around, since most probes hit a different host.
///
/// # Errors
/// Errors when the TLS backend cannot be initialized
pub fn init_probe_client(accept_invalid_certs: bool) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(CONNECTION, HeaderValue::from_static("close"));
    headers.insert(REFERER, HeaderValue::from_static("https://www.google.com/"));

    reqwest::Client::builder()
        .default_headers(headers)
        .pool_max_idle_per_host(0)
        .danger_accept_invalid_certs(accept_invalid_certs)
        .build()
        .context("Building probe HTTP client")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_absolute_urls() {
        assert!(is_valid_url("https://example.com/stream.m3u8"));
        assert!(is_valid_url("http://10.0.0.2:8080/live/1.ts"));
        assert!(is_valid_url("rtmp://media.example.com/app/stream"));
    }

    #[test]
    fn rejects_strings_without_scheme_or_host() {
        assert!(!is_valid_url("not a url"));
        assert!(!is_valid_url("/just/a/path"));
        assert!(!is_valid_url("example.com/stream.m3u8"));
        assert!(!is_valid_url("mailto:someone@example.com"));
        assert!(!is_valid_url("file:///tmp/stream.ts"));
        assert!(!is_valid_url(""));
        assert!(!is_valid_url("#genre#"));
    }
}
