use std::{future::Future, pin::Pin, str::FromStr, time::Duration};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::{
    StatusCode, Url,
    header::{CONTENT_TYPE, RANGE},
};
use tokio_stream::StreamExt;
use tracing::{debug, instrument};

use cache::{Determination, ProbeCache};
use hls::PlaylistBody;

pub mod cache;
pub mod hls;

/// Only the start of a direct stream is downloaded
const MEDIA_PROBE_RANGE: &str = "bytes=0-1024";

/// Content types accepted for a direct stream
const MEDIA_CONTENT_TYPES: [&str; 4] = [
    "video/",
    "audio/",
    "application/octet-stream",
    "application/vnd.apple.mpegurl",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    /// URL that was confirmed, which is a variant's URL when a master playlist got resolved
    pub url: String,
    pub live: bool,
}

impl ProbeResult {
    pub fn live(url: impl ToString) -> Self {
        Self {
            url: url.to_string(),
            live: true,
        }
    }

    pub fn dead(url: impl ToString) -> Self {
        Self {
            url: url.to_string(),
            live: false,
        }
    }
}

/// Something able to tell whether a stream URL is playable
#[async_trait]
pub trait StreamProbe: Send + Sync {
    async fn probe(&self, url: &str) -> ProbeResult;
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Timeout of each individual request
    pub timeout: Duration,
    /// Attempts per URL when the network misbehaves
    pub max_attempts: u32,
    /// Pause between two attempts
    pub retry_delay: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(8),
            max_attempts: 1,
            retry_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// `.m3u` / `.m3u8`
    Playlist,
    /// Anything else, expected to serve media bytes right away
    Media,
}

impl StreamKind {
    /// Classifies by the path's extension. Query strings and fragments are ignored.
    #[must_use]
    pub fn of(url: &str) -> Self {
        let path = Url::from_str(url).map_or_else(
            |_| url.to_ascii_lowercase(),
            |u| u.path().to_ascii_lowercase(),
        );

        if path.ends_with(".m3u8") || path.ends_with(".m3u") {
            Self::Playlist
        } else {
            Self::Media
        }
    }
}

/// Probes streams over HTTP, remembering settled verdicts for the lifetime of the prober
pub struct HttpProber {
    client: reqwest::Client,
    config: ProbeConfig,
    cache: ProbeCache,
}

impl HttpProber {
    #[must_use]
    pub fn new(client: reqwest::Client, config: ProbeConfig) -> Self {
        Self {
            client,
            config,
            cache: ProbeCache::new(),
        }
    }

    #[must_use]
    pub const fn cache(&self) -> &ProbeCache {
        &self.cache
    }

    /// `chain` holds the master playlists that led to `url`
    #[instrument(skip(self, chain))]
    async fn probe_uncached(&self, url: &str, max_attempts: u32, chain: &[String]) -> Determination {
        let kind = StreamKind::of(url);
        let max_attempts = max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let outcome = match kind {
                StreamKind::Playlist => self.check_playlist(url, chain).await,
                StreamKind::Media => self.check_media(url).await,
            };

            match outcome {
                Ok(determination) => return determination,
                Err(e) => {
                    debug!("Attempt {attempt}/{max_attempts} failed: {e:#}");
                    if attempt < max_attempts {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }

        Determination::Unsettled(ProbeResult::dead(url))
    }

    async fn check_playlist(&self, url: &str, chain: &[String]) -> Result<Determination> {
        let res = self
            .client
            .head(url)
            .timeout(self.config.timeout)
            .send()
            .await
            .context("Checking playlist existence")?;
        if !res.status().is_success() {
            debug!("Playlist existence check returned {}", res.status());
            return Ok(Determination::Unsettled(ProbeResult::dead(url)));
        }

        let res = self
            .client
            .get(url)
            .timeout(self.config.timeout)
            .send()
            .await
            .context("Fetching playlist")?;
        if !res.status().is_success() {
            bail!("Playlist fetch returned {}", res.status());
        }
        let body = res.text().await.context("Decoding playlist")?;

        match hls::inspect(&body) {
            PlaylistBody::Media => Ok(Determination::Settled(ProbeResult::live(url))),
            PlaylistBody::NotPlaylist | PlaylistBody::Unplayable => {
                Ok(Determination::Settled(ProbeResult::dead(url)))
            }
            PlaylistBody::Master { variant } => Ok(self.check_variant(url, &variant, chain).await),
        }
    }

    /// The master itself is never cached, its variant is, under the variant's own URL.
    ///
    /// Variants go through the cache like any other URL, with `chain` telling
    /// it which masters this probe is already resolving.
    async fn check_variant(&self, master: &str, variant: &str, chain: &[String]) -> Determination {
        let Ok(variant_url) = Url::from_str(master).and_then(|m| m.join(variant)) else {
            debug!("Unable to resolve variant {variant} against {master}");
            return Determination::Unsettled(ProbeResult::dead(master));
        };
        let variant_url = variant_url.to_string();

        if variant_url == master || chain.iter().any(|m| *m == variant_url) {
            debug!("Variant {variant_url} loops back into its own master");
            return Determination::Unsettled(ProbeResult::dead(master));
        }

        let mut chain = chain.to_vec();
        chain.push(master.to_string());

        debug!("Following variant {variant_url}");
        let result = self
            .cache
            .get_or_probe(&variant_url, &chain, || {
                self.probe_variant(&variant_url, &chain)
            })
            .await;
        Determination::Unsettled(result)
    }

    /// Variants get a single attempt
    fn probe_variant<'a>(
        &'a self,
        url: &'a str,
        chain: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Determination> + Send + 'a>> {
        Box::pin(self.probe_uncached(url, 1, chain))
    }

    async fn check_media(&self, url: &str) -> Result<Determination> {
        let res = self
            .client
            .get(url)
            .header(RANGE, MEDIA_PROBE_RANGE)
            .timeout(self.config.timeout)
            .send()
            .await
            .context("Requesting stream")?;

        let status = res.status();
        if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
            bail!("Stream returned {status}");
        }

        let content_type = res
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let mut body = res.bytes_stream();
        let chunk = body
            .next()
            .await
            .transpose()
            .context("Reading stream data")?;
        if chunk.is_none_or(|c| c.is_empty()) {
            debug!("Stream sent no data");
            return Ok(Determination::Settled(ProbeResult::dead(url)));
        }

        if !is_media_content_type(&content_type) {
            debug!("Stream has non-media content type {content_type:?}");
            return Ok(Determination::Settled(ProbeResult::dead(url)));
        }

        Ok(Determination::Settled(ProbeResult::live(url)))
    }
}

#[async_trait]
impl StreamProbe for HttpProber {
    async fn probe(&self, url: &str) -> ProbeResult {
        if let Some(cached) = self.cache.get(url) {
            debug!("Cache hit for {url}");
            return cached;
        }

        self.cache
            .get_or_probe(url, &[], || {
                self.probe_uncached(url, self.config.max_attempts, &[])
            })
            .await
    }
}

fn is_media_content_type(content_type: &str) -> bool {
    MEDIA_CONTENT_TYPES
        .iter()
        .any(|accepted| content_type.contains(accepted))
}
