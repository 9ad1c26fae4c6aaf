use std::{collections::HashMap, sync::Arc};

use indicatif::ProgressBar;
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{debug, error};

use crate::{
    playlist::StreamEntry,
    probe::{ProbeResult, StreamProbe},
};

/// A stream together with the verdict reached for its URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub stream: StreamEntry,
    pub result: ProbeResult,
}

/// A stream confirmed to be playable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedStream {
    pub display_name: String,
    /// URL as written in the source list
    pub source_url: String,
    /// URL confirmed live, which differs from `source_url` for master playlists
    pub resolved_url: String,
    pub group: String,
}

impl Validation {
    #[must_use]
    pub fn into_validated(self) -> Option<ValidatedStream> {
        if !self.result.live {
            return None;
        }

        Some(ValidatedStream {
            display_name: self.stream.display_name,
            source_url: self.stream.url,
            resolved_url: self.result.url,
            group: self.stream.group,
        })
    }
}

/// Probes every stream with at most `parallelism` probes in flight.
///
/// Validations come back in completion order. A probe task that dies is
/// reported and counted as unreachable, it never fails the batch.
pub async fn validate_streams(
    streams: Vec<StreamEntry>,
    prober: Arc<dyn StreamProbe>,
    parallelism: usize,
    progress: &ProgressBar,
) -> Vec<Validation> {
    let permits = Arc::new(Semaphore::new(parallelism.max(1)));
    let mut tasks = JoinSet::new();
    let mut in_flight = HashMap::with_capacity(streams.len());

    for stream in streams {
        let permits = permits.clone();
        let prober = prober.clone();
        let url = stream.url.clone();

        let handle = tasks.spawn(async move {
            // The semaphore is never closed
            let _permit = permits.acquire().await.ok();
            prober.probe(&url).await
        });
        in_flight.insert(handle.id(), stream);
    }

    let mut validations = Vec::with_capacity(in_flight.len());
    while let Some(joined) = tasks.join_next_with_id().await {
        progress.inc(1);

        match joined {
            Ok((id, result)) => {
                let Some(stream) = in_flight.remove(&id) else {
                    continue;
                };

                if result.live {
                    progress.suspend(|| println!("✓ {}", stream.display_name));
                } else {
                    progress.suspend(|| println!("✗ {} (unreachable)", stream.display_name));
                }
                debug!("{} -> {result:?}", stream.url);

                validations.push(Validation { stream, result });
            }
            Err(e) => {
                let Some(stream) = in_flight.remove(&e.id()) else {
                    continue;
                };

                error!("Probe task for {} died: {e}", stream.url);
                progress.suspend(|| println!("✗ {} (error: {e})", stream.display_name));

                let result = ProbeResult::dead(&stream.url);
                validations.push(Validation { stream, result });
            }
        }
    }

    validations
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;

    use super::*;

    /// Answers from a fixed set of live URLs, optionally slowing some down
    #[derive(Default)]
    struct StubProbe {
        live: HashSet<String>,
        slow: HashSet<String>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl StreamProbe for StubProbe {
        async fn probe(&self, url: &str) -> ProbeResult {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let delay = if self.slow.contains(url) { 200 } else { 10 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            assert!(!url.contains("panic"), "probe blew up");

            if self.live.contains(url) {
                ProbeResult::live(url)
            } else {
                ProbeResult::dead(url)
            }
        }
    }

    fn stream(name: &str, url: &str) -> StreamEntry {
        StreamEntry {
            display_name: name.to_string(),
            url: url.to_string(),
            group: "News".to_string(),
        }
    }

    #[tokio::test]
    async fn validates_every_stream() {
        let probe = StubProbe {
            live: HashSet::from(["https://e.com/a.m3u8".to_string()]),
            ..Default::default()
        };
        let streams = vec![
            stream("A", "https://e.com/a.m3u8"),
            stream("B", "https://e.com/b.ts"),
        ];

        let validations =
            validate_streams(streams, Arc::new(probe), 4, &ProgressBar::hidden()).await;

        assert_eq!(validations.len(), 2);
        let live: Vec<_> = validations
            .into_iter()
            .filter_map(Validation::into_validated)
            .collect();
        assert_eq!(
            live,
            vec![ValidatedStream {
                display_name: "A".to_string(),
                source_url: "https://e.com/a.m3u8".to_string(),
                resolved_url: "https://e.com/a.m3u8".to_string(),
                group: "News".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn never_exceeds_parallelism() {
        let probe = Arc::new(StubProbe::default());
        let streams = (0..30)
            .map(|i| stream(&format!("C{i}"), &format!("https://e.com/{i}.ts")))
            .collect();

        let validations =
            validate_streams(streams, probe.clone(), 3, &ProgressBar::hidden()).await;

        assert_eq!(validations.len(), 30);
        assert!(probe.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn slow_probes_do_not_hold_back_fast_ones() {
        let probe = StubProbe {
            slow: HashSet::from(["https://e.com/slow.ts".to_string()]),
            ..Default::default()
        };
        let streams = vec![
            stream("Slow", "https://e.com/slow.ts"),
            stream("Fast", "https://e.com/fast.ts"),
        ];

        let validations =
            validate_streams(streams, Arc::new(probe), 2, &ProgressBar::hidden()).await;

        let order: Vec<_> = validations
            .iter()
            .map(|v| v.stream.display_name.as_str())
            .collect();
        assert_eq!(order, vec!["Fast", "Slow"]);
    }

    #[tokio::test]
    async fn a_crashing_probe_only_loses_its_own_stream() {
        let probe = StubProbe {
            live: HashSet::from(["https://e.com/ok.ts".to_string()]),
            ..Default::default()
        };
        let streams = vec![
            stream("Broken", "https://e.com/panic.ts"),
            stream("Fine", "https://e.com/ok.ts"),
        ];

        let validations =
            validate_streams(streams, Arc::new(probe), 2, &ProgressBar::hidden()).await;

        assert_eq!(validations.len(), 2);
        let broken = validations
            .iter()
            .find(|v| v.stream.display_name == "Broken")
            .unwrap();
        assert!(!broken.result.live);
        let fine = validations
            .iter()
            .find(|v| v.stream.display_name == "Fine")
            .unwrap();
        assert!(fine.result.live);
    }

    #[tokio::test]
    async fn zero_parallelism_still_makes_progress() {
        let streams = vec![stream("A", "https://e.com/a.ts")];

        let validations = validate_streams(
            streams,
            Arc::new(StubProbe::default()),
            0,
            &ProgressBar::hidden(),
        )
        .await;

        assert_eq!(validations.len(), 1);
    }
}
