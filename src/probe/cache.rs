use std::{
    collections::HashMap,
    future::Future,
    sync::{Mutex, MutexGuard, PoisonError},
};

use tokio::sync::watch;
use tracing::debug;

use super::ProbeResult;

/// Outcome of one uncached probe sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Determination {
    /// Verdict derived from what the server sent; kept for the rest of the run
    Settled(ProbeResult),
    /// Verdict that may differ on another try (exhausted retries, master
    /// playlists, refused existence checks); shared with concurrent callers
    /// but never stored
    Unsettled(ProbeResult),
}

#[derive(Debug)]
enum Slot {
    Settled(ProbeResult),
    InFlight {
        outcome: watch::Receiver<Option<ProbeResult>>,
        /// Variant the probing caller is currently waiting on
        follows: Option<String>,
    },
}

enum Claim {
    Cached(ProbeResult),
    Wait(watch::Receiver<Option<ProbeResult>>),
    Probe(watch::Sender<Option<ProbeResult>>),
    Cycle,
}

/// Per-run memo of probe verdicts, keyed by the exact URL string.
///
/// Callers probing the same URL at the same time share one probe sequence,
/// whatever its outcome. Only settled verdicts outlive it.
#[derive(Debug, Default)]
pub struct ProbeCache {
    slots: Mutex<HashMap<String, Slot>>,
}

impl ProbeCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Settled verdict for `url`, if any
    #[must_use]
    pub fn get(&self, url: &str) -> Option<ProbeResult> {
        match self.lock().get(url) {
            Some(Slot::Settled(result)) => Some(result.clone()),
            _ => None,
        }
    }

    /// Returns the verdict for `url`, running `probe` when it is neither
    /// settled nor already being probed.
    ///
    /// `via` lists the master playlists the caller is resolving, innermost
    /// last; it is empty for a top-level probe. Waiting on a probe that is
    /// itself (transitively) waiting on one of them would never finish, so
    /// such a lookup is "not live" right away.
    pub async fn get_or_probe<F, Fut>(&self, url: &str, via: &[String], probe: F) -> ProbeResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Determination>,
    {
        loop {
            let mut outcome = match self.claim(url, via) {
                Claim::Cached(result) => return result,
                Claim::Cycle => {
                    debug!("{url} is already waiting on {via:?}");
                    return ProbeResult::dead(url);
                }
                Claim::Probe(sender) => {
                    let result = match probe().await {
                        Determination::Settled(result) => {
                            self.finish(url, via, Some(result.clone()));
                            result
                        }
                        Determination::Unsettled(result) => {
                            self.finish(url, via, None);
                            result
                        }
                    };
                    sender.send_replace(Some(result.clone()));
                    return result;
                }
                Claim::Wait(outcome) => outcome,
            };

            let shared = outcome
                .wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|seen| (*seen).clone());
            self.unfollow(via);

            match shared {
                Some(result) => return result,
                // The probing caller went away without an answer
                None => debug!("Probe of {url} was abandoned, taking over"),
            }
        }
    }

    /// Number of URLs with a settled verdict
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Settled(_)))
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn claim(&self, url: &str, via: &[String]) -> Claim {
        let mut slots = self.lock();

        match slots.get(url) {
            Some(Slot::Settled(result)) => return Claim::Cached(result.clone()),
            Some(Slot::InFlight { outcome, .. }) if outcome.has_changed().is_ok() => {
                if leads_back(&slots, url, via) {
                    return Claim::Cycle;
                }
                let outcome = outcome.clone();
                follow(&mut slots, via, url);
                return Claim::Wait(outcome);
            }
            _ => {}
        }

        let (sender, outcome) = watch::channel(None);
        slots.insert(
            url.to_string(),
            Slot::InFlight {
                outcome,
                follows: None,
            },
        );
        follow(&mut slots, via, url);
        Claim::Probe(sender)
    }

    /// Ends the probe of `url`, keeping `settled` when there is one
    fn finish(&self, url: &str, via: &[String], settled: Option<ProbeResult>) {
        let mut slots = self.lock();
        match settled {
            Some(result) => {
                slots.insert(url.to_string(), Slot::Settled(result));
            }
            None => {
                slots.remove(url);
            }
        }
        if let Some(Slot::InFlight { follows, .. }) = via.last().and_then(|m| slots.get_mut(m)) {
            *follows = None;
        }
    }

    fn unfollow(&self, via: &[String]) {
        let mut slots = self.lock();
        if let Some(Slot::InFlight { follows, .. }) = via.last().and_then(|m| slots.get_mut(m)) {
            *follows = None;
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Records that the probe of the innermost master in `via` now waits on `url`
fn follow(slots: &mut HashMap<String, Slot>, via: &[String], url: &str) {
    if let Some(Slot::InFlight { follows, .. }) = via.last().and_then(|m| slots.get_mut(m)) {
        *follows = Some(url.to_string());
    }
}

/// Whether the probe of `url` is, through the variants it waits on, waiting on one of `via`
fn leads_back(slots: &HashMap<String, Slot>, url: &str, via: &[String]) -> bool {
    let mut current = url;
    // Every edge is checked before it is added, so the walk has no cycle of its own
    for _ in 0..=slots.len() {
        if via.iter().any(|m| m == current) {
            return true;
        }
        match slots.get(current) {
            Some(Slot::InFlight {
                follows: Some(next),
                ..
            }) => current = next,
            _ => return false,
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use super::*;

    const URL: &str = "https://example.com/live.m3u8";

    #[tokio::test]
    async fn settled_results_are_reused() {
        let cache = ProbeCache::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let result = cache
                .get_or_probe(URL, &[], || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Determination::Settled(ProbeResult::live(URL))
                })
                .await;
            assert!(result.live);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get(URL), Some(ProbeResult::live(URL)));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn unsettled_results_are_not_stored() {
        let cache = ProbeCache::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let result = cache
                .get_or_probe(URL, &[], || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Determination::Unsettled(ProbeResult::dead(URL))
                })
                .await;
            assert!(!result.live);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.get(URL), None);
        assert!(cache.is_empty());
    }

    async fn probe_concurrently(determination: Determination) -> (Vec<ProbeResult>, usize) {
        let cache = Arc::new(ProbeCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let mut tasks = tokio::task::JoinSet::new();

        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            let determination = determination.clone();
            tasks.spawn(async move {
                cache
                    .get_or_probe(URL, &[], || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        determination
                    })
                    .await
            });
        }

        let results = tasks.join_all().await;
        (results, calls.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_probe() {
        let (results, calls) =
            probe_concurrently(Determination::Settled(ProbeResult::dead(URL))).await;

        assert_eq!(results.len(), 8);
        assert!(results.iter().all(|r| r == &ProbeResult::dead(URL)));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn concurrent_callers_share_an_unsettled_outcome() {
        let (results, calls) =
            probe_concurrently(Determination::Unsettled(ProbeResult::dead(URL))).await;

        assert_eq!(results.len(), 8);
        assert!(results.iter().all(|r| r == &ProbeResult::dead(URL)));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn abandoned_check_is_taken_over() {
        let cache = Arc::new(ProbeCache::new());

        let stuck = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_probe(URL, &[], || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Determination::Settled(ProbeResult::dead(URL))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_probe(URL, &[], || async {
                        Determination::Settled(ProbeResult::live(URL))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        stuck.abort();

        let result = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, ProbeResult::live(URL));
        assert_eq!(cache.get(URL), Some(ProbeResult::live(URL)));
    }

    #[tokio::test]
    async fn waiting_on_a_check_that_waits_on_us_is_dead() {
        const OTHER: &str = "https://example.com/other.m3u8";
        let cache = ProbeCache::new();

        // OTHER is being probed and follows URL, so URL following OTHER would never end
        let result = cache
            .get_or_probe(OTHER, &[], || async {
                let inner = cache
                    .get_or_probe(URL, &[OTHER.to_string()], || async {
                        let back = cache
                            .get_or_probe(OTHER, &[OTHER.to_string(), URL.to_string()], || async {
                                Determination::Settled(ProbeResult::live(OTHER))
                            })
                            .await;
                        Determination::Unsettled(back)
                    })
                    .await;
                Determination::Unsettled(inner)
            })
            .await;

        assert_eq!(result, ProbeResult::dead(OTHER));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn keys_are_exact_strings() {
        let cache = ProbeCache::new();
        cache
            .get_or_probe(URL, &[], || async { Determination::Settled(ProbeResult::live(URL)) })
            .await;

        assert_eq!(cache.get("https://example.com/live.m3u8?x=1"), None);
        assert_eq!(cache.get("https://example.com/LIVE.m3u8"), None);
    }
}
