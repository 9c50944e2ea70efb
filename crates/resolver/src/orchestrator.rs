//! One resolution run: load, discover, filter, resolve, merge, persist.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::TtlCache;
use crate::error::{ResolverError, Result};
use crate::extractor::StreamExtractor;
use crate::listing::ListingSource;
use crate::model::{CacheRecord, CandidateEvent, WorkingSet};
use crate::runner::{TaskOutcome, TaskRunner};
use crate::schedule::ActivityWindow;

/// Summary of a completed run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// Every fresh record after the merge, as persisted.
    pub working_set: WorkingSet,
    pub discovered: usize,
    /// Keys dropped by the activity window.
    pub out_of_window: Vec<String>,
    /// Keys skipped because a fresh record exists.
    pub already_cached: Vec<String>,
    /// Keys handed to the extractor.
    pub attempted: Vec<String>,
    pub resolved: Vec<String>,
    /// `(key, reason)` for every attempted key that did not resolve.
    pub failures: Vec<(String, String)>,
}

impl RunReport {
    /// Nothing new was resolved and nothing failed.
    pub fn is_noop(&self) -> bool {
        self.resolved.is_empty() && self.failures.is_empty()
    }
}

pub struct Orchestrator {
    listing: Arc<dyn ListingSource>,
    extractor: Arc<StreamExtractor>,
    cache: TtlCache,
    runner: TaskRunner,
    window: ActivityWindow,
    default_metadata: BTreeMap<String, String>,
}

impl Orchestrator {
    pub fn new(
        listing: Arc<dyn ListingSource>,
        extractor: Arc<StreamExtractor>,
        cache: TtlCache,
        runner: TaskRunner,
        window: ActivityWindow,
    ) -> Self {
        Self {
            listing,
            extractor,
            cache,
            runner,
            window,
            default_metadata: BTreeMap::new(),
        }
    }

    /// Metadata attached to every new record; listing metadata wins on
    /// conflicting keys.
    pub fn with_default_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.default_metadata = metadata;
        self
    }

    pub fn cache(&self) -> &TtlCache {
        &self.cache
    }

    /// Execute one run.
    ///
    /// Discovery and cache write failures abort the run. If `token` is
    /// cancelled before the merge, the cache is left untouched and
    /// [`ResolverError::Cancelled`] is returned.
    pub async fn run(&self, token: &CancellationToken) -> Result<RunReport> {
        let mut working_set = self.cache.load().await;
        info!(cached = working_set.len(), "Loaded cache");

        let candidates = tokio::select! {
            _ = token.cancelled() => return Err(ResolverError::Cancelled),
            candidates = self.listing.discover() => candidates?,
        };

        let mut report = RunReport {
            discovered: candidates.len(),
            ..Default::default()
        };
        let pending = self.select_pending(candidates, &working_set, &mut report);
        report.attempted = pending.iter().map(|event| event.key.clone()).collect();
        info!(
            discovered = report.discovered,
            out_of_window = report.out_of_window.len(),
            already_cached = report.already_cached.len(),
            pending = pending.len(),
            "Filtered candidates"
        );

        let extractor = self.extractor.clone();
        let reports = self
            .runner
            .run(
                pending,
                move |event: CandidateEvent| {
                    let extractor = extractor.clone();
                    async move { extractor.resolve(&event.reference).await.into_result() }
                },
                token,
            )
            .await;

        if token.is_cancelled() {
            warn!("Run cancelled, cache left unchanged");
            return Err(ResolverError::Cancelled);
        }

        for task in reports {
            let event = task.item;
            match task.outcome {
                TaskOutcome::Completed(stream) => {
                    let mut metadata = self.default_metadata.clone();
                    metadata.extend(event.metadata);
                    let record = CacheRecord::new(stream.url, Utc::now()).with_metadata(metadata);
                    working_set.insert(event.key.clone(), record);
                    report.resolved.push(event.key);
                }
                outcome => {
                    let reason = outcome.failure().unwrap_or_default();
                    warn!(key = %event.key, reference = %event.reference, reason = %reason, "Event unresolved");
                    report.failures.push((event.key, reason));
                }
            }
        }

        self.cache.write(&working_set).await?;
        info!(
            resolved = report.resolved.len(),
            failed = report.failures.len(),
            total = working_set.len(),
            "Run complete"
        );

        report.working_set = working_set;
        Ok(report)
    }

    /// Drop out-of-window, cached and duplicate candidates.
    fn select_pending(
        &self,
        candidates: Vec<CandidateEvent>,
        working_set: &WorkingSet,
        report: &mut RunReport,
    ) -> Vec<CandidateEvent> {
        let now = Utc::now();
        let mut seen = HashSet::new();
        let mut pending = Vec::new();

        for event in candidates {
            if !self.window.is_in_scope(event.schedule_hint.as_deref(), now) {
                debug!(key = %event.key, hint = ?event.schedule_hint, "Outside activity window");
                report.out_of_window.push(event.key);
                continue;
            }
            if working_set.contains_key(&event.key) {
                report.already_cached.push(event.key);
                continue;
            }
            if !seen.insert(event.key.clone()) {
                debug!(key = %event.key, reference = %event.reference, "Duplicate key in listing");
                continue;
            }
            pending.push(event);
        }
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::ExtractorOptions;
    use crate::listing::StaticListing;
    use crate::testing::RouteFetcher;
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;

    fn page(n: usize) -> String {
        format!(r#"<script>var src = "https://cdn.example/live/{n}.m3u8";</script>"#)
    }

    fn event(n: usize) -> CandidateEvent {
        CandidateEvent::new(
            format!("[NBA] Game {n} (TST)"),
            format!("https://events.example/game/{n}"),
        )
    }

    fn fetcher_for(count: usize) -> RouteFetcher {
        (0..count).fold(RouteFetcher::new(), |fetcher, n| {
            fetcher.page(&format!("https://events.example/game/{n}"), &page(n))
        })
    }

    fn orchestrator(
        fetcher: Arc<RouteFetcher>,
        events: Vec<CandidateEvent>,
        cache: TtlCache,
    ) -> Orchestrator {
        let extractor = StreamExtractor::new(fetcher, ExtractorOptions::default()).unwrap();
        Orchestrator::new(
            Arc::new(StaticListing::new(events)),
            Arc::new(extractor),
            cache,
            TaskRunner::new(4),
            ActivityWindow::default(),
        )
    }

    #[tokio::test]
    async fn second_run_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let cache = TtlCache::new(dir.path().join("cache.json"));
        let fetcher = Arc::new(fetcher_for(3));
        let orchestrator = orchestrator(fetcher.clone(), (0..3).map(event).collect(), cache);

        let first = orchestrator.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(first.resolved.len(), 3);
        assert_eq!(
            first.working_set["[NBA] Game 1 (TST)"].resolved_url,
            "https://cdn.example/live/1.m3u8"
        );

        let second = orchestrator.run(&CancellationToken::new()).await.unwrap();
        assert!(second.is_noop());
        assert!(second.attempted.is_empty());
        assert_eq!(second.already_cached.len(), 3);
        assert_eq!(second.working_set, first.working_set);
        assert_eq!(fetcher.requests().len(), 3);
    }

    #[tokio::test]
    async fn cached_keys_never_reach_the_extractor() {
        let dir = TempDir::new().unwrap();
        let cache = TtlCache::new(dir.path().join("cache.json"));
        let mut warm = WorkingSet::new();
        warm.insert(
            event(0).key,
            CacheRecord::new("https://cdn.example/old.m3u8", Utc::now()),
        );
        cache.write(&warm).await.unwrap();

        let fetcher = Arc::new(fetcher_for(2));
        let report = orchestrator(fetcher.clone(), vec![event(0), event(1)], cache)
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(fetcher.calls_to("https://events.example/game/0"), 0);
        assert_eq!(report.attempted, vec![event(1).key]);
        assert_eq!(
            report.working_set[&event(0).key].resolved_url,
            "https://cdn.example/old.m3u8"
        );
    }

    #[tokio::test]
    async fn duplicate_keys_in_one_batch_resolve_once() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(fetcher_for(2));
        let mut twin = event(1);
        twin.key = event(0).key;

        let report = orchestrator(
            fetcher.clone(),
            vec![event(0), twin],
            TtlCache::new(dir.path().join("cache.json")),
        )
        .run(&CancellationToken::new())
        .await
        .unwrap();

        assert_eq!(report.attempted.len(), 1);
        assert_eq!(fetcher.calls_to("https://events.example/game/1"), 0);
        assert_eq!(
            report.working_set[&event(0).key].resolved_url,
            "https://cdn.example/live/0.m3u8"
        );
    }

    #[tokio::test]
    async fn one_failing_event_does_not_sink_the_run() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(
            fetcher_for(5)
                .timeout("https://events.example/game/2")
                .panic("https://events.example/game/4"),
        );

        let report = orchestrator(
            fetcher,
            (0..5).map(event).collect(),
            TtlCache::new(dir.path().join("cache.json")),
        )
        .run(&CancellationToken::new())
        .await
        .unwrap();

        assert_eq!(report.resolved.len(), 3);
        assert_eq!(report.failures.len(), 2);
        assert!(!report.working_set.contains_key(&event(2).key));
        assert!(!report.is_noop());
    }

    struct Unreachable;

    #[async_trait]
    impl ListingSource for Unreachable {
        async fn discover(&self) -> Result<Vec<CandidateEvent>> {
            Err(ResolverError::discovery("listing.example: connection refused"))
        }
    }

    #[tokio::test]
    async fn discovery_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        let extractor =
            StreamExtractor::new(Arc::new(RouteFetcher::new()), ExtractorOptions::default())
                .unwrap();
        let orchestrator = Orchestrator::new(
            Arc::new(Unreachable),
            Arc::new(extractor),
            TtlCache::new(&path),
            TaskRunner::default(),
            ActivityWindow::default(),
        );

        let result = orchestrator.run(&CancellationToken::new()).await;
        assert!(matches!(result, Err(ResolverError::Discovery(_))));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn cache_write_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "file").unwrap();

        let result = orchestrator(
            Arc::new(fetcher_for(1)),
            vec![event(0)],
            TtlCache::new(blocker.join("cache.json")),
        )
        .run(&CancellationToken::new())
        .await;
        assert!(matches!(result, Err(ResolverError::CacheWrite { .. })));
    }

    #[tokio::test]
    async fn metadata_is_merged_over_defaults() {
        let dir = TempDir::new().unwrap();
        let defaults = BTreeMap::from([
            ("group".to_string(), "Sports".to_string()),
            ("logo".to_string(), "default.png".to_string()),
        ]);
        let report = orchestrator(
            Arc::new(fetcher_for(1)),
            vec![event(0).with_metadata("logo", "nba.png")],
            TtlCache::new(dir.path().join("cache.json")),
        )
        .with_default_metadata(defaults)
        .run(&CancellationToken::new())
        .await
        .unwrap();

        let metadata = &report.working_set[&event(0).key].metadata;
        assert_eq!(metadata["group"], "Sports");
        assert_eq!(metadata["logo"], "nba.png");
    }

    #[tokio::test]
    async fn out_of_window_events_are_never_fetched() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(fetcher_for(2));
        let report = orchestrator(
            fetcher.clone(),
            vec![event(0).with_schedule_hint("in 10 hours"), event(1).with_schedule_hint("LIVE")],
            TtlCache::new(dir.path().join("cache.json")),
        )
        .run(&CancellationToken::new())
        .await
        .unwrap();

        assert_eq!(report.out_of_window, vec![event(0).key]);
        assert_eq!(fetcher.calls_to("https://events.example/game/0"), 0);
        assert_eq!(report.resolved, vec![event(1).key]);
    }

    #[tokio::test]
    async fn cancelled_run_leaves_cache_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        let fetcher = fetcher_for(0).slow(
            "https://events.example/game/0",
            Duration::from_secs(30),
            &page(0),
        );
        let orchestrator = orchestrator(Arc::new(fetcher), vec![event(0)], TtlCache::new(&path));

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = orchestrator.run(&token).await;
        assert!(matches!(result, Err(ResolverError::Cancelled)));
        assert!(!path.exists());
    }
}
