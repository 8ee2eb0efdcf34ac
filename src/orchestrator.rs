// src/orchestrator.rs
// Drives one scraping cycle: fetch → extract → store → baseline → detect
// → notify, per itinerary, with a bounded worker pool. A failure at any
// stage is counted and the remaining itineraries keep going.

use crate::analyzer::TrendAnalyzer;
use crate::config::TrackerConfig;
use crate::detector::{DealDetector, Evaluation};
use crate::errors::ExtractionError;
use crate::fetcher::ContentFetcher;
use crate::notifier::NotificationDispatcher;
use crate::store::{AppendOutcome, SnapshotStore};
use crate::strategies::StrategyChain;
use crate::types::{DispatchOutcome, FetchTarget, RunSummary};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

enum TargetOutcome {
    FetchFailed,
    ExtractionFailed,
    Deduplicated,
    Stored { dispatch: Option<DispatchOutcome> },
    PersistenceFailed,
    SkippedTimeout,
}

pub struct RunOrchestrator {
    store: Arc<SnapshotStore>,
    fetcher: Box<dyn ContentFetcher>,
    chain: StrategyChain,
    analyzer: TrendAnalyzer,
    detector: DealDetector,
    dispatcher: NotificationDispatcher,
    worker_count: usize,
    run_timeout: Duration,
    site_change_fraction: f64,
}

impl RunOrchestrator {
    pub fn new(
        config: &TrackerConfig,
        store: Arc<SnapshotStore>,
        fetcher: Box<dyn ContentFetcher>,
        chain: StrategyChain,
        analyzer: TrendAnalyzer,
        detector: DealDetector,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        Self {
            store,
            fetcher,
            chain,
            analyzer,
            detector,
            dispatcher,
            worker_count: config.worker_count,
            run_timeout: Duration::from_secs(config.run_timeout_secs),
            site_change_fraction: config.site_change_fraction,
        }
    }

    /// One full cycle over all tracked itineraries. Always returns a
    /// summary; per-itinerary failures stay inside it. Targets not yet
    /// started when the run deadline passes are skipped, in-flight ones
    /// are left to finish, and partial results stay committed.
    pub async fn run(&self, targets: &[FetchTarget]) -> RunSummary {
        let started = Instant::now();
        let deadline = started + self.run_timeout;
        info!(
            "🚀 Starting run: {} itineraries, {} workers, {}s budget",
            targets.len(),
            self.worker_count,
            self.run_timeout.as_secs()
        );

        let outcomes: Vec<TargetOutcome> = stream::iter(targets)
            .map(|target| self.process_target(target, deadline))
            .buffer_unordered(self.worker_count.max(1))
            .collect()
            .await;

        let mut summary = RunSummary {
            targets: targets.len(),
            elapsed_seconds: started.elapsed().as_secs_f64(),
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome {
                TargetOutcome::FetchFailed => summary.fetch_failed += 1,
                TargetOutcome::ExtractionFailed => {
                    summary.fetched += 1;
                    summary.extraction_failed += 1;
                }
                TargetOutcome::Deduplicated => {
                    summary.fetched += 1;
                    summary.deduplicated += 1;
                }
                TargetOutcome::PersistenceFailed => {
                    summary.fetched += 1;
                    summary.persistence_failed += 1;
                }
                TargetOutcome::SkippedTimeout => summary.skipped_timeout += 1,
                TargetOutcome::Stored { dispatch } => {
                    summary.fetched += 1;
                    summary.new_snapshots += 1;
                    if let Some(outcome) = dispatch {
                        summary.deals_detected += 1;
                        match outcome {
                            DispatchOutcome::Sent => summary.notifications_sent += 1,
                            DispatchOutcome::Suppressed => summary.notifications_suppressed += 1,
                            DispatchOutcome::Failed => summary.notifications_failed += 1,
                        }
                    }
                }
            }
        }

        // Many extractors failing at once smells like a site redesign,
        // not per-itinerary flakiness
        if !targets.is_empty() {
            let failure_fraction = summary.extraction_failed as f64 / targets.len() as f64;
            summary.likely_site_change = failure_fraction >= self.site_change_fraction;
        }
        summary.elapsed_seconds = started.elapsed().as_secs_f64();

        self.log_summary(&summary);
        summary
    }

    async fn process_target(&self, target: &FetchTarget, deadline: Instant) -> TargetOutcome {
        if Instant::now() >= deadline {
            warn!("⏱️  Run budget spent, skipping {}", target.slug);
            return TargetOutcome::SkippedTimeout;
        }

        let capture = match self.fetcher.fetch(target).await {
            Ok(capture) => capture,
            Err(_) => return TargetOutcome::FetchFailed,
        };

        let captured_at = Utc::now();
        let snapshot = match self.chain.extract(&capture, captured_at) {
            Ok(snapshot) => snapshot,
            Err(ExtractionError::NoStrategyMatched) => {
                warn!("🧩 No strategy matched for {}", target.slug);
                return TargetOutcome::ExtractionFailed;
            }
            Err(e) => {
                warn!("🧩 Extraction failed for {}: {}", target.slug, e);
                return TargetOutcome::ExtractionFailed;
            }
        };

        // Baseline is computed from history *before* this observation so
        // a new record low actually registers as below the rolling minimum
        let baseline = self.analyzer.baseline(&snapshot.itinerary_key, captured_at).await;

        match self.store.append(snapshot.clone()).await {
            Ok(AppendOutcome::Deduplicated) => TargetOutcome::Deduplicated,
            Ok(AppendOutcome::Stored) => {
                let dispatch = match self.detector.evaluate(&snapshot, &baseline) {
                    Evaluation::Deal(deal) => Some(self.dispatcher.dispatch(&deal).await),
                    Evaluation::NoDeal => None,
                };
                TargetOutcome::Stored { dispatch }
            }
            Err(e) => {
                error!("🗄️  Persistence failed for {}: {}", target.slug, e);
                TargetOutcome::PersistenceFailed
            }
        }
    }

    fn log_summary(&self, summary: &RunSummary) {
        info!("🏁 Run complete in {:.1}s:", summary.elapsed_seconds);
        info!(
            "   Fetched {}/{} ({} fetch failures, {} skipped on timeout)",
            summary.fetched, summary.targets, summary.fetch_failed, summary.skipped_timeout
        );
        info!(
            "   Snapshots: {} new, {} deduplicated, {} extraction failures, {} persistence failures",
            summary.new_snapshots,
            summary.deduplicated,
            summary.extraction_failed,
            summary.persistence_failed
        );
        info!(
            "   Deals: {} detected → {} sent, {} suppressed, {} failed",
            summary.deals_detected,
            summary.notifications_sent,
            summary.notifications_suppressed,
            summary.notifications_failed
        );
        if summary.likely_site_change {
            warn!("🚨 Extraction failure rate suggests the site structure changed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::TrendAnalyzer;
    use crate::errors::{FetchError, NotificationError};
    use crate::notifier::NotificationChannel;
    use crate::types::{DealEvent, RawCapture};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FIXTURE: &str = r#"{"price": "$799", "ship": "Oasis of the Seas", "departure_port": "Cape Liberty, NJ", "nights": 7}"#;

    /// Serves canned bodies by slug; slugs without a body 404.
    struct CannedFetcher {
        bodies: HashMap<String, String>,
    }

    #[async_trait]
    impl ContentFetcher for CannedFetcher {
        async fn fetch(&self, target: &FetchTarget) -> Result<RawCapture, FetchError> {
            match self.bodies.get(&target.slug) {
                Some(body) => Ok(RawCapture {
                    target_slug: target.slug.clone(),
                    url: target.url.clone(),
                    http_status: Some(200),
                    body: body.clone(),
                    fetched_at: Utc::now(),
                }),
                None => Err(FetchError::Permanent {
                    url: target.url.clone(),
                    reason: "HTTP 404".to_string(),
                }),
            }
        }
    }

    struct SilentChannel {
        deliveries: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl NotificationChannel for SilentChannel {
        fn name(&self) -> &'static str {
            "silent"
        }

        async fn deliver(&self, _deal: &DealEvent) -> Result<(), NotificationError> {
            self.deliveries.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn target(slug: &str) -> FetchTarget {
        FetchTarget {
            slug: slug.to_string(),
            url: format!("https://example.com/{}", slug),
        }
    }

    fn orchestrator(
        data_dir: &Path,
        bodies: HashMap<String, String>,
        run_timeout_secs: u64,
    ) -> RunOrchestrator {
        let mut config = crate::config::TrackerConfig::from_env();
        config.data_dir = data_dir.to_path_buf();
        config.run_timeout_secs = run_timeout_secs;
        config.worker_count = 2;

        let store = Arc::new(SnapshotStore::open(data_dir, config.run_window_minutes).unwrap());
        let chain =
            StrategyChain::from_config(&crate::config::SelectorConfig::default(), 730).unwrap();
        let analyzer = TrendAnalyzer::new(&config, Arc::clone(&store));
        let detector = DealDetector::new(&config);
        let dispatcher = NotificationDispatcher::new(
            &config,
            Box::new(SilentChannel { deliveries: Arc::new(AtomicUsize::new(0)) }),
        )
        .unwrap();

        RunOrchestrator::new(
            &config,
            store,
            Box::new(CannedFetcher { bodies }),
            chain,
            analyzer,
            detector,
            dispatcher,
        )
    }

    #[tokio::test]
    async fn one_failing_target_does_not_abort_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let bodies = HashMap::from([
            ("good-1".to_string(), FIXTURE.to_string()),
            ("good-2".to_string(), FIXTURE.replace("Oasis", "Wonder")),
        ]);
        let orchestrator = orchestrator(dir.path(), bodies, 300);

        let summary = orchestrator
            .run(&[target("good-1"), target("broken"), target("good-2")])
            .await;

        assert_eq!(summary.targets, 3);
        assert_eq!(summary.fetch_failed, 1);
        assert_eq!(summary.fetched, 2);
        assert_eq!(summary.new_snapshots, 2);
        assert_eq!(summary.skipped_timeout, 0);
    }

    #[tokio::test]
    async fn unparseable_content_counts_as_extraction_failure() {
        let dir = tempfile::tempdir().unwrap();
        let bodies = HashMap::from([
            ("junk-1".to_string(), "<html>cookie banner</html>".to_string()),
            ("good-1".to_string(), FIXTURE.to_string()),
        ]);
        let orchestrator = orchestrator(dir.path(), bodies, 300);

        let summary = orchestrator.run(&[target("junk-1"), target("good-1")]).await;

        assert_eq!(summary.fetched, 2);
        assert_eq!(summary.extraction_failed, 1);
        assert_eq!(summary.new_snapshots, 1);
        assert!(summary.likely_site_change, "half the targets failing extraction is the default alarm threshold");
    }

    #[tokio::test]
    async fn isolated_extraction_failures_do_not_raise_the_site_change_flag() {
        let dir = tempfile::tempdir().unwrap();
        let bodies = HashMap::from([
            ("junk-1".to_string(), "<html>cookie banner</html>".to_string()),
            ("good-1".to_string(), FIXTURE.to_string()),
            ("good-2".to_string(), FIXTURE.replace("Oasis", "Wonder")),
        ]);
        let orchestrator = orchestrator(dir.path(), bodies, 300);

        let summary = orchestrator
            .run(&[target("junk-1"), target("good-1"), target("good-2")])
            .await;

        assert_eq!(summary.extraction_failed, 1);
        assert!(!summary.likely_site_change);
    }

    #[tokio::test]
    async fn spent_run_budget_skips_unstarted_targets() {
        let dir = tempfile::tempdir().unwrap();
        let bodies = HashMap::from([("good-1".to_string(), FIXTURE.to_string())]);
        let orchestrator = orchestrator(dir.path(), bodies, 0);

        let summary = orchestrator.run(&[target("good-1"), target("good-2")]).await;

        assert_eq!(summary.skipped_timeout, 2);
        assert_eq!(summary.fetched, 0);
        assert_eq!(summary.new_snapshots, 0);
    }

    #[tokio::test]
    async fn rerun_within_the_window_deduplicates() {
        let dir = tempfile::tempdir().unwrap();
        let bodies = HashMap::from([("good-1".to_string(), FIXTURE.to_string())]);
        let orchestrator = orchestrator(dir.path(), bodies, 300);

        let first = orchestrator.run(&[target("good-1")]).await;
        let second = orchestrator.run(&[target("good-1")]).await;

        assert_eq!(first.new_snapshots, 1);
        assert_eq!(second.new_snapshots, 0);
        assert_eq!(second.deduplicated, 1);
    }
}
