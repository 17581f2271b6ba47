//! Pipeline orchestrator: drives the four phases (fetch-sources,
//! process-queue, auto-publish, cleanup) on a cron cadence or on demand.
//!
//! Each phase holds its own lock; an invocation that finds the lock busy
//! returns a skipped summary instead of queueing, so overlapping cron runs
//! never double-process. Phases are independent failure domains: everything
//! that can go wrong inside a phase ends up in its summary, never as an
//! error crossing the phase boundary.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{Duration, Utc};
use metrics::{counter, gauge};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::ai::DynProvider;
use crate::dedup::{create_missing_drafts, group_events};
use crate::draft::{Draft, DraftStatus};
use crate::fetch::{collect_items, FeedSource};
use crate::processor::ContentProcessor;
use crate::publish::cms::CmsPublisher;
use crate::publish::messenger::MessengerPublisher;
use crate::publish::scheduler::PublishScheduler;
use crate::publish::{Publisher, ReviewAlerts};
use crate::repo::{DynRepo, RepositoryError};
use crate::settings::Settings;
use crate::sources::SourceRegistry;

pub const PHASE_FETCH: &str = "fetch-sources";
pub const PHASE_PROCESS: &str = "process-queue";
pub const PHASE_PUBLISH: &str = "auto-publish";
pub const PHASE_CLEANUP: &str = "cleanup";

/// What a trigger returns: counts, duration, and whether the phase ran at
/// all. Never an error; failures are folded into `failed` and `note`.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseSummary {
    pub phase: &'static str,
    pub skipped: bool,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl PhaseSummary {
    fn skipped(phase: &'static str, note: &str) -> Self {
        counter!("pipeline_phase_skips_total", "phase" => phase).increment(1);
        Self {
            phase,
            skipped: true,
            processed: 0,
            succeeded: 0,
            failed: 0,
            duration_ms: 0,
            note: Some(note.to_string()),
        }
    }
}

/// Point-in-time pipeline snapshot for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub drafts: BTreeMap<String, usize>,
    pub sources: usize,
    pub ai_provider: String,
    pub auto_publish: bool,
    pub cadence_secs: u64,
    /// Summaries of the most recent full cycle; absent until one has run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle: Option<Vec<PhaseSummary>>,
}

struct PhaseLocks {
    fetch: tokio::sync::Mutex<()>,
    process: tokio::sync::Mutex<()>,
    publish: tokio::sync::Mutex<()>,
    cleanup: tokio::sync::Mutex<()>,
}

impl Default for PhaseLocks {
    fn default() -> Self {
        Self {
            fetch: tokio::sync::Mutex::new(()),
            process: tokio::sync::Mutex::new(()),
            publish: tokio::sync::Mutex::new(()),
            cleanup: tokio::sync::Mutex::new(()),
        }
    }
}

pub struct Orchestrator {
    settings: Settings,
    registry: Arc<SourceRegistry>,
    repo: DynRepo,
    feed: Arc<dyn FeedSource>,
    processor: Option<ContentProcessor>,
    provider_name: String,
    scheduler: PublishScheduler,
    /// Review pings go over the concrete messenger; absent when the webhook
    /// is unconfigured or channels were injected.
    pinger: Option<MessengerPublisher>,
    review_alerts: Mutex<ReviewAlerts>,
    last_cycle: Mutex<Option<Vec<PhaseSummary>>>,
    locks: PhaseLocks,
}

impl Orchestrator {
    /// Production wiring: channels built from settings.
    pub fn new(
        settings: Settings,
        registry: Arc<SourceRegistry>,
        repo: DynRepo,
        feed: Arc<dyn FeedSource>,
        provider: Option<DynProvider>,
    ) -> Self {
        let cms: Arc<dyn Publisher> = Arc::new(CmsPublisher::from_settings(&settings.publish));
        let messenger =
            MessengerPublisher::from_settings(&settings.publish, settings.primary_language());
        let channel: Option<Arc<dyn Publisher>> = if messenger.is_configured() {
            Some(Arc::new(messenger.clone()))
        } else {
            None
        };
        let pinger = messenger.is_configured().then_some(messenger);
        Self::with_channels(settings, registry, repo, feed, provider, cms, channel, pinger)
    }

    /// Test wiring: inject publishers directly.
    #[allow(clippy::too_many_arguments)]
    pub fn with_channels(
        settings: Settings,
        registry: Arc<SourceRegistry>,
        repo: DynRepo,
        feed: Arc<dyn FeedSource>,
        provider: Option<DynProvider>,
        cms: Arc<dyn Publisher>,
        messenger: Option<Arc<dyn Publisher>>,
        pinger: Option<MessengerPublisher>,
    ) -> Self {
        let provider_name = provider
            .as_ref()
            .map(|p| p.name().to_string())
            .unwrap_or_else(|| "disabled".to_string());
        let processor = provider.map(|p| ContentProcessor::new(p, &settings));
        let scheduler = PublishScheduler::new(settings.publish.clone(), cms, messenger);
        let review_alerts = Mutex::new(ReviewAlerts::new(settings.publish.alert_cooldown_secs));
        Self {
            settings,
            registry,
            repo,
            feed,
            processor,
            provider_name,
            scheduler,
            pinger,
            review_alerts,
            last_cycle: Mutex::new(None),
            locks: PhaseLocks::default(),
        }
    }

    pub fn repo(&self) -> &DynRepo {
        &self.repo
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &PublishScheduler {
        &self.scheduler
    }

    pub fn primary_language(&self) -> &str {
        self.settings.primary_language()
    }

    /// Phase 1: pull feeds, fold items into events, create missing drafts.
    pub async fn run_fetch(&self) -> PhaseSummary {
        let Ok(_guard) = self.locks.fetch.try_lock() else {
            return PhaseSummary::skipped(PHASE_FETCH, "already running");
        };
        let start = Instant::now();
        counter!("pipeline_phase_runs_total", "phase" => PHASE_FETCH).increment(1);

        let (items, stats) = collect_items(self.feed.as_ref(), &self.registry).await;
        let item_count = items.len();
        let groups = group_events(
            items,
            Utc::now(),
            self.settings.fetch.dedup_bucket_hours,
            self.settings.fetch.similarity_threshold,
        );
        let event_count = groups.len();

        match create_missing_drafts(groups, &self.registry, self.repo.as_ref()) {
            Ok(outcome) => {
                info!(
                    items = item_count,
                    events = event_count,
                    created = outcome.created,
                    duplicates = outcome.skipped,
                    failed_sources = stats.sources_failed,
                    "fetch phase done"
                );
                PhaseSummary {
                    phase: PHASE_FETCH,
                    skipped: false,
                    processed: item_count,
                    succeeded: outcome.created,
                    failed: stats.sources_failed,
                    duration_ms: start.elapsed().as_millis() as u64,
                    note: Some(format!(
                        "{event_count} events, {} duplicates skipped",
                        outcome.skipped
                    )),
                }
            }
            Err(e) => {
                warn!(error = %e, "fetch phase could not store drafts");
                PhaseSummary {
                    phase: PHASE_FETCH,
                    skipped: false,
                    processed: item_count,
                    succeeded: 0,
                    failed: stats.sources_failed + 1,
                    duration_ms: start.elapsed().as_millis() as u64,
                    note: Some(e.to_string()),
                }
            }
        }
    }

    /// Phase 2: run the AI stages over a batch and gate the results.
    pub async fn run_process(&self) -> PhaseSummary {
        let Ok(_guard) = self.locks.process.try_lock() else {
            return PhaseSummary::skipped(PHASE_PROCESS, "already running");
        };
        let Some(processor) = &self.processor else {
            return PhaseSummary::skipped(PHASE_PROCESS, "ai provider disabled");
        };
        let start = Instant::now();
        counter!("pipeline_phase_runs_total", "phase" => PHASE_PROCESS).increment(1);

        let stats = processor.process_batch(&self.repo).await;
        self.maybe_ping_review(stats.pending_review).await;

        PhaseSummary {
            phase: PHASE_PROCESS,
            skipped: false,
            processed: stats.pulled,
            succeeded: stats.completed,
            failed: stats.retrying + stats.rejected,
            duration_ms: start.elapsed().as_millis() as u64,
            note: Some(format!(
                "{} auto-ready, {} pending review, {} rejected",
                stats.auto_ready, stats.pending_review, stats.rejected
            )),
        }
    }

    /// Phase 3: arm AUTO_READY drafts and dispatch the due ones.
    pub async fn run_publish(&self) -> PhaseSummary {
        let Ok(_guard) = self.locks.publish.try_lock() else {
            return PhaseSummary::skipped(PHASE_PUBLISH, "already running");
        };
        let start = Instant::now();
        counter!("pipeline_phase_runs_total", "phase" => PHASE_PUBLISH).increment(1);

        let now = Utc::now();
        let armed = self.scheduler.arm_ready(&self.repo, now);
        let stats = self.scheduler.dispatch_due(&self.repo, now).await;

        PhaseSummary {
            phase: PHASE_PUBLISH,
            skipped: false,
            processed: armed + stats.due,
            succeeded: stats.published,
            failed: stats.failed,
            duration_ms: start.elapsed().as_millis() as u64,
            note: Some(format!("{armed} armed, {} due", stats.due)),
        }
    }

    /// Phase 4: drop old terminal drafts and orphaned fingerprints.
    pub async fn run_cleanup(&self) -> PhaseSummary {
        let Ok(_guard) = self.locks.cleanup.try_lock() else {
            return PhaseSummary::skipped(PHASE_CLEANUP, "already running");
        };
        let start = Instant::now();
        counter!("pipeline_phase_runs_total", "phase" => PHASE_CLEANUP).increment(1);

        let cutoff = Utc::now() - Duration::days(self.settings.cleanup.retention_days);
        let (deleted, pruned, error) = match self.repo.delete_older_than(cutoff) {
            Ok(deleted) => match self.repo.prune_dangling_events() {
                Ok(pruned) => (deleted, pruned, None),
                Err(e) => (deleted, 0, Some(e.to_string())),
            },
            Err(e) => (0, 0, Some(e.to_string())),
        };
        if let Some(ref e) = error {
            warn!(error = %e, "cleanup phase failed");
        }

        let failed = usize::from(error.is_some());
        PhaseSummary {
            phase: PHASE_CLEANUP,
            skipped: false,
            processed: deleted + pruned,
            succeeded: deleted + pruned,
            failed,
            duration_ms: start.elapsed().as_millis() as u64,
            note: Some(error.unwrap_or_else(|| {
                format!("{deleted} drafts deleted, {pruned} dangling events pruned")
            })),
        }
    }

    /// One full cycle, phases in pipeline order.
    pub async fn run_cycle(&self) -> Vec<PhaseSummary> {
        let summaries = vec![
            self.run_fetch().await,
            self.run_process().await,
            self.run_publish().await,
            self.run_cleanup().await,
        ];
        self.refresh_gauges();
        *self.last_cycle.lock().expect("last cycle mutex poisoned") = Some(summaries.clone());
        summaries
    }

    pub fn status(&self) -> Result<PipelineStatus, RepositoryError> {
        let counts = self.repo.count_by_status()?;
        let mut drafts = BTreeMap::new();
        for (status, n) in counts {
            drafts.insert(status.to_string(), n);
        }
        Ok(PipelineStatus {
            drafts,
            sources: self.registry.len(),
            ai_provider: self.provider_name.clone(),
            auto_publish: self.settings.publish.auto_publish,
            cadence_secs: self.settings.server.cadence_secs,
            last_cycle: self
                .last_cycle
                .lock()
                .expect("last cycle mutex poisoned")
                .clone(),
        })
    }

    /// Editorial approve. `schedule` arms the publish window immediately;
    /// otherwise the draft waits in AUTO_READY for the next publish phase.
    pub fn approve_draft(&self, id: Uuid, schedule: bool) -> Result<Draft, RepositoryError> {
        if schedule {
            self.scheduler.schedule_from_review(&self.repo, id, Utc::now())
        } else {
            self.repo
                .transition(id, DraftStatus::PendingOk, DraftStatus::AutoReady)
        }
    }

    /// Editorial reject, allowed from the review queue, the parked state and
    /// the window while no dispatch is recorded.
    pub fn reject_draft(&self, id: Uuid, reason: &str) -> Result<Draft, RepositoryError> {
        let stored = self.repo.get(id)?.ok_or(RepositoryError::NotFound(id))?;
        let from = stored.status;
        if !matches!(
            from,
            DraftStatus::PendingOk | DraftStatus::AutoReady | DraftStatus::Scheduled
        ) {
            return Err(RepositoryError::Conflict {
                id,
                expected: DraftStatus::PendingOk,
                actual: from,
            });
        }
        let mut d = self.repo.transition(id, from, DraftStatus::Rejected)?;
        d.reject_reason = Some(reason.to_string());
        d.publish_at = None;
        d.touch();
        self.repo.update(d.clone())?;
        counter!("pipeline_drafts_rejected_total", "reason" => "editorial").increment(1);
        Ok(d)
    }

    async fn maybe_ping_review(&self, newly_pending: usize) {
        if newly_pending == 0 {
            return;
        }
        let Some(pinger) = &self.pinger else {
            return;
        };
        let now = Utc::now();
        {
            let mut alerts = self.review_alerts.lock().expect("review alerts mutex poisoned");
            if !alerts.should_alert(now) {
                return;
            }
            alerts.record_alert(now);
        }
        let waiting = self
            .repo
            .count_by_status()
            .map(|m| m.get(&DraftStatus::PendingOk).copied().unwrap_or(0))
            .unwrap_or(newly_pending);
        if let Err(e) = pinger.notify_review_queue(waiting).await {
            warn!(error = %e, "review queue ping failed");
        }
    }

    fn refresh_gauges(&self) {
        let Ok(counts) = self.repo.count_by_status() else {
            return;
        };
        for status in [
            DraftStatus::Draft,
            DraftStatus::Processing,
            DraftStatus::PendingOk,
            DraftStatus::AutoReady,
            DraftStatus::Scheduled,
            DraftStatus::Published,
            DraftStatus::Rejected,
        ] {
            let n = counts.get(&status).copied().unwrap_or(0);
            gauge!("pipeline_drafts", "status" => status.to_string()).set(n as f64);
        }
    }
}
