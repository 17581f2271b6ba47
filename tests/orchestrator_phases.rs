// tests/orchestrator_phases.rs
//
// The four-phase cycle wired end to end: fixture RSS in, mock AI in the
// middle, a stub CMS at the far end.
//
// Covered:
// - one cycle carries the morning wire to PUBLISHED (zero publish delay)
// - a second cycle is a no-op for content the pipeline has already seen
// - two cycles racing each other never double-create or double-publish
// - cleanup drops stale terminal drafts and nothing else

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use newsdesk_autopilot::ai::{DynProvider, MockProvider};
use newsdesk_autopilot::draft::{Draft, DraftStatus};
use newsdesk_autopilot::fetch::rss::RssFeed;
use newsdesk_autopilot::orchestrator::{
    PHASE_CLEANUP, PHASE_FETCH, PHASE_PROCESS, PHASE_PUBLISH,
};
use newsdesk_autopilot::publish::{PublishError, Publisher};
use newsdesk_autopilot::repo::{DraftRepository, DynRepo, MemoryRepository};
use newsdesk_autopilot::sources::{Source, SourceCategory, SourceRegistry};
use newsdesk_autopilot::{Orchestrator, Settings};

const MORNING: &str = include_str!("fixtures/wire_morning.xml");

struct OkCms;

#[async_trait]
impl Publisher for OkCms {
    async fn publish(&self, draft: &Draft) -> Result<String, PublishError> {
        Ok(format!("cms-{}", draft.event_key))
    }
    fn channel(&self) -> &'static str {
        "cms"
    }
}

fn wire_orchestrator(repo: DynRepo, xml: &str) -> Orchestrator {
    let mut settings = Settings::default();
    settings.publish.delay_minutes = 0;
    settings.processing.languages = vec!["en".to_string()];

    let registry = Arc::new(SourceRegistry::new(vec![Source {
        id: "wire".into(),
        name: "Regional Wire".into(),
        trust: 0.85,
        category: SourceCategory::Media,
        active: true,
        feed_url: String::new(),
        last_fetched: None,
    }]));
    let feed = Arc::new(RssFeed::from_fixture(xml));
    let provider: DynProvider = Arc::new(MockProvider);

    Orchestrator::with_channels(
        settings,
        registry,
        repo,
        feed,
        Some(provider),
        Arc::new(OkCms),
        None,
        None,
    )
}

#[tokio::test]
async fn one_cycle_carries_the_morning_wire_to_published() {
    let repo: DynRepo = Arc::new(MemoryRepository::new());
    let orchestrator = wire_orchestrator(repo.clone(), MORNING);

    let summaries = orchestrator.run_cycle().await;

    let phases: Vec<&str> = summaries.iter().map(|s| s.phase).collect();
    assert_eq!(
        phases,
        vec![PHASE_FETCH, PHASE_PROCESS, PHASE_PUBLISH, PHASE_CLEANUP]
    );
    assert!(summaries.iter().all(|s| !s.skipped));

    // 5 fixture items fold into 4 events.
    assert_eq!(summaries[0].processed, 5);
    assert_eq!(summaries[0].succeeded, 4);
    assert_eq!(summaries[1].succeeded, 4, "all drafts gated");
    assert_eq!(summaries[2].succeeded, 4, "zero delay publishes in-cycle");

    let published = repo
        .list_by_status(DraftStatus::Published)
        .expect("list published");
    assert_eq!(published.len(), 4);
    for d in &published {
        assert!(d.published_id.is_some());
        assert!(d.title.contains_key("en"));
        assert_eq!(d.fact_check, Some(0.82));
    }
}

#[tokio::test]
async fn a_second_cycle_is_idempotent() {
    let repo: DynRepo = Arc::new(MemoryRepository::new());
    let orchestrator = wire_orchestrator(repo.clone(), MORNING);

    orchestrator.run_cycle().await;
    let second = orchestrator.run_cycle().await;

    assert_eq!(second[0].succeeded, 0, "no new drafts on a re-poll");
    assert_eq!(second[1].processed, 0, "nothing queued for processing");
    assert_eq!(second[2].succeeded, 0, "nothing left to publish");

    let status = orchestrator.status().expect("status");
    assert_eq!(status.drafts.get("PUBLISHED"), Some(&4));
    assert_eq!(status.drafts.len(), 1, "every draft is published");
}

#[tokio::test]
async fn racing_cycles_never_double_publish() {
    let repo: DynRepo = Arc::new(MemoryRepository::new());
    let orchestrator = Arc::new(wire_orchestrator(repo.clone(), MORNING));

    let a = orchestrator.clone();
    let b = orchestrator.clone();
    let (ra, rb) = tokio::join!(a.run_cycle(), b.run_cycle());

    // Whichever interleaving happened, the result is one draft per event,
    // each published exactly once.
    let total: usize = orchestrator
        .status()
        .expect("status")
        .drafts
        .values()
        .sum();
    assert_eq!(total, 4);
    assert_eq!(
        repo.list_by_status(DraftStatus::Published)
            .expect("list")
            .len(),
        4
    );

    let published_counts = ra[2].succeeded + rb[2].succeeded;
    assert_eq!(published_counts, 4, "each draft dispatched exactly once");
}

#[tokio::test]
async fn cleanup_drops_only_stale_terminal_drafts() {
    let repo: DynRepo = Arc::new(MemoryRepository::new());
    let orchestrator = wire_orchestrator(repo.clone(), "<rss><channel></channel></rss>");

    let mut stale = Draft::new(
        "evt-old",
        "Old story",
        "Excerpt.",
        "wire",
        "Regional Wire",
        SourceCategory::Media,
        0.85,
    );
    stale.status = DraftStatus::Published;
    stale.updated_at = Utc::now() - Duration::days(40);
    let stale_id = stale.id;

    let mut waiting = Draft::new(
        "evt-waiting",
        "Story still in review",
        "Excerpt.",
        "wire",
        "Regional Wire",
        SourceCategory::Media,
        0.85,
    );
    waiting.status = DraftStatus::PendingOk;
    waiting.updated_at = Utc::now() - Duration::days(40);
    let waiting_id = waiting.id;

    let mut fresh = Draft::new(
        "evt-fresh",
        "Recently rejected story",
        "Excerpt.",
        "wire",
        "Regional Wire",
        SourceCategory::Media,
        0.85,
    );
    fresh.status = DraftStatus::Rejected;
    let fresh_id = fresh.id;

    repo.insert(stale).expect("insert stale");
    repo.insert(waiting).expect("insert waiting");
    repo.insert(fresh).expect("insert fresh");

    let summary = orchestrator.run_cleanup().await;
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.processed, 1, "only the stale published draft goes");

    assert!(repo.get(stale_id).expect("get").is_none());
    assert!(repo.get(waiting_id).expect("get").is_some(), "review queue is kept");
    assert!(repo.get(fresh_id).expect("get").is_some(), "inside retention window");
}
