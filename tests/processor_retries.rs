// tests/processor_retries.rs
//
// Attempt accounting across batch runs: a draft that keeps failing burns its
// budget and lands in REJECTED with the exhaustion reason; partial progress
// from a failed run is kept and resumed; one bad draft never poisons the
// rest of the batch.

use std::sync::Arc;

use async_trait::async_trait;

use newsdesk_autopilot::ai::{
    DynProvider, GenerationRequest, MockProvider, Provider, ProviderError,
};
use newsdesk_autopilot::draft::{Draft, DraftStatus};
use newsdesk_autopilot::processor::{ContentProcessor, REASON_EXHAUSTED};
use newsdesk_autopilot::repo::{DraftRepository, DynRepo, MemoryRepository};
use newsdesk_autopilot::settings::Settings;
use newsdesk_autopilot::sources::SourceCategory;

fn settings() -> Settings {
    let mut s = Settings::default();
    s.processing.languages = vec!["en".to_string()];
    s.processing.max_attempts = 3;
    s
}

fn queued_draft(key: &str, title: &str) -> Draft {
    Draft::new(
        key,
        title,
        "Excerpt for the processor.",
        "wire",
        "Regional Wire",
        SourceCategory::Media,
        0.85,
    )
}

/// Provider that always times out.
struct DeadProvider;

#[async_trait]
impl Provider for DeadProvider {
    async fn generate(&self, _req: &GenerationRequest) -> Result<String, ProviderError> {
        Err(ProviderError::Timeout)
    }
    fn name(&self) -> &'static str {
        "dead"
    }
}

/// Synthesis works, scoring never does: runs end with content persisted but
/// no fact-check, which is exactly the resume point for the next batch.
struct ScorelessProvider;

#[async_trait]
impl Provider for ScorelessProvider {
    async fn generate(&self, req: &GenerationRequest) -> Result<String, ProviderError> {
        let sys = req.system.to_lowercase();
        if sys.contains("fact") || sys.contains("seo") {
            return Err(ProviderError::RateLimited);
        }
        MockProvider.generate(req).await
    }
    fn name(&self) -> &'static str {
        "scoreless"
    }
}

/// Fails only for drafts whose material mentions the sentinel word.
struct SelectiveProvider;

#[async_trait]
impl Provider for SelectiveProvider {
    async fn generate(&self, req: &GenerationRequest) -> Result<String, ProviderError> {
        if req.prompt.contains("poison") {
            return Err(ProviderError::Timeout);
        }
        MockProvider.generate(req).await
    }
    fn name(&self) -> &'static str {
        "selective"
    }
}

#[tokio::test]
async fn three_failed_batches_reject_with_exhausted_reason() {
    let repo: DynRepo = Arc::new(MemoryRepository::new());
    let d = queued_draft("evt-dead", "Story that never processes");
    let id = d.id;
    repo.insert(d).expect("insert");

    let processor = ContentProcessor::new(Arc::new(DeadProvider) as DynProvider, &settings());

    for expected_attempts in 1..=2u32 {
        let stats = processor.process_batch(&repo).await;
        assert_eq!(stats.retrying, 1);
        let d = repo.get(id).expect("get").expect("draft");
        assert_eq!(d.status, DraftStatus::Processing);
        assert_eq!(d.attempts, expected_attempts);
    }

    let stats = processor.process_batch(&repo).await;
    assert_eq!(stats.rejected, 1);
    let d = repo.get(id).expect("get").expect("draft");
    assert_eq!(d.status, DraftStatus::Rejected);
    assert_eq!(d.attempts, 3);
    assert_eq!(d.reject_reason.as_deref(), Some(REASON_EXHAUSTED));

    // Rejected drafts drop out of the queue.
    let stats = processor.process_batch(&repo).await;
    assert_eq!(stats.pulled, 0);
}

#[tokio::test]
async fn partial_progress_is_kept_and_resumed() {
    let repo: DynRepo = Arc::new(MemoryRepository::new());
    let d = queued_draft("evt-resume", "Story interrupted mid-processing");
    let id = d.id;
    repo.insert(d).expect("insert");

    let cfg = settings();
    let first = ContentProcessor::new(Arc::new(ScorelessProvider) as DynProvider, &cfg);
    let stats = first.process_batch(&repo).await;
    assert_eq!(stats.retrying, 1);

    let mid = repo.get(id).expect("get").expect("draft");
    assert_eq!(mid.status, DraftStatus::Processing);
    assert_eq!(mid.attempts, 1);
    let synthesized_title = mid.title.get("en").cloned().expect("content persisted");
    assert!(mid.fact_check.is_none(), "scoring never ran");

    // Provider recovers; the next batch resumes at the scoring stages.
    let second = ContentProcessor::new(Arc::new(MockProvider) as DynProvider, &cfg);
    let stats = second.process_batch(&repo).await;
    assert_eq!(stats.completed, 1);

    let done = repo.get(id).expect("get").expect("draft");
    assert_eq!(done.status, DraftStatus::AutoReady);
    assert_eq!(done.attempts, 1, "successful run books no attempt");
    assert_eq!(
        done.title.get("en"),
        Some(&synthesized_title),
        "synthesis was not redone"
    );
    assert_eq!(done.fact_check, Some(0.82));
}

#[tokio::test]
async fn one_bad_draft_does_not_poison_the_batch() {
    let repo: DynRepo = Arc::new(MemoryRepository::new());
    let good = queued_draft("evt-good", "Clean story");
    let bad = queued_draft("evt-bad", "poison pill story");
    let (good_id, bad_id) = (good.id, bad.id);
    repo.insert(good).expect("insert good");
    repo.insert(bad).expect("insert bad");

    let processor = ContentProcessor::new(Arc::new(SelectiveProvider) as DynProvider, &settings());
    let stats = processor.process_batch(&repo).await;

    assert_eq!(stats.pulled, 2);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.retrying, 1);
    assert_eq!(
        repo.get(good_id).expect("get").expect("draft").status,
        DraftStatus::AutoReady
    );
    let bad = repo.get(bad_id).expect("get").expect("draft");
    assert_eq!(bad.status, DraftStatus::Processing);
    assert_eq!(bad.attempts, 1);
}
