//! Runs one full pipeline cycle against a canned feed snapshot with the mock
//! AI provider. Articles land on stdout instead of a real CMS, so the demo
//! needs no network access and no keys.

use std::sync::Arc;

use async_trait::async_trait;

use newsdesk_autopilot::ai::{DynProvider, MockProvider};
use newsdesk_autopilot::draft::Draft;
use newsdesk_autopilot::fetch::rss::RssFeed;
use newsdesk_autopilot::publish::{PublishError, Publisher};
use newsdesk_autopilot::repo::DynRepo;
use newsdesk_autopilot::sources::{Source, SourceCategory};
use newsdesk_autopilot::{MemoryRepository, Orchestrator, Settings, SourceRegistry};

struct ConsoleCms;

#[async_trait]
impl Publisher for ConsoleCms {
    async fn publish(&self, draft: &Draft) -> Result<String, PublishError> {
        let title = draft
            .title
            .get("en")
            .map(String::as_str)
            .unwrap_or(draft.raw_title.as_str());
        let lead = draft.lead.get("en").map(String::as_str).unwrap_or("");
        println!("\n=== {title} ===");
        println!("{lead}");
        println!("(sources: {})", draft.source_links.join(", "));
        Ok(format!("console-{}", draft.event_key))
    }

    fn channel(&self) -> &'static str {
        "console"
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_target(false).init();

    let mut settings = Settings::default();
    // Zero delay so the dispatch happens inside this single cycle.
    settings.publish.delay_minutes = 0;

    let registry = Arc::new(SourceRegistry::new(vec![Source {
        id: "wire".into(),
        name: "Regional Wire".into(),
        trust: 0.85,
        category: SourceCategory::Media,
        active: true,
        feed_url: String::new(),
        last_fetched: None,
    }]));
    let repo: DynRepo = Arc::new(MemoryRepository::new());
    let feed = Arc::new(RssFeed::from_fixture(include_str!(
        "../../tests/fixtures/wire_morning.xml"
    )));
    let provider: DynProvider = Arc::new(MockProvider);

    let orchestrator = Orchestrator::with_channels(
        settings,
        registry,
        repo,
        feed,
        Some(provider),
        Arc::new(ConsoleCms),
        None,
        None,
    );

    let summaries = orchestrator.run_cycle().await;

    println!();
    for s in &summaries {
        let note = s
            .note
            .as_deref()
            .map(|n| format!("  ({n})"))
            .unwrap_or_default();
        println!(
            "{:>14}  processed={} succeeded={} failed={}{}",
            s.phase, s.processed, s.succeeded, s.failed, note
        );
    }
    println!("cycle-demo done");
}
