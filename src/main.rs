//! Newsdesk Autopilot binary entrypoint.
//! Boots the Axum HTTP server and the background pipeline loop.
//!
//! See `README.md` for quickstart and `DESIGN.md` for architecture notes.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use newsdesk_autopilot::ai::build_provider;
use newsdesk_autopilot::fetch::rss::RssFeed;
use newsdesk_autopilot::fetch::FeedSource;
use newsdesk_autopilot::metrics::Metrics;
use newsdesk_autopilot::repo::DynRepo;
use newsdesk_autopilot::{create_router, MemoryRepository, Orchestrator, Settings, SourceRegistry};

/// Optional JSON file the draft store is restored from at boot and written
/// back to after every cycle. Unset means purely in-memory.
const ENV_SNAPSHOT_PATH: &str = "NEWSDESK_SNAPSHOT_PATH";

/// Compact logs for local runs, JSON lines when NEWSDESK_ENV is production.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("newsdesk_autopilot=info,warn"));

    let is_prod = matches!(
        std::env::var("NEWSDESK_ENV")
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str(),
        "prod" | "production"
    );

    if is_prod {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .init();
    }
}

fn load_repository() -> MemoryRepository {
    if let Ok(path) = std::env::var(ENV_SNAPSHOT_PATH) {
        if std::path::Path::new(&path).exists() {
            match MemoryRepository::load_from(&path) {
                Ok(repo) => {
                    info!(%path, "draft store restored from snapshot");
                    return repo;
                }
                Err(e) => warn!(%path, error = %e, "snapshot unreadable, starting empty"),
            }
        }
    }
    MemoryRepository::new()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let settings = Settings::load_default();
    let registry = Arc::new(SourceRegistry::load_default());
    let store = Arc::new(load_repository());
    let repo: DynRepo = store.clone();
    let feed: Arc<dyn FeedSource> = Arc::new(RssFeed::over_http(settings.fetch.timeout_secs)?);
    let provider = build_provider(&settings.ai);

    let metrics = Metrics::init(settings.server.cadence_secs);

    let cadence_secs = settings.server.cadence_secs;
    let bind = settings.server.bind.clone();
    let orchestrator = Arc::new(Orchestrator::new(settings, registry, repo, feed, provider));

    if cadence_secs > 0 {
        let cycle = orchestrator.clone();
        let snapshot_path = std::env::var(ENV_SNAPSHOT_PATH).ok();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(cadence_secs));
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick fires immediately, so a fresh boot runs a cycle
            // right away instead of waiting out a full cadence.
            loop {
                tick.tick().await;
                let summaries = cycle.run_cycle().await;
                for s in &summaries {
                    info!(
                        phase = s.phase,
                        skipped = s.skipped,
                        processed = s.processed,
                        succeeded = s.succeeded,
                        failed = s.failed,
                        duration_ms = s.duration_ms,
                        "cycle phase"
                    );
                }
                if let Some(path) = &snapshot_path {
                    if let Err(e) = store.snapshot_to(path) {
                        warn!(%path, error = %e, "snapshot write failed");
                    }
                }
            }
        });
    } else {
        info!("cadence disabled, pipeline runs only via /triggers");
    }

    let router = create_router(orchestrator).merge(metrics.router());

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(addr = %bind, "listening");
    axum::serve(listener, router).await?;
    Ok(())
}
