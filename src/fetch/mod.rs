// src/fetch/mod.rs
//! Fetch phase: pull raw items from every active source through a
//! `FeedSource` adapter, normalize their text, and hand them to dedup in
//! fetch order. A failing source is logged and skipped; its `last_fetched`
//! stamp stays untouched so the next cycle retries it.

pub mod rss;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::sources::{Source, SourceRegistry};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("source unreachable: {0}")]
    Unreachable(String),
    #[error("malformed feed: {0}")]
    Malformed(String),
    #[error("feed request timed out")]
    Timeout,
}

/// The unprocessed unit pulled from a source. Transient: consumed by dedup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawItem {
    pub title: String,
    pub link: String,
    pub published: Option<DateTime<Utc>>,
    pub excerpt: String,
    pub source_id: String,
}

#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, source: &Source) -> Result<Vec<RawItem>, FetchError>;
    fn name(&self) -> &'static str;
}

/// Normalize text: entity decode, strip tags, collapse whitespace, cap length.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Normalize typographic quotes to ASCII
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out = out.trim().to_string();

    // 5) Length cap: 1500 chars
    if out.chars().count() > 1500 {
        out = out.chars().take(1500).collect();
    }

    out
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FetchStats {
    pub sources_ok: usize,
    pub sources_failed: usize,
    pub items: usize,
}

/// Walk every active source once. Items come back in source order (registry
/// order is stable) with item order preserved inside each feed.
pub async fn collect_items(
    feed: &dyn FeedSource,
    registry: &SourceRegistry,
) -> (Vec<RawItem>, FetchStats) {
    let mut out = Vec::new();
    let mut stats = FetchStats::default();

    for source in registry.list_active() {
        match feed.fetch(&source).await {
            Ok(mut items) => {
                for it in &mut items {
                    it.title = normalize_text(&it.title);
                    it.excerpt = normalize_text(&it.excerpt);
                }
                items.retain(|it| !it.title.is_empty());
                stats.items += items.len();
                stats.sources_ok += 1;
                counter!("pipeline_items_fetched_total").increment(items.len() as u64);
                registry.record_fetch(&source.id, Utc::now());
                out.append(&mut items);
            }
            Err(e) => {
                stats.sources_failed += 1;
                counter!("pipeline_fetch_failures_total").increment(1);
                tracing::warn!(source = %source.id, error = %e, "feed fetch failed");
            }
        }
    }

    (out, stats)
}
