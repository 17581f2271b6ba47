// src/dedup.rs
//! Event deduplication: collapse raw items describing the same story into one
//! logical event, then create at most one draft per event fingerprint.
//!
//! Fingerprint = short sha256 hex over the normalized title (lowercase,
//! punctuation stripped, first 8 tokens) plus a time-bucket index (6h windows
//! by default). Items with the same fingerprint fold into one event; titles
//! in the same bucket that are merely *near*-identical (normalized
//! Levenshtein >= the configured floor) fold as well. Near-identical titles
//! in *different* buckets stay separate events; the bucket width bounds how
//! far apart in time two reports can be and still merge.
//!
//! Draft creation checks the repository by fingerprint first, which makes it
//! idempotent across repeated cron runs pulling the same feed snapshot.

use chrono::{DateTime, Utc};
use metrics::counter;
use sha2::{Digest, Sha256};
use strsim::normalized_levenshtein;

use crate::draft::Draft;
use crate::fetch::RawItem;
use crate::repo::{DraftRepository, RepositoryError};
use crate::sources::SourceRegistry;

const FINGERPRINT_TOKENS: usize = 8;

/// Lowercase, strip punctuation, keep the first few tokens.
pub fn normalize_title(title: &str) -> String {
    let lowered = title.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    cleaned
        .split_whitespace()
        .take(FINGERPRINT_TOKENS)
        .collect::<Vec<_>>()
        .join(" ")
}

fn bucket_index(published: DateTime<Utc>, bucket_hours: i64) -> i64 {
    let width = bucket_hours.max(1) * 3600;
    published.timestamp().div_euclid(width)
}

/// Stable event fingerprint: `<8-byte sha256 hex>-<bucket index>`.
pub fn fingerprint(title: &str, published: DateTime<Utc>, bucket_hours: i64) -> String {
    let normalized = normalize_title(title);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(16);
    for b in digest.iter().take(8) {
        use std::fmt::Write as _;
        let _ = write!(&mut hex, "{:02x}", b);
    }
    format!("{hex}-{}", bucket_index(published, bucket_hours))
}

/// One logical news occurrence. The first raw item seen wins as the
/// representative; later items only corroborate.
#[derive(Debug, Clone)]
pub struct EventGroup {
    pub key: String,
    pub representative: RawItem,
    pub extra_links: Vec<String>,
    normalized_title: String,
    bucket: i64,
}

impl EventGroup {
    pub fn corroborations(&self) -> usize {
        self.extra_links.len()
    }
}

/// Group a fetch cycle's items into events, preserving fetch order.
pub fn group_events(
    items: Vec<RawItem>,
    now: DateTime<Utc>,
    bucket_hours: i64,
    similarity_threshold: f32,
) -> Vec<EventGroup> {
    let mut groups: Vec<EventGroup> = Vec::new();

    'items: for item in items {
        let published = item.published.unwrap_or(now);
        let key = fingerprint(&item.title, published, bucket_hours);
        let normalized = normalize_title(&item.title);
        let bucket = bucket_index(published, bucket_hours);

        // exact fingerprint match
        if let Some(g) = groups.iter_mut().find(|g| g.key == key) {
            if !item.link.is_empty() {
                g.extra_links.push(item.link);
            }
            continue;
        }

        // near-identical title in the same bucket
        for g in groups.iter_mut() {
            if g.bucket == bucket {
                let sim = normalized_levenshtein(&g.normalized_title, &normalized) as f32;
                if sim >= similarity_threshold {
                    if !item.link.is_empty() {
                        g.extra_links.push(item.link);
                    }
                    continue 'items;
                }
            }
        }

        groups.push(EventGroup {
            key,
            normalized_title: normalized,
            bucket,
            representative: item,
            extra_links: Vec::new(),
        });
    }

    groups
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DedupOutcome {
    pub created: usize,
    pub skipped: usize,
}

/// Create a draft for every event that does not already have one.
pub fn create_missing_drafts(
    groups: Vec<EventGroup>,
    registry: &SourceRegistry,
    repo: &dyn DraftRepository,
) -> Result<DedupOutcome, RepositoryError> {
    let mut outcome = DedupOutcome::default();

    for group in groups {
        if repo.find_by_event(&group.key)?.is_some() {
            outcome.skipped += 1;
            continue;
        }

        let source = match registry.get(&group.representative.source_id) {
            Some(s) => s,
            None => {
                tracing::warn!(
                    source = %group.representative.source_id,
                    "raw item references unknown source, dropping event"
                );
                outcome.skipped += 1;
                continue;
            }
        };

        let mut draft = Draft::new(
            group.key.clone(),
            group.representative.title.clone(),
            group.representative.excerpt.clone(),
            source.id.clone(),
            source.name.clone(),
            source.category,
            source.trust,
        );
        if !group.representative.link.is_empty() {
            draft = draft.with_link(group.representative.link.clone());
        }
        for link in &group.extra_links {
            draft = draft.with_link(link.clone());
        }

        match repo.insert(draft) {
            Ok(()) => {
                outcome.created += 1;
                counter!("pipeline_drafts_created_total").increment(1);
            }
            // lost a race with a parallel invocation; same outcome as skip
            Err(RepositoryError::DuplicateEvent(_)) => outcome.skipped += 1,
            Err(e) => return Err(e),
        }
    }

    counter!("pipeline_drafts_deduped_total").increment(outcome.skipped as u64);
    Ok(outcome)
}
