//! The Draft entity and its status state machine.
//!
//! A Draft is the persisted, mutable unit of content moving through the
//! pipeline: created by dedup, filled by the content processor, routed by the
//! quality gate, and finally dispatched (or rejected) by the publish
//! scheduler. Every status mutation must pass `DraftStatus::can_transition`;
//! the repository enforces this with a compare-and-swap.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sources::SourceCategory;

/// Lifecycle states. Terminal states are `Published` and `Rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DraftStatus {
    /// Created by dedup, content not yet synthesized.
    Draft,
    /// Content synthesis / scoring in flight (or awaiting retry).
    Processing,
    /// Gated: requires a human approval before it can publish.
    PendingOk,
    /// Gated: passed all thresholds, eligible for auto-publish.
    AutoReady,
    /// Auto-publish timer armed; cancellable until dispatch is recorded.
    Scheduled,
    Published,
    Rejected,
}

impl DraftStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DraftStatus::Published | DraftStatus::Rejected)
    }

    /// The full transition table. Anything not listed here is illegal,
    /// including self-transitions.
    pub fn can_transition(self, to: DraftStatus) -> bool {
        use DraftStatus::*;
        matches!(
            (self, to),
            (Draft, Processing)
                | (Processing, PendingOk)
                | (Processing, AutoReady)
                | (Processing, Rejected)
                | (PendingOk, AutoReady)
                | (PendingOk, Scheduled)
                | (PendingOk, Rejected)
                | (AutoReady, Scheduled)
                | (AutoReady, Rejected)
                | (Scheduled, Published)
                | (Scheduled, AutoReady)
                | (Scheduled, Rejected)
        )
    }
}

impl std::fmt::Display for DraftStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DraftStatus::Draft => "DRAFT",
            DraftStatus::Processing => "PROCESSING",
            DraftStatus::PendingOk => "PENDING_OK",
            DraftStatus::AutoReady => "AUTO_READY",
            DraftStatus::Scheduled => "SCHEDULED",
            DraftStatus::Published => "PUBLISHED",
            DraftStatus::Rejected => "REJECTED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("illegal transition {from} -> {to} for draft {id}")]
pub struct TransitionError {
    pub id: Uuid,
    pub from: DraftStatus,
    pub to: DraftStatus,
}

/// Per-language content filled in by the processor. The map keys are language
/// codes from settings (`languages`, first entry is the primary).
pub type LangMap = BTreeMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
    pub id: Uuid,
    /// Stable event fingerprint; at most one draft ever exists per key.
    pub event_key: String,
    pub status: DraftStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Raw input carried from the winning feed item.
    pub raw_title: String,
    pub raw_excerpt: String,
    /// Links of every raw item folded into this event (first one wins).
    pub source_links: Vec<String>,

    pub source_id: String,
    pub source_name: String,
    pub category: SourceCategory,
    /// Trust copied from the source at creation time, not live-linked.
    pub source_trust: f32,

    #[serde(default)]
    pub title: LangMap,
    #[serde(default)]
    pub lead: LangMap,
    #[serde(default)]
    pub body: LangMap,

    #[serde(default)]
    pub risk_flags: Vec<String>,
    pub fact_check: Option<f32>,
    pub seo_score: Option<f32>,
    pub image_url: Option<String>,

    /// Processing attempts so far; `max_attempts` exhausts into Rejected.
    #[serde(default)]
    pub attempts: u32,

    /// Armed auto-publish time; present only while Scheduled.
    pub publish_at: Option<DateTime<Utc>>,
    /// Set when dispatch is recorded; cancels arriving after this are no-ops.
    pub dispatch_started_at: Option<DateTime<Utc>>,
    /// External id returned by the primary (CMS) channel on publish.
    pub published_id: Option<String>,
    /// Non-fatal secondary-channel failures, kept for diagnostics.
    #[serde(default)]
    pub channel_warnings: Vec<String>,
    pub reject_reason: Option<String>,
}

impl Draft {
    pub fn new(
        event_key: impl Into<String>,
        raw_title: impl Into<String>,
        raw_excerpt: impl Into<String>,
        source_id: impl Into<String>,
        source_name: impl Into<String>,
        category: SourceCategory,
        source_trust: f32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            event_key: event_key.into(),
            status: DraftStatus::Draft,
            created_at: now,
            updated_at: now,
            raw_title: raw_title.into(),
            raw_excerpt: raw_excerpt.into(),
            source_links: Vec::new(),
            source_id: source_id.into(),
            source_name: source_name.into(),
            category,
            source_trust: source_trust.clamp(0.0, 1.0),
            title: LangMap::new(),
            lead: LangMap::new(),
            body: LangMap::new(),
            risk_flags: Vec::new(),
            fact_check: None,
            seo_score: None,
            image_url: None,
            attempts: 0,
            publish_at: None,
            dispatch_started_at: None,
            published_id: None,
            channel_warnings: Vec::new(),
            reject_reason: None,
        }
    }

    /// Corroborating URLs stay unique; the same link reported by two sources
    /// counts once.
    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        let link = link.into();
        if !self.source_links.contains(&link) {
            self.source_links.push(link);
        }
        self
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// True once every configured language has title, lead and body filled.
    pub fn content_complete(&self, languages: &[String]) -> bool {
        languages.iter().all(|lang| {
            self.title.contains_key(lang)
                && self.lead.contains_key(lang)
                && self.body.contains_key(lang)
        })
    }

    /// Age helper used by the cleanup phase.
    pub fn older_than(&self, cutoff: DateTime<Utc>) -> bool {
        self.updated_at < cutoff
    }
}
