//! # Source Registry
//!
//! Feed definitions with per-source trust scores in `[0.0, 1.0]`, a category
//! used by the approval policy, and an active flag.
//!
//! - Loads from JSON config (`config/sources.json` or $NEWSDESK_SOURCES_PATH).
//! - Falls back to a built-in seed so the pipeline runs out of the box.
//! - `record_fetch` is the only mutation; everything else is a read.
//!
//! The trust score is copied onto each draft at creation time and feeds the
//! quality gate; later registry edits do not retroactively change drafts.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const ENV_SOURCES_PATH: &str = "NEWSDESK_SOURCES_PATH";
pub const DEFAULT_SOURCES_PATH: &str = "config/sources.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceCategory {
    Official,
    Media,
    Social,
    International,
    Regional,
    Emergency,
}

impl SourceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceCategory::Official => "official",
            SourceCategory::Media => "media",
            SourceCategory::Social => "social",
            SourceCategory::International => "international",
            SourceCategory::Regional => "regional",
            SourceCategory::Emergency => "emergency",
        }
    }
}

impl std::fmt::Display for SourceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub name: String,
    pub trust: f32,
    pub category: SourceCategory,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub feed_url: String,
    #[serde(default)]
    pub last_fetched: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct SourcesFile {
    sources: Vec<Source>,
}

/// Registry of feed definitions, keyed by source id.
#[derive(Debug)]
pub struct SourceRegistry {
    inner: RwLock<HashMap<String, Source>>,
}

impl SourceRegistry {
    pub fn new(sources: Vec<Source>) -> Self {
        let mut map = HashMap::with_capacity(sources.len());
        for mut s in sources {
            s.trust = s.trust.clamp(0.0, 1.0);
            map.insert(s.id.clone(), s);
        }
        Self {
            inner: RwLock::new(map),
        }
    }

    /// Load from a JSON file; falls back to the built-in seed on any error.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(path) {
            Ok(s) => match serde_json::from_str::<SourcesFile>(&s) {
                Ok(f) => Self::new(f.sources),
                Err(e) => {
                    tracing::warn!(error = %e, "sources file invalid, using seed");
                    Self::new(default_seed())
                }
            },
            Err(_) => Self::new(default_seed()),
        }
    }

    /// Env path → default path → seed.
    pub fn load_default() -> Self {
        if let Ok(p) = std::env::var(ENV_SOURCES_PATH) {
            return Self::load_from_file(p);
        }
        Self::load_from_file(DEFAULT_SOURCES_PATH)
    }

    pub fn list_active(&self) -> Vec<Source> {
        let g = self.inner.read().expect("sources rwlock poisoned");
        let mut v: Vec<Source> = g.values().filter(|s| s.active).cloned().collect();
        v.sort_by(|a, b| a.id.cmp(&b.id));
        v
    }

    pub fn get(&self, id: &str) -> Option<Source> {
        let g = self.inner.read().expect("sources rwlock poisoned");
        g.get(id).cloned()
    }

    /// Stamp a successful fetch. Unknown ids are ignored (returns false).
    pub fn record_fetch(&self, id: &str, at: DateTime<Utc>) -> bool {
        let mut g = self.inner.write().expect("sources rwlock poisoned");
        match g.get_mut(id) {
            Some(s) => {
                s.last_fetched = Some(at);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("sources rwlock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Built-in seed used when no config file is present.
pub(crate) fn default_seed() -> Vec<Source> {
    let rows: [(&str, &str, f32, SourceCategory); 7] = [
        ("gov-press", "Government Press Office", 0.95, SourceCategory::Official),
        ("civil-protection", "Civil Protection Agency", 0.95, SourceCategory::Emergency),
        ("reuters", "Reuters", 0.85, SourceCategory::Media),
        ("ap-news", "Associated Press", 0.85, SourceCategory::Media),
        ("eu-affairs", "EU Affairs Desk", 0.80, SourceCategory::International),
        ("city-council", "City Council Bulletin", 0.75, SourceCategory::Regional),
        ("x-trends", "X Trending Topics", 0.40, SourceCategory::Social),
    ];
    rows.into_iter()
        .map(|(id, name, trust, category)| Source {
            id: id.to_string(),
            name: name.to_string(),
            trust,
            category,
            active: true,
            feed_url: String::new(),
            last_fetched: None,
        })
        .collect()
}
