// src/settings.rs
//! Runtime settings for the pipeline: gate thresholds, publish delay,
//! language list, batch size, network timeouts, cleanup retention.
//!
//! Loaded from a TOML file with serde defaults on every field, so a missing
//! or partial file still yields a working configuration. Resolution order:
//! 1) $NEWSDESK_SETTINGS_PATH, 2) config/settings.toml, 3) built-in defaults.
//! The CMS token may additionally be injected via $NEWSDESK_CMS_TOKEN so it
//! never has to live in the file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

pub const ENV_SETTINGS_PATH: &str = "NEWSDESK_SETTINGS_PATH";
pub const ENV_CMS_TOKEN: &str = "NEWSDESK_CMS_TOKEN";
pub const DEFAULT_SETTINGS_PATH: &str = "config/settings.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub gate: GateSettings,
    #[serde(default)]
    pub publish: PublishSettings,
    #[serde(default)]
    pub processing: ProcessingSettings,
    #[serde(default)]
    pub ai: AiSettings,
    #[serde(default)]
    pub fetch: FetchSettings,
    #[serde(default)]
    pub cleanup: CleanupSettings,
    #[serde(default)]
    pub server: ServerSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GateSettings {
    #[serde(default = "default_fact_check_threshold")]
    pub fact_check_threshold: f32,
    #[serde(default = "default_source_trust_threshold")]
    pub source_trust_threshold: f32,
    /// Categories that always require human approval, regardless of scores.
    #[serde(default = "default_approval_categories")]
    pub approval_categories: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublishSettings {
    /// Global auto-publish switch. Off leaves gated drafts in AUTO_READY.
    #[serde(default = "default_true")]
    pub auto_publish: bool,
    /// Human-override window between gating and dispatch.
    #[serde(default = "default_delay_minutes")]
    pub delay_minutes: i64,
    /// Empty URL disables the channel.
    #[serde(default)]
    pub cms_url: String,
    #[serde(default)]
    pub cms_token: String,
    #[serde(default)]
    pub webhook_url: String,
    /// Cooldown between review alerts, to keep a burst to one ping.
    #[serde(default = "default_alert_cooldown")]
    pub alert_cooldown_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingSettings {
    /// Max drafts pulled per cycle; also the concurrency bound.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First entry is the primary synthesis language.
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiSettings {
    /// "openai" | "mock" | "disabled"
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_ai_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchSettings {
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    /// Width of the event time bucket; same story within one bucket is one event.
    #[serde(default = "default_bucket_hours")]
    pub dedup_bucket_hours: i64,
    /// Normalized-Levenshtein floor for collapsing near-identical titles.
    #[serde(default = "default_similarity")]
    pub similarity_threshold: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CleanupSettings {
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Seconds between background cycles; 0 disables the loop.
    #[serde(default = "default_cadence")]
    pub cadence_secs: u64,
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_fact_check_threshold() -> f32 {
    0.6
}
fn default_source_trust_threshold() -> f32 {
    0.7
}
fn default_approval_categories() -> Vec<String> {
    vec!["politics".to_string()]
}
fn default_true() -> bool {
    true
}
fn default_delay_minutes() -> i64 {
    10
}
fn default_alert_cooldown() -> i64 {
    900
}
fn default_batch_size() -> usize {
    5
}
fn default_max_attempts() -> u32 {
    3
}
fn default_languages() -> Vec<String> {
    vec!["en".to_string(), "de".to_string()]
}
fn default_provider() -> String {
    "disabled".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_max_tokens() -> u32 {
    900
}
fn default_temperature() -> f32 {
    0.3
}
fn default_ai_timeout() -> u64 {
    30
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_fetch_timeout() -> u64 {
    20
}
fn default_bucket_hours() -> i64 {
    6
}
fn default_similarity() -> f32 {
    0.9
}
fn default_retention_days() -> i64 {
    30
}
fn default_cadence() -> u64 {
    300
}
fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            fact_check_threshold: default_fact_check_threshold(),
            source_trust_threshold: default_source_trust_threshold(),
            approval_categories: default_approval_categories(),
        }
    }
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            auto_publish: true,
            delay_minutes: default_delay_minutes(),
            cms_url: String::new(),
            cms_token: String::new(),
            webhook_url: String::new(),
            alert_cooldown_secs: default_alert_cooldown(),
        }
    }
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            languages: default_languages(),
        }
    }
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_ai_timeout(),
            retry_attempts: default_retry_attempts(),
        }
    }
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            dedup_bucket_hours: default_bucket_hours(),
            similarity_threshold: default_similarity(),
        }
    }
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            cadence_secs: default_cadence(),
            bind: default_bind(),
        }
    }
}

impl Settings {
    /// Parse from an explicit TOML file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        let mut s: Settings =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        s.apply_env();
        Ok(s)
    }

    /// Env path → default path → built-in defaults.
    pub fn load_default() -> Self {
        if let Ok(p) = std::env::var(ENV_SETTINGS_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                match Self::load_from(&pb) {
                    Ok(s) => return s,
                    Err(e) => tracing::warn!(error = %e, "settings file invalid, using defaults"),
                }
            }
        }
        let default_p = PathBuf::from(DEFAULT_SETTINGS_PATH);
        if default_p.exists() {
            if let Ok(s) = Self::load_from(&default_p) {
                return s;
            }
        }
        let mut s = Settings::default();
        s.apply_env();
        s
    }

    fn apply_env(&mut self) {
        if let Ok(tok) = std::env::var(ENV_CMS_TOKEN) {
            if !tok.is_empty() {
                self.publish.cms_token = tok;
            }
        }
    }

    /// The primary synthesis language (first of the configured list).
    pub fn primary_language(&self) -> &str {
        self.processing
            .languages
            .first()
            .map(|s| s.as_str())
            .unwrap_or("en")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let s = Settings::default();
        assert!((s.gate.fact_check_threshold - 0.6).abs() < 1e-6);
        assert!((s.gate.source_trust_threshold - 0.7).abs() < 1e-6);
        assert_eq!(s.publish.delay_minutes, 10);
        assert!(s.publish.auto_publish);
        assert_eq!(s.processing.batch_size, 5);
        assert_eq!(s.processing.max_attempts, 3);
        assert_eq!(s.primary_language(), "en");
        assert_eq!(s.fetch.dedup_bucket_hours, 6);
        assert_eq!(s.cleanup.retention_days, 30);
    }

    #[test]
    fn partial_file_backfills_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            "[gate]\nfact_check_threshold = 0.8\n\n[publish]\ndelay_minutes = 3"
        )
        .unwrap();

        let s = Settings::load_from(f.path()).unwrap();
        assert!((s.gate.fact_check_threshold - 0.8).abs() < 1e-6);
        assert_eq!(s.publish.delay_minutes, 3);
        // untouched sections fall back to defaults
        assert!((s.gate.source_trust_threshold - 0.7).abs() < 1e-6);
        assert_eq!(s.processing.languages, vec!["en", "de"]);
    }

    #[serial_test::serial]
    #[test]
    fn cms_token_env_wins_over_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "[publish]\ncms_token = \"from-file\"").unwrap();

        std::env::set_var(ENV_CMS_TOKEN, "from-env");
        let s = Settings::load_from(f.path()).unwrap();
        std::env::remove_var(ENV_CMS_TOKEN);

        assert_eq!(s.publish.cms_token, "from-env");
    }

    #[test]
    fn unknown_provider_string_is_kept_verbatim() {
        // The AI factory decides what to do with it; parsing must not reject.
        let s: Settings = toml::from_str("[ai]\nprovider = \"anything\"").unwrap();
        assert_eq!(s.ai.provider, "anything");
    }
}
