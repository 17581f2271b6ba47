//! Publishing channels and the auto-publish scheduler.
//!
//! Two channels exist: the CMS (primary, REST) and the messenger webhook
//! (secondary). A draft is PUBLISHED once the primary succeeds; secondary
//! failures are carried on the draft as warnings, never rolled back.

pub mod cms;
pub mod messenger;
pub mod scheduler;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::draft::Draft;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// Channel has no endpoint configured.
    #[error("channel not configured")]
    Disabled,

    #[error("channel request timed out")]
    Timeout,

    #[error("channel error: {0}")]
    Channel(String),
}

/// A publishing channel. `publish` returns the channel-side id of the
/// published piece, which doubles as the dedup handle on the remote end.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, draft: &Draft) -> Result<String, PublishError>;
    fn channel(&self) -> &'static str;
}

/// Cooldown for "drafts awaiting review" pings: a burst of PENDING_OK drafts
/// in one cycle produces at most one alert per window.
#[derive(Debug, Clone)]
pub struct ReviewAlerts {
    cooldown: Duration,
    last_alert_at: Option<DateTime<Utc>>,
}

impl ReviewAlerts {
    pub fn new(cooldown_secs: i64) -> Self {
        Self {
            cooldown: Duration::seconds(cooldown_secs),
            last_alert_at: None,
        }
    }

    pub fn should_alert(&self, now: DateTime<Utc>) -> bool {
        match self.last_alert_at {
            None => true,
            Some(last) => now - last >= self.cooldown,
        }
    }

    pub fn record_alert(&mut self, now: DateTime<Utc>) {
        self.last_alert_at = Some(now);
    }
}
