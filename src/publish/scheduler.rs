//! Publish scheduler: the auto-publish delay window.
//!
//! AUTO_READY drafts are armed with a publish-at timestamp (now + delay).
//! Until that timestamp a human can cancel, reverting the draft to
//! AUTO_READY. Recording dispatch is the commit point: the repository sets
//! the dispatch marker atomically, cancels arriving after that are refused,
//! and a failed primary publish clears the marker so both the retry and the
//! cancel window reopen on the next cycle.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use tracing::{info, warn};
use uuid::Uuid;

use super::{PublishError, Publisher};
use crate::draft::{Draft, DraftStatus};
use crate::repo::{DynRepo, RepositoryError};
use crate::settings::PublishSettings;

#[derive(Debug, Default, Clone, Copy)]
pub struct DispatchStats {
    pub due: usize,
    pub published: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Draft went back to AUTO_READY; its timer is disarmed.
    Reverted,
    /// Dispatch already recorded or the draft is already published.
    TooLate,
    /// Draft exists but is not sitting in the window.
    NotScheduled,
}

pub struct PublishScheduler {
    cfg: PublishSettings,
    cms: Arc<dyn Publisher>,
    messenger: Option<Arc<dyn Publisher>>,
}

impl PublishScheduler {
    pub fn new(
        cfg: PublishSettings,
        cms: Arc<dyn Publisher>,
        messenger: Option<Arc<dyn Publisher>>,
    ) -> Self {
        Self {
            cfg,
            cms,
            messenger,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::minutes(self.cfg.delay_minutes)
    }

    /// Arm every AUTO_READY draft with `publish_at = now + delay`. A disabled
    /// auto-publish switch leaves them parked in AUTO_READY.
    pub fn arm_ready(&self, repo: &DynRepo, now: DateTime<Utc>) -> usize {
        if !self.cfg.auto_publish {
            return 0;
        }
        let ready = match repo.list_by_status(DraftStatus::AutoReady) {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "could not list auto-ready drafts");
                return 0;
            }
        };

        let mut armed = 0;
        for draft in ready {
            match self.arm_one(repo, draft, now) {
                Ok(at) => {
                    armed += 1;
                    info!(publish_at = %at, "draft scheduled for auto-publish");
                }
                Err(e) => warn!(error = %e, "could not arm draft"),
            }
        }
        if armed > 0 {
            counter!("pipeline_drafts_scheduled_total").increment(armed as u64);
        }
        armed
    }

    fn arm_one(
        &self,
        repo: &DynRepo,
        mut draft: Draft,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, RepositoryError> {
        let at = now + self.delay();
        let id = draft.id;
        // Timestamp first, transition second: an interrupted arm leaves the
        // draft AUTO_READY and it is simply re-armed next cycle.
        draft.publish_at = Some(at);
        draft.touch();
        repo.update(draft)?;
        repo.transition(id, DraftStatus::AutoReady, DraftStatus::Scheduled)?;
        Ok(at)
    }

    /// Approve-and-schedule path for reviewed drafts: PENDING_OK straight into
    /// the window, same delay as the automatic route.
    pub fn schedule_from_review(
        &self,
        repo: &DynRepo,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Draft, RepositoryError> {
        let mut draft = repo.get(id)?.ok_or(RepositoryError::NotFound(id))?;
        if draft.status != DraftStatus::PendingOk {
            return Err(RepositoryError::Conflict {
                id,
                expected: DraftStatus::PendingOk,
                actual: draft.status,
            });
        }
        draft.publish_at = Some(now + self.delay());
        draft.touch();
        repo.update(draft)?;
        repo.transition(id, DraftStatus::PendingOk, DraftStatus::Scheduled)
    }

    /// Dispatch every SCHEDULED draft whose window has elapsed. Primary (CMS)
    /// success publishes the draft; secondary failures become warnings on it.
    /// Primary failure clears the dispatch marker and leaves the draft
    /// SCHEDULED for the next cycle.
    pub async fn dispatch_due(&self, repo: &DynRepo, now: DateTime<Utc>) -> DispatchStats {
        let mut stats = DispatchStats::default();
        let scheduled = match repo.list_by_status(DraftStatus::Scheduled) {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "could not list scheduled drafts");
                return stats;
            }
        };

        for candidate in scheduled {
            let due = candidate.publish_at.map(|at| at <= now).unwrap_or(false);
            if !due {
                continue;
            }
            let id = candidate.id;
            let draft = match repo.begin_dispatch(id, now) {
                Ok(d) => d,
                Err(RepositoryError::Conflict { .. }) => continue, // cancelled or raced
                Err(e) => {
                    warn!(draft = %id, error = %e, "could not record dispatch");
                    continue;
                }
            };
            stats.due += 1;

            match self.dispatch_one(repo, draft).await {
                Ok(()) => stats.published += 1,
                Err(e) => {
                    stats.failed += 1;
                    warn!(draft = %id, error = %e, "primary publish failed, will retry");
                    counter!("pipeline_dispatch_failures_total").increment(1);
                    if let Err(e) = repo.clear_dispatch(id) {
                        warn!(draft = %id, error = %e, "could not clear dispatch marker");
                    }
                }
            }
        }
        stats
    }

    async fn dispatch_one(&self, repo: &DynRepo, mut draft: Draft) -> Result<(), PublishError> {
        let id = draft.id;
        let external_id = self.cms.publish(&draft).await?;
        draft.published_id = Some(external_id.clone());

        if let Some(messenger) = &self.messenger {
            match messenger.publish(&draft).await {
                Ok(message_id) => {
                    info!(draft = %id, message_id, "secondary channel delivered")
                }
                Err(e) => {
                    warn!(draft = %id, channel = messenger.channel(), error = %e, "secondary channel failed");
                    draft
                        .channel_warnings
                        .push(format!("{}: {e}", messenger.channel()));
                }
            }
        }

        draft.touch();
        if let Err(e) = repo.update(draft) {
            // The piece is out; keep the draft consistent on the next pass.
            warn!(draft = %id, error = %e, "could not persist publish outcome");
        }
        match repo.transition(id, DraftStatus::Scheduled, DraftStatus::Published) {
            Ok(_) => {
                info!(draft = %id, external_id, "draft published");
                counter!("pipeline_drafts_published_total").increment(1);
                Ok(())
            }
            Err(e) => {
                warn!(draft = %id, error = %e, "publish succeeded but status move failed");
                Ok(())
            }
        }
    }

    /// Human cancel. Allowed any time before dispatch is recorded.
    pub fn cancel(&self, repo: &DynRepo, id: Uuid) -> Result<CancelOutcome, RepositoryError> {
        match repo.revert_to_auto_ready(id) {
            Ok(_) => {
                info!(draft = %id, "scheduled publish cancelled");
                counter!("pipeline_publish_cancels_total").increment(1);
                Ok(CancelOutcome::Reverted)
            }
            Err(RepositoryError::Conflict { actual, .. })
                if actual == DraftStatus::Scheduled || actual == DraftStatus::Published =>
            {
                Ok(CancelOutcome::TooLate)
            }
            Err(RepositoryError::Conflict { .. }) => Ok(CancelOutcome::NotScheduled),
            Err(e) => Err(e),
        }
    }
}
