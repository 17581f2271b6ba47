// src/repo.rs
//! Draft repository: the single source of truth for drafts.
//!
//! The trait exposes exactly the atomic primitives the concurrency model
//! needs. Status never changes through `update`; it moves only through
//! `transition` (compare-and-swap) and the dispatch guards, so two phases can
//! never double-transition the same draft even if invocations overlap.
//!
//! `MemoryRepository` is the in-process implementation. It can snapshot the
//! whole store to a JSON file (atomic tmp + rename) and load it back on boot.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::draft::{Draft, DraftStatus, TransitionError};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("draft {0} not found")]
    NotFound(Uuid),

    #[error("an event with key {0} already has a draft")]
    DuplicateEvent(String),

    #[error("draft {id} is {actual}, expected {expected}")]
    Conflict {
        id: Uuid,
        expected: DraftStatus,
        actual: DraftStatus,
    },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Shared handle used across phases and handlers.
pub type DynRepo = std::sync::Arc<dyn DraftRepository>;

pub trait DraftRepository: Send + Sync {
    fn insert(&self, draft: Draft) -> Result<(), RepositoryError>;
    fn get(&self, id: Uuid) -> Result<Option<Draft>, RepositoryError>;
    fn find_by_event(&self, event_key: &str) -> Result<Option<Draft>, RepositoryError>;
    /// Sorted by creation time (then id), so batches are deterministic.
    fn list_by_status(&self, status: DraftStatus) -> Result<Vec<Draft>, RepositoryError>;
    /// Replace non-status fields. The stored status always wins; use
    /// `transition` to move a draft between states.
    fn update(&self, draft: Draft) -> Result<(), RepositoryError>;
    /// Compare-and-swap on status. Fails with `Conflict` when the stored
    /// status no longer matches `from`, with `Transition` when the move is
    /// not in the state machine's table.
    fn transition(
        &self,
        id: Uuid,
        from: DraftStatus,
        to: DraftStatus,
    ) -> Result<Draft, RepositoryError>;
    /// Record that dispatch has begun for a due, scheduled draft. This is the
    /// commit point: once it succeeds, cancellation is a no-op.
    fn begin_dispatch(&self, id: Uuid, now: DateTime<Utc>) -> Result<Draft, RepositoryError>;
    /// Reopen the cancel window after a failed dispatch attempt.
    fn clear_dispatch(&self, id: Uuid) -> Result<(), RepositoryError>;
    /// Cancel path: Scheduled → AutoReady, only while no dispatch is recorded.
    fn revert_to_auto_ready(&self, id: Uuid) -> Result<Draft, RepositoryError>;
    /// Remove terminal drafts older than the cutoff. Returns how many went.
    fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, RepositoryError>;
    /// Drop fingerprint index entries whose draft no longer exists.
    fn prune_dangling_events(&self) -> Result<usize, RepositoryError>;
    fn count_by_status(&self) -> Result<HashMap<DraftStatus, usize>, RepositoryError>;
    /// Most recently updated first, capped at `limit`.
    fn list_recent(&self, limit: usize) -> Result<Vec<Draft>, RepositoryError>;
}

#[derive(Debug, Default)]
struct Store {
    drafts: HashMap<Uuid, Draft>,
    by_event: HashMap<String, Uuid>,
}

/// In-memory store guarded by a single mutex. All lock scopes are synchronous
/// so the guard is never held across an await.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    inner: Mutex<Store>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write the full store as pretty JSON, atomically (tmp file + rename).
    pub fn snapshot_to<P: AsRef<Path>>(&self, path: P) -> Result<(), RepositoryError> {
        let drafts: Vec<Draft> = {
            let g = self.inner.lock().expect("repo mutex poisoned");
            g.drafts.values().cloned().collect()
        };
        let json = serde_json::to_string_pretty(&drafts)
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;

        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| RepositoryError::Storage(e.to_string()))?;
        }
        let tmp = path.with_extension("json.tmp");
        let mut f = fs::File::create(&tmp).map_err(|e| RepositoryError::Storage(e.to_string()))?;
        f.write_all(json.as_bytes())
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        fs::rename(&tmp, path).map_err(|e| RepositoryError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Rebuild the store (and the event index) from a snapshot file.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let s = fs::read_to_string(path).map_err(|e| RepositoryError::Storage(e.to_string()))?;
        let drafts: Vec<Draft> =
            serde_json::from_str(&s).map_err(|e| RepositoryError::Storage(e.to_string()))?;
        let repo = Self::new();
        {
            let mut g = repo.inner.lock().expect("repo mutex poisoned");
            for d in drafts {
                g.by_event.insert(d.event_key.clone(), d.id);
                g.drafts.insert(d.id, d);
            }
        }
        Ok(repo)
    }

    #[cfg(test)]
    pub fn insert_raw(&self, draft: Draft) {
        let mut g = self.inner.lock().expect("repo mutex poisoned");
        g.by_event.insert(draft.event_key.clone(), draft.id);
        g.drafts.insert(draft.id, draft);
    }
}

impl DraftRepository for MemoryRepository {
    fn insert(&self, draft: Draft) -> Result<(), RepositoryError> {
        let mut g = self.inner.lock().expect("repo mutex poisoned");
        if g.by_event.contains_key(&draft.event_key) {
            return Err(RepositoryError::DuplicateEvent(draft.event_key));
        }
        g.by_event.insert(draft.event_key.clone(), draft.id);
        g.drafts.insert(draft.id, draft);
        Ok(())
    }

    fn get(&self, id: Uuid) -> Result<Option<Draft>, RepositoryError> {
        let g = self.inner.lock().expect("repo mutex poisoned");
        Ok(g.drafts.get(&id).cloned())
    }

    fn find_by_event(&self, event_key: &str) -> Result<Option<Draft>, RepositoryError> {
        let g = self.inner.lock().expect("repo mutex poisoned");
        Ok(g.by_event
            .get(event_key)
            .and_then(|id| g.drafts.get(id))
            .cloned())
    }

    fn list_by_status(&self, status: DraftStatus) -> Result<Vec<Draft>, RepositoryError> {
        let g = self.inner.lock().expect("repo mutex poisoned");
        let mut v: Vec<Draft> = g
            .drafts
            .values()
            .filter(|d| d.status == status)
            .cloned()
            .collect();
        v.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(v)
    }

    fn update(&self, mut draft: Draft) -> Result<(), RepositoryError> {
        let mut g = self.inner.lock().expect("repo mutex poisoned");
        match g.drafts.get(&draft.id) {
            Some(stored) => {
                // status moves only through transition/dispatch guards
                draft.status = stored.status;
                g.drafts.insert(draft.id, draft);
                Ok(())
            }
            None => Err(RepositoryError::NotFound(draft.id)),
        }
    }

    fn transition(
        &self,
        id: Uuid,
        from: DraftStatus,
        to: DraftStatus,
    ) -> Result<Draft, RepositoryError> {
        let mut g = self.inner.lock().expect("repo mutex poisoned");
        let d = g.drafts.get_mut(&id).ok_or(RepositoryError::NotFound(id))?;
        if d.status != from {
            return Err(RepositoryError::Conflict {
                id,
                expected: from,
                actual: d.status,
            });
        }
        if !from.can_transition(to) {
            return Err(TransitionError { id, from, to }.into());
        }
        // Once dispatch is recorded, the only exit from Scheduled is Published.
        if from == DraftStatus::Scheduled
            && d.dispatch_started_at.is_some()
            && to != DraftStatus::Published
        {
            return Err(RepositoryError::Conflict {
                id,
                expected: from,
                actual: d.status,
            });
        }
        d.status = to;
        d.touch();
        Ok(d.clone())
    }

    fn begin_dispatch(&self, id: Uuid, now: DateTime<Utc>) -> Result<Draft, RepositoryError> {
        let mut g = self.inner.lock().expect("repo mutex poisoned");
        let d = g.drafts.get_mut(&id).ok_or(RepositoryError::NotFound(id))?;
        let due = d.publish_at.map(|at| at <= now).unwrap_or(false);
        if d.status != DraftStatus::Scheduled || d.dispatch_started_at.is_some() || !due {
            return Err(RepositoryError::Conflict {
                id,
                expected: DraftStatus::Scheduled,
                actual: d.status,
            });
        }
        d.dispatch_started_at = Some(now);
        d.touch();
        Ok(d.clone())
    }

    fn clear_dispatch(&self, id: Uuid) -> Result<(), RepositoryError> {
        let mut g = self.inner.lock().expect("repo mutex poisoned");
        let d = g.drafts.get_mut(&id).ok_or(RepositoryError::NotFound(id))?;
        d.dispatch_started_at = None;
        d.touch();
        Ok(())
    }

    fn revert_to_auto_ready(&self, id: Uuid) -> Result<Draft, RepositoryError> {
        let mut g = self.inner.lock().expect("repo mutex poisoned");
        let d = g.drafts.get_mut(&id).ok_or(RepositoryError::NotFound(id))?;
        if d.status != DraftStatus::Scheduled || d.dispatch_started_at.is_some() {
            return Err(RepositoryError::Conflict {
                id,
                expected: DraftStatus::Scheduled,
                actual: d.status,
            });
        }
        d.status = DraftStatus::AutoReady;
        d.publish_at = None;
        d.touch();
        Ok(d.clone())
    }

    fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, RepositoryError> {
        let mut g = self.inner.lock().expect("repo mutex poisoned");
        let doomed: Vec<Uuid> = g
            .drafts
            .values()
            .filter(|d| d.status.is_terminal() && d.older_than(cutoff))
            .map(|d| d.id)
            .collect();
        for id in &doomed {
            if let Some(d) = g.drafts.remove(id) {
                g.by_event.remove(&d.event_key);
            }
        }
        Ok(doomed.len())
    }

    fn prune_dangling_events(&self) -> Result<usize, RepositoryError> {
        let mut g = self.inner.lock().expect("repo mutex poisoned");
        let before = g.by_event.len();
        let live: std::collections::HashSet<Uuid> = g.drafts.keys().copied().collect();
        g.by_event.retain(|_, id| live.contains(id));
        Ok(before - g.by_event.len())
    }

    fn count_by_status(&self) -> Result<HashMap<DraftStatus, usize>, RepositoryError> {
        let g = self.inner.lock().expect("repo mutex poisoned");
        let mut out = HashMap::new();
        for d in g.drafts.values() {
            *out.entry(d.status).or_insert(0) += 1;
        }
        Ok(out)
    }

    fn list_recent(&self, limit: usize) -> Result<Vec<Draft>, RepositoryError> {
        let g = self.inner.lock().expect("repo mutex poisoned");
        let mut v: Vec<Draft> = g.drafts.values().cloned().collect();
        v.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        v.truncate(limit);
        Ok(v)
    }
}
