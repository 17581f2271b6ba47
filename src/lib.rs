// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod ai;
pub mod api;
pub mod dedup;
pub mod draft;
pub mod fetch;
pub mod gate;
pub mod metrics;
pub mod orchestrator;
pub mod processor;
pub mod publish;
pub mod repo;
pub mod settings;
pub mod sources;

// ---- Re-exports for stable public API ----
pub use crate::api::create_router;
pub use crate::draft::{Draft, DraftStatus};
pub use crate::orchestrator::{Orchestrator, PhaseSummary};
pub use crate::repo::{DynRepo, MemoryRepository};
pub use crate::settings::Settings;
pub use crate::sources::{Source, SourceCategory, SourceRegistry};
