//! Content processor: pulls a batch of unprocessed drafts and runs the four
//! AI stages over each one, in order: primary-language synthesis, translation
//! fan-out, fact-check scoring, SEO scoring.
//!
//! Progress is persisted after every stage, so a draft that already has
//! content and a fact-check score only pays for the stages it is missing on
//! the next attempt. One draft's failure never aborts the batch: the draft
//! keeps its PROCESSING status (retried next cycle) until the attempt budget
//! is spent, at which point it is rejected with reason
//! "processing-exhausted".

use metrics::counter;
use serde::Deserialize;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::ai::{DynProvider, GenerationRequest, ProviderError};
use crate::draft::{Draft, DraftStatus};
use crate::gate::{self, GateOutcome};
use crate::repo::{DynRepo, RepositoryError};
use crate::settings::{AiSettings, GateSettings, ProcessingSettings, Settings};

pub const REASON_EXHAUSTED: &str = "processing-exhausted";

#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("draft {0} vanished mid-processing")]
    Vanished(Uuid),

    #[error("no languages configured")]
    NoLanguages,
}

/// Per-batch accounting, folded into the phase summary.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessStats {
    pub pulled: usize,
    pub completed: usize,
    pub auto_ready: usize,
    pub pending_review: usize,
    pub rejected: usize,
    pub retrying: usize,
}

pub struct ContentProcessor {
    provider: DynProvider,
    processing: ProcessingSettings,
    gate: GateSettings,
    ai: AiSettings,
}

impl ContentProcessor {
    pub fn new(provider: DynProvider, settings: &Settings) -> Self {
        Self {
            provider,
            processing: settings.processing.clone(),
            gate: settings.gate.clone(),
            ai: settings.ai.clone(),
        }
    }

    /// Pull up to `batch_size` drafts (new first by creation time, stuck
    /// PROCESSING ones included) and run them concurrently. The batch size is
    /// also the concurrency bound, which keeps provider pressure predictable.
    pub async fn process_batch(&self, repo: &DynRepo) -> ProcessStats {
        let mut stats = ProcessStats::default();

        let batch = match self.pull_batch(repo) {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, "could not pull processing batch");
                return stats;
            }
        };
        stats.pulled = batch.len();
        if batch.is_empty() {
            return stats;
        }

        let mut tasks = JoinSet::new();
        for id in batch {
            let repo = repo.clone();
            let provider = self.provider.clone();
            let processing = self.processing.clone();
            let gate_cfg = self.gate.clone();
            let ai = self.ai.clone();
            tasks.spawn(async move {
                let result =
                    process_one(&repo, &provider, &processing, &gate_cfg, &ai, id).await;
                match result {
                    Ok(outcome) => TaskOutcome::Completed(outcome),
                    Err(e) => {
                        warn!(draft = %id, error = %e, "draft processing failed");
                        counter!("pipeline_process_failures_total").increment(1);
                        handle_failure(&repo, id, processing.max_attempts)
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(TaskOutcome::Completed(GateOutcome::AutoApprove)) => {
                    stats.completed += 1;
                    stats.auto_ready += 1;
                }
                Ok(TaskOutcome::Completed(GateOutcome::RequireReview)) => {
                    stats.completed += 1;
                    stats.pending_review += 1;
                }
                Ok(TaskOutcome::Rejected) => stats.rejected += 1,
                Ok(TaskOutcome::Retrying) => stats.retrying += 1,
                Err(e) => warn!(error = %e, "processing task panicked"),
            }
        }

        counter!("pipeline_drafts_processed_total").increment(stats.completed as u64);
        stats
    }

    fn pull_batch(&self, repo: &DynRepo) -> Result<Vec<Uuid>, RepositoryError> {
        let mut candidates = repo.list_by_status(DraftStatus::Draft)?;
        candidates.extend(repo.list_by_status(DraftStatus::Processing)?);
        candidates.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(candidates
            .into_iter()
            .take(self.processing.batch_size)
            .map(|d| d.id)
            .collect())
    }
}

enum TaskOutcome {
    Completed(GateOutcome),
    Retrying,
    Rejected,
}

async fn process_one(
    repo: &DynRepo,
    provider: &DynProvider,
    processing: &ProcessingSettings,
    gate_cfg: &GateSettings,
    ai: &AiSettings,
    id: Uuid,
) -> Result<GateOutcome, ProcessingError> {
    let stored = repo.get(id)?.ok_or(ProcessingError::Vanished(id))?;
    let mut draft = match stored.status {
        DraftStatus::Draft => repo.transition(id, DraftStatus::Draft, DraftStatus::Processing)?,
        DraftStatus::Processing => stored,
        // Raced by another phase between pull and start; nothing to do.
        other => {
            info!(draft = %id, status = %other, "skipping draft no longer queued");
            return Err(ProcessingError::Repository(RepositoryError::Conflict {
                id,
                expected: DraftStatus::Processing,
                actual: other,
            }));
        }
    };

    let primary = processing
        .languages
        .first()
        .ok_or(ProcessingError::NoLanguages)?
        .clone();

    // Stage 1: synthesis in the primary language.
    if !has_content(&draft, &primary) {
        let piece = generate_piece(provider, synthesis_request(&draft, &primary, ai)).await?;
        apply_piece(&mut draft, &primary, piece, true);
        draft.touch();
        repo.update(draft.clone())?;
    }

    // Stage 2: translation fan-out to the remaining languages.
    for lang in processing.languages.iter().skip(1) {
        if has_content(&draft, lang) {
            continue;
        }
        let piece =
            generate_piece(provider, translation_request(&draft, &primary, lang, ai)).await?;
        apply_piece(&mut draft, lang, piece, false);
        draft.touch();
        repo.update(draft.clone())?;
    }

    // Stage 3: fact-check score.
    if draft.fact_check.is_none() {
        let score = generate_score(provider, fact_check_request(&draft, &primary)).await?;
        draft.fact_check = Some(score);
        draft.touch();
        repo.update(draft.clone())?;
    }

    // Stage 4: SEO / engagement score.
    if draft.seo_score.is_none() {
        let score = generate_score(provider, seo_request(&draft, &primary)).await?;
        draft.seo_score = Some(score);
        draft.touch();
        repo.update(draft.clone())?;
    }

    let decision = gate::evaluate(&draft, gate_cfg);
    let to = match decision.outcome {
        GateOutcome::AutoApprove => DraftStatus::AutoReady,
        GateOutcome::RequireReview => DraftStatus::PendingOk,
    };
    repo.transition(id, DraftStatus::Processing, to)?;
    info!(
        draft = %id,
        outcome = ?decision.outcome,
        reason = %decision.reason,
        "draft processed and gated"
    );
    counter!("pipeline_gate_decisions_total", "outcome" => match decision.outcome {
        GateOutcome::AutoApprove => "auto_approve",
        GateOutcome::RequireReview => "require_review",
    })
    .increment(1);
    Ok(decision.outcome)
}

/// Book a failed attempt; reject once the budget is spent. Runs on the task
/// that failed, so a repository error here can only be logged.
fn handle_failure(repo: &DynRepo, id: Uuid, max_attempts: u32) -> TaskOutcome {
    let stored = match repo.get(id) {
        Ok(Some(d)) => d,
        Ok(None) => return TaskOutcome::Retrying,
        Err(e) => {
            warn!(draft = %id, error = %e, "could not load draft after failure");
            return TaskOutcome::Retrying;
        }
    };
    if stored.status != DraftStatus::Processing {
        return TaskOutcome::Retrying;
    }

    let mut draft = stored;
    draft.attempts += 1;
    let exhausted = draft.attempts >= max_attempts;
    if exhausted {
        draft.reject_reason = Some(REASON_EXHAUSTED.to_string());
    }
    draft.touch();
    if let Err(e) = repo.update(draft.clone()) {
        warn!(draft = %id, error = %e, "could not persist attempt count");
        return TaskOutcome::Retrying;
    }

    if exhausted {
        match repo.transition(id, DraftStatus::Processing, DraftStatus::Rejected) {
            Ok(_) => {
                warn!(draft = %id, attempts = draft.attempts, "attempt budget spent, rejecting");
                counter!("pipeline_drafts_rejected_total", "reason" => "processing_exhausted")
                    .increment(1);
                TaskOutcome::Rejected
            }
            Err(e) => {
                warn!(draft = %id, error = %e, "could not reject exhausted draft");
                TaskOutcome::Retrying
            }
        }
    } else {
        TaskOutcome::Retrying
    }
}

// ------------------------------------------------------------
// Stage prompts
// ------------------------------------------------------------

/// Content shape every synthesis/translation response must parse into.
/// `flags` lets the model surface sensitive topics; they are folded into the
/// draft's risk flags and later checked by the gate's approval set.
#[derive(Debug, Deserialize)]
struct ContentPiece {
    title: String,
    lead: String,
    body: String,
    #[serde(default)]
    flags: Vec<String>,
}

fn synthesis_request(draft: &Draft, lang: &str, ai: &AiSettings) -> GenerationRequest {
    GenerationRequest {
        system: format!(
            "You are a newsroom writer. Write a concise news piece in '{lang}' from the raw \
             material. Respond with JSON only: {{\"title\": string, \"lead\": string, \
             \"body\": string, \"flags\": [string]}}. Flags name sensitive topics such as \
             politics or violence; use an empty list when none apply."
        ),
        prompt: format!(
            "Source: {}\nHeadline: {}\nExcerpt: {}",
            draft.source_name, draft.raw_title, draft.raw_excerpt
        ),
        max_tokens: ai.max_tokens,
        temperature: ai.temperature,
    }
}

fn translation_request(
    draft: &Draft,
    primary: &str,
    target: &str,
    ai: &AiSettings,
) -> GenerationRequest {
    GenerationRequest {
        system: format!(
            "You are the newsroom translator. Translate the news content from '{primary}' \
             into '{target}'. Respond with JSON only: {{\"title\": string, \"lead\": string, \
             \"body\": string}}."
        ),
        prompt: format!(
            "Title: {}\nLead: {}\nBody: {}",
            draft.title.get(primary).map(String::as_str).unwrap_or(""),
            draft.lead.get(primary).map(String::as_str).unwrap_or(""),
            draft.body.get(primary).map(String::as_str).unwrap_or(""),
        ),
        max_tokens: ai.max_tokens,
        temperature: ai.temperature,
    }
}

fn fact_check_request(draft: &Draft, primary: &str) -> GenerationRequest {
    GenerationRequest {
        system: "You are a fact-check scorer. Reply with one number between 0.0 and 1.0: the \
                 confidence that the piece's claims are supported by the source excerpt. \
                 Nothing but the number."
            .to_string(),
        prompt: format!(
            "Source excerpt: {}\nPiece: {}",
            draft.raw_excerpt,
            draft.body.get(primary).map(String::as_str).unwrap_or(""),
        ),
        max_tokens: 8,
        temperature: 0.0,
    }
}

fn seo_request(draft: &Draft, primary: &str) -> GenerationRequest {
    GenerationRequest {
        system: "You are an SEO analyst. Reply with one number between 0.0 and 1.0 scoring the \
                 headline's engagement potential. Nothing but the number."
            .to_string(),
        prompt: draft
            .title
            .get(primary)
            .cloned()
            .unwrap_or_else(|| draft.raw_title.clone()),
        max_tokens: 8,
        temperature: 0.0,
    }
}

async fn generate_piece(
    provider: &DynProvider,
    req: GenerationRequest,
) -> Result<ContentPiece, ProcessingError> {
    let raw = provider.generate(&req).await?;
    let cleaned = strip_code_fence(&raw);
    serde_json::from_str(cleaned)
        .map_err(|e| ProcessingError::MalformedResponse(format!("content json: {e}")))
}

async fn generate_score(
    provider: &DynProvider,
    req: GenerationRequest,
) -> Result<f32, ProcessingError> {
    let raw = provider.generate(&req).await?;
    let token = raw
        .trim()
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .trim_end_matches(|c: char| !c.is_ascii_digit());
    token
        .parse::<f32>()
        .map(|s| s.clamp(0.0, 1.0))
        .map_err(|_| ProcessingError::MalformedResponse(format!("score: {raw:?}")))
}

fn has_content(draft: &Draft, lang: &str) -> bool {
    draft.title.contains_key(lang) && draft.lead.contains_key(lang) && draft.body.contains_key(lang)
}

fn apply_piece(draft: &mut Draft, lang: &str, piece: ContentPiece, merge_flags: bool) {
    draft.title.insert(lang.to_string(), piece.title);
    draft.lead.insert(lang.to_string(), piece.lead);
    draft.body.insert(lang.to_string(), piece.body);
    if merge_flags {
        for flag in piece.flags {
            let flag = flag.trim().to_lowercase();
            if !flag.is_empty() && !draft.risk_flags.contains(&flag) {
                draft.risk_flags.push(flag);
            }
        }
    }
}

/// Models occasionally wrap JSON in a markdown fence; unwrap it.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.trim_start().strip_suffix("```").unwrap_or(inner).trim()
}
