//! Quality gate: a pure evaluation over a processed draft and the current
//! thresholds. No I/O, no clock, no repository access; callers apply the
//! resulting transition.
//!
//! The gate can only approve or defer to a human. Rejection is never an
//! automatic outcome; it is reserved for explicit human action and for
//! processing exhaustion.

use serde::Serialize;

use crate::draft::Draft;
use crate::settings::GateSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateOutcome {
    AutoApprove,
    RequireReview,
}

/// Ephemeral gate result: the outcome plus which rule fired. Drives the
/// Processing -> AutoReady / PendingOk transition and is then discarded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishDecision {
    pub outcome: GateOutcome,
    pub reason: String,
}

/// Rule order, first match wins:
/// 1. category or risk flag in the approval set -> require review
/// 2. fact-check below threshold or source trust below threshold -> require review
/// 3. otherwise -> auto-approve
///
/// A missing fact-check score counts as 0.0, which keeps an unscored draft
/// behind the review fence.
pub fn evaluate(draft: &Draft, cfg: &GateSettings) -> PublishDecision {
    if let Some(label) = approval_match(draft, cfg) {
        return PublishDecision {
            outcome: GateOutcome::RequireReview,
            reason: format!("category '{label}' requires approval"),
        };
    }

    let fact_check = draft.fact_check.unwrap_or(0.0);
    if fact_check < cfg.fact_check_threshold {
        return PublishDecision {
            outcome: GateOutcome::RequireReview,
            reason: format!(
                "fact-check {fact_check:.2} below threshold {:.2}",
                cfg.fact_check_threshold
            ),
        };
    }
    if draft.source_trust < cfg.source_trust_threshold {
        return PublishDecision {
            outcome: GateOutcome::RequireReview,
            reason: format!(
                "source trust {:.2} below threshold {:.2}",
                draft.source_trust, cfg.source_trust_threshold
            ),
        };
    }

    PublishDecision {
        outcome: GateOutcome::AutoApprove,
        reason: format!(
            "fact-check {fact_check:.2} and source trust {:.2} clear thresholds",
            draft.source_trust
        ),
    }
}

/// The approval set is matched against the source category label and against
/// every risk flag, case-insensitively. Editorial topics ("politics") arrive
/// as risk flags from synthesis; the source category covers whole feeds.
fn approval_match<'a>(draft: &'a Draft, cfg: &'a GateSettings) -> Option<&'a str> {
    let category = draft.category.as_str();
    for entry in &cfg.approval_categories {
        if entry.eq_ignore_ascii_case(category) {
            return Some(entry.as_str());
        }
        if draft
            .risk_flags
            .iter()
            .any(|flag| entry.eq_ignore_ascii_case(flag))
        {
            return Some(entry.as_str());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SourceCategory;

    fn processed_draft(category: SourceCategory, trust: f32, fact_check: f32) -> Draft {
        let mut d = Draft::new(
            "key-1",
            "Council approves budget",
            "The council approved the annual budget.",
            "city-council",
            "City Council",
            category,
            trust,
        );
        d.fact_check = Some(fact_check);
        d.seo_score = Some(0.5);
        d
    }

    fn cfg(fact: f32, trust: f32, approval: &[&str]) -> GateSettings {
        GateSettings {
            fact_check_threshold: fact,
            source_trust_threshold: trust,
            approval_categories: approval.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn auto_approves_when_scores_clear_thresholds() {
        let d = processed_draft(SourceCategory::Media, 0.8, 0.9);
        let decision = evaluate(&d, &cfg(0.6, 0.7, &["politics"]));
        assert_eq!(decision.outcome, GateOutcome::AutoApprove);
    }

    #[test]
    fn approval_category_forces_review_despite_perfect_scores() {
        let d = processed_draft(SourceCategory::Social, 1.0, 1.0);
        let decision = evaluate(&d, &cfg(0.6, 0.7, &["social"]));
        assert_eq!(decision.outcome, GateOutcome::RequireReview);
        assert!(decision.reason.contains("requires approval"));
    }

    #[test]
    fn risk_flag_in_approval_set_forces_review() {
        let mut d = processed_draft(SourceCategory::Media, 0.9, 0.9);
        d.risk_flags.push("politik".to_string());
        let decision = evaluate(&d, &cfg(0.6, 0.7, &["politik"]));
        assert_eq!(decision.outcome, GateOutcome::RequireReview);
    }

    #[test]
    fn category_rule_wins_over_score_rules() {
        let mut d = processed_draft(SourceCategory::Media, 0.1, 0.1);
        d.risk_flags.push("politics".to_string());
        let decision = evaluate(&d, &cfg(0.6, 0.7, &["politics"]));
        assert!(decision.reason.contains("requires approval"));
    }

    #[test]
    fn missing_fact_check_counts_as_zero() {
        let mut d = processed_draft(SourceCategory::Official, 0.95, 0.9);
        d.fact_check = None;
        let decision = evaluate(&d, &cfg(0.6, 0.7, &[]));
        assert_eq!(decision.outcome, GateOutcome::RequireReview);
        assert!(decision.reason.contains("fact-check 0.00"));
    }

    #[test]
    fn low_fact_check_requires_review() {
        let d = processed_draft(SourceCategory::Official, 0.95, 0.42);
        let decision = evaluate(&d, &cfg(0.6, 0.7, &[]));
        assert_eq!(decision.outcome, GateOutcome::RequireReview);
        assert!(decision.reason.contains("below threshold"));
    }

    #[test]
    fn low_source_trust_requires_review() {
        let d = processed_draft(SourceCategory::Social, 0.4, 0.9);
        let decision = evaluate(&d, &cfg(0.6, 0.7, &[]));
        assert_eq!(decision.outcome, GateOutcome::RequireReview);
        assert!(decision.reason.contains("source trust 0.40"));
    }

    #[test]
    fn equal_to_threshold_passes() {
        let d = processed_draft(SourceCategory::Media, 0.7, 0.6);
        let decision = evaluate(&d, &cfg(0.6, 0.7, &[]));
        assert_eq!(decision.outcome, GateOutcome::AutoApprove);
    }

    #[test]
    fn gate_is_deterministic() {
        let d = processed_draft(SourceCategory::Regional, 0.75, 0.66);
        let settings = cfg(0.6, 0.7, &["politics"]);
        let first = evaluate(&d, &settings);
        let second = evaluate(&d, &settings);
        assert_eq!(first, second);
    }
}
