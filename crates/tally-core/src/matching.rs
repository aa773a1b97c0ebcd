//! Match scorer and link selector
//!
//! Scoring ranks unlinked aggregate bills against a cycle total; selection
//! turns the ranked list into a `LinkDecision`. Both are pure so the
//! orchestrator, previews and manual links share one rule set.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::config::ReconcileConfig;
use crate::models::{LinkDecision, MatchCandidate, MatchConfidence, Transaction};
use crate::money::percent_difference;

/// Classify a difference into a confidence tier
pub fn classify_confidence(
    difference: Decimal,
    difference_percent: Decimal,
    config: &ReconcileConfig,
) -> MatchConfidence {
    if difference.abs() < config.exact_epsilon {
        MatchConfidence::Exact
    } else if difference_percent <= config.high_max_percent {
        MatchConfidence::High
    } else if difference_percent <= config.medium_max_percent {
        MatchConfidence::Medium
    } else {
        MatchConfidence::Low
    }
}

/// Score a single bill against a cycle total
pub fn score_candidate(
    cycle_total: Decimal,
    reference_date: NaiveDate,
    bill: &Transaction,
    config: &ReconcileConfig,
) -> MatchCandidate {
    let bill_amount = bill.amount;
    let difference = cycle_total - bill_amount;
    let difference_percent = percent_difference(difference, bill_amount);
    let days = (bill.date - reference_date).num_days().abs();

    MatchCandidate {
        bill_id: bill.id,
        date: bill.date,
        description: bill.description.clone(),
        bill_amount,
        difference,
        difference_percent,
        confidence: classify_confidence(difference, difference_percent, config),
        days_from_reference: days,
        score: difference.abs() + config.date_penalty_per_day * Decimal::from(days),
        has_mismatch: difference.abs() > config.mismatch_tolerance,
        within_tolerance: difference_percent <= config.reject_threshold_percent,
    }
}

/// Rank bills by composite score (lower is better).
///
/// Ties go to the most recent bill, then the highest id. Bills outside the
/// configured date window are dropped and the result is capped at
/// `max_candidates`.
pub fn score_candidates(
    cycle_total: Decimal,
    reference_date: NaiveDate,
    bills: &[Transaction],
    config: &ReconcileConfig,
) -> Vec<MatchCandidate> {
    let mut candidates: Vec<MatchCandidate> = bills
        .iter()
        .map(|bill| score_candidate(cycle_total, reference_date, bill, config))
        .filter(|c| c.days_from_reference <= config.window_days)
        .collect();

    candidates.sort_by(|a, b| {
        a.score
            .cmp(&b.score)
            .then_with(|| b.date.cmp(&a.date))
            .then_with(|| b.bill_id.cmp(&a.bill_id))
    });
    candidates.truncate(config.max_candidates);
    candidates
}

/// Decide what to do with a cycle's ranked candidates.
///
/// A single candidate auto-links only when it is within the reject
/// threshold; a mismatch inside that threshold is still linked and flagged.
pub fn decide(candidates: &[MatchCandidate]) -> LinkDecision {
    match candidates {
        [] => LinkDecision::NoMatch,
        [only] if only.within_tolerance => LinkDecision::AutoLink(only.clone()),
        _ => LinkDecision::RequiresSelection(candidates.to_vec()),
    }
}
