//! Reconciliation of card statements against aggregate bill payments
//!
//! Drives the pipeline:
//! - Statement upload: normalize, group into a cycle, register it as pending
//! - Preview: score and decide without touching the ledger
//! - Import-and-link: register cycles and expand confirmed bills atomically
//! - Manual link / select / unlink / collapse for a single cycle
//! - Batch reconciliation over every pending cycle

use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, error, info, warn};

use crate::config::ReconcileConfig;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::matching::{decide, score_candidates};
use crate::models::{
    BillingCycle, CollapseResult, ConfirmedMatch, CycleImport, CyclePreview, CycleRef,
    CycleStatus, CycleTotals, ImportAndLinkResult, ImportPreview, LinkDecision, LinkResult,
    MatchCandidate, PendingSelection, ReconciliationReport, Selection, SelectionOutcome,
    StatementImport, ZeroedBill,
};
use crate::statement::{
    cycle_start, cycle_totals, derive_billing_cycle, parse_statement_str, LineNormalizer,
};

/// Outcome of one cycle in a reconciliation pass
enum CycleOutcome {
    Linked(LinkResult),
    AwaitingSelection {
        candidates: Vec<MatchCandidate>,
        reason: Option<String>,
    },
    NoMatch,
    /// Left the pending set after the pass started
    Skipped,
}

/// Reconciliation engine bound to a database
pub struct Reconciler<'a> {
    db: &'a Database,
    config: ReconcileConfig,
}

impl<'a> Reconciler<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self::with_config(db, ReconcileConfig::default())
    }

    pub fn with_config(db: &'a Database, config: ReconcileConfig) -> Self {
        Self { db, config }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Normalize a raw statement and register it as a pending cycle.
    ///
    /// The cycle id is derived from the lines unless given. Malformed rows
    /// are skipped and reported as warnings; a statement without usable
    /// rows is rejected before anything is stored.
    pub fn import_statement(
        &self,
        account_id: i64,
        content: &str,
        billing_cycle: Option<&str>,
    ) -> Result<StatementImport> {
        let parsed = parse_statement_str(content, &self.config.payment_marker)?;
        if parsed.lines.is_empty() {
            return Err(Error::Validation("Statement has no lines".to_string()));
        }

        let billing_cycle = match billing_cycle {
            Some(cycle) => {
                cycle_start(cycle)?;
                cycle.to_string()
            }
            None => derive_billing_cycle(&parsed.lines, Utc::now().date_naive()),
        };

        let upsert = self
            .db
            .register_statement(account_id, &billing_cycle, &parsed.lines)?;

        let mut warnings = parsed.warnings;
        if parsed.skipped_rows > 0 {
            warnings.push(format!("{} malformed row(s) skipped", parsed.skipped_rows));
        }
        if upsert.duplicate_lines > 0 {
            warnings.push(format!(
                "{} line(s) already imported for {}",
                upsert.duplicate_lines, billing_cycle
            ));
        }

        info!(
            account_id,
            billing_cycle = %billing_cycle,
            new_lines = upsert.new_lines,
            status = %upsert.status,
            "Imported statement"
        );

        Ok(StatementImport {
            account_id,
            billing_cycle,
            cycle_id: upsert.cycle_id,
            new_lines: upsert.new_lines,
            duplicate_lines: upsert.duplicate_lines,
            total_amount: upsert.totals.total_amount,
            status: upsert.status,
            warnings,
        })
    }

    /// Score every cycle against the open bills without mutating anything
    pub fn preview_import(&self, imports: &[CycleImport]) -> Result<ImportPreview> {
        let conn = self.db.conn()?;
        let mut matches = Vec::with_capacity(imports.len());
        let mut warnings = Vec::new();
        let mut unmatched_count = 0;
        let mut total_amount = Decimal::ZERO;
        let imports = self.normalize_imports(imports, &mut warnings)?;

        for import in &imports {
            let billing_cycle = self.resolve_cycle(import)?;
            let totals = cycle_totals(&import.lines)?;
            if totals.transaction_count == 0 {
                warnings.push(format!("Billing cycle {} has no statement lines", billing_cycle));
            }

            if let Some(existing) = Database::fetch_cycle(&conn, import.account_id, &billing_cycle)? {
                if existing.status == CycleStatus::Linked {
                    warnings.push(format!(
                        "Billing cycle {} for account {} is already linked",
                        billing_cycle, import.account_id
                    ));
                }
            }

            let reference = reference_date(&totals, &billing_cycle)?;
            let candidates = self.find_candidates(&conn, &totals, reference)?;
            let decision = decide(&candidates);
            let suggested_bill_id = match &decision {
                LinkDecision::AutoLink(c) => Some(c.bill_id),
                LinkDecision::RequiresSelection(cs) => cs.first().map(|c| c.bill_id),
                LinkDecision::NoMatch => {
                    unmatched_count += 1;
                    None
                }
            };

            total_amount = total_amount
                .checked_add(totals.total_amount)
                .ok_or_else(|| Error::Validation("Import total out of range".to_string()))?;
            matches.push(CyclePreview {
                account_id: import.account_id,
                billing_cycle,
                total_amount: totals.total_amount,
                transaction_count: totals.transaction_count,
                decision: decision.kind(),
                suggested_bill_id,
                candidates,
            });
        }

        debug!(cycles = matches.len(), unmatched_count, "Built import preview");

        Ok(ImportPreview {
            matches,
            unmatched_count,
            total_amount,
            warnings,
        })
    }

    /// Register cycles and expand each confirmed match, all in one transaction.
    ///
    /// Cycles without a confirmed match are stored as pending unless
    /// `skip_unmatched` is set. Any failure rolls back the whole call.
    pub fn import_and_link(
        &self,
        imports: &[CycleImport],
        confirmed: &[ConfirmedMatch],
        skip_unmatched: bool,
    ) -> Result<ImportAndLinkResult> {
        let mut conn = self.db.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut imported_count = 0;
        let mut unmatched_count = 0;
        let mut warnings = Vec::new();
        let imports = self.normalize_imports(imports, &mut warnings)?;

        for import in &imports {
            let billing_cycle = self.resolve_cycle(import)?;
            let is_confirmed = confirmed
                .iter()
                .any(|m| m.account_id == import.account_id && m.billing_cycle == billing_cycle);

            if !is_confirmed {
                unmatched_count += 1;
                if skip_unmatched {
                    warnings.push(format!("Skipped unmatched billing cycle {}", billing_cycle));
                    continue;
                }
            }

            let upsert =
                Database::upsert_cycle_lines(&tx, import.account_id, &billing_cycle, &import.lines)?;
            imported_count += upsert.new_lines;
            if upsert.duplicate_lines > 0 {
                warnings.push(format!(
                    "{} line(s) already imported for {}",
                    upsert.duplicate_lines, billing_cycle
                ));
            }
        }

        let mut zeroed_bills = Vec::with_capacity(confirmed.len());
        for m in confirmed {
            let cycle = Database::fetch_cycle(&tx, m.account_id, &m.billing_cycle)?.ok_or_else(|| {
                Error::NotFound(format!(
                    "Billing cycle {} not found for account {}",
                    m.billing_cycle, m.account_id
                ))
            })?;
            let lines = Database::fetch_cycle_lines(&tx, cycle.id)?;

            let result = Database::expand_within(&tx, &cycle, &lines, m.bill_id, m.force, &self.config)
                .map_err(|e| match e {
                    // a confirmed bill that does not exist cannot be processed
                    Error::NotFound(msg) => Error::Unprocessable(msg),
                    other => other,
                })?;

            if result.has_mismatch {
                warnings.push(format!(
                    "Billing cycle {} linked with a difference of {} ({}%)",
                    result.billing_cycle, result.amount_difference, result.difference_percent
                ));
            }
            let original_amount = cycle.total_amount - result.amount_difference;
            zeroed_bills.push(ZeroedBill {
                bill_id: result.bill_id,
                billing_cycle: result.billing_cycle,
                original_amount,
            });
        }

        tx.commit()?;

        info!(
            imported_count,
            matched = zeroed_bills.len(),
            unmatched_count,
            "Import and link complete"
        );

        Ok(ImportAndLinkResult {
            imported_count,
            matched_count: zeroed_bills.len(),
            unmatched_count,
            zeroed_bills,
            warnings,
        })
    }

    /// Current ranked candidates for a stored cycle (read-only)
    pub fn candidates_for(&self, account_id: i64, billing_cycle: &str) -> Result<Vec<MatchCandidate>> {
        let conn = self.db.conn()?;
        let cycle = require_cycle(&conn, account_id, billing_cycle)?;
        let totals = stored_totals(&cycle);
        let reference = reference_date(&totals, &cycle.billing_cycle)?;
        self.find_candidates(&conn, &totals, reference)
    }

    /// Manually link a cycle to a bill
    pub fn link(
        &self,
        account_id: i64,
        billing_cycle: &str,
        bill_id: i64,
        force: bool,
    ) -> Result<LinkResult> {
        self.db
            .expand_cycle(account_id, billing_cycle, bill_id, force, &self.config)
    }

    /// Resolve a cycle awaiting selection: link a chosen bill or keep it pending
    pub fn select(
        &self,
        account_id: i64,
        billing_cycle: &str,
        selection: Selection,
        force: bool,
    ) -> Result<SelectionOutcome> {
        match selection {
            Selection::Bill(bill_id) => self
                .link(account_id, billing_cycle, bill_id, force)
                .map(SelectionOutcome::Linked),
            Selection::KeepPending => {
                let mut conn = self.db.conn()?;
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let cycle = require_cycle(&tx, account_id, billing_cycle)?;
                if cycle.status == CycleStatus::Linked {
                    return Err(Error::Conflict(format!(
                        "Billing cycle {} is already linked",
                        billing_cycle
                    )));
                }
                Database::set_cycle_status(&tx, cycle.id, CycleStatus::Pending, None)?;
                tx.commit()?;

                debug!(account_id, billing_cycle, "Cycle kept pending");
                Ok(SelectionOutcome::KeptPending {
                    account_id,
                    billing_cycle: cycle.billing_cycle,
                    candidates: cycle.potential_matches,
                })
            }
        }
    }

    /// Collapse the bill linked to a cycle
    pub fn unlink(&self, account_id: i64, billing_cycle: &str) -> Result<CollapseResult> {
        self.db.collapse_cycle(account_id, billing_cycle)
    }

    /// Collapse an expanded bill by its transaction id
    pub fn collapse_bill(&self, bill_id: i64) -> Result<CollapseResult> {
        self.db.collapse_bill(bill_id)
    }

    /// Single bounded pass over every pending cycle.
    ///
    /// Each cycle is matched (and expanded when auto-linked) in its own
    /// transaction. A cycle that fails to link is reported under
    /// `requires_selection` with the reason; integrity violations abort the
    /// pass.
    pub fn trigger_reconciliation(&self, account_id: Option<i64>) -> Result<ReconciliationReport> {
        let pending = self
            .db
            .list_cycles_with_status(CycleStatus::Pending, account_id)?;
        let mut report = ReconciliationReport::default();

        for cycle in pending {
            let cycle_ref = CycleRef {
                account_id: cycle.account_id,
                billing_cycle: cycle.billing_cycle.clone(),
                total_amount: cycle.total_amount,
            };

            match self.reconcile_cycle(cycle.id, &cycle.billing_cycle, cycle.account_id)? {
                CycleOutcome::Linked(result) => {
                    report.summary.transactions_linked += result.transactions_linked;
                    report.auto_linked.push(result);
                }
                CycleOutcome::AwaitingSelection { candidates, reason } => {
                    report.requires_selection.push(PendingSelection {
                        account_id: cycle_ref.account_id,
                        billing_cycle: cycle_ref.billing_cycle,
                        total_amount: cycle_ref.total_amount,
                        candidates,
                        reason,
                    });
                }
                CycleOutcome::NoMatch => report.no_match.push(cycle_ref),
                CycleOutcome::Skipped => continue,
            }
            report.summary.examined += 1;
        }

        report.summary.auto_linked = report.auto_linked.len();
        report.summary.requires_selection = report.requires_selection.len();
        report.summary.no_match = report.no_match.len();

        info!(
            examined = report.summary.examined,
            auto_linked = report.summary.auto_linked,
            requires_selection = report.summary.requires_selection,
            no_match = report.summary.no_match,
            "Reconciliation pass complete"
        );

        Ok(report)
    }

    fn reconcile_cycle(
        &self,
        cycle_id: i64,
        billing_cycle: &str,
        account_id: i64,
    ) -> Result<CycleOutcome> {
        let mut conn = self.db.conn()?;
        let mut tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // Re-read inside the transaction; another caller may have moved it
        let cycle = match Database::fetch_cycle(&tx, account_id, billing_cycle)? {
            Some(c) if c.id == cycle_id && c.status == CycleStatus::Pending => c,
            _ => return Ok(CycleOutcome::Skipped),
        };

        let lines = Database::fetch_cycle_lines(&tx, cycle.id)?;
        let totals = cycle_totals(&lines)?;
        let reference = reference_date(&totals, &cycle.billing_cycle)?;
        let candidates = self.find_candidates(&tx, &totals, reference)?;

        let outcome = match decide(&candidates) {
            LinkDecision::AutoLink(candidate) => {
                let savepoint = tx.savepoint()?;
                match Database::expand_within(
                    &savepoint,
                    &cycle,
                    &lines,
                    candidate.bill_id,
                    false,
                    &self.config,
                ) {
                    Ok(result) => {
                        savepoint.commit()?;
                        // Keep the snapshot so a later collapse can offer it again
                        Database::set_cycle_status(
                            &tx,
                            cycle.id,
                            CycleStatus::Linked,
                            Some(&candidates),
                        )?;
                        CycleOutcome::Linked(result)
                    }
                    Err(e @ Error::Integrity(_)) => {
                        error!(billing_cycle = %cycle.billing_cycle, error = %e, "Integrity violation during reconciliation");
                        return Err(e);
                    }
                    Err(e) => {
                        drop(savepoint);
                        warn!(
                            billing_cycle = %cycle.billing_cycle,
                            bill_id = candidate.bill_id,
                            error = %e,
                            "Auto-link failed; cycle needs a manual selection"
                        );
                        Database::set_cycle_status(
                            &tx,
                            cycle.id,
                            CycleStatus::AwaitingSelection,
                            Some(&candidates),
                        )?;
                        CycleOutcome::AwaitingSelection {
                            candidates,
                            reason: Some(e.to_string()),
                        }
                    }
                }
            }
            LinkDecision::RequiresSelection(candidates) => {
                Database::set_cycle_status(
                    &tx,
                    cycle.id,
                    CycleStatus::AwaitingSelection,
                    Some(&candidates),
                )?;
                let reason = match candidates.as_slice() {
                    [only] => Some(format!(
                        "Only candidate differs by {}%, above the {}% threshold",
                        only.difference_percent, self.config.reject_threshold_percent
                    )),
                    _ => None,
                };
                CycleOutcome::AwaitingSelection { candidates, reason }
            }
            LinkDecision::NoMatch => {
                Database::set_cycle_status(&tx, cycle.id, CycleStatus::NoMatch, Some(&[]))?;
                CycleOutcome::NoMatch
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    /// Run caller-supplied line items through the statement normalizer
    fn normalize_imports(
        &self,
        imports: &[CycleImport],
        warnings: &mut Vec<String>,
    ) -> Result<Vec<CycleImport>> {
        let normalizer = LineNormalizer::new(&self.config.payment_marker)?;
        let mut normalized = Vec::with_capacity(imports.len());

        for import in imports {
            let mut import = import.clone();
            for line in &mut import.lines {
                if let Some(warning) = normalizer.normalize(line)? {
                    warnings.push(warning);
                }
            }
            normalized.push(import);
        }
        Ok(normalized)
    }

    fn resolve_cycle(&self, import: &CycleImport) -> Result<String> {
        match &import.billing_cycle {
            Some(cycle) => {
                cycle_start(cycle)?;
                Ok(cycle.clone())
            }
            None => Ok(derive_billing_cycle(&import.lines, Utc::now().date_naive())),
        }
    }

    fn find_candidates(
        &self,
        conn: &Connection,
        totals: &CycleTotals,
        reference: NaiveDate,
    ) -> Result<Vec<MatchCandidate>> {
        let window = Duration::days(self.config.window_days);
        let bills = Database::query_open_bills(conn, reference - window, reference + window)?;
        Ok(score_candidates(
            totals.total_amount,
            reference,
            &bills,
            &self.config,
        ))
    }
}

/// Marker date, else newest line date, else the first day of the cycle
fn reference_date(totals: &CycleTotals, billing_cycle: &str) -> Result<NaiveDate> {
    match totals.marker_date.or(totals.newest_date) {
        Some(date) => Ok(date),
        None => cycle_start(billing_cycle),
    }
}

fn stored_totals(cycle: &BillingCycle) -> CycleTotals {
    CycleTotals {
        total_amount: cycle.total_amount,
        transaction_count: cycle.transaction_count.max(0) as usize,
        oldest_date: cycle.oldest_date,
        newest_date: cycle.newest_date,
        marker_date: cycle.marker_date,
    }
}

fn require_cycle(conn: &Connection, account_id: i64, billing_cycle: &str) -> Result<BillingCycle> {
    Database::fetch_cycle(conn, account_id, billing_cycle)?.ok_or_else(|| {
        Error::NotFound(format!(
            "Billing cycle {} not found for account {}",
            billing_cycle, account_id
        ))
    })
}
