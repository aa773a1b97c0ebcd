//! Expand/collapse of aggregate bills
//!
//! Expansion replaces one open bill with the itemized lines of a billing
//! cycle: the bill is zeroed and hidden, one transaction per line is created
//! pointing back at it, and a link is registered. Collapse reverses exactly
//! that. Both run inside a single SQLite transaction and either fully apply
//! or leave no trace.

use rusqlite::{params, Connection, TransactionBehavior};
use tracing::{error, info, warn};

use super::{is_constraint_violation, Database};
use crate::config::ReconcileConfig;
use crate::error::{Error, Result};
use crate::models::{
    BillState, BillingCycle, CategoryKind, CollapseResult, CycleStatus, IntegrityIssue,
    IntegrityIssueKind, LinkResult, StatementLine, TransactionKind, TransactionSource,
};
use crate::money::{from_cents, percent_difference, to_cents};
use crate::statement::cycle_totals;

impl Database {
    /// Expand a bill into a cycle's stored lines (own transaction)
    pub fn expand_cycle(
        &self,
        account_id: i64,
        billing_cycle: &str,
        bill_id: i64,
        force: bool,
        config: &ReconcileConfig,
    ) -> Result<LinkResult> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let cycle = Self::fetch_cycle(&tx, account_id, billing_cycle)?.ok_or_else(|| {
            Error::NotFound(format!(
                "Billing cycle {} not found for account {}",
                billing_cycle, account_id
            ))
        })?;
        let lines = Self::fetch_cycle_lines(&tx, cycle.id)?;
        let result = Self::expand_within(&tx, &cycle, &lines, bill_id, force, config)?;

        tx.commit()?;
        Ok(result)
    }

    /// Expand on an open transaction. The caller commits.
    pub(crate) fn expand_within(
        conn: &Connection,
        cycle: &BillingCycle,
        lines: &[StatementLine],
        bill_id: i64,
        force: bool,
        config: &ReconcileConfig,
    ) -> Result<LinkResult> {
        if cycle.status == CycleStatus::Linked || Self::fetch_link_by_cycle(conn, cycle.id)?.is_some()
        {
            return Err(Error::Conflict(format!(
                "Billing cycle {} is already linked",
                cycle.billing_cycle
            )));
        }

        let bill = Self::fetch_transaction(conn, bill_id)?
            .ok_or_else(|| Error::NotFound(format!("Bill transaction {} not found", bill_id)))?;

        if !bill.is_card_bill() {
            return Err(Error::Unprocessable(format!(
                "Transaction {} is not a credit card bill",
                bill_id
            )));
        }
        if let Some(link) = Self::fetch_link_by_bill(conn, bill_id)? {
            return Err(Error::Conflict(format!(
                "Bill {} is already linked to billing cycle id {}",
                bill_id, link.cycle_id
            )));
        }
        if bill.bill_state != Some(BillState::Open) || bill.is_hidden {
            return Err(Error::Conflict(format!("Bill {} is already expanded", bill_id)));
        }

        let stray: i64 = conn.query_row(
            "SELECT COUNT(*) FROM transactions WHERE credit_card_payment_id = ?",
            params![bill_id],
            |row| row.get(0),
        )?;
        if stray > 0 {
            error!(bill_id, stray, "Unlinked bill already has itemized rows");
            return Err(Error::Integrity(format!(
                "Bill {} has {} itemized rows but no link",
                bill_id, stray
            )));
        }

        let totals = cycle_totals(lines)?;
        if totals.transaction_count == 0 {
            return Err(Error::Validation(format!(
                "Billing cycle {} has no statement lines",
                cycle.billing_cycle
            )));
        }

        let difference = totals.total_amount - bill.amount;
        let difference_percent = percent_difference(difference, bill.amount);
        let beyond_threshold = difference_percent > config.reject_threshold_percent;
        if beyond_threshold && !force {
            return Err(Error::ToleranceExceeded {
                difference,
                difference_percent,
                threshold_percent: config.reject_threshold_percent,
            });
        }
        let has_mismatch = beyond_threshold || difference.abs() > config.mismatch_tolerance;

        let expense_category =
            Self::ensure_category(conn, &config.expense_category, CategoryKind::Expense)?;
        let credit_category =
            Self::ensure_category(conn, &config.credit_category, CategoryKind::Income)?;
        let bill_cents = to_cents(bill.amount)?;

        let mut created = 0usize;
        for line in lines {
            let (kind, category_id) = if line.amount.is_sign_negative() && !line.amount.is_zero() {
                (TransactionKind::Income, credit_category)
            } else {
                (TransactionKind::Expense, expense_category)
            };

            conn.execute(
                r#"
                INSERT INTO transactions (account_id, date, description, amount_cents, kind,
                                          category_id, is_hidden, original_amount_cents,
                                          billing_cycle, credit_card_payment_id,
                                          installment_current, installment_total, source)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
                params![
                    cycle.account_id,
                    line.date.to_string(),
                    line.description,
                    to_cents(line.amount.abs())?,
                    kind.as_str(),
                    category_id,
                    line.is_payment_marker,
                    bill_cents,
                    cycle.billing_cycle,
                    bill_id,
                    line.installment_current,
                    line.installment_total,
                    TransactionSource::Statement.as_str(),
                ],
            )?;
            created += 1;
        }

        let zeroed = conn.execute(
            r#"
            UPDATE transactions
            SET original_amount_cents = amount_cents, amount_cents = 0, is_hidden = 1,
                bill_state = 'expanded'
            WHERE id = ? AND bill_state = 'open'
            "#,
            params![bill_id],
        )?;
        if zeroed != 1 {
            return Err(Error::Conflict(format!("Bill {} is already expanded", bill_id)));
        }

        let inserted = conn.execute(
            r#"
            INSERT INTO cycle_links (cycle_id, bill_transaction_id, cycle_total_cents,
                                     bill_amount_cents, amount_difference_cents,
                                     has_mismatch, forced, linked_transaction_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                cycle.id,
                bill_id,
                to_cents(totals.total_amount)?,
                bill_cents,
                to_cents(difference)?,
                has_mismatch,
                beyond_threshold,
                created as i64,
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => {
                return Err(Error::Conflict(format!(
                    "Billing cycle {} or bill {} is already linked",
                    cycle.billing_cycle, bill_id
                )));
            }
            Err(e) => return Err(e.into()),
        }

        Self::set_cycle_status(conn, cycle.id, CycleStatus::Linked, None)?;

        if beyond_threshold {
            warn!(
                bill_id,
                billing_cycle = %cycle.billing_cycle,
                %difference_percent,
                "Forced link beyond reject threshold"
            );
        }
        info!(
            bill_id,
            billing_cycle = %cycle.billing_cycle,
            transactions = created,
            %difference,
            has_mismatch,
            "Expanded bill into statement lines"
        );

        Ok(LinkResult {
            account_id: cycle.account_id,
            billing_cycle: cycle.billing_cycle.clone(),
            bill_id,
            transactions_linked: created,
            amount_difference: difference,
            difference_percent,
            has_mismatch,
            forced: beyond_threshold,
        })
    }

    /// Collapse an expanded bill back to its aggregate form
    pub fn collapse_bill(&self, bill_id: i64) -> Result<CollapseResult> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = Self::collapse_within(&tx, bill_id)?;
        tx.commit()?;
        Ok(result)
    }

    /// Collapse whichever bill is linked to a cycle
    pub fn collapse_cycle(&self, account_id: i64, billing_cycle: &str) -> Result<CollapseResult> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let cycle = Self::fetch_cycle(&tx, account_id, billing_cycle)?.ok_or_else(|| {
            Error::NotFound(format!(
                "Billing cycle {} not found for account {}",
                billing_cycle, account_id
            ))
        })?;
        let link = cycle.link.ok_or_else(|| {
            Error::Unprocessable(format!("Billing cycle {} is not linked", billing_cycle))
        })?;
        let result = Self::collapse_within(&tx, link.bill_transaction_id)?;

        tx.commit()?;
        Ok(result)
    }

    /// Collapse on an open transaction. The caller commits.
    pub(crate) fn collapse_within(conn: &Connection, bill_id: i64) -> Result<CollapseResult> {
        let bill = Self::fetch_transaction(conn, bill_id)?
            .ok_or_else(|| Error::NotFound(format!("Bill transaction {} not found", bill_id)))?;

        let Some(link) = Self::fetch_link_by_bill(conn, bill_id)? else {
            let itemized: i64 = conn.query_row(
                "SELECT COUNT(*) FROM transactions WHERE credit_card_payment_id = ?",
                params![bill_id],
                |row| row.get(0),
            )?;
            if itemized > 0 || bill.bill_state == Some(BillState::Expanded) {
                error!(bill_id, itemized, "Expanded bill without a link");
                return Err(Error::Integrity(format!(
                    "Bill {} is expanded ({} itemized rows) but has no link",
                    bill_id, itemized
                )));
            }
            return Err(Error::Unprocessable(format!(
                "Transaction {} is not an expanded bill",
                bill_id
            )));
        };

        if bill.bill_state != Some(BillState::Expanded) {
            error!(bill_id, "Linked bill is not in the expanded state");
            return Err(Error::Integrity(format!(
                "Bill {} is linked but not expanded",
                bill_id
            )));
        }
        let restored_amount = bill.original_amount.ok_or_else(|| {
            Error::Integrity(format!("Bill {} has no original amount to restore", bill_id))
        })?;

        let deleted = conn.execute(
            "DELETE FROM transactions WHERE credit_card_payment_id = ?",
            params![bill_id],
        )?;
        if deleted as i64 != link.linked_transaction_count {
            error!(
                bill_id,
                deleted,
                expected = link.linked_transaction_count,
                "Itemized row count does not match link"
            );
            return Err(Error::Integrity(format!(
                "Bill {} has {} itemized rows but the link recorded {}",
                bill_id, deleted, link.linked_transaction_count
            )));
        }

        conn.execute(
            r#"
            UPDATE transactions
            SET amount_cents = original_amount_cents, original_amount_cents = NULL,
                is_hidden = 0, bill_state = 'open'
            WHERE id = ?
            "#,
            params![bill_id],
        )?;
        conn.execute("DELETE FROM cycle_links WHERE id = ?", params![link.id])?;
        Self::set_cycle_status(conn, link.cycle_id, CycleStatus::Pending, None)?;

        let billing_cycle: String = conn.query_row(
            "SELECT billing_cycle FROM billing_cycles WHERE id = ?",
            params![link.cycle_id],
            |row| row.get(0),
        )?;

        info!(
            bill_id,
            billing_cycle = %billing_cycle,
            deleted,
            %restored_amount,
            "Collapsed bill"
        );

        Ok(CollapseResult {
            transaction_id: bill_id,
            billing_cycle,
            restored_amount,
            deleted_transaction_count: deleted,
        })
    }

    /// Scan for structural violations of the expand/collapse invariants.
    ///
    /// Reports only; nothing is repaired.
    pub fn check_integrity(&self) -> Result<Vec<IntegrityIssue>> {
        let conn = self.conn()?;
        let mut issues = Vec::new();

        let mut stmt = conn.prepare(
            r#"
            SELECT credit_card_payment_id, COUNT(*)
            FROM transactions
            WHERE credit_card_payment_id IS NOT NULL
              AND credit_card_payment_id NOT IN (SELECT bill_transaction_id FROM cycle_links)
            GROUP BY credit_card_payment_id
            "#,
        )?;
        let orphans = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for (bill_id, count) in orphans {
            issues.push(IntegrityIssue {
                kind: IntegrityIssueKind::OrphanedItemized,
                bill_id: Some(bill_id),
                cycle_id: None,
                detail: format!("{} itemized rows reference unlinked bill {}", count, bill_id),
            });
        }

        let mut stmt = conn.prepare(
            r#"
            SELECT l.bill_transaction_id, l.cycle_id
            FROM cycle_links l
            JOIN transactions t ON t.id = l.bill_transaction_id
            WHERE t.bill_state IS NOT 'expanded' OR t.is_hidden = 0 OR t.amount_cents != 0
            "#,
        )?;
        let not_expanded = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for (bill_id, cycle_id) in not_expanded {
            issues.push(IntegrityIssue {
                kind: IntegrityIssueKind::BillNotExpanded,
                bill_id: Some(bill_id),
                cycle_id: Some(cycle_id),
                detail: format!("Linked bill {} is not zeroed and hidden", bill_id),
            });
        }

        let mut stmt = conn.prepare(
            r#"
            SELECT id FROM transactions
            WHERE bill_state = 'expanded'
              AND id NOT IN (SELECT bill_transaction_id FROM cycle_links)
            "#,
        )?;
        let unlinked = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for bill_id in unlinked {
            issues.push(IntegrityIssue {
                kind: IntegrityIssueKind::ExpandedWithoutLink,
                bill_id: Some(bill_id),
                cycle_id: None,
                detail: format!("Bill {} is expanded but has no link", bill_id),
            });
        }

        let mut stmt = conn.prepare(
            r#"
            SELECT l.bill_transaction_id, l.cycle_id, l.linked_transaction_count,
                   l.cycle_total_cents,
                   (SELECT COUNT(*) FROM transactions t
                    WHERE t.credit_card_payment_id = l.bill_transaction_id),
                   (SELECT COALESCE(SUM(t.amount_cents), 0) FROM transactions t
                    WHERE t.credit_card_payment_id = l.bill_transaction_id AND t.is_hidden = 0)
            FROM cycle_links l
            "#,
        )?;
        let links = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for (bill_id, cycle_id, expected_count, total_cents, row_count, sum_cents) in links {
            if expected_count != row_count {
                issues.push(IntegrityIssue {
                    kind: IntegrityIssueKind::CountMismatch,
                    bill_id: Some(bill_id),
                    cycle_id: Some(cycle_id),
                    detail: format!(
                        "Link records {} itemized rows, found {}",
                        expected_count, row_count
                    ),
                });
            }
            if total_cents != sum_cents {
                issues.push(IntegrityIssue {
                    kind: IntegrityIssueKind::SumMismatch,
                    bill_id: Some(bill_id),
                    cycle_id: Some(cycle_id),
                    detail: format!(
                        "Visible itemized rows sum to {}, cycle total is {}",
                        from_cents(sum_cents),
                        from_cents(total_cents)
                    ),
                });
            }
        }

        if issues.is_empty() {
            info!("Integrity check passed");
        } else {
            error!(count = issues.len(), "Integrity check found violations");
        }

        Ok(issues)
    }
}
