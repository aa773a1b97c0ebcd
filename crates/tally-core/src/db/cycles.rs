//! Billing cycles, statement lines and the link registry
//!
//! A cycle is keyed by (account_id, "YYYY-MM"). Its status moves between
//! pending, awaiting_selection and no_match until a bill is linked; the
//! `cycle_links` table holds at most one row per cycle and per bill.

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info};

use super::{parse_date, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{
    BillingCycle, CycleDetail, CycleLink, CyclePage, CycleStatus, CycleSummary, CycleTotals,
    MatchCandidate, StatementLine,
};
use crate::money::{from_cents, percent_difference, to_cents};
use crate::statement::{cycle_start, cycle_totals, line_hashes};

const CYCLE_SELECT: &str = r#"
    SELECT bc.id, bc.account_id, bc.billing_cycle, bc.status, bc.total_cents,
           bc.transaction_count, bc.oldest_date, bc.newest_date, bc.marker_date,
           bc.potential_matches, bc.created_at, bc.updated_at,
           l.id, l.cycle_id, l.bill_transaction_id, l.cycle_total_cents, l.bill_amount_cents,
           l.amount_difference_cents, l.has_mismatch, l.forced,
           l.linked_transaction_count, l.linked_at
    FROM billing_cycles bc
    LEFT JOIN cycle_links l ON l.cycle_id = bc.id
"#;

const LINK_SELECT: &str = r#"
    SELECT id, cycle_id, bill_transaction_id, cycle_total_cents, bill_amount_cents,
           amount_difference_cents, has_mismatch, forced, linked_transaction_count, linked_at
    FROM cycle_links
"#;

/// Result of merging statement lines into a cycle
#[derive(Debug, Clone)]
pub struct CycleUpsert {
    pub cycle_id: i64,
    pub new_lines: usize,
    pub duplicate_lines: usize,
    pub status: CycleStatus,
    /// Totals over every stored line of the cycle
    pub totals: CycleTotals,
}

impl Database {
    /// Store statement lines under their cycle, creating it as pending.
    ///
    /// Lines already stored (same dedup hash) are skipped. New lines on a
    /// linked cycle are a conflict; new lines on a no_match or
    /// awaiting_selection cycle put it back to pending.
    pub fn register_statement(
        &self,
        account_id: i64,
        billing_cycle: &str,
        lines: &[StatementLine],
    ) -> Result<CycleUpsert> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let upsert = Self::upsert_cycle_lines(&tx, account_id, billing_cycle, lines)?;
        tx.commit()?;
        Ok(upsert)
    }

    pub(crate) fn upsert_cycle_lines(
        conn: &Connection,
        account_id: i64,
        billing_cycle: &str,
        lines: &[StatementLine],
    ) -> Result<CycleUpsert> {
        cycle_start(billing_cycle)?;

        let account_exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM accounts WHERE id = ?)",
            params![account_id],
            |row| row.get(0),
        )?;
        if !account_exists {
            return Err(Error::NotFound(format!("Account {} not found", account_id)));
        }

        let existing: Option<(i64, String)> = conn
            .query_row(
                "SELECT id, status FROM billing_cycles WHERE account_id = ? AND billing_cycle = ?",
                params![account_id, billing_cycle],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let hashes = line_hashes(lines);

        let cycle_id = match existing {
            Some((id, status)) if status == CycleStatus::Linked.as_str() => {
                let mut unseen = 0;
                for hash in &hashes {
                    let known: bool = conn.query_row(
                        "SELECT EXISTS(SELECT 1 FROM statement_lines WHERE cycle_id = ? AND import_hash = ?)",
                        params![id, hash],
                        |row| row.get(0),
                    )?;
                    if !known {
                        unseen += 1;
                    }
                }
                if unseen > 0 {
                    return Err(Error::Conflict(format!(
                        "Billing cycle {} is already linked; collapse its bill before importing {} new line(s)",
                        billing_cycle, unseen
                    )));
                }
                let stored = Self::fetch_cycle_lines(conn, id)?;
                return Ok(CycleUpsert {
                    cycle_id: id,
                    new_lines: 0,
                    duplicate_lines: lines.len(),
                    status: CycleStatus::Linked,
                    totals: cycle_totals(&stored)?,
                });
            }
            Some((id, _)) => id,
            None => {
                conn.execute(
                    "INSERT INTO billing_cycles (account_id, billing_cycle, status) VALUES (?, ?, ?)",
                    params![account_id, billing_cycle, CycleStatus::Pending.as_str()],
                )?;
                let id = conn.last_insert_rowid();
                debug!(cycle_id = id, account_id, billing_cycle, "Created billing cycle");
                id
            }
        };

        let mut new_lines = 0;
        for (line, hash) in lines.iter().zip(&hashes) {
            new_lines += conn.execute(
                r#"
                INSERT OR IGNORE INTO statement_lines
                    (cycle_id, date, description, amount_cents, installment_current,
                     installment_total, is_payment_marker, import_hash)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
                params![
                    cycle_id,
                    line.date.to_string(),
                    line.description,
                    to_cents(line.amount)?,
                    line.installment_current,
                    line.installment_total,
                    line.is_payment_marker,
                    hash,
                ],
            )?;
        }

        let stored = Self::fetch_cycle_lines(conn, cycle_id)?;
        let totals = cycle_totals(&stored)?;

        conn.execute(
            r#"
            UPDATE billing_cycles
            SET total_cents = ?, transaction_count = ?, oldest_date = ?, newest_date = ?,
                marker_date = ?,
                status = CASE
                    WHEN ? > 0 AND status IN ('no_match', 'awaiting_selection') THEN 'pending'
                    ELSE status
                END,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
            params![
                to_cents(totals.total_amount)?,
                totals.transaction_count as i64,
                totals.oldest_date.map(|d| d.to_string()),
                totals.newest_date.map(|d| d.to_string()),
                totals.marker_date.map(|d| d.to_string()),
                new_lines as i64,
                cycle_id,
            ],
        )?;

        let status: String = conn.query_row(
            "SELECT status FROM billing_cycles WHERE id = ?",
            params![cycle_id],
            |row| row.get(0),
        )?;

        info!(
            cycle_id,
            billing_cycle,
            new_lines,
            duplicates = lines.len() - new_lines,
            "Registered statement lines"
        );

        Ok(CycleUpsert {
            cycle_id,
            new_lines,
            duplicate_lines: lines.len() - new_lines,
            status: status.parse().unwrap_or(CycleStatus::Pending),
            totals,
        })
    }

    /// Get a cycle by account and "YYYY-MM"
    pub fn get_cycle(&self, account_id: i64, billing_cycle: &str) -> Result<Option<BillingCycle>> {
        let conn = self.conn()?;
        Self::fetch_cycle(&conn, account_id, billing_cycle)
    }

    /// Get a cycle together with its stored lines
    pub fn get_cycle_detail(
        &self,
        account_id: i64,
        billing_cycle: &str,
    ) -> Result<Option<CycleDetail>> {
        let conn = self.conn()?;
        let Some(cycle) = Self::fetch_cycle(&conn, account_id, billing_cycle)? else {
            return Ok(None);
        };
        let lines = Self::fetch_cycle_lines(&conn, cycle.id)?;
        Ok(Some(CycleDetail { cycle, lines }))
    }

    /// Stored lines of a cycle, oldest first; same-day lines keep import order
    pub fn get_cycle_lines(&self, cycle_id: i64) -> Result<Vec<StatementLine>> {
        let conn = self.conn()?;
        Self::fetch_cycle_lines(&conn, cycle_id)
    }

    /// Cycles that are not linked, newest cycle first
    pub fn list_pending_cycles(&self, limit: i64, offset: i64) -> Result<CyclePage> {
        let conn = self.conn()?;

        let sql = format!(
            "{} WHERE bc.status != 'linked' ORDER BY bc.billing_cycle DESC, bc.id DESC LIMIT ? OFFSET ?",
            CYCLE_SELECT
        );
        let mut stmt = conn.prepare(&sql)?;
        let cycles = stmt
            .query_map(params![limit, offset], Self::row_to_cycle)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let summary = conn.query_row(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(total_cents), 0),
                   COALESCE(SUM(status = 'awaiting_selection'), 0),
                   COALESCE(SUM(status = 'no_match'), 0)
            FROM billing_cycles
            WHERE status != 'linked'
            "#,
            [],
            |row| {
                Ok(CycleSummary {
                    total_cycles: row.get(0)?,
                    total_amount: from_cents(row.get(1)?),
                    awaiting_selection: row.get(2)?,
                    no_match: row.get(3)?,
                    ..Default::default()
                })
            },
        )?;

        Ok(CyclePage { cycles, summary })
    }

    /// Linked cycles, newest cycle first
    pub fn list_linked_cycles(&self, limit: i64, offset: i64) -> Result<CyclePage> {
        let conn = self.conn()?;

        let sql = format!(
            "{} WHERE l.id IS NOT NULL ORDER BY bc.billing_cycle DESC, bc.id DESC LIMIT ? OFFSET ?",
            CYCLE_SELECT
        );
        let mut stmt = conn.prepare(&sql)?;
        let cycles = stmt
            .query_map(params![limit, offset], Self::row_to_cycle)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let summary = conn.query_row(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(l.cycle_total_cents), 0),
                   COALESCE(SUM(l.has_mismatch), 0),
                   COALESCE(SUM(l.amount_difference_cents), 0)
            FROM cycle_links l
            "#,
            [],
            |row| {
                Ok(CycleSummary {
                    total_cycles: row.get(0)?,
                    total_amount: from_cents(row.get(1)?),
                    mismatched: row.get(2)?,
                    total_difference: from_cents(row.get(3)?),
                    ..Default::default()
                })
            },
        )?;

        Ok(CyclePage { cycles, summary })
    }

    /// All cycles in a status, oldest cycle first
    pub fn list_cycles_with_status(
        &self,
        status: CycleStatus,
        account_id: Option<i64>,
    ) -> Result<Vec<BillingCycle>> {
        let conn = self.conn()?;
        let sql = format!(
            "{} WHERE bc.status = ?1 AND (?2 IS NULL OR bc.account_id = ?2) ORDER BY bc.billing_cycle, bc.id",
            CYCLE_SELECT
        );
        let mut stmt = conn.prepare(&sql)?;
        let cycles = stmt
            .query_map(params![status.as_str(), account_id], Self::row_to_cycle)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(cycles)
    }

    /// Record a cycle's status, optionally replacing its candidate snapshot
    pub fn update_cycle_status(
        &self,
        cycle_id: i64,
        status: CycleStatus,
        candidates: Option<&[MatchCandidate]>,
    ) -> Result<()> {
        let conn = self.conn()?;
        Self::set_cycle_status(&conn, cycle_id, status, candidates)
    }

    pub(crate) fn set_cycle_status(
        conn: &Connection,
        cycle_id: i64,
        status: CycleStatus,
        candidates: Option<&[MatchCandidate]>,
    ) -> Result<()> {
        let updated = match candidates {
            Some(candidates) => conn.execute(
                r#"
                UPDATE billing_cycles
                SET status = ?, potential_matches = ?, updated_at = CURRENT_TIMESTAMP
                WHERE id = ?
                "#,
                params![status.as_str(), serde_json::to_string(candidates)?, cycle_id],
            )?,
            None => conn.execute(
                "UPDATE billing_cycles SET status = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
                params![status.as_str(), cycle_id],
            )?,
        };

        if updated == 0 {
            return Err(Error::NotFound(format!("Billing cycle {} not found", cycle_id)));
        }
        Ok(())
    }

    /// Put no_match and awaiting_selection cycles back to pending
    pub(crate) fn reopen_unresolved_cycles(conn: &Connection) -> Result<usize> {
        let reopened = conn.execute(
            r#"
            UPDATE billing_cycles
            SET status = 'pending', updated_at = CURRENT_TIMESTAMP
            WHERE status IN ('no_match', 'awaiting_selection')
            "#,
            [],
        )?;
        Ok(reopened)
    }

    /// Active link for a bill, if any
    pub fn get_link_for_bill(&self, bill_id: i64) -> Result<Option<CycleLink>> {
        let conn = self.conn()?;
        Self::fetch_link_by_bill(&conn, bill_id)
    }

    pub(crate) fn fetch_cycle(
        conn: &Connection,
        account_id: i64,
        billing_cycle: &str,
    ) -> Result<Option<BillingCycle>> {
        let sql = format!(
            "{} WHERE bc.account_id = ? AND bc.billing_cycle = ?",
            CYCLE_SELECT
        );
        let cycle = conn
            .query_row(&sql, params![account_id, billing_cycle], Self::row_to_cycle)
            .optional()?;
        Ok(cycle)
    }

    pub(crate) fn fetch_cycle_lines(conn: &Connection, cycle_id: i64) -> Result<Vec<StatementLine>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT date, description, amount_cents, installment_current, installment_total,
                   is_payment_marker
            FROM statement_lines
            WHERE cycle_id = ?
            ORDER BY date, id
            "#,
        )?;

        let lines = stmt
            .query_map(params![cycle_id], |row| {
                let date_str: String = row.get(0)?;
                Ok(StatementLine {
                    date: parse_date(&date_str),
                    description: row.get(1)?,
                    amount: from_cents(row.get(2)?),
                    installment_current: row.get(3)?,
                    installment_total: row.get(4)?,
                    is_payment_marker: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(lines)
    }

    pub(crate) fn fetch_link_by_bill(conn: &Connection, bill_id: i64) -> Result<Option<CycleLink>> {
        let sql = format!("{} WHERE bill_transaction_id = ?", LINK_SELECT);
        let link = conn
            .query_row(&sql, params![bill_id], Self::row_to_link)
            .optional()?;
        Ok(link)
    }

    pub(crate) fn fetch_link_by_cycle(
        conn: &Connection,
        cycle_id: i64,
    ) -> Result<Option<CycleLink>> {
        let sql = format!("{} WHERE cycle_id = ?", LINK_SELECT);
        let link = conn
            .query_row(&sql, params![cycle_id], Self::row_to_link)
            .optional()?;
        Ok(link)
    }

    fn row_to_link(row: &rusqlite::Row) -> rusqlite::Result<CycleLink> {
        Self::link_columns(row, 0)
    }

    /// Read the `LINK_SELECT` column layout starting at `offset`
    fn link_columns(row: &rusqlite::Row, offset: usize) -> rusqlite::Result<CycleLink> {
        let bill_cents: i64 = row.get(offset + 4)?;
        let difference_cents: i64 = row.get(offset + 5)?;
        let linked_at_str: String = row.get(offset + 9)?;

        Ok(CycleLink {
            id: row.get(offset)?,
            cycle_id: row.get(offset + 1)?,
            bill_transaction_id: row.get(offset + 2)?,
            cycle_total: from_cents(row.get(offset + 3)?),
            bill_amount: from_cents(bill_cents),
            amount_difference: from_cents(difference_cents),
            difference_percent: percent_difference(
                from_cents(difference_cents),
                from_cents(bill_cents),
            ),
            has_mismatch: row.get(offset + 6)?,
            forced: row.get(offset + 7)?,
            linked_transaction_count: row.get(offset + 8)?,
            linked_at: parse_datetime(&linked_at_str),
        })
    }

    fn row_to_cycle(row: &rusqlite::Row) -> rusqlite::Result<BillingCycle> {
        let status_str: String = row.get(3)?;
        let oldest: Option<String> = row.get(6)?;
        let newest: Option<String> = row.get(7)?;
        let marker: Option<String> = row.get(8)?;
        let matches_json: Option<String> = row.get(9)?;
        let created_at_str: String = row.get(10)?;
        let updated_at_str: String = row.get(11)?;

        // LEFT JOIN: link columns are NULL for unlinked cycles
        let link_id: Option<i64> = row.get(12)?;
        let link = match link_id {
            Some(_) => Some(Self::link_columns(row, 12)?),
            None => None,
        };

        Ok(BillingCycle {
            id: row.get(0)?,
            account_id: row.get(1)?,
            billing_cycle: row.get(2)?,
            status: status_str.parse().unwrap_or(CycleStatus::Pending),
            total_amount: from_cents(row.get(4)?),
            transaction_count: row.get(5)?,
            oldest_date: oldest.as_deref().map(parse_date),
            newest_date: newest.as_deref().map(parse_date),
            marker_date: marker.as_deref().map(parse_date),
            potential_matches: matches_json
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default(),
            link,
            created_at: parse_datetime(&created_at_str),
            updated_at: parse_datetime(&updated_at_str),
        })
    }
}
