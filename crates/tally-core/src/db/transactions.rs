//! Ledger transaction operations

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::info;

use super::{parse_date, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{
    BillState, CategoryKind, NewTransaction, Transaction, TransactionKind, TransactionSource,
};
use crate::money::{from_cents, to_cents};

pub(crate) const TRANSACTION_SELECT: &str = r#"
    SELECT t.id, t.account_id, t.date, t.description, t.amount_cents, t.kind,
           t.category_id, c.name, c.kind, t.is_hidden, t.bill_state,
           t.original_amount_cents, t.billing_cycle, t.credit_card_payment_id,
           t.installment_current, t.installment_total, t.source, t.created_at
    FROM transactions t
    LEFT JOIN categories c ON c.id = t.category_id
"#;

/// Filters for listing ledger transactions
#[derive(Debug, Clone, Default)]
pub struct TransactionQuery {
    pub account_id: Option<i64>,
    pub billing_cycle: Option<String>,
    /// Itemized rows of one expanded bill
    pub credit_card_payment_id: Option<i64>,
    /// Include expanded bills and payment markers
    pub include_hidden: bool,
    pub limit: i64,
    pub offset: i64,
}

impl TransactionQuery {
    pub fn new(limit: i64, offset: i64) -> Self {
        Self {
            limit,
            offset,
            ..Default::default()
        }
    }

    fn where_clause(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(id) = self.account_id {
            conditions.push("t.account_id = ?");
            params.push(Box::new(id));
        }
        if let Some(ref cycle) = self.billing_cycle {
            conditions.push("t.billing_cycle = ?");
            params.push(Box::new(cycle.clone()));
        }
        if let Some(id) = self.credit_card_payment_id {
            conditions.push("t.credit_card_payment_id = ?");
            params.push(Box::new(id));
        }
        if !self.include_hidden {
            conditions.push("t.is_hidden = 0");
        }

        if conditions.is_empty() {
            (String::new(), params)
        } else {
            (format!("WHERE {}", conditions.join(" AND ")), params)
        }
    }
}

impl Database {
    /// Record a ledger transaction.
    ///
    /// Bills (card-bill category) start in the open state. A new bill can
    /// resolve cycles that previously had no usable candidate, so those are
    /// put back to pending in the same transaction.
    pub fn create_transaction(&self, tx: &NewTransaction) -> Result<i64> {
        if tx.description.trim().is_empty() {
            return Err(Error::Validation(
                "Transaction description is required".to_string(),
            ));
        }

        let mut conn = self.conn()?;
        let db_tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let category_kind = match tx.category_id {
            Some(id) => {
                let kind: Option<String> = db_tx
                    .query_row(
                        "SELECT kind FROM categories WHERE id = ?",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()?;
                let kind =
                    kind.ok_or_else(|| Error::NotFound(format!("Category {} not found", id)))?;
                kind.parse::<CategoryKind>().ok()
            }
            None => None,
        };

        if let Some(account_id) = tx.account_id {
            let exists: bool = db_tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM accounts WHERE id = ?)",
                params![account_id],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(Error::NotFound(format!("Account {} not found", account_id)));
            }
        }

        let is_bill = category_kind == Some(CategoryKind::CardBill);
        let kind = if tx.amount.is_sign_negative() && !tx.amount.is_zero() {
            TransactionKind::Income
        } else {
            TransactionKind::Expense
        };
        if is_bill && kind == TransactionKind::Income {
            return Err(Error::Validation(
                "A card bill payment must be a positive (outgoing) amount".to_string(),
            ));
        }

        db_tx.execute(
            r#"
            INSERT INTO transactions (account_id, date, description, amount_cents, kind,
                                      category_id, bill_state, source)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                tx.account_id,
                tx.date.to_string(),
                tx.description.trim(),
                to_cents(tx.amount.abs())?,
                kind.as_str(),
                tx.category_id,
                is_bill.then_some(BillState::Open.as_str()),
                TransactionSource::Manual.as_str(),
            ],
        )?;
        let id = db_tx.last_insert_rowid();

        if is_bill {
            let reopened = Self::reopen_unresolved_cycles(&db_tx)?;
            if reopened > 0 {
                info!(bill_id = id, reopened, "New bill reopened unresolved cycles");
            }
        }

        db_tx.commit()?;
        Ok(id)
    }

    /// Get a transaction by ID
    pub fn get_transaction(&self, id: i64) -> Result<Option<Transaction>> {
        let conn = self.conn()?;
        Self::fetch_transaction(&conn, id)
    }

    /// List transactions, newest first
    pub fn list_transactions(&self, query: &TransactionQuery) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let (where_clause, mut params) = query.where_clause();
        params.push(Box::new(query.limit));
        params.push(Box::new(query.offset));

        let sql = format!(
            "{} {} ORDER BY t.date DESC, t.id DESC LIMIT ? OFFSET ?",
            TRANSACTION_SELECT, where_clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let transactions = stmt
            .query_map(param_refs.as_slice(), Self::row_to_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(transactions)
    }

    /// Count transactions matching a query (ignores limit/offset)
    pub fn count_transactions(&self, query: &TransactionQuery) -> Result<i64> {
        let conn = self.conn()?;
        let (where_clause, params) = query.where_clause();
        let sql = format!("SELECT COUNT(*) FROM transactions t {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let count = conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?;
        Ok(count)
    }

    /// Open aggregate bills dated within [from, to] that no cycle is linked to
    pub(crate) fn query_open_bills(
        conn: &Connection,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Transaction>> {
        let sql = format!(
            r#"
            {}
            WHERE c.kind = 'card_bill'
              AND t.bill_state = 'open'
              AND t.is_hidden = 0
              AND t.date BETWEEN ? AND ?
              AND t.id NOT IN (SELECT bill_transaction_id FROM cycle_links)
            ORDER BY t.date DESC, t.id DESC
            "#,
            TRANSACTION_SELECT
        );
        let mut stmt = conn.prepare(&sql)?;
        let bills = stmt
            .query_map(
                params![from.to_string(), to.to_string()],
                Self::row_to_transaction,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(bills)
    }

    pub(crate) fn fetch_transaction(conn: &Connection, id: i64) -> Result<Option<Transaction>> {
        let sql = format!("{} WHERE t.id = ?", TRANSACTION_SELECT);
        let transaction = conn
            .query_row(&sql, params![id], Self::row_to_transaction)
            .optional()?;

        Ok(transaction)
    }

    pub(crate) fn row_to_transaction(row: &rusqlite::Row) -> rusqlite::Result<Transaction> {
        let date_str: String = row.get(2)?;
        let kind_str: String = row.get(5)?;
        let category_kind: Option<String> = row.get(8)?;
        let bill_state: Option<String> = row.get(10)?;
        let original_cents: Option<i64> = row.get(11)?;
        let source_str: String = row.get(16)?;
        let created_at_str: String = row.get(17)?;

        Ok(Transaction {
            id: row.get(0)?,
            account_id: row.get(1)?,
            date: parse_date(&date_str),
            description: row.get(3)?,
            amount: from_cents(row.get(4)?),
            kind: kind_str.parse().unwrap_or_default(),
            category_id: row.get(6)?,
            category: row.get(7)?,
            category_kind: category_kind.and_then(|s| s.parse().ok()),
            is_hidden: row.get(9)?,
            bill_state: bill_state.and_then(|s| s.parse().ok()),
            original_amount: original_cents.map(from_cents),
            billing_cycle: row.get(12)?,
            credit_card_payment_id: row.get(13)?,
            installment_current: row.get(14)?,
            installment_total: row.get(15)?,
            source: source_str.parse().unwrap_or_default(),
            created_at: parse_datetime(&created_at_str),
        })
    }
}
