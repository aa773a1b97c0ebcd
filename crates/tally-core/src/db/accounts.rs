//! Account operations

use rusqlite::{params, OptionalExtension};

use super::{parse_datetime, Database};
use crate::error::Result;
use crate::models::Account;

impl Database {
    /// Create or get an account
    pub fn upsert_account(&self, name: &str, issuer: Option<&str>) -> Result<i64> {
        let conn = self.conn()?;

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM accounts WHERE name = ?",
                params![name],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            return Ok(id);
        }

        conn.execute(
            "INSERT INTO accounts (name, issuer) VALUES (?, ?)",
            params![name, issuer],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// List all accounts
    pub fn list_accounts(&self) -> Result<Vec<Account>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, name, issuer, created_at FROM accounts ORDER BY name")?;

        let accounts = stmt
            .query_map([], Self::row_to_account)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(accounts)
    }

    /// Get an account by ID
    pub fn get_account(&self, id: i64) -> Result<Option<Account>> {
        let conn = self.conn()?;
        let account = conn
            .query_row(
                "SELECT id, name, issuer, created_at FROM accounts WHERE id = ?",
                params![id],
                Self::row_to_account,
            )
            .optional()?;

        Ok(account)
    }

    /// Get an account by name
    pub fn get_account_by_name(&self, name: &str) -> Result<Option<Account>> {
        let conn = self.conn()?;
        let account = conn
            .query_row(
                "SELECT id, name, issuer, created_at FROM accounts WHERE name = ?",
                params![name],
                Self::row_to_account,
            )
            .optional()?;

        Ok(account)
    }

    fn row_to_account(row: &rusqlite::Row) -> rusqlite::Result<Account> {
        let created_at_str: String = row.get(3)?;
        Ok(Account {
            id: row.get(0)?,
            name: row.get(1)?,
            issuer: row.get(2)?,
            created_at: parse_datetime(&created_at_str),
        })
    }
}
