//! Category catalog

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::{is_constraint_violation, parse_datetime, Database};
use crate::config::ReconcileConfig;
use crate::error::{Error, Result};
use crate::models::{Category, CategoryKind};

/// Catch-all category for manually entered spending
pub const UNCATEGORIZED: &str = "Uncategorized";

impl Database {
    /// Seed the categories reconciliation relies on (idempotent)
    pub fn seed_categories(&self, config: &ReconcileConfig) -> Result<()> {
        let conn = self.conn()?;
        let seeds = [
            (config.bill_category.as_str(), CategoryKind::CardBill),
            (config.expense_category.as_str(), CategoryKind::Expense),
            (config.credit_category.as_str(), CategoryKind::Income),
            (UNCATEGORIZED, CategoryKind::Expense),
        ];

        for (name, kind) in seeds {
            Self::ensure_category(&conn, name, kind)?;
        }

        debug!("Seeded default categories");
        Ok(())
    }

    /// Create a category. Names are unique.
    pub fn create_category(&self, name: &str, kind: CategoryKind) -> Result<i64> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Validation("Category name is required".to_string()));
        }

        let conn = self.conn()?;
        match conn.execute(
            "INSERT INTO categories (name, kind) VALUES (?, ?)",
            params![name, kind.as_str()],
        ) {
            Ok(_) => Ok(conn.last_insert_rowid()),
            Err(e) if is_constraint_violation(&e) => Err(Error::Conflict(format!(
                "Category '{}' already exists",
                name
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// List all categories
    pub fn list_categories(&self) -> Result<Vec<Category>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, name, kind, created_at FROM categories ORDER BY name")?;

        let categories = stmt
            .query_map([], Self::row_to_category)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(categories)
    }

    /// Get a category by ID
    pub fn get_category(&self, id: i64) -> Result<Option<Category>> {
        let conn = self.conn()?;
        let category = conn
            .query_row(
                "SELECT id, name, kind, created_at FROM categories WHERE id = ?",
                params![id],
                Self::row_to_category,
            )
            .optional()?;

        Ok(category)
    }

    /// Get a category by name
    pub fn get_category_by_name(&self, name: &str) -> Result<Option<Category>> {
        let conn = self.conn()?;
        let category = conn
            .query_row(
                "SELECT id, name, kind, created_at FROM categories WHERE name = ?",
                params![name],
                Self::row_to_category,
            )
            .optional()?;

        Ok(category)
    }

    /// Get or create a category on an open connection/transaction
    pub(crate) fn ensure_category(conn: &Connection, name: &str, kind: CategoryKind) -> Result<i64> {
        conn.execute(
            "INSERT OR IGNORE INTO categories (name, kind) VALUES (?, ?)",
            params![name, kind.as_str()],
        )?;
        let id = conn.query_row(
            "SELECT id FROM categories WHERE name = ?",
            params![name],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn row_to_category(row: &rusqlite::Row) -> rusqlite::Result<Category> {
        let kind_str: String = row.get(2)?;
        let created_at_str: String = row.get(3)?;
        Ok(Category {
            id: row.get(0)?,
            name: row.get(1)?,
            kind: kind_str.parse().unwrap_or(CategoryKind::Expense),
            created_at: parse_datetime(&created_at_str),
        })
    }
}
