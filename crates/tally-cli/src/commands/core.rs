//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `open_db` - Shared utility to open the database
//! - `load_config` - Reconciliation config from --config or the default locations
//! - `resolve_account` - Look up an account by name
//! - `cmd_init` - Initialize the database

use std::path::Path;

use anyhow::{Context, Result};
use tally_core::db::Database;
use tally_core::ReconcileConfig;
use tracing::debug;

/// Open database with encryption by default, or unencrypted if --no-encrypt
pub fn open_db(db_path: &Path, no_encrypt: bool) -> Result<Database> {
    let path_str = db_path
        .to_str()
        .context("Database path must be valid UTF-8")?;
    if no_encrypt {
        Database::new_unencrypted(path_str).context("Failed to open database (unencrypted)")
    } else {
        Database::new(path_str).context("Failed to open database")
    }
}

/// Load the reconciliation config, preferring an explicit --config path
pub fn load_config(path: Option<&Path>) -> Result<ReconcileConfig> {
    let config = match path {
        Some(path) => ReconcileConfig::from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ReconcileConfig::load().context("Failed to load reconciliation config")?,
    };
    debug!(
        reject_threshold = %config.reject_threshold_percent,
        window_days = config.window_days,
        "Reconciliation config loaded"
    );
    Ok(config)
}

/// Resolve an account name to its ID
pub fn resolve_account(db: &Database, name: &str) -> Result<i64> {
    db.get_account_by_name(name)?
        .map(|a| a.id)
        .ok_or_else(|| {
            anyhow::anyhow!(
                "Account '{}' not found. Add it with: tally account add \"{}\"",
                name,
                name
            )
        })
}

pub fn cmd_init(db_path: &Path, no_encrypt: bool, config: &ReconcileConfig) -> Result<()> {
    println!("🔧 Initializing database at {}...", db_path.display());

    let db = open_db(db_path, no_encrypt)?;

    db.seed_categories(config)
        .context("Failed to seed categories")?;
    println!(
        "   Seeded categories: {}, {}, {}",
        config.bill_category, config.expense_category, config.credit_category
    );

    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else {
        println!("   🔒 Encryption: ENABLED");
    }

    println!("✅ Database initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Add a card account: tally account add \"My Card\"");
    println!("  2. Import a statement: tally import --file statement.csv --account \"My Card\"");
    println!("  3. Record the bill payment: tally bill add --date 2024-11-06 --amount 1000.00");
    println!("  4. Reconcile: tally reconcile");

    Ok(())
}
