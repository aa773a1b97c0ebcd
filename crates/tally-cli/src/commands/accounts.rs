//! Account command implementations

use anyhow::{bail, Result};
use tally_core::db::Database;

pub fn cmd_account_add(db: &Database, name: &str, issuer: Option<&str>) -> Result<i64> {
    let name = name.trim();
    if name.is_empty() {
        bail!("Account name cannot be empty");
    }

    let existing = db.get_account_by_name(name)?;
    let id = db.upsert_account(name, issuer)?;

    if existing.is_some() {
        println!("ℹ️  Account '{}' already exists (ID {})", name, id);
    } else {
        println!("✅ Added account '{}' (ID {})", name, id);
        db.log_audit("cli", "create", Some("account"), Some(id), Some(name))?;
    }

    Ok(id)
}

pub fn cmd_accounts_list(db: &Database) -> Result<()> {
    let accounts = db.list_accounts()?;

    if accounts.is_empty() {
        println!("No accounts yet. Add one with:");
        println!("  tally account add \"My Card\"");
        return Ok(());
    }

    println!();
    println!("💳 Accounts");
    println!("   ─────────────────────────────────────────────");

    for account in accounts {
        println!(
            "   [{}] {} {}",
            account.id,
            account.name,
            account
                .issuer
                .map(|i| format!("({})", i))
                .unwrap_or_default()
        );
    }

    Ok(())
}
