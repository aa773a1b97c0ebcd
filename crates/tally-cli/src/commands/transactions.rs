//! Ledger command implementations

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tally_core::db::{Database, TransactionQuery};
use tally_core::models::NewTransaction;
use tally_core::money::parse_amount;
use tally_core::ReconcileConfig;

use super::{resolve_account, truncate};

pub fn cmd_bill_add(
    db: &Database,
    config: &ReconcileConfig,
    date: &str,
    amount: &str,
    description: &str,
    account: Option<&str>,
) -> Result<i64> {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", date))?;
    let amount = parse_amount(amount)?;
    let account_id = account.map(|name| resolve_account(db, name)).transpose()?;

    let category = db.get_category_by_name(&config.bill_category)?.ok_or_else(|| {
        anyhow::anyhow!(
            "Bill category '{}' missing. Run 'tally init' first.",
            config.bill_category
        )
    })?;

    let id = db.create_transaction(&NewTransaction {
        account_id,
        date,
        description: description.to_string(),
        amount,
        category_id: Some(category.id),
    })?;

    db.log_audit(
        "cli",
        "create",
        Some("transaction"),
        Some(id),
        Some(&format!("bill amount={}, date={}", amount, date)),
    )?;

    println!("✅ Recorded bill {} of {} on {}", id, amount, date);
    println!("   Run 'tally reconcile' to match it against pending cycles.");

    Ok(id)
}

pub fn cmd_transactions_list(
    db: &Database,
    limit: i64,
    bill: Option<i64>,
    include_hidden: bool,
) -> Result<()> {
    let query = TransactionQuery {
        credit_card_payment_id: bill,
        include_hidden,
        ..TransactionQuery::new(limit, 0)
    };
    let transactions = db.list_transactions(&query)?;

    if transactions.is_empty() {
        println!("No transactions found.");
        return Ok(());
    }

    let total = db.count_transactions(&query)?;

    println!();
    match bill {
        Some(id) => println!("📝 Itemized transactions of bill {} ({} total)", id, total),
        None => println!("📝 Recent Transactions ({} total)", total),
    }
    println!("   ─────────────────────────────────────────────────────────────");

    for tx in transactions {
        let amount_str = if tx.kind == tally_core::models::TransactionKind::Income {
            format!("\x1b[32m+{:.2}\x1b[0m", tx.amount) // Green for credits
        } else {
            format!("{:.2}", tx.amount)
        };
        let flags = match (tx.is_hidden, tx.bill_state) {
            (true, Some(_)) => " [expanded]",
            (true, None) => " [hidden]",
            (false, Some(tally_core::models::BillState::Open)) => " [open bill]",
            _ => "",
        };

        println!(
            "   [{}] {} │ {:>12} │ {}{}",
            tx.id,
            tx.date,
            amount_str,
            truncate(&tx.description, 40),
            flags
        );
    }

    Ok(())
}
