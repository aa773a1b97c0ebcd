//! Statement import and preview commands

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tally_core::db::Database;
use tally_core::models::{CycleImport, DecisionKind, StatementImport};
use tally_core::statement::parse_statement_str;
use tally_core::{ReconcileConfig, Reconciler};

use super::{print_report, resolve_account};

fn read_statement(file: &Path) -> Result<String> {
    fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))
}

pub fn cmd_import_statement(
    db: &Database,
    config: &ReconcileConfig,
    file: &Path,
    account: &str,
    cycle: Option<&str>,
    reconcile: bool,
) -> Result<StatementImport> {
    println!("📥 Importing {}...", file.display());

    let account_id = resolve_account(db, account)?;
    let content = read_statement(file)?;

    let reconciler = Reconciler::with_config(db, config.clone());
    let import = reconciler.import_statement(account_id, &content, cycle)?;

    db.log_audit(
        "cli",
        "import",
        Some("billing_cycle"),
        Some(import.cycle_id),
        Some(&format!(
            "cycle={}, new={}, duplicates={}",
            import.billing_cycle, import.new_lines, import.duplicate_lines
        )),
    )?;

    println!();
    println!("   Billing cycle: {}", import.billing_cycle);
    println!("   New lines: {}", import.new_lines);
    if import.duplicate_lines > 0 {
        println!("   Duplicates skipped: {}", import.duplicate_lines);
    }
    println!("   Cycle total: {}", import.total_amount);
    println!("   Status: {}", import.status);
    for warning in &import.warnings {
        println!("   ⚠️  {}", warning);
    }

    if reconcile {
        println!();
        let report = reconciler.trigger_reconciliation(Some(account_id))?;
        print_report(&report);
    } else {
        println!();
        println!("✅ Imported. Run 'tally reconcile' to link it to a bill payment.");
    }

    Ok(import)
}

pub fn cmd_preview(
    db: &Database,
    config: &ReconcileConfig,
    file: &Path,
    account: &str,
    cycle: Option<&str>,
) -> Result<()> {
    let account_id = resolve_account(db, account)?;
    let content = read_statement(file)?;
    let parsed = parse_statement_str(&content, &config.payment_marker)?;

    let reconciler = Reconciler::with_config(db, config.clone());
    let preview = reconciler.preview_import(&[CycleImport {
        account_id,
        billing_cycle: cycle.map(String::from),
        lines: parsed.lines,
    }])?;

    println!();
    println!("🔎 Import Preview (nothing stored)");
    println!("   ─────────────────────────────────────────────────────────────");

    for m in &preview.matches {
        let decision = match m.decision {
            DecisionKind::AutoLink => "✅ would auto-link",
            DecisionKind::RequiresSelection => "❓ needs selection",
            DecisionKind::NoMatch => "⏳ no matching bill",
        };
        println!(
            "   {} │ {} lines │ total {} │ {}",
            m.billing_cycle, m.transaction_count, m.total_amount, decision
        );
        for c in &m.candidates {
            println!(
                "      bill {} │ {} │ {:>10} │ diff {} ({}%) │ {}",
                c.bill_id, c.date, c.bill_amount, c.difference, c.difference_percent, c.confidence
            );
        }
    }

    if parsed.skipped_rows > 0 {
        println!("   ⚠️  {} malformed rows skipped", parsed.skipped_rows);
    }
    for warning in &preview.warnings {
        println!("   ⚠️  {}", warning);
    }

    Ok(())
}
