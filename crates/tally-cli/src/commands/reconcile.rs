//! Reconciliation pass and integrity check commands

use anyhow::Result;
use tally_core::db::Database;
use tally_core::models::ReconciliationReport;
use tally_core::{ReconcileConfig, Reconciler};

use super::resolve_account;

/// Print a reconciliation report
pub fn print_report(report: &ReconciliationReport) {
    println!("🔄 Reconciliation Results");
    println!("   ─────────────────────────────");
    println!("   Cycles examined: {}", report.summary.examined);

    for linked in &report.auto_linked {
        let flag = if linked.has_mismatch {
            format!(
                " ⚠️ diff {} ({}%)",
                linked.amount_difference, linked.difference_percent
            )
        } else {
            String::new()
        };
        println!(
            "   ✅ {} (account {}) → bill {}, {} transactions{}",
            linked.billing_cycle,
            linked.account_id,
            linked.bill_id,
            linked.transactions_linked,
            flag
        );
    }

    for pending in &report.requires_selection {
        println!(
            "   ❓ {} (account {}) needs selection among {} candidates",
            pending.billing_cycle,
            pending.account_id,
            pending.candidates.len()
        );
        if let Some(reason) = &pending.reason {
            println!("      {}", reason);
        }
    }

    for cycle in &report.no_match {
        println!(
            "   ⏳ {} (account {}) has no matching bill yet ({})",
            cycle.billing_cycle, cycle.account_id, cycle.total_amount
        );
    }

    if report.is_empty() {
        println!("   Nothing to reconcile.");
    } else if !report.requires_selection.is_empty() {
        println!();
        println!("   Resolve with: tally select --account <NAME> <CYCLE> --bill <ID>");
    }
}

pub fn cmd_reconcile(
    db: &Database,
    config: &ReconcileConfig,
    account: Option<&str>,
    json: bool,
) -> Result<ReconciliationReport> {
    let account_id = account.map(|name| resolve_account(db, name)).transpose()?;

    let report = Reconciler::with_config(db, config.clone()).trigger_reconciliation(account_id)?;

    db.log_audit(
        "cli",
        "reconcile",
        Some("billing_cycle"),
        None,
        Some(&format!(
            "examined={}, auto_linked={}",
            report.summary.examined, report.summary.auto_linked
        )),
    )?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(report)
}

/// Scan for integrity violations; returns the number found
pub fn cmd_verify(db: &Database) -> Result<usize> {
    let issues = db.check_integrity()?;

    if issues.is_empty() {
        println!("✅ No integrity violations found.");
        return Ok(0);
    }

    println!("❌ {} integrity violations:", issues.len());
    for issue in &issues {
        println!(
            "   {:?} │ bill {} │ cycle {} │ {}",
            issue.kind,
            issue.bill_id.map(|id| id.to_string()).unwrap_or("-".into()),
            issue.cycle_id.map(|id| id.to_string()).unwrap_or("-".into()),
            issue.detail
        );
    }
    println!();
    println!("   These are never repaired automatically. Inspect the bills above before collapsing.");

    Ok(issues.len())
}
