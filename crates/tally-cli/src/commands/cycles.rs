//! Billing cycle commands: listings, candidates and link control

use anyhow::{Context, Result};
use tally_core::db::Database;
use tally_core::models::{
    BillingCycle, CollapseResult, LinkResult, MatchCandidate, Selection, SelectionOutcome,
};
use tally_core::{ReconcileConfig, Reconciler};

use super::{resolve_account, truncate};

fn print_cycle_row(cycle: &BillingCycle) {
    let link = cycle
        .link
        .as_ref()
        .map(|l| {
            let flag = if l.forced {
                " ⚠️ forced"
            } else if l.has_mismatch {
                " ⚠️"
            } else {
                ""
            };
            format!(
                " │ bill {} diff {} ({}%){}",
                l.bill_transaction_id, l.amount_difference, l.difference_percent, flag
            )
        })
        .unwrap_or_default();

    println!(
        "   [{}] {} │ account {} │ {:>10} │ {:>3} lines │ {}{}",
        cycle.id,
        cycle.billing_cycle,
        cycle.account_id,
        cycle.total_amount,
        cycle.transaction_count,
        cycle.status,
        link
    );
}

fn print_candidates(candidates: &[MatchCandidate]) {
    for c in candidates {
        println!(
            "   bill {:>5} │ {} │ {:>10} │ diff {} ({}%) │ {} │ {}",
            c.bill_id,
            c.date,
            c.bill_amount,
            c.difference,
            c.difference_percent,
            c.confidence,
            truncate(&c.description, 30)
        );
    }
}

fn print_link(result: &LinkResult) {
    println!(
        "✅ Linked {} to bill {} ({} transactions)",
        result.billing_cycle, result.bill_id, result.transactions_linked
    );
    if result.has_mismatch {
        println!(
            "   ⚠️  Amount difference {} ({}%){}",
            result.amount_difference,
            result.difference_percent,
            if result.forced { ", forced" } else { "" }
        );
    }
}

fn print_collapse(result: &CollapseResult) {
    println!(
        "↩️  Restored bill {} to {} ({} itemized transactions removed)",
        result.transaction_id, result.restored_amount, result.deleted_transaction_count
    );
    println!(
        "   Cycle {} is pending again; run 'tally reconcile' or 'tally link' to relink.",
        result.billing_cycle
    );
}

pub fn cmd_cycles_pending(db: &Database, limit: i64, offset: i64) -> Result<()> {
    let page = db.list_pending_cycles(limit, offset)?;

    if page.cycles.is_empty() {
        println!("✅ No pending cycles.");
        return Ok(());
    }

    println!();
    println!(
        "⏳ Pending Cycles ({} total, {} awaiting selection, {} without a bill)",
        page.summary.total_cycles, page.summary.awaiting_selection, page.summary.no_match
    );
    println!("   ─────────────────────────────────────────────────────────────");
    for cycle in &page.cycles {
        print_cycle_row(cycle);
    }
    println!("   Total unreconciled: {}", page.summary.total_amount);

    Ok(())
}

pub fn cmd_cycles_linked(db: &Database, limit: i64, offset: i64) -> Result<()> {
    let page = db.list_linked_cycles(limit, offset)?;

    if page.cycles.is_empty() {
        println!("No linked cycles yet.");
        return Ok(());
    }

    println!();
    println!(
        "🔗 Linked Cycles ({} total, {} with mismatch)",
        page.summary.total_cycles, page.summary.mismatched
    );
    println!("   ─────────────────────────────────────────────────────────────");
    for cycle in &page.cycles {
        print_cycle_row(cycle);
    }
    println!(
        "   Total linked: {} │ Total difference: {}",
        page.summary.total_amount, page.summary.total_difference
    );

    Ok(())
}

pub fn cmd_cycle_show(db: &Database, account: &str, cycle: &str) -> Result<()> {
    let account_id = resolve_account(db, account)?;
    let detail = db
        .get_cycle_detail(account_id, cycle)?
        .with_context(|| format!("Billing cycle {} not found for '{}'", cycle, account))?;

    println!();
    print_cycle_row(&detail.cycle);
    println!("   ─────────────────────────────────────────────────────────────");
    for line in &detail.lines {
        let installment = match (line.installment_current, line.installment_total) {
            (Some(c), Some(t)) => format!(" ({}/{})", c, t),
            _ => String::new(),
        };
        let marker = if line.is_payment_marker {
            " [payment]"
        } else {
            ""
        };
        println!(
            "   {} │ {:>10} │ {}{}{}",
            line.date,
            line.amount,
            truncate(&line.description, 40),
            installment,
            marker
        );
    }

    if !detail.cycle.potential_matches.is_empty() {
        println!();
        println!("   Stored candidates:");
        print_candidates(&detail.cycle.potential_matches);
    }

    Ok(())
}

pub fn cmd_candidates(
    db: &Database,
    config: &ReconcileConfig,
    account: &str,
    cycle: &str,
) -> Result<()> {
    let account_id = resolve_account(db, account)?;
    let candidates = Reconciler::with_config(db, config.clone()).candidates_for(account_id, cycle)?;

    if candidates.is_empty() {
        println!(
            "No open bills within {} days of cycle {}.",
            config.window_days, cycle
        );
        return Ok(());
    }

    println!();
    println!("🎯 Candidates for {}", cycle);
    println!("   ─────────────────────────────────────────────────────────────");
    print_candidates(&candidates);

    Ok(())
}

pub fn cmd_link(
    db: &Database,
    config: &ReconcileConfig,
    account: &str,
    cycle: &str,
    bill: i64,
    force: bool,
) -> Result<LinkResult> {
    let account_id = resolve_account(db, account)?;
    let result = Reconciler::with_config(db, config.clone()).link(account_id, cycle, bill, force)?;

    db.log_audit(
        "cli",
        "link",
        Some("billing_cycle"),
        Some(bill),
        Some(&format!("cycle={}, forced={}", cycle, result.forced)),
    )?;

    print_link(&result);
    Ok(result)
}

pub fn cmd_select(
    db: &Database,
    config: &ReconcileConfig,
    account: &str,
    cycle: &str,
    bill: Option<i64>,
    keep_pending: bool,
    force: bool,
) -> Result<SelectionOutcome> {
    let account_id = resolve_account(db, account)?;
    let selection = match (bill, keep_pending) {
        (Some(id), false) => Selection::Bill(id),
        (None, true) => Selection::KeepPending,
        _ => anyhow::bail!("Pass either --bill <ID> or --keep-pending"),
    };

    let outcome =
        Reconciler::with_config(db, config.clone()).select(account_id, cycle, selection, force)?;

    db.log_audit(
        "cli",
        "select",
        Some("billing_cycle"),
        bill,
        Some(&format!("cycle={}, keep_pending={}", cycle, keep_pending)),
    )?;

    match &outcome {
        SelectionOutcome::Linked(result) => print_link(result),
        SelectionOutcome::KeptPending { candidates, .. } => {
            println!(
                "⏳ Cycle {} kept pending ({} candidates preserved)",
                cycle,
                candidates.len()
            );
        }
    }

    Ok(outcome)
}

pub fn cmd_unlink(
    db: &Database,
    config: &ReconcileConfig,
    account: &str,
    cycle: &str,
) -> Result<CollapseResult> {
    let account_id = resolve_account(db, account)?;
    let result = Reconciler::with_config(db, config.clone()).unlink(account_id, cycle)?;

    db.log_audit(
        "cli",
        "unlink",
        Some("billing_cycle"),
        Some(result.transaction_id),
        Some(&format!("cycle={}", cycle)),
    )?;

    print_collapse(&result);
    Ok(result)
}

pub fn cmd_collapse(db: &Database, bill: i64) -> Result<CollapseResult> {
    let result = db.collapse_bill(bill)?;

    db.log_audit(
        "cli",
        "collapse",
        Some("transaction"),
        Some(bill),
        Some(&format!("cycle={}", result.billing_cycle)),
    )?;

    print_collapse(&result);
    Ok(result)
}
