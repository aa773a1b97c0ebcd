//! Tally Core Library
//!
//! Credit-card statement reconciliation:
//! - Statement normalization and billing-cycle grouping
//! - Match scoring of cycles against aggregate bill payments
//! - Link selection (auto-link, manual selection, keep pending)
//! - Atomic expand/collapse of bills into itemized transactions
//! - Batch reconciliation over every pending cycle
//! - SQLite ledger and link registry

pub mod config;
pub mod db;
pub mod error;
pub mod matching;
pub mod models;
pub mod money;
pub mod reconcile;
pub mod statement;

pub use config::ReconcileConfig;
pub use db::{AuditEntry, Database};
pub use error::{Error, Result};
pub use matching::{classify_confidence, decide, score_candidates};
pub use reconcile::Reconciler;
pub use statement::{derive_billing_cycle, parse_statement, ParsedStatement};
