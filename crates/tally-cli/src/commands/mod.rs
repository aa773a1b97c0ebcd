//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `core` - Database/config setup (init) and shared utilities (open_db, load_config)
//! - `accounts` - Card account commands (add, list)
//! - `transactions` - Ledger commands (bill add, transactions list)
//! - `import` - Statement import and read-only preview
//! - `cycles` - Cycle listings and link control (link, select, unlink, collapse)
//! - `reconcile` - Reconciliation pass and integrity check
//! - `serve` - Web server command

pub mod accounts;
pub mod core;
pub mod cycles;
pub mod import;
pub mod reconcile;
pub mod serve;
pub mod transactions;

// Re-export command functions for main.rs
pub use accounts::*;
pub use core::*;
pub use cycles::*;
pub use import::*;
pub use reconcile::*;
pub use serve::*;
pub use transactions::*;

/// Truncate a string to a maximum length, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
