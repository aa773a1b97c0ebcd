//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Tally - Reconcile credit-card statements against bill payments
#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Credit-card statement reconciliation", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path
    #[arg(long, default_value = "tally.db", global = true)]
    pub db: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable database encryption (not recommended for production)
    ///
    /// By default, the database is encrypted using SQLCipher.
    /// Set TALLY_DB_KEY environment variable with your passphrase.
    /// Use --no-encrypt only for development or testing.
    #[arg(long, global = true)]
    pub no_encrypt: bool,

    /// Reconciliation config file (tolerances, categories, payment marker)
    ///
    /// Defaults to TALLY_RECONCILE_CONFIG, then the data directory override,
    /// then the built-in defaults.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database and seed the category catalog
    Init,

    /// Manage card accounts
    Account {
        #[command(subcommand)]
        action: AccountAction,
    },

    /// Record an aggregate card bill payment
    Bill {
        #[command(subcommand)]
        action: BillAction,
    },

    /// List ledger transactions
    Transactions {
        /// Maximum number of rows
        #[arg(short, long, default_value = "20")]
        limit: i64,

        /// Only the itemized rows of this bill
        #[arg(long)]
        bill: Option<i64>,

        /// Include expanded bills and payment markers
        #[arg(long)]
        all: bool,
    },

    /// Import a statement CSV as a pending billing cycle
    Import {
        /// Statement CSV file
        #[arg(short, long)]
        file: PathBuf,

        /// Account name (created if missing)
        #[arg(short, long)]
        account: String,

        /// Billing cycle (YYYY-MM); derived from the statement if omitted
        #[arg(long)]
        cycle: Option<String>,

        /// Run a reconciliation pass for this account after importing
        #[arg(long)]
        reconcile: bool,
    },

    /// Show which bills a statement would match, without storing anything
    Preview {
        /// Statement CSV file
        #[arg(short, long)]
        file: PathBuf,

        /// Account name
        #[arg(short, long)]
        account: String,

        /// Billing cycle (YYYY-MM); derived from the statement if omitted
        #[arg(long)]
        cycle: Option<String>,
    },

    /// List billing cycles
    Cycles {
        #[command(subcommand)]
        action: Option<CyclesAction>,
    },

    /// Show ranked bill candidates for a cycle
    Candidates {
        #[arg(short, long)]
        account: String,
        /// Billing cycle (YYYY-MM)
        cycle: String,
    },

    /// Link a cycle to a bill and expand the bill
    Link {
        #[arg(short, long)]
        account: String,
        /// Billing cycle (YYYY-MM)
        cycle: String,
        /// Bill transaction ID
        bill: i64,
        /// Link even when the difference exceeds the reject threshold
        #[arg(long)]
        force: bool,
    },

    /// Resolve a cycle awaiting selection
    Select {
        #[arg(short, long)]
        account: String,
        /// Billing cycle (YYYY-MM)
        cycle: String,
        /// Bill transaction ID to link
        #[arg(long, conflicts_with = "keep_pending", required_unless_present = "keep_pending")]
        bill: Option<i64>,
        /// Leave the cycle pending with its candidates
        #[arg(long)]
        keep_pending: bool,
        /// Link even when the difference exceeds the reject threshold
        #[arg(long)]
        force: bool,
    },

    /// Unlink a cycle and restore its bill
    Unlink {
        #[arg(short, long)]
        account: String,
        /// Billing cycle (YYYY-MM)
        cycle: String,
    },

    /// Restore an expanded bill by its transaction ID
    Collapse {
        /// Bill transaction ID
        bill: i64,
    },

    /// Run one reconciliation pass over pending cycles
    Reconcile {
        /// Limit the pass to one account
        #[arg(short, long)]
        account: Option<String>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check expanded bills and links for integrity violations
    Verify,

    /// Start the web server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Disable authentication (for local development only)
        ///
        /// WARNING: Do not use this flag when exposing the server to a network.
        /// By default, the server requires an API key from TALLY_API_KEYS.
        #[arg(long)]
        no_auth: bool,
    },
}

#[derive(Subcommand)]
pub enum AccountAction {
    /// Add a card account
    Add {
        /// Account name
        name: String,
        /// Card issuer
        #[arg(long)]
        issuer: Option<String>,
    },
    /// List accounts
    List,
}

#[derive(Subcommand)]
pub enum BillAction {
    /// Add an open bill payment to the ledger
    Add {
        /// Payment date (YYYY-MM-DD)
        #[arg(long)]
        date: String,
        /// Amount paid (e.g. 1234.56 or 1.234,56)
        #[arg(long)]
        amount: String,
        #[arg(long, default_value = "CREDIT CARD PAYMENT")]
        description: String,
        /// Paying account name
        #[arg(short, long)]
        account: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum CyclesAction {
    /// Cycles not yet linked (default)
    Pending {
        #[arg(short, long, default_value = "50")]
        limit: i64,
        #[arg(long, default_value = "0")]
        offset: i64,
    },
    /// Linked cycles with their differences
    Linked {
        #[arg(short, long, default_value = "50")]
        limit: i64,
        #[arg(long, default_value = "0")]
        offset: i64,
    },
    /// Show one cycle with its lines
    Show {
        #[arg(short, long)]
        account: String,
        /// Billing cycle (YYYY-MM)
        cycle: String,
    },
}
