//! Tally CLI - Credit-card statement reconciliation
//!
//! Usage:
//!   tally init                                  Initialize database
//!   tally import --file CSV --account NAME      Import a statement as a pending cycle
//!   tally bill add --date D --amount A          Record a card bill payment
//!   tally reconcile                             Link pending cycles to bills
//!   tally serve --port 3000                     Start web server

mod cli;
mod commands;


use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    let config = commands::load_config(cli.config.as_deref())?;

    let open = || commands::open_db(&cli.db, cli.no_encrypt);

    match cli.command {
        Commands::Init => commands::cmd_init(&cli.db, cli.no_encrypt, &config),
        Commands::Account { action } => {
            let db = open()?;
            match action {
                AccountAction::Add { name, issuer } => {
                    commands::cmd_account_add(&db, &name, issuer.as_deref()).map(|_| ())
                }
                AccountAction::List => commands::cmd_accounts_list(&db),
            }
        }
        Commands::Bill { action } => {
            let db = open()?;
            match action {
                BillAction::Add {
                    date,
                    amount,
                    description,
                    account,
                } => commands::cmd_bill_add(
                    &db,
                    &config,
                    &date,
                    &amount,
                    &description,
                    account.as_deref(),
                )
                .map(|_| ()),
            }
        }
        Commands::Transactions { limit, bill, all } => {
            commands::cmd_transactions_list(&open()?, limit, bill, all)
        }
        Commands::Import {
            file,
            account,
            cycle,
            reconcile,
        } => commands::cmd_import_statement(
            &open()?,
            &config,
            &file,
            &account,
            cycle.as_deref(),
            reconcile,
        )
        .map(|_| ()),
        Commands::Preview {
            file,
            account,
            cycle,
        } => commands::cmd_preview(&open()?, &config, &file, &account, cycle.as_deref()),
        Commands::Cycles { action } => {
            let db = open()?;
            match action {
                None => commands::cmd_cycles_pending(&db, 50, 0),
                Some(CyclesAction::Pending { limit, offset }) => {
                    commands::cmd_cycles_pending(&db, limit, offset)
                }
                Some(CyclesAction::Linked { limit, offset }) => {
                    commands::cmd_cycles_linked(&db, limit, offset)
                }
                Some(CyclesAction::Show { account, cycle }) => {
                    commands::cmd_cycle_show(&db, &account, &cycle)
                }
            }
        }
        Commands::Candidates { account, cycle } => {
            commands::cmd_candidates(&open()?, &config, &account, &cycle)
        }
        Commands::Link {
            account,
            cycle,
            bill,
            force,
        } => commands::cmd_link(&open()?, &config, &account, &cycle, bill, force).map(|_| ()),
        Commands::Select {
            account,
            cycle,
            bill,
            keep_pending,
            force,
        } => commands::cmd_select(
            &open()?,
            &config,
            &account,
            &cycle,
            bill,
            keep_pending,
            force,
        )
        .map(|_| ()),
        Commands::Unlink { account, cycle } => {
            commands::cmd_unlink(&open()?, &config, &account, &cycle).map(|_| ())
        }
        Commands::Collapse { bill } => commands::cmd_collapse(&open()?, bill).map(|_| ()),
        Commands::Reconcile { account, json } => {
            commands::cmd_reconcile(&open()?, &config, account.as_deref(), json).map(|_| ())
        }
        Commands::Verify => {
            let issues = commands::cmd_verify(&open()?)?;
            if issues > 0 {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Serve {
            port,
            host,
            no_auth,
        } => commands::cmd_serve(&cli.db, &host, port, no_auth, cli.no_encrypt, config).await,
    }
}
