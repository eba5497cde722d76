pub mod builder;
pub mod cli;
pub mod columns;
pub mod config;
pub mod customer;
pub mod customer_cmd;
pub mod data;
pub mod editor;
pub mod error;
pub mod esrs;
pub mod frame;
pub mod io_utils;
pub mod persistence;
pub mod process;
pub mod storage;
pub mod table;

use std::{env, fs, sync::OnceLock};

use anyhow::{Context, Result, anyhow};
use chrono::Local;
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    cli::{Cli, Commands, ReportArgs, RunArgs},
    persistence::{CsvPersistence, HistoryStore},
    process::RunContext,
    storage::LocalStorage,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("customer_feeds", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => handle_run(&args),
        Commands::Report(args) => handle_report(&args),
        Commands::Customer(command) => customer_cmd::execute_customer(&command),
        Commands::Columns(command) => customer_cmd::execute_columns(&command),
        Commands::Emails(args) => customer_cmd::execute_emails(&args),
    }
}

fn handle_run(args: &RunArgs) -> Result<()> {
    let store = customer_cmd::open_store(&args.config)?;
    let main = store.load_main().context("Loading main configuration")?;
    let (mut customers, mut statuses) = process::load_customers(&store, &main)?;

    if !args.customers.is_empty() {
        let wanted: Vec<String> = args
            .customers
            .iter()
            .map(|name| name.trim().to_lowercase())
            .collect();
        debug!("Restricting run to customers: {wanted:?}");
        customers.retain(|c| wanted.iter().any(|w| w == c.name()));
        statuses.retain(|s| wanted.contains(&s.name));
        if customers.is_empty() && statuses.is_empty() {
            return Err(anyhow!("None of the requested customers are configured"));
        }
    }

    let source = LocalStorage::new(&args.source_dir);
    let destination = LocalStorage::new(&args.output_dir);
    let mut history = HistoryStore::new(CsvPersistence::new(&args.history_dir));
    let mut ctx = RunContext {
        source: &source,
        destination: &destination,
        history: &mut history,
        source_root: args.source_root.clone(),
    };
    statuses.extend(process::run_customers(
        &mut ctx,
        &customers,
        args.retries,
        &Local::now(),
    ));

    let (headers, rows) = table::status_table(&statuses);
    table::print_table(&headers, &rows);

    let failed: Vec<&str> = statuses
        .iter()
        .filter(|s| s.failed())
        .map(|s| s.name.as_str())
        .collect();
    if failed.is_empty() {
        info!("All {} customer(s) processed", statuses.len());
        Ok(())
    } else {
        Err(anyhow!(
            "{} customer(s) failed: {}",
            failed.len(),
            failed.join(", ")
        ))
    }
}

fn handle_report(args: &ReportArgs) -> Result<()> {
    let history = HistoryStore::new(CsvPersistence::new(&args.history_dir));
    let name = args.customer.trim().to_lowercase();
    let report = process::report_for(&history, &name)?;
    let rendered = serde_json::to_string_pretty(&report)?;
    match &args.output {
        Some(path) => {
            fs::write(path, format!("{rendered}\n"))
                .with_context(|| format!("Writing report to {path:?}"))?;
            info!("Report for '{name}' written to {path:?}");
        }
        None => println!("{rendered}"),
    }
    Ok(())
}
