use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rowdeck_api::{RowdeckApi, API_CONTRACT_VERSION};
use rowdeck_core::{PageRequest, DEFAULT_LIMIT, DEFAULT_PAGE};
use rowdeck_store_sqlite::RecordStore;
use serde_json::Value;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "rowdeck")]
#[command(about = "Rowdeck CLI for CSV ingestion and record search")]
struct Cli {
    #[arg(long, default_value = "./rowdeck.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ingest a CSV file into the record store.
    Ingest(IngestArgs),
    /// Print one unfiltered page of records.
    List(ListArgs),
    /// Print one page of records matching a substring query.
    Search(SearchArgs),
}

#[derive(Debug, Args)]
struct IngestArgs {
    #[arg(long)]
    file: PathBuf,
}

#[derive(Debug, Args)]
struct ListArgs {
    #[arg(long, default_value_t = DEFAULT_PAGE)]
    page: u64,
    #[arg(long, default_value_t = DEFAULT_LIMIT)]
    limit: u64,
}

#[derive(Debug, Args)]
struct SearchArgs {
    #[arg(long)]
    query: String,
    #[arg(long, default_value_t = DEFAULT_PAGE)]
    page: u64,
    #[arg(long, default_value_t = DEFAULT_LIMIT)]
    limit: u64,
}

fn with_contract_versions(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            object.insert(
                "api_contract_version".to_string(),
                Value::String(API_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "api_contract_version": API_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_versions(value))?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let store = Arc::new(RecordStore::open(&cli.db)?);
    let api = RowdeckApi::new(Arc::clone(&store));

    match cli.command {
        Command::Ingest(args) => run_ingest(&args, &api)?,
        Command::List(args) => run_list(&args, &api)?,
        Command::Search(args) => run_search(&args, &api)?,
    }

    // The api holds the other store handle; release it before close.
    drop(api);
    if let Some(store) = Arc::into_inner(store) {
        store.close()?;
    }
    Ok(())
}

fn run_ingest(args: &IngestArgs, api: &RowdeckApi) -> Result<()> {
    let bytes = fs::read(&args.file)
        .with_context(|| format!("failed to read CSV file {}", args.file.display()))?;
    let report = api.ingest_csv(&bytes)?;
    emit_json(serde_json::to_value(&report)?)
}

fn run_list(args: &ListArgs, api: &RowdeckApi) -> Result<()> {
    let page = PageRequest::new(args.page, args.limit)?;
    let listing = api.list(page)?;
    emit_json(serde_json::to_value(&listing)?)
}

fn run_search(args: &SearchArgs, api: &RowdeckApi) -> Result<()> {
    let page = PageRequest::new(args.page, args.limit)?;
    let listing = api.search(Some(&args.query), page)?;
    emit_json(serde_json::to_value(&listing)?)
}
