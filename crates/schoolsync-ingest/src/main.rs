//! Schoolsync - Fidelo to MySQL sync tool

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::Parser;
use schoolsync_common::logging::{init_logging, LogConfig, LogLevel};
use schoolsync_ingest::source::SourcePayload;
use schoolsync_ingest::{
    DateRange, FideloClient, JsonFileSource, MemoryStore, MySqlStore, RecordSource, RecordStore, SyncConfig,
    SyncOrchestrator, SyncProfile, SyncReport,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "schoolsync")]
#[command(author, version, about = "Sync Fidelo records into MySQL")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Fetch records and upsert them
    Sync {
        /// Built-in profile (bookings, payments) or path to a TOML profile
        #[arg(short, long, env = "SYNC_PROFILE")]
        profile: Option<String>,

        /// First day of the range (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Last day of the range (YYYY-MM-DD), defaults to today
        #[arg(long)]
        to: Option<NaiveDate>,

        /// Read a saved payload instead of calling Fidelo
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Write to an in-memory store and only report counts
        #[arg(long)]
        dry_run: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the columns a payload file would add, without writing rows
    Plan {
        /// Saved payload file
        #[arg(short, long)]
        input: PathBuf,

        /// Built-in profile (bookings, payments) or path to a TOML profile
        #[arg(short, long, env = "SYNC_PROFILE")]
        profile: Option<String>,

        /// Compare against the live database instead of an empty schema.
        /// Missing sync tables are created.
        #[arg(long)]
        database: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("schoolsync")
        .filter_directive("sqlx=warn")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let config = SyncConfig::load()?;

    match cli.command {
        Command::Sync {
            profile,
            from,
            to,
            input,
            dry_run,
            json,
        } => {
            let profile = SyncProfile::resolve(profile.as_deref().unwrap_or(&config.profile))?;
            let range = date_range(from, to, config.range_days)?;
            let source = open_source(&config, input)?;
            let store = open_store(&config, dry_run).await?;

            let mut orchestrator = SyncOrchestrator::new(profile, source, store)?;
            let report = orchestrator.run(&range).await?;
            print_report(&report, json)?;

            if report.failed > 0 {
                warn!(failed = report.failed, "Some records were not written");
            }
        },
        Command::Plan {
            input,
            profile,
            database,
        } => {
            let profile = SyncProfile::resolve(profile.as_deref().unwrap_or(&config.profile))?;
            let tables = profile.tables();

            let bytes = tokio::fs::read(&input)
                .await
                .with_context(|| format!("cannot read {}", input.display()))?;
            let records = SourcePayload::from_slice(&bytes)?.into_records()?;

            let store = open_store(&config, !database).await?;
            let source = Arc::new(JsonFileSource::new(input.clone()));
            let mut orchestrator = SyncOrchestrator::new(profile, source, store)?;
            let columns = orchestrator.plan(&records).await?;

            info!(records = records.len(), columns = columns.len(), "Schema plan ready");
            for column in &columns {
                println!("{}.{} {}", tables.table(column.target), column.name, column.column_type);
            }
        },
    }

    Ok(())
}

fn date_range(from: Option<NaiveDate>, to: Option<NaiveDate>, range_days: u64) -> Result<DateRange> {
    let until = to.unwrap_or_else(|| Utc::now().date_naive());
    match from {
        Some(from) => DateRange::new(from, until).with_context(|| format!("--from {from} is after --to {until}")),
        None => Ok(DateRange::ending_at(until, range_days)),
    }
}

fn open_source(config: &SyncConfig, input: Option<PathBuf>) -> Result<Arc<dyn RecordSource>> {
    if let Some(path) = input {
        return Ok(Arc::new(JsonFileSource::new(path)));
    }
    let fidelo = config
        .source
        .clone()
        .context("no source configured: set SYNC_SOURCE_URL or pass --input")?;
    Ok(Arc::new(FideloClient::new(fidelo)?))
}

async fn open_store(config: &SyncConfig, in_memory: bool) -> Result<Arc<dyn RecordStore>> {
    if in_memory {
        info!("Using in-memory store, nothing will be persisted");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let pool = config.database.connect().await?;
    let store = MySqlStore::new(pool);
    store.health_check().await.context("database health check failed")?;
    Ok(Arc::new(store))
}

fn print_report(report: &SyncReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("Profile:        {}", report.profile);
    println!("Source:         {}", report.source);
    if let (Some(from), Some(until)) = (report.range_from, report.range_until) {
        println!("Range:          {from}..{until}");
    }
    println!("Fetched:        {}", report.fetched);
    println!("Inserted:       {}", report.inserted);
    println!("Updated:        {}", report.updated);
    println!("Failed:         {}", report.failed);
    println!("Skipped:        {}", report.skipped);
    println!("Unkeyed:        {}", report.unkeyed);
    println!("Key collisions: {}", report.key_collisions);
    println!("Columns added:  {}", report.columns_added);
    println!("Fields dropped: {}", report.fields_dropped);
    println!("Values nulled:  {}", report.values_nulled);
    println!("Values as text: {}", report.values_as_text);
    println!("Ext. failures:  {}", report.extension_failures);
    println!("Success rate:   {:.1}%", report.success_rate());
    println!("Duration:       {:.2}s", report.duration_secs);

    for issue in &report.issues {
        println!(
            "  #{} [{}] {}{}",
            issue.record_index,
            issue.kind,
            issue.field.as_deref().map(|f| format!("{f}: ")).unwrap_or_default(),
            issue.message
        );
    }
    Ok(())
}
