//! CPEE Replay
//!
//! Records service calls from CPEE execution traces and answers live calls
//! of the process engine with the recorded responses, at the recorded pace.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use replay_core::config::{ConfigLoader, ReplayConfig};
use replay_core::matcher::Matcher;
use replay_core::replay::ReplayScheduler;
use replay_core::store::{InteractionStore, SettingsStore, ACTIVE_TABLE_KEY};
use replay_correlate::{ingest_directory, IngestMode, IngestOptions};
use replay_export::{CallbackConfig, CallbackDelivery};
use replay_store::SqliteStore;
use replay_web::{ReplayService, WebConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "cpee-replay")]
#[command(version)]
#[command(about = "Record and replay of CPEE service calls", long_about = None)]
struct Cli {
    /// Increase verbosity
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "CPEE_REPLAY_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file (overrides the configured path)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the replay HTTP server
    Serve {
        /// Bind address
        #[arg(long)]
        host: Option<String>,

        /// Listen port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Load a directory of trace files into a table
    LoadLogs {
        table: String,

        dir: PathBuf,

        /// Keep existing rows instead of recreating the table
        #[arg(long)]
        append: bool,
    },

    /// Create an empty table
    CreateTable { table: String },

    /// List tables with their row counts
    ListTables,

    /// Show the columns and row count of a table
    Metadata { table: String },

    /// Delete a table and all its rows
    DeleteTable { table: String },

    /// Show the most recently inserted rows of a table
    ListRows {
        table: String,

        /// Number of rows to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Delete every row of one process instance
    DeleteInstance { table: String, instance: String },

    /// Select the table live requests are matched against
    SetReplayTable { table: String },

    /// Show persisted settings
    ShowSettings,

    /// Remove all persisted settings
    ClearSettings,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loaded = ConfigLoader::new().with_cli_path(cli.config.clone()).load();
    let mut config = loaded.as_ref().ok().cloned().unwrap_or_default();
    if let Some(db) = cli.db {
        config.store.path = db;
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level(cli.verbose, &config.server.log_level))
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match loaded {
        Ok(_) => info!("Configuration loaded successfully"),
        Err(e) => warn!("Failed to load configuration: {}, using defaults", e),
    }

    match cli.command {
        Commands::Serve { host, port } => serve_command(config, host, port).await,
        Commands::LoadLogs { table, dir, append } => {
            let store = open_store(&config)?;
            load_logs_command(&store, &config, &table, &dir, append)
        }
        Commands::CreateTable { table } => create_table_command(&*open_store(&config)?, &table),
        Commands::ListTables => list_tables_command(&*open_store(&config)?),
        Commands::Metadata { table } => metadata_command(&*open_store(&config)?, &table),
        Commands::DeleteTable { table } => delete_table_command(&*open_store(&config)?, &table),
        Commands::ListRows { table, limit } => {
            list_rows_command(&*open_store(&config)?, &table, limit)
        }
        Commands::DeleteInstance { table, instance } => {
            delete_instance_command(&*open_store(&config)?, &table, &instance)
        }
        Commands::SetReplayTable { table } => {
            set_replay_table_command(&*open_store(&config)?, &table)
        }
        Commands::ShowSettings => show_settings_command(&*open_store(&config)?),
        Commands::ClearSettings => clear_settings_command(&*open_store(&config)?),
    }
}

/// CLI verbose flag takes precedence, then config
fn log_level(verbose: u8, configured: &str) -> Level {
    match verbose {
        0 => match configured.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN,
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn open_store(config: &ReplayConfig) -> anyhow::Result<Arc<SqliteStore>> {
    let path = &config.store.path;
    let store = SqliteStore::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    Ok(Arc::new(store))
}

fn require_name(table: &str) -> anyhow::Result<&str> {
    let table = table.trim();
    if table.is_empty() {
        bail!("Table name must not be empty");
    }
    Ok(table)
}

fn require_table(store: &SqliteStore, table: &str) -> anyhow::Result<()> {
    if !store.table_exists(table)? {
        bail!("Table '{}' does not exist.", table);
    }
    Ok(())
}

async fn serve_command(
    config: ReplayConfig,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let store = open_store(&config)?;
    let delivery = CallbackDelivery::new(CallbackConfig::from_settings(&config.delivery))
        .context("Failed to build callback client")?;

    let matcher = Arc::new(Matcher::from_seed(store.clone(), config.matching.seed));
    let service = ReplayService::new(
        matcher,
        store.clone(),
        ReplayScheduler::new(Arc::new(delivery)),
        config.store.default_table.clone(),
    );

    let mut web = WebConfig::from_settings(&config.server);
    if let Some(host) = host {
        web.host = host;
    }
    if let Some(port) = port {
        web.port = port;
    }

    println!();
    println!("  CPEE Replay v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("  Database: {}", config.store.path.display());
    println!(
        "  Replay endpoint: http://{}:{}/cpee/replay",
        web.host, web.port
    );
    println!();
    println!("  Press Ctrl+C to stop");
    println!();

    replay_web::start_server(web, service).await
}

fn load_logs_command(
    store: &SqliteStore,
    config: &ReplayConfig,
    table: &str,
    dir: &Path,
    append: bool,
) -> anyhow::Result<()> {
    let table = require_name(table)?;
    if !dir.is_dir() {
        bail!("Log directory not found: {}", dir.display());
    }

    let mode = if append {
        IngestMode::Append
    } else {
        IngestMode::Replace
    };
    let options = IngestOptions::from_settings(&config.ingest, mode);
    let report = ingest_directory(store, store, dir, table, &options)?;

    println!(
        "Loaded {} file(s) into '{}': {} interaction(s), {} new row(s)",
        report.files_processed, table, report.interactions, report.rows_inserted
    );
    if report.files_failed > 0 {
        println!("  {} file(s) could not be read", report.files_failed);
    }
    Ok(())
}

fn create_table_command(store: &SqliteStore, table: &str) -> anyhow::Result<()> {
    let table = require_name(table)?;
    store.create_table(table)?;
    println!("Table '{}' is ready", table);
    Ok(())
}

fn list_tables_command(store: &SqliteStore) -> anyhow::Result<()> {
    let tables = store.list_tables()?;
    if tables.is_empty() {
        println!("No tables");
        return Ok(());
    }

    let active = store.get_setting(ACTIVE_TABLE_KEY)?;
    for table in tables {
        let marker = if active.as_deref() == Some(table.name.as_str()) {
            "*"
        } else {
            " "
        };
        println!("{} {:<30} {:>8} rows", marker, table.name, table.row_count);
    }
    Ok(())
}

fn metadata_command(store: &SqliteStore, table: &str) -> anyhow::Result<()> {
    let table = require_name(table)?;
    require_table(store, table)?;

    let description = store.describe(table)?;
    println!("Table: {}", description.name);
    println!("Rows:  {}", description.row_count);
    println!();
    for column in description.columns {
        let mut flags = Vec::new();
        if column.primary_key {
            flags.push("primary key");
        }
        if column.not_null {
            flags.push("not null");
        }
        println!(
            "  {:<16} {:<10} {}",
            column.name,
            column.data_type,
            flags.join(", ")
        );
    }
    Ok(())
}

fn delete_table_command(store: &SqliteStore, table: &str) -> anyhow::Result<()> {
    let table = require_name(table)?;
    require_table(store, table)?;
    store.drop_table(table)?;
    println!("Deleted table '{}'", table);
    Ok(())
}

fn list_rows_command(store: &SqliteStore, table: &str, limit: usize) -> anyhow::Result<()> {
    let table = require_name(table)?;
    if limit == 0 {
        bail!("Limit must be a positive number");
    }
    require_table(store, table)?;

    let rows = store.recent_rows(table, limit)?;
    if rows.is_empty() {
        println!("Table '{}' is empty", table);
    }
    for row in rows {
        println!("{}", serde_json::to_string_pretty(&row)?);
    }
    Ok(())
}

fn delete_instance_command(
    store: &SqliteStore,
    table: &str,
    instance: &str,
) -> anyhow::Result<()> {
    let table = require_name(table)?;
    require_table(store, table)?;
    let deleted = store.delete_instance(table, instance)?;
    println!(
        "Deleted {} row(s) of instance {} from '{}'",
        deleted, instance, table
    );
    Ok(())
}

fn set_replay_table_command(store: &SqliteStore, table: &str) -> anyhow::Result<()> {
    let table = require_name(table)?;
    require_table(store, table)?;
    store.set_setting(ACTIVE_TABLE_KEY, table)?;
    println!("Replay table set to '{}'", table);
    Ok(())
}

fn show_settings_command(store: &SqliteStore) -> anyhow::Result<()> {
    let settings = store.list_settings()?;
    if settings.is_empty() {
        println!("No settings stored");
    }
    for (key, value) in settings {
        println!("{} = {}", key, value);
    }
    Ok(())
}

fn clear_settings_command(store: &SqliteStore) -> anyhow::Result<()> {
    store.clear_settings()?;
    println!("Settings cleared");
    Ok(())
}
