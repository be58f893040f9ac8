//! Table Log CLI
//!
//! Create tables, record mutations and travel through table history.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use chrono::{DateTime, Duration, Utc};
use clap::{Args, Parser, Subcommand};
use tablelog::config::StoreBackend;
use tablelog::{
    compatibility, retry_on_conflict, CreateTable, FileLogStore, InMemoryLogStore, LogStore,
    MatchedAction, MergeRequest, OptimizeOptions, RewriteRequest, Schema, TableId,
    TableLogConfig, TableMetadata, TableMutator, VacuumOptions,
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tablelog")]
#[command(about = "Versioned transaction log for columnar tables")]
struct Cli {
    /// Config file to load (optional)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Override the store directory
    #[arg(short, long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a table from a JSON schema file
    Create {
        /// Table name
        name: String,
        /// Schema file (JSON)
        #[arg(long)]
        schema: PathBuf,
        /// Partition column (repeatable)
        #[arg(long = "partition")]
        partition_columns: Vec<String>,
        /// Table property as key=value (repeatable)
        #[arg(long = "property", value_parser = parse_key_value)]
        properties: Vec<(String, String)>,
        /// Storage format (defaults to the configured format)
        #[arg(long)]
        format: Option<String>,
    },

    /// List all tables
    Tables,

    /// Record rows appended by a writer
    Append {
        #[command(flatten)]
        table: TableArg,
        /// Number of rows written
        #[arg(long)]
        rows: u64,
    },

    /// Record an update of matching rows
    Update {
        #[command(flatten)]
        table: TableArg,
        #[arg(long)]
        predicate: String,
        /// Rows matched by the predicate
        #[arg(long)]
        rows: u64,
    },

    /// Record a delete of matching rows
    Delete {
        #[command(flatten)]
        table: TableArg,
        #[arg(long)]
        predicate: String,
        /// Rows matched by the predicate
        #[arg(long)]
        rows: u64,
    },

    /// Record a merge of a source table into the target
    Merge {
        #[command(flatten)]
        table: TableArg,
        /// Source table name or id
        #[arg(long)]
        source: String,
        #[arg(long)]
        predicate: String,
        /// Source rows that matched a target row
        #[arg(long)]
        matched: u64,
        /// Assignment for matched rows as column=expression (repeatable)
        #[arg(long = "set", value_parser = parse_key_value)]
        set_expressions: Vec<(String, String)>,
        /// Delete matched rows instead of updating them
        #[arg(long)]
        delete_matched: bool,
    },

    /// Compact small files
    Optimize {
        #[command(flatten)]
        table: TableArg,
        /// Z-order column (repeatable)
        #[arg(long = "z-order")]
        z_order_by: Vec<String>,
    },

    /// Purge files removed before the retention window
    Vacuum {
        #[command(flatten)]
        table: TableArg,
        /// Retention in hours (defaults to the configured minimum)
        #[arg(long)]
        retain_hours: Option<i64>,
        /// Allow a retention below the configured minimum
        #[arg(long)]
        force: bool,
        /// Report what would be purged without committing
        #[arg(long)]
        dry_run: bool,
    },

    /// Replace the table schema
    Evolve {
        #[command(flatten)]
        table: TableArg,
        /// New schema file (JSON)
        #[arg(long)]
        schema: PathBuf,
        /// Accept breaking changes
        #[arg(long)]
        allow_data_loss: bool,
    },

    /// Set or remove table properties
    SetProperties {
        #[command(flatten)]
        table: TableArg,
        /// Property as key=value (repeatable)
        #[arg(long = "set", value_parser = parse_key_value)]
        set: Vec<(String, String)>,
        /// Property key to remove (repeatable)
        #[arg(long)]
        unset: Vec<String>,
    },

    /// Show commit history
    History {
        #[command(flatten)]
        table: TableArg,
        #[arg(long)]
        from: Option<i64>,
        #[arg(long)]
        to: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the table as of a version or timestamp
    Show {
        #[command(flatten)]
        table: TableArg,
        #[arg(long, conflicts_with = "timestamp")]
        version: Option<i64>,
        /// RFC 3339 timestamp
        #[arg(long)]
        timestamp: Option<DateTime<Utc>>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write a checkpoint
    Checkpoint {
        #[command(flatten)]
        table: TableArg,
        /// Version to seal (defaults to the latest)
        #[arg(long)]
        version: Option<i64>,
    },

    /// Compare or merge schema files
    Schema {
        #[command(subcommand)]
        command: SchemaCommands,
    },
}

#[derive(Subcommand)]
enum SchemaCommands {
    /// Show differences between two schema files
    Diff {
        old: PathBuf,
        new: PathBuf,
        /// Print a line diff instead of the field report
        #[arg(long)]
        text: bool,
    },

    /// Print the smallest schema both files widen into
    Merge { left: PathBuf, right: PathBuf },
}

#[derive(Args)]
struct TableArg {
    /// Table name or id
    table: String,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = TableLogConfig::load_from(cli.config.as_deref())?;
    if let Some(path) = cli.store {
        config.store.path = path;
    }
    config.validate()?;

    let max_retries = config.commit.max_retries;
    let mutator = open_mutator(&config)?;

    match cli.command {
        Commands::Create {
            name,
            schema,
            partition_columns,
            properties,
            format,
        } => {
            let request = CreateTable {
                name,
                schema: read_schema(&schema)?,
                properties: properties.into_iter().collect(),
                partition_columns,
                format,
            };
            let table = mutator.create_table(request)?;
            println!("✅ Created table {} ({})", table.name, table.id);
        }

        Commands::Tables => {
            let tables = mutator.list_tables()?;
            if tables.is_empty() {
                println!("No tables yet.");
            } else {
                println!("📚 Tables:");
                for t in tables {
                    println!(
                        "  {}  {}  v{}  {} rows  {}",
                        t.id,
                        t.name,
                        t.version,
                        t.stats.num_rows,
                        t.modified_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }
        }

        Commands::Append { table, rows } => {
            let id = resolve_table(&mutator, &table.table)?;
            let commit = retry_on_conflict(max_retries, || mutator.append_rows(id, rows))?;
            println!("✅ Appended {} rows at version {}", rows, commit.version);
        }

        Commands::Update {
            table,
            predicate,
            rows,
        } => {
            let id = resolve_table(&mutator, &table.table)?;
            let commit = retry_on_conflict(max_retries, || {
                mutator.update(id, RewriteRequest::new(predicate.clone(), rows))
            })?;
            println!("✅ Updated {} rows at version {}", rows, commit.version);
        }

        Commands::Delete {
            table,
            predicate,
            rows,
        } => {
            let id = resolve_table(&mutator, &table.table)?;
            let commit = retry_on_conflict(max_retries, || {
                mutator.delete(id, RewriteRequest::new(predicate.clone(), rows))
            })?;
            println!("✅ Deleted {} rows at version {}", rows, commit.version);
        }

        Commands::Merge {
            table,
            source,
            predicate,
            matched,
            set_expressions,
            delete_matched,
        } => {
            let id = resolve_table(&mutator, &table.table)?;
            let source = resolve_table(&mutator, &source)?;
            let set_expressions: BTreeMap<String, String> = set_expressions.into_iter().collect();
            let when_matched = if delete_matched {
                MatchedAction::Delete
            } else {
                MatchedAction::Update
            };
            let commit = retry_on_conflict(max_retries, || {
                mutator.merge(
                    id,
                    MergeRequest {
                        source,
                        predicate: predicate.clone(),
                        set_expressions: set_expressions.clone(),
                        rows_matched: matched,
                        when_matched,
                    },
                )
            })?;
            print_metrics(&commit.operation.metrics());
            println!("✅ Merged at version {}", commit.version);
        }

        Commands::Optimize { table, z_order_by } => {
            let id = resolve_table(&mutator, &table.table)?;
            let commit = retry_on_conflict(max_retries, || {
                mutator.optimize(
                    id,
                    OptimizeOptions {
                        z_order_by: z_order_by.clone(),
                        ..OptimizeOptions::default()
                    },
                )
            })?;
            print_metrics(&commit.operation.metrics());
            println!("✅ Optimized at version {}", commit.version);
        }

        Commands::Vacuum {
            table,
            retain_hours,
            force,
            dry_run,
        } => {
            let id = resolve_table(&mutator, &table.table)?;
            let hours = retain_hours.unwrap_or(config.retention.minimum_hours);
            let report = retry_on_conflict(max_retries, || {
                mutator.vacuum(
                    id,
                    VacuumOptions {
                        force,
                        dry_run,
                        ..VacuumOptions::retain(Duration::hours(hours))
                    },
                )
            })?;
            let verb = if dry_run { "Would delete" } else { "Deleted" };
            println!(
                "🧹 {} {} files ({} bytes)",
                verb, report.metrics.files_deleted, report.metrics.bytes_reclaimed
            );
            if let Some(commit) = report.commit {
                println!("✅ Vacuumed at version {}", commit.version);
            }
        }

        Commands::Evolve {
            table,
            schema,
            allow_data_loss,
        } => {
            let id = resolve_table(&mutator, &table.table)?;
            let new_schema = read_schema(&schema)?;
            let current = mutator.snapshots(id).latest()?;
            let diff = compatibility::diff(&current.schema, &new_schema);
            println!("🔍 {}", diff.summary());
            for issue in &diff.compatibility_issues {
                println!("   └─ {}", issue);
            }
            let commit = retry_on_conflict(max_retries, || {
                mutator.evolve_schema(id, new_schema.clone(), allow_data_loss)
            })?;
            println!("✅ Schema evolved at version {}", commit.version);
        }

        Commands::SetProperties { table, set, unset } => {
            let id = resolve_table(&mutator, &table.table)?;
            let set: BTreeMap<String, String> = set.into_iter().collect();
            let commit = retry_on_conflict(max_retries, || {
                mutator.set_properties(id, set.clone(), unset.clone())
            })?;
            println!("✅ Properties updated at version {}", commit.version);
        }

        Commands::History {
            table,
            from,
            to,
            json,
        } => {
            let id = resolve_table(&mutator, &table.table)?;
            let commits = mutator.history(id, from, to)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&commits)?);
            } else {
                for commit in commits.iter().rev() {
                    println!(
                        "v{:<5} {}  {}",
                        commit.version,
                        commit.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        commit.operation
                    );
                    for (key, value) in commit.operation.parameters() {
                        println!("         {} = {}", key, value);
                    }
                    print_metrics(&commit.operation.metrics());
                }
            }
        }

        Commands::Show {
            table,
            version,
            timestamp,
            json,
        } => {
            let id = resolve_table(&mutator, &table.table)?;
            let snapshots = mutator.snapshots(id);
            let metadata = match (version, timestamp) {
                (Some(v), _) => snapshots.at_version(v)?,
                (None, Some(t)) => snapshots.at_timestamp(t)?,
                (None, None) => snapshots.latest()?,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&metadata)?);
            } else {
                print_table(&metadata);
            }
        }

        Commands::Checkpoint { table, version } => {
            let id = resolve_table(&mutator, &table.table)?;
            let version = match version {
                Some(v) => v,
                None => mutator.snapshots(id).latest()?.version,
            };
            let token = mutator.checkpoint(id, version)?;
            println!("🔒 Checkpoint at version {}: {}", token.version, token.checksum);
        }

        Commands::Schema { command } => match command {
            SchemaCommands::Diff { old, new, text } => {
                let old = read_schema(&old)?;
                let new = read_schema(&new)?;
                if text {
                    print!("{}", compatibility::render_text_diff(&old, &new));
                } else {
                    let diff = compatibility::diff(&old, &new);
                    for added in &diff.added_fields {
                        println!("  + {}: {}", added.path, added.field.data_type);
                    }
                    for removed in &diff.removed_fields {
                        println!("  - {}: {}", removed.path, removed.field.data_type);
                    }
                    for modified in &diff.modified_fields {
                        println!(
                            "  ~ {}: {} -> {}",
                            modified.path, modified.old_type, modified.new_type
                        );
                    }
                    println!();
                    if diff.is_backward_compatible {
                        println!("✅ {}", diff.summary());
                    } else {
                        println!("❌ {}", diff.summary());
                        for issue in &diff.compatibility_issues {
                            println!("   └─ {}", issue);
                        }
                        std::process::exit(1);
                    }
                }
            }
            SchemaCommands::Merge { left, right } => {
                let merged = compatibility::merge(&read_schema(&left)?, &read_schema(&right)?)?;
                println!("{}", merged.to_json_pretty()?);
            }
        },
    }

    Ok(())
}

fn open_mutator(config: &TableLogConfig) -> anyhow::Result<TableMutator> {
    let store: Arc<dyn LogStore> = match config.store.backend {
        StoreBackend::File => {
            let path = config.store_path();
            Arc::new(
                FileLogStore::open(&path)
                    .with_context(|| format!("failed to open store at {}", path.display()))?,
            )
        }
        StoreBackend::Memory => {
            warn!("memory backend selected; nothing will outlive this process");
            Arc::new(InMemoryLogStore::new())
        }
    };
    Ok(TableMutator::new(store).with_settings(config.into()))
}

/// Accept a table id or a unique table name
fn resolve_table(mutator: &TableMutator, reference: &str) -> anyhow::Result<TableId> {
    if let Ok(id) = reference.parse::<TableId>() {
        return Ok(id);
    }
    let matches: Vec<TableId> = mutator
        .list_tables()?
        .into_iter()
        .filter(|t| t.name == reference)
        .map(|t| t.id)
        .collect();
    match matches.as_slice() {
        [id] => Ok(*id),
        [] => Err(anyhow!("no table named '{}'", reference)),
        _ => bail!("table name '{}' is ambiguous; use the table id", reference),
    }
}

fn read_schema(path: &Path) -> anyhow::Result<Schema> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Schema::from_json(&content).with_context(|| format!("invalid schema in {}", path.display()))
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    Ok((key.trim().to_string(), value.trim().to_string()))
}

fn print_metrics(metrics: &BTreeMap<String, u64>) {
    for (key, value) in metrics {
        println!("         {} = {}", key, value);
    }
}

fn print_table(t: &TableMetadata) {
    println!("📦 Table: {} ({})", t.name, t.id);
    println!("🔢 Version: {}", t.version);
    println!("📅 Created: {}", t.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("📅 Modified: {}", t.modified_at.format("%Y-%m-%d %H:%M:%S"));
    println!("🗂  Format: {}", t.format);
    println!(
        "🔐 Protocol: reader {}, writer {}",
        t.protocol.min_reader_version, t.protocol.min_writer_version
    );
    if !t.protocol.writer_features.is_empty() {
        let features: Vec<&str> = t.protocol.writer_features.iter().map(String::as_str).collect();
        println!("   Features: {}", features.join(", "));
    }
    println!();
    println!("📊 Statistics:");
    println!("  Rows: {}", t.stats.num_rows);
    println!("  Files: {}", t.stats.num_files);
    println!("  Bytes: {}", t.stats.size_bytes);
    println!("  Pending tombstones: {}", t.tombstones.len());
    if !t.partition_columns.is_empty() {
        println!();
        println!("Partitioned by: {}", t.partition_columns.join(", "));
    }
    if !t.configuration.is_empty() {
        println!();
        println!("Properties:");
        for (key, value) in &t.configuration {
            println!("  {} = {}", key, value);
        }
    }
    println!();
    println!("Schema:");
    for line in t.schema.to_string().lines() {
        println!("  {}", line);
    }
}
