use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use metacache_catalog::{CatalogDump, InMemoryCatalog, StaticIntrospector};
use metacache_core::{Config, InconsistencyReport, InconsistentMetadata, MetadataError, SchemaObjId};
use metacache_incremental::{SchemaCache, SchemaCacheManager};

/// Metacache - incremental schema cache builder and consistency checker
#[derive(Parser)]
#[command(name = "metacache")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: metacache.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the schema cache from a catalog dump and report inconsistencies
    Build {
        /// Exported catalog dump (JSON)
        #[arg(long)]
        catalog: PathBuf,

        /// Output file for report.json
        #[arg(short, long, default_value = "report.json")]
        output: PathBuf,
    },

    /// Show every schema object that depends on an object
    Dependents {
        /// Exported catalog dump (JSON)
        #[arg(long)]
        catalog: PathBuf,

        /// Object to analyze: table:NAME, column:TABLE.COLUMN, function:NAME or remote:NAME
        object: String,
    },

    /// Check whether dropping a table passes the consistency check
    CheckDrop {
        /// Exported catalog dump (JSON)
        #[arg(long)]
        catalog: PathBuf,

        /// Table to drop
        table: String,

        /// Purge dependent objects instead of refusing the drop
        #[arg(long)]
        cascade: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Load config if specified
    let config = if let Some(config_path) = &cli.config {
        Config::from_file(config_path)?
    } else if Path::new("metacache.toml").exists() {
        Config::from_file(Path::new("metacache.toml"))?
    } else {
        if cli.verbose {
            eprintln!("{}", "No config file found, using defaults".yellow());
        }
        Config::default()
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Build { catalog, output } => {
            build_command(&config, &catalog, &output, cli.verbose).await
        }
        Commands::Dependents { catalog, object } => {
            dependents_command(&config, &catalog, &object, cli.verbose).await
        }
        Commands::CheckDrop { catalog, table, cascade } => {
            let cascade = cascade || config.consistency.cascade;
            check_drop_command(&config, &catalog, &table, cascade, cli.verbose).await
        }
    }
}

/// Load a catalog dump into an in-memory store and build the initial cache
async fn load_catalog(
    config: &Config,
    catalog: &Path,
    verbose: bool,
) -> Result<(InMemoryCatalog, SchemaCacheManager)> {
    if verbose {
        eprintln!("{} {}", "Loading catalog dump from:".cyan(), catalog.display());
    }
    let dump = CatalogDump::load(catalog)
        .map_err(|e| anyhow::anyhow!("Failed to load catalog dump: {}", e))?;
    let introspector = StaticIntrospector::from_payloads(dump.remote_payloads.clone());
    let store = InMemoryCatalog::from_dump(dump);

    if verbose {
        eprintln!("{}", "Building schema cache...".cyan());
    }
    let introspector = Arc::new(introspector);
    let manager = SchemaCacheManager::initialize(Arc::new(store.clone()), introspector, config)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to build schema cache: {}", e))?;
    Ok((store, manager))
}

/// Build command - build the cache and write the inconsistency report
async fn build_command(
    config: &Config,
    catalog: &Path,
    output: &Path,
    verbose: bool,
) -> Result<()> {
    let (_, manager) = load_catalog(config, catalog, verbose).await?;
    let cache = manager.schema_cache();

    let mut report = cache.report();
    if config.report.redact_definitions {
        report.redact();
    }
    report.save_to_file(output)?;

    if verbose {
        eprintln!("{} {}", "Report saved to:".green(), output.display());
    }

    print_cache_summary(&cache);
    print_report_summary(&report);

    if !report.is_consistent() {
        std::process::exit(1);
    }
    Ok(())
}

/// Parse `table:NAME`, `column:TABLE.COLUMN`, `function:NAME` or `remote:NAME`
fn parse_object(object: &str) -> Result<SchemaObjId> {
    let (kind, name) = object
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("Expected KIND:NAME, got '{}'", object))?;
    if name.is_empty() {
        return Err(anyhow::anyhow!("Missing object name in '{}'", object));
    }

    match kind {
        "table" => Ok(SchemaObjId::table(name)),
        "column" => {
            let (table, column) = name
                .split_once('.')
                .ok_or_else(|| anyhow::anyhow!("Expected column:TABLE.COLUMN, got '{}'", object))?;
            Ok(SchemaObjId::column(table, column))
        }
        "function" => Ok(SchemaObjId::function(name)),
        "remote" => Ok(SchemaObjId::remote_schema(name)),
        other => Err(anyhow::anyhow!(
            "Unknown object kind '{}'. Use table, column, function or remote",
            other
        )),
    }
}

/// Dependents command - show the transitive dependents of an object
async fn dependents_command(
    config: &Config,
    catalog: &Path,
    object: &str,
    verbose: bool,
) -> Result<()> {
    let target = parse_object(object)?;
    let (_, manager) = load_catalog(config, catalog, verbose).await?;
    let cache = manager.schema_cache();

    if !cache.contains(&target) {
        eprintln!("{} {} is not part of the schema cache", "Warning:".yellow().bold(), target);
    }

    let dependents = cache.dependency_graph.dependents(&target);

    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", "Dependency Impact Analysis".bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    println!("{} {}", "Object:".bold(), target.to_string().green());
    println!("{} {}", "Dependents:".bold(), dependents.len());
    println!();

    if dependents.is_empty() {
        println!("{}", "✓ No dependent objects".green());
        println!("This object can be dropped without purging other metadata.");
    } else {
        for (i, dependent) in dependents.iter().enumerate() {
            println!("  {}. {}", i + 1, dependent.to_string().yellow());
        }
        println!();
        println!("{}", "⚠ Dropping this object requires cascading!".yellow().bold());
    }

    println!();
    println!("{}", "=".repeat(60).bright_blue());
    Ok(())
}

/// Check-drop command - drop a table under the consistency check
async fn check_drop_command(
    config: &Config,
    catalog: &Path,
    table: &str,
    cascade: bool,
    verbose: bool,
) -> Result<()> {
    let (store, manager) = load_catalog(config, catalog, verbose).await?;
    let before = manager.schema_cache();

    if verbose {
        eprintln!("{} {} (cascade: {})", "Dropping table".cyan(), table, cascade);
    }

    let action_store = store.clone();
    let dropped = table.to_string();
    let outcome = manager
        .with_consistency_check(cascade, || async move {
            if action_store.drop_table(&dropped).await {
                Ok(())
            } else {
                Err(MetadataError::not_exists(format!("table \"{}\" does not exist", dropped)))
            }
        })
        .await;

    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", "Consistency Check".bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    match outcome {
        Ok(()) => {
            let after = manager.schema_cache();
            println!("{}", "✓ Drop accepted".green().bold());
            println!();
            print_purged(&before, &after);
            print_cache_summary(&after);
            Ok(())
        }
        Err(err) => {
            println!("{} {}", "✗ Drop refused:".red().bold(), err.message);
            println!("  code: {}", err.code.as_str());
            if let Some(internal) = &err.internal {
                println!();
                println!("{}", "Details:".bold());
                println!("{}", serde_json::to_string_pretty(internal)?);
            }
            println!();
            println!("{}", "=".repeat(60).bright_blue());
            std::process::exit(1);
        }
    }
}

/// List graph entries of `before` that are gone from `after`
fn print_purged(before: &SchemaCache, after: &SchemaCache) {
    let purged: Vec<&SchemaObjId> =
        before.dependency_graph.objects().filter(|id| !after.contains(id)).collect();
    if purged.is_empty() {
        return;
    }
    println!("{}", "Removed objects:".bold());
    for id in purged {
        println!("  - {}", id.to_string().yellow());
    }
    println!();
}

fn print_cache_summary(cache: &SchemaCache) {
    println!("{}", "Schema cache:".bold());
    println!("  Tables:         {}", cache.tables.len());
    println!("  Functions:      {}", cache.functions.len());
    println!("  Remote schemas: {}", cache.remote_schemas.len());
    println!("  Roles:          {}", cache.role_contexts.len());
    println!("  Allow-list:     {}", cache.allowlist.len());
    println!();
}

fn print_report_summary(report: &InconsistencyReport) {
    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", "Inconsistency Report".bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    println!("Version: {}", report.version);
    println!("Timestamp: {}", report.timestamp);
    println!();

    println!("{}", "Summary:".bold());
    if report.summary.total > 0 {
        println!("  Inconsistent objects: {}", report.summary.total.to_string().red().bold());
    } else {
        println!("  Inconsistent objects: {}", report.summary.total.to_string().green());
    }
    for (kind, count) in &report.summary.by_kind {
        println!("    {}: {}", kind, count);
    }
    println!();

    if report.inconsistencies.is_empty() {
        println!("{}", "✓ Metadata is consistent!".green().bold());
    } else {
        println!("{}", "Inconsistencies:".bold());
        for inconsistency in &report.inconsistencies {
            let label = match inconsistency {
                InconsistentMetadata::InconsistentObject { .. } => "INCONSISTENT".red().bold(),
                InconsistentMetadata::DuplicateObjects { .. } => "DUPLICATE".yellow().bold(),
            };
            println!("  [{}] {}: {}", label, inconsistency.object_id(), inconsistency.reason());
        }
    }

    println!();
    println!("{}", "=".repeat(60).bright_blue());
}
