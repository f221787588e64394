//! polite-scan main entry point
//!
//! This is the command-line interface for the polite-scan URL scanner.

use anyhow::Context;
use clap::Parser;
use polite_scan::config::{load_config_with_hash, validate, Config};
use polite_scan::Coordinator;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// polite-scan: a politeness-constrained URL scanner
///
/// polite-scan fetches a list of URLs while spreading every hostname's
/// requests evenly over a target runtime, honoring robots.txt, and
/// re-fetching results that disagree with a previous scan.
#[derive(Parser, Debug)]
#[command(name = "polite-scan")]
#[command(version = "1.0.0")]
#[command(about = "A politeness-constrained URL scanner", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Override the input file of `URL[,source]` lines
    #[arg(long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Override the collection results are written to
    #[arg(long, value_name = "NAME")]
    collection: Option<String>,

    /// Override the previous-scan collection used for retry decisions
    #[arg(long, value_name = "NAME")]
    comparison_collection: Option<String>,

    /// Override the SQLite database path
    #[arg(long, value_name = "PATH")]
    database: Option<String>,

    /// Override the expected runtime in milliseconds
    #[arg(long, value_name = "MS")]
    expected_runtime_ms: Option<u64>,

    /// Validate config and input and show the worker plan without scanning
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics for the configured collection and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

impl Cli {
    /// Applies command-line overrides on top of the loaded configuration
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(input) = &self.input {
            config.scan.input_file = input.clone();
        }
        if let Some(collection) = &self.collection {
            config.database.collection = collection.clone();
        }
        if let Some(comparison) = &self.comparison_collection {
            config.database.comparison_collection = Some(comparison.clone());
        }
        if let Some(database) = &self.database {
            config.database.path = database.clone();
        }
        if let Some(runtime) = self.expected_runtime_ms {
            config.scan.expected_runtime_ms = runtime;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);

    cli.apply_overrides(&mut config);
    validate(&config).context("invalid configuration after command-line overrides")?;

    // Handle different modes
    if cli.dry_run {
        handle_dry_run(config)?;
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_scan(config).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("polite_scan=info,warn"),
            1 => EnvFilter::new("polite_scan=debug,info"),
            2 => EnvFilter::new("polite_scan=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates inputs and shows the worker plan
fn handle_dry_run(config: Config) -> anyhow::Result<()> {
    println!("=== polite-scan Dry Run ===\n");

    println!("Scan Configuration:");
    println!("  Input file: {}", config.scan.input_file.display());
    println!("  Excluded file: {}", config.scan.excluded_file.display());
    println!("  Expected runtime: {}ms", config.scan.expected_runtime_ms);
    println!("  Step timeout: {}ms", config.scan.timeout_ms);
    println!("  Transport retries: {}", config.scan.retries);
    println!("  Max tasks per worker: {}", config.scan.worker_stress);

    println!("\nUser Agent:");
    println!("  {}", config.user_agent.header_value());

    println!("\nDatabase:");
    println!("  Path: {}", config.database.path);
    println!("  Collection: {}", config.database.collection);
    match &config.database.comparison_collection {
        Some(comparison) => println!("  Comparing against: {}", comparison),
        None => println!("  Comparing against: (none, retries disabled)"),
    }

    let coordinator = Coordinator::new(config)?;
    let (batches, excluded) = coordinator.plan()?;

    println!("\nWorkers ({}):", batches.len());
    for (id, batch) in batches.iter().enumerate() {
        let tasks: usize = batch.iter().map(|group| group.len()).sum();
        println!("  - worker {}: {} hostnames, {} tasks", id, batch.len(), tasks);
    }

    let total: usize = batches
        .iter()
        .flat_map(|batch| batch.iter())
        .map(|group| group.len())
        .sum();
    println!("\n✓ Configuration is valid");
    println!(
        "✓ Would scan {} URLs ({} dropped for excluded hostnames)",
        total, excluded
    );

    Ok(())
}

/// Handles the --stats mode: shows statistics for the configured collection
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    use polite_scan::output::{load_statistics, print_statistics};
    use polite_scan::storage::open_storage;
    use std::path::Path;

    println!("Database: {}\n", config.database.path);

    // Open the database
    let storage = open_storage(Path::new(&config.database.path))?;

    // Load and print statistics
    let stats = load_statistics(&storage, &config.database.collection)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main scan operation
async fn handle_scan(config: Config) -> anyhow::Result<()> {
    tracing::info!(
        "Scanning {} into collection {}",
        config.scan.input_file.display(),
        config.database.collection
    );

    let coordinator = Coordinator::new(config)?;
    match coordinator.run().await {
        Ok(summary) => {
            tracing::info!(
                "Scan completed: {} tasks over {} hostnames, {} retried, {} excluded",
                summary.tasks,
                summary.hosts,
                summary.retried,
                summary.excluded
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!("Scan failed: {}", e);
            Err(e.into())
        }
    }
}
