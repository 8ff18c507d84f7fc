//! # Data Freshness CLI (`fresh`)
//!
//! The `fresh` binary runs freshness checks against a catalog and inspects
//! persisted runs.
//!
//! ## Usage
//!
//! ```bash
//! fresh --config ./config/fresh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `fresh init` | Create the SQLite database and schema |
//! | `fresh run` | Execute one run and print its counts |
//! | `fresh report` | Print the counts of a persisted run |
//! | `fresh runs` | List persisted runs |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! fresh init --config ./config/fresh.toml
//!
//! # Run against a catalog snapshot, rehashing a few resources
//! fresh run --catalog ./data/catalog.json --force-hash ./config/rehash.txt
//!
//! # Machine-readable counts of run 3
//! fresh report --run 3 --json
//! ```

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};

use data_freshness::catalog::{parse_timestamp, SnapshotCatalog};
use data_freshness::config::{self, Config};
use data_freshness::logging;
use data_freshness::migrate;
use data_freshness::pipeline::{run_freshness, RunSettings};
use data_freshness::progress::ProgressMode;
use data_freshness::report::report_for_run;
use data_freshness::selector::load_forced_hash_ids;
use data_freshness::store::{RunStore, SqliteRunStore};
use data_freshness::transport::HttpTransport;

/// Data Freshness CLI: run-over-run change detection and freshness
/// classification for a dataset catalog.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Only the `[db]` section is required.
#[derive(Parser)]
#[command(
    name = "fresh",
    about = "Change detection and freshness classification for a dataset catalog",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/fresh.toml")]
    config: PathBuf,

    /// Log at debug level (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all tables (runs, organizations,
    /// info_datasets, datasets, resources). Safe to run repeatedly.
    Init,

    /// Execute one run.
    ///
    /// Lists the catalog, checks every resource against the previous run,
    /// classifies every dataset, persists the results, and prints counts.
    Run {
        /// Catalog snapshot (JSON). Defaults to `[catalog].snapshot`.
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// File of resource ids to hash regardless of other signals.
        #[arg(long)]
        force_hash: Option<PathBuf>,

        /// Evaluate as of this timestamp instead of the current time.
        #[arg(long)]
        now: Option<String>,

        /// Progress output on stderr. Defaults to `human` on a terminal,
        /// otherwise `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,

        /// Print counts as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the counts of a persisted run.
    Report {
        /// Run number. Defaults to the latest run.
        #[arg(long)]
        run: Option<i64>,

        /// Print counts as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List persisted runs.
    Runs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose)?;

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Run {
            catalog,
            force_hash,
            now,
            progress,
            json,
        } => {
            run_command(&cfg, catalog, force_hash, now, progress, json).await?;
        }
        Commands::Report { run, json } => {
            let store = SqliteRunStore::open(&cfg).await?;
            let number = match run {
                Some(n) => n,
                None => match store.latest_run().await? {
                    Some(latest) => latest.number,
                    None => bail!("No runs recorded yet. Run `fresh run` first."),
                },
            };
            if !store.list_runs().await?.iter().any(|r| r.number == number) {
                bail!("Run {} not found", number);
            }
            let counts = report_for_run(&store, number).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&counts)?);
            } else {
                println!("{}", counts);
            }
            store.close().await;
        }
        Commands::Runs => {
            let store = SqliteRunStore::open(&cfg).await?;
            let runs = store.list_runs().await?;
            if runs.is_empty() {
                println!("No runs recorded.");
            }
            for run in &runs {
                println!("{}", run);
            }
            store.close().await;
        }
    }

    Ok(())
}

async fn run_command(
    cfg: &Config,
    catalog: Option<PathBuf>,
    force_hash: Option<PathBuf>,
    now: Option<String>,
    progress: Option<ProgressMode>,
    json: bool,
) -> anyhow::Result<()> {
    let snapshot = match catalog.or_else(|| cfg.catalog.snapshot.clone()) {
        Some(path) => path,
        None => bail!("No catalog given: pass --catalog or set [catalog].snapshot"),
    };

    let progress_mode = progress.unwrap_or_else(ProgressMode::default_for_tty);

    let now = match now {
        Some(s) => parse_timestamp(&s).context("Invalid --now")?,
        None => Utc::now(),
    };

    let forced: HashSet<String> = match force_hash {
        Some(path) => load_forced_hash_ids(&path)?,
        None => HashSet::new(),
    };

    let settings = RunSettings::from_config(cfg)?;
    let transport = HttpTransport::new(&cfg.http)?;
    let catalog = SnapshotCatalog::new(snapshot);
    let store = SqliteRunStore::open(cfg).await?;
    let reporter = progress_mode.reporter();

    let outcome = run_freshness(
        &catalog,
        &transport,
        &store,
        &settings,
        &forced,
        now,
        reporter.as_ref(),
    )
    .await?;
    store.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.counts)?);
    } else {
        println!("{}", outcome.run);
        println!("{}", outcome.counts);
    }
    Ok(())
}
