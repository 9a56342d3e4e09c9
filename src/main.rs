use clap::{Args, CommandFactory, Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use ticketlog::azure::{default_query, AzureDevOpsClient};
use ticketlog::{
    ingest_classification, CancelToken, ClassificationSummary, Config, ConfigError, Database,
    DbError, IngestError, IngestOptions, Orchestrator, RemoteError, RunSummary, StructureGroup,
    CURRENT_SCHEMA,
};

/// Skipped records listed individually in the run report
const SKIPPED_SHOWN: usize = 10;

#[derive(Parser, Debug)]
#[command(name = "ticketlog")]
#[command(author, version, about = "Work-tracking history ingestion into a local SQLite store")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file (default: .ticketlog/config.toml, searched upwards)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store path (overrides the config file and TICKETLOG_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Debug-level logging (RUST_LOG takes priority)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write daily-rotated logs into this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
struct IngestArgs {
    /// WIQL query selecting work items (default: every item in the project)
    #[arg(short, long)]
    query: Option<String>,

    /// Drop and recreate all tables before ingesting
    #[arg(long)]
    reset: bool,

    /// Ids per bulk request (max 200)
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Concurrent requests within a chunk
    #[arg(short, long)]
    workers: Option<usize>,

    /// Use bulk payloads as-is instead of fetching each item's full detail
    #[arg(long)]
    no_detail: bool,

    /// Stop at the next chunk boundary after this many seconds
    #[arg(long, value_name = "SECS")]
    deadline: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest work items with their revisions, comments and tags
    Ingest(IngestArgs),

    /// Ingest an iteration or area hierarchy
    Classification {
        /// iterations or areas (default: groups from the config file)
        #[arg(short, long)]
        group: Option<StructureGroup>,

        /// Tree depth to request
        #[arg(long)]
        depth: Option<u32>,
    },

    /// Ingest work items, then every configured classification hierarchy
    Sync(IngestArgs),

    /// Drop and recreate all tables
    Reset,

    /// Show row counts and recent runs
    Status {
        /// Number of runs to list
        #[arg(long, default_value = "5")]
        runs: i64,
    },

    /// Generate shell completions
    Completion {
        /// Target shell
        shell: clap_complete::Shell,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] DbError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Ingest(#[from] IngestError),
}

fn main() {
    let cli = Cli::parse();

    if let Command::Completion { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "ticketlog", &mut std::io::stdout());
        return;
    }

    let _log_guard = match ticketlog::logging::init_logging(cli.verbose, cli.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{} failed to set up logging: {}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(cli) {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let db_path = cli.db.clone().unwrap_or_else(|| config.database_path());

    match cli.command {
        Command::Ingest(args) => {
            let client = connect(&config)?;
            let db = open_store(&db_path, args.reset)?;
            let summary = ingest(&config, &client, &db, &args)?;
            print_run(&summary);
        }
        Command::Sync(args) => {
            let client = connect(&config)?;
            let db = open_store(&db_path, args.reset)?;
            let summary = ingest(&config, &client, &db, &args)?;
            print_run(&summary);
            if summary.is_cancelled() {
                println!("{}", "Classification sync skipped after cancellation".yellow());
                return Ok(());
            }
            let depth = config.classification.depth;
            for &group in &config.classification.groups {
                print_classification(&ingest_classification(&client, &db, group, depth)?);
            }
        }
        Command::Classification { group, depth } => {
            let client = connect(&config)?;
            let db = open_store(&db_path, false)?;
            let groups = match group {
                Some(group) => vec![group],
                None => config.classification.groups.clone(),
            };
            let depth = depth.unwrap_or(config.classification.depth).max(1);
            for group in groups {
                print_classification(&ingest_classification(&client, &db, group, depth)?);
            }
        }
        Command::Reset => {
            let db = Database::open_at(&db_path)?;
            db.reset()?;
            println!("{} {}", "Store reset:".green().bold(), db_path.display());
        }
        Command::Status { runs } => {
            let db = Database::open_at(&db_path)?;
            print_status(&db, &db_path, runs)?;
        }
        Command::Completion { .. } => {}
    }

    Ok(())
}

/// Credentials are checked before anything touches the network or the store
fn connect(config: &Config) -> Result<AzureDevOpsClient, CliError> {
    let credentials = config.credentials()?;
    tracing::debug!(?credentials, "connecting");
    Ok(AzureDevOpsClient::new(&credentials, &config.remote)?)
}

fn open_store(path: &Path, reset: bool) -> Result<Database, CliError> {
    let db = Database::open_at(path)?;
    if reset {
        db.reset()?;
    }
    Ok(db)
}

fn ingest(
    config: &Config,
    client: &AzureDevOpsClient,
    db: &Database,
    args: &IngestArgs,
) -> Result<RunSummary, CliError> {
    let mut ingest_config = config.ingest.clone();
    if let Some(size) = args.chunk_size {
        ingest_config.chunk_size = size;
    }
    if let Some(workers) = args.workers {
        ingest_config.workers = workers;
    }
    if args.no_detail {
        ingest_config.expand_detail = false;
    }
    let options = IngestOptions::from(&ingest_config);

    let query = args
        .query
        .clone()
        .or_else(|| ingest_config.query.clone())
        .unwrap_or_else(|| default_query(client.project()));

    let cancel = match args.deadline {
        Some(secs) => CancelToken::with_deadline(Duration::from_secs(secs)),
        None => CancelToken::new(),
    };

    let summary = Orchestrator::new(client, db, options)
        .with_cancel(cancel)
        .run(&query)?;
    Ok(summary)
}

fn print_run(summary: &RunSummary) {
    let status = if summary.is_cancelled() {
        summary.status.as_str().yellow()
    } else {
        summary.status.as_str().green()
    };
    println!("{} {} ({})", "Run".bold(), summary.run_id, status);
    println!(
        "  ids: {}   chunks: {}/{}",
        summary.ids_total, summary.chunks, summary.chunks_total
    );
    println!("  ingested: {}", summary.ingested.to_string().green());

    let skipped = summary.skipped_count();
    if skipped == 0 {
        println!("  skipped: 0");
    } else {
        println!("  skipped: {}", skipped.to_string().yellow());
        for item in summary.skipped.iter().take(SKIPPED_SHOWN) {
            println!("    #{} {}", item.id, item.reason.dimmed());
        }
        if skipped > SKIPPED_SHOWN {
            println!("    ... and {} more", skipped - SKIPPED_SHOWN);
        }
    }

    println!(
        "  skipped history: {} identities, {} revisions, {} comments",
        summary.identities_skipped, summary.revisions_skipped, summary.comments_skipped
    );
    println!(
        "  written: {} tags (-{}), {} revisions, {} comments",
        summary.tags_written, summary.tags_removed, summary.revisions_written, summary.comments_written
    );
}

fn print_classification(summary: &ClassificationSummary) {
    let failed = if summary.failed == 0 {
        summary.failed.to_string().normal()
    } else {
        summary.failed.to_string().red()
    };
    println!(
        "{} {}: {} nodes, {} written, {} failed, {} skipped",
        "Classification".bold(),
        summary.group,
        summary.nodes,
        summary.written,
        failed,
        summary.skipped
    );
}

fn print_status(db: &Database, path: &Path, runs: i64) -> Result<(), CliError> {
    let counts = db.summary()?;
    println!("{} {}", "Store:".bold(), path.display());
    println!("{} {}", "Schema:".bold(), CURRENT_SCHEMA);
    println!("  identities:           {}", counts.identities);
    println!("  work items:           {}", counts.work_items);
    println!("  tags:                 {}", counts.tags);
    println!("  revisions:            {}", counts.revisions);
    println!("  comments:             {}", counts.comments);
    println!("  classification nodes: {}", counts.classification_nodes);

    let recent = db.recent_runs(runs.max(0))?;
    if recent.is_empty() {
        println!("{}", "No runs recorded".dimmed());
        return Ok(());
    }
    println!("{}", "Recent runs:".bold());
    for run in recent {
        let status = if run.status == "completed" {
            run.status.green()
        } else {
            run.status.yellow()
        };
        println!(
            "  {} {} {:>9}  ingested {}  skipped {}",
            run.completed_at, run.run_id, status, run.ingested, run.skipped
        );
    }
    Ok(())
}
