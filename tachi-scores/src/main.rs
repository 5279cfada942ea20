//! tachi-scores - score identity maintenance tool
//!
//! Computes score identities, applies score corrections (migrating the
//! identity and every referrer when it changes), and runs the
//! reconciliation sweep over interrupted migrations.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tachi_common::config::{load_module_config, RootFolderInitializer, RootFolderResolver, TomlConfig};
use tachi_common::db::init_database;
use tachi_common::EventBus;
use tachi_scores::{create_score_id, GameVariant, MetricBag, ScoreContext, ScoreCorrection};

const MODULE_NAME: &str = "tachi-scores";

/// Command-line arguments for tachi-scores
#[derive(Parser, Debug)]
#[command(name = "tachi-scores")]
#[command(about = "Score identity maintenance for Tachi")]
#[command(version)]
struct Args {
    /// Root folder holding tachi.db (overrides TACHI_ROOT_FOLDER and the TOML file)
    #[arg(short, long, global = true)]
    root_folder: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the identity of a score (no database access)
    ScoreId {
        #[arg(long)]
        game: String,
        #[arg(long)]
        playtype: String,
        #[arg(long)]
        user: i64,
        #[arg(long)]
        chart: String,
        /// Metric bag as a JSON object
        #[arg(long)]
        metrics: String,
    },

    /// Print a stored score and its referrers
    Show {
        #[arg(long)]
        score_id: String,
    },

    /// Correct a stored score's metrics
    Correct {
        #[arg(long)]
        score_id: String,
        /// Replacement metric bag as a JSON object
        #[arg(long)]
        metrics: String,
        /// Replacement comment
        #[arg(long)]
        comment: Option<String>,
    },

    /// Roll interrupted migrations forward and repoint stale referrers
    Reconcile,

    /// List referrer entries whose score no longer exists
    Stale,
}

fn init_tracing(config: &TomlConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match &config.logging.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            builder.with_writer(std::sync::Mutex::new(file)).with_ansi(false).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

fn parse_metrics(raw: &str) -> Result<MetricBag> {
    let value: serde_json::Value =
        serde_json::from_str(raw).context("--metrics must be valid JSON")?;
    Ok(MetricBag::from_json(value)?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn open_context(args_root: Option<PathBuf>, config: &TomlConfig) -> Result<ScoreContext> {
    let root_folder = RootFolderResolver::new(MODULE_NAME)
        .with_cli_arg(args_root)
        .with_toml_config(config.clone())
        .resolve();

    let initializer = RootFolderInitializer::new(root_folder);
    initializer.ensure_directory_exists()?;

    let db_path = initializer.database_path();
    info!("Database path: {}", db_path.display());

    let pool = init_database(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    Ok(ScoreContext::new(pool, EventBus::new(config.event_bus_capacity())))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_module_config(MODULE_NAME);

    init_tracing(&config)?;

    info!(
        "Starting Tachi score tools (tachi-scores) v{}",
        env!("CARGO_PKG_VERSION")
    );

    match args.command {
        Command::ScoreId {
            game,
            playtype,
            user,
            chart,
            metrics,
        } => {
            let variant = GameVariant::new(game, playtype);
            let metrics = parse_metrics(&metrics)?;
            let score_id = create_score_id(&variant, user, &chart, &metrics)?;
            println!("{}", score_id);
        }

        Command::Show { score_id } => {
            let ctx = open_context(args.root_folder, &config).await?;
            let queries = ctx.queries();

            let Some(score) = queries.find_by_identity(&score_id).await? else {
                bail!("Score not found: {}", score_id);
            };
            let session = queries.find_session_for_score(&score_id).await?;
            let imports = queries.find_imports_for_score(&score_id).await?;

            print_json(&serde_json::json!({
                "score": score,
                "session": session.map(|s| s.session_id),
                "imports": imports.into_iter().map(|i| i.import_id).collect::<Vec<_>>(),
            }))?;
        }

        Command::Correct {
            score_id,
            metrics,
            comment,
        } => {
            let metrics = parse_metrics(&metrics)?;
            let ctx = open_context(args.root_folder, &config).await?;

            let Some(existing) = ctx.queries().find_by_identity(&score_id).await? else {
                bail!("Score not found: {}", score_id);
            };

            let mut correction = ScoreCorrection::metrics(metrics);
            if let Some(comment) = comment {
                let mut aux = existing.aux.clone();
                aux.comment = Some(comment);
                correction = correction.with_aux(aux);
            }

            let outcome = ctx.mutator().update_score(&existing, correction).await?;
            print_json(&outcome)?;
        }

        Command::Reconcile => {
            let ctx = open_context(args.root_folder, &config).await?;
            let report = ctx.reconciler().sweep().await?;
            print_json(&report)?;
        }

        Command::Stale => {
            let ctx = open_context(args.root_folder, &config).await?;
            let stale = ctx.reconciler().find_stale_references().await?;
            print_json(&stale)?;
        }
    }

    Ok(())
}
