//! navgraph CLI
//!
//! Explore a scripted application model into a SQLite navigation graph and
//! query the result.
//!
//! Usage:
//!   navgraph explore --model app.json --db graph.db [--config explore.yaml]
//!   navgraph path --db graph.db --from <screen-hash> --to <screen-hash>
//!   navgraph path --db graph.db --from <screen-hash> --keyword settings
//!   navgraph sessions --db graph.db --app com.example.notes
//!   navgraph purge --db graph.db --app com.example.notes

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use navgraph::platforms::scripted::{AppModel, ScriptedEngine};
use navgraph::{
    AccessibilityEngine, CacheStatsSource, ExplorationConfig, ExplorationEngine, LauncherDetector,
    NavigationGraphStore, PathfindingService, ScreenHash, Target,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DEFAULT_DB: &str = "navgraph.db";

#[derive(Parser)]
#[command(name = "navgraph")]
#[command(about = "🧭 navgraph - UI exploration and navigation graphs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Explore an application model and record its navigation graph
    Explore(ExploreArgs),
    /// Find the shortest recorded path to a screen or keyword
    Path(PathArgs),
    /// List exploration sessions of an application
    Sessions(AppArgs),
    /// Delete every recorded row of an application
    Purge(AppArgs),
}

#[derive(Parser, Debug)]
struct ExploreArgs {
    /// Application model (JSON)
    #[clap(long, short = 'm')]
    model: PathBuf,

    /// Graph database file
    #[clap(long, env = "NAVGRAPH_DB", default_value = DEFAULT_DB)]
    db: PathBuf,

    /// Exploration config (YAML or JSON); defaults apply when omitted
    #[clap(long, short = 'c')]
    config: Option<PathBuf>,

    /// Continue a paused session instead of starting a new one
    #[clap(long)]
    resume: Option<String>,
}

#[derive(Parser, Debug)]
struct PathArgs {
    #[clap(long, env = "NAVGRAPH_DB", default_value = DEFAULT_DB)]
    db: PathBuf,

    /// Screen hash to start from
    #[clap(long)]
    from: String,

    /// Destination screen hash
    #[clap(long, conflicts_with = "keyword")]
    to: Option<String>,

    /// Destination keyword such as "settings" or "home"
    #[clap(long, short = 'k', conflicts_with = "to")]
    keyword: Option<String>,
}

#[derive(Parser, Debug)]
struct AppArgs {
    #[clap(long, env = "NAVGRAPH_DB", default_value = DEFAULT_DB)]
    db: PathBuf,

    /// Application id, e.g. com.example.notes
    #[clap(long, short = 'a')]
    app: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Explore(args) => explore(args).await,
        Commands::Path(args) => find_path(args).await,
        Commands::Sessions(args) => list_sessions(args).await,
        Commands::Purge(args) => purge(args).await,
    }
}

fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn open_store(db: &Path) -> Result<Arc<NavigationGraphStore>> {
    let store = NavigationGraphStore::open_sqlite(db)
        .with_context(|| format!("Failed to open graph database {}", db.display()))?;
    Ok(Arc::new(store))
}

fn load_config(path: Option<&Path>) -> Result<ExplorationConfig> {
    let Some(path) = path else {
        return Ok(ExplorationConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    // YAML is a superset of JSON, so one parser covers both
    let config: ExplorationConfig = serde_yaml::from_str(&text)
        .with_context(|| format!("Invalid exploration config {}", path.display()))?;
    Ok(config)
}

async fn explore(args: ExploreArgs) -> Result<()> {
    let model_text = std::fs::read_to_string(&args.model)
        .with_context(|| format!("Failed to read model {}", args.model.display()))?;
    let model = AppModel::from_json(&model_text)
        .with_context(|| format!("Invalid application model {}", args.model.display()))?;
    let config = load_config(args.config.as_deref())?;
    let store = open_store(&args.db)?;

    let engine: Arc<dyn AccessibilityEngine> = ScriptedEngine::new(model.clone());
    let launchers = Arc::new(LauncherDetector::new(engine.clone()));
    let explorer = ExplorationEngine::new(engine, store, launchers, config)
        .context("Failed to create exploration engine")?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted; pausing exploration");
                cancel.cancel();
            }
        }
    });

    let summary = match &args.resume {
        Some(session_id) => explorer.resume(session_id, cancel).await,
        None => explorer.explore(&model.app_id, cancel).await,
    }
    .with_context(|| format!("Exploration of {} failed", model.app_id))?;

    let stats = explorer.cache_stats();
    info!(
        hit_rate = stats.hit_rate(),
        registrations = stats.registrations,
        "Deduplication cache"
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn find_path(args: PathArgs) -> Result<()> {
    let target = match (args.to, args.keyword) {
        (Some(to), None) => Target::Screen(ScreenHash::from(to.as_str())),
        (None, Some(keyword)) => Target::Keyword(keyword),
        _ => bail!("Pass exactly one of --to or --keyword"),
    };
    let store = open_store(&args.db)?;
    let paths = PathfindingService::new(store);

    let from = ScreenHash::from(args.from.as_str());
    match paths
        .find_path(&from, &target)
        .await
        .context("Path query failed")?
    {
        Some(steps) => println!("{}", serde_json::to_string_pretty(&steps)?),
        None => {
            eprintln!("❌ No recorded path from {from}");
            std::process::exit(1);
        }
    }
    Ok(())
}

async fn list_sessions(args: AppArgs) -> Result<()> {
    let store = open_store(&args.db)?;
    let summaries: Vec<_> = store
        .sessions_for_app(&args.app)
        .await
        .with_context(|| format!("Failed to list sessions of {}", args.app))?
        .iter()
        .map(|s| s.summary())
        .collect();
    println!("{}", serde_json::to_string_pretty(&summaries)?);
    Ok(())
}

async fn purge(args: AppArgs) -> Result<()> {
    let store = open_store(&args.db)?;
    let counts = store
        .delete_application_data(&args.app)
        .await
        .with_context(|| format!("Failed to purge {}", args.app))?;
    println!(
        "🗑️  Removed {} sessions, {} screens, {} elements, {} edges of {}",
        counts.sessions, counts.screens, counts.elements, counts.edges, args.app
    );
    Ok(())
}
