use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use flocktend_common::Config;
use flocktend_engine::sources::JsonProfileSource;
use flocktend_engine::{ArchiveLoader, MaintenanceRun, TokioSleeper};
use flocktend_store::PgRelationStore;

#[derive(Parser, Debug)]
#[command(name = "flocktend", about = "Relation maintenance for social accounts")]
struct Args {
    /// Account handles to maintain, with or without a leading '@'.
    #[arg(required = true)]
    handles: Vec<String>,

    /// Plan follow/prune actions without recording them.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("flocktend=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_env();

    let store = PgRelationStore::connect(&config.database_url, &config.db_schema).await?;
    store.migrate().await?;

    let feed_dir = config
        .profile_feed_dir
        .clone()
        .context("PROFILE_FEED_DIR is required")?;
    let source = JsonProfileSource::new(feed_dir);
    let loader = ArchiveLoader::new(config.archive_dir.clone());
    let sleeper = TokioSleeper;
    let run_at = chrono::Utc::now();

    info!(handles = args.handles.len(), dry_run = args.dry_run, "Starting maintenance run");
    let started = std::time::Instant::now();

    let run = MaintenanceRun::new(
        &store,
        &source,
        &source,
        &sleeper,
        &loader,
        &config.policy,
        run_at,
    )
    .with_dry_run(args.dry_run);
    let stats = run.run(&args.handles).await?;

    info!(elapsed_secs = started.elapsed().as_secs(), %stats, "Maintenance run finished");
    Ok(())
}
