//! Watch the configured folder and upload every new JSON file to MongoDB.

use anyhow::{Context, Result};
use clap::Parser;
use mongowatch::sink::MongoSink;
use mongowatch::watch::{run_watcher, WatchOptions};
use mongowatch::{Config, FileProcessor};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "mongowatch")]
#[command(about = "Upload JSON files dropped into a folder to MongoDB, then delete them")]
struct Args {
    /// Config file (defaults to $MONGOWATCH_CONFIG, then ./config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Skip draining files already in the folder at startup
    #[arg(long)]
    no_sweep: bool,

    /// Do not ping MongoDB before watching
    #[arg(long)]
    skip_ping: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", &config.watch.log_level),
    )
    .init();

    log::info!("Starting mongowatch");
    config.ensure_folders()?;
    log::info!("Watched folder: {}", config.watch_folder().display());

    let sink = MongoSink::connect(
        &config.mongodb_uri()?,
        &config.mongodb.database,
        config.insert_timeout(),
    )
    .await?;
    if !args.skip_ping {
        sink.ping()
            .await
            .context("MongoDB did not answer ping (use --skip-ping to start anyway)")?;
        log::info!("Connected to MongoDB database {}", sink.database());
    }

    let processor = FileProcessor::new(Arc::new(sink), config.retry_policy())
        .with_reject_dir(config.disposal.reject_dir.clone());

    let (stop, shutdown) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Ctrl+C received, finishing the current file");
        }
        let _ = stop.send(true);
    });

    let options = WatchOptions {
        startup_sweep: !args.no_sweep,
        rescan_on_overflow: config.watch.rescan_on_overflow,
    };

    log::info!("Watching for new files (Ctrl+C to stop)");
    let summary = run_watcher(&processor, config.watch_folder(), options, shutdown).await?;
    log::info!(
        "Stopped: {} uploaded, {} exhausted, {} rejected",
        summary.succeeded,
        summary.exhausted,
        summary.rejected
    );
    Ok(())
}
