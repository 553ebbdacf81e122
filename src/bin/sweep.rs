//! One-shot drain: upload every JSON file currently in the folder, then exit.

use anyhow::Result;
use clap::Parser;
use mongowatch::sink::MongoSink;
use mongowatch::sweep::run_sweep;
use mongowatch::{Config, Discovery, FileProcessor};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "sweep")]
#[command(about = "Upload the JSON files already in the watched folder and exit")]
struct Args {
    /// Config file (defaults to $MONGOWATCH_CONFIG, then ./config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
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

    config.ensure_folders()?;
    let sink = MongoSink::connect(
        &config.mongodb_uri()?,
        &config.mongodb.database,
        config.insert_timeout(),
    )
    .await?;
    let processor = FileProcessor::new(Arc::new(sink), config.retry_policy())
        .with_reject_dir(config.disposal.reject_dir.clone());

    let start = Instant::now();
    let (summary, _) = run_sweep(&processor, config.watch_folder(), Discovery::Startup).await;
    log::info!(
        "Sweep finished in {:?}: {} file(s), {} uploaded",
        start.elapsed(),
        summary.total(),
        summary.succeeded
    );

    if !summary.all_succeeded() {
        anyhow::bail!(
            "{} file(s) exhausted their retries and {} were rejected",
            summary.exhausted,
            summary.rejected
        );
    }
    Ok(())
}
