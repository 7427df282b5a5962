use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use env_logger::Env;
use log::{error, info};

use pair_worker::config::WorkerConfig;
use pair_worker::generator::Generator;
use pair_worker::jobs;
use pair_worker::matcher::MatchWorker;
use pair_worker::queue::LocalJobQueue;
use pair_worker::runtime::Runtime;
use pair_worker::store::local::LocalBlobStore;
use pair_worker::store::{BlobStore, BlobStreamer};

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    if let Err(e) = run() {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cfg = WorkerConfig::from_env();
    info!(
        "Starting PAIR worker: queue_dir={} store_root={} poll_interval={}ms",
        cfg.queue_dir, cfg.store_root, cfg.poll_interval_ms
    );

    let runtime = Runtime::new(&cfg).context("failed starting executors")?;
    let queue = LocalJobQueue::new(&cfg.queue_dir)
        .map_err(anyhow::Error::from)
        .context("failed opening job queue")?;
    let store: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(&cfg.store_root));

    let generator = Generator::new(store.clone(), runtime.cpu());
    let streamer = BlobStreamer::new(store.clone(), runtime.io(), runtime.stop_flag());
    let matcher = MatchWorker::new(store, streamer);

    // Polls until the process is killed; the stop flag is only raised by
    // shutdown paths, so a clean exit is unreachable in normal operation.
    jobs::run_worker(
        &queue,
        &generator,
        &matcher,
        Duration::from_millis(cfg.poll_interval_ms),
        runtime.stop_flag(),
    );
    info!("Worker loop exited");
    Ok(())
}
