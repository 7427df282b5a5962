/// Dedicated thread pools for the worker's two task classes.
///
/// Stream pollers and blob-store feeders run on the I/O pool; surrogate
/// assignment runs on the CPU pool. Keeping the pools separate means a
/// stalled download can never starve assignment work and vice versa.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use rayon::ThreadPool;

use crate::config::WorkerConfig;

/// A named, fixed-size worker pool fed by a FIFO of tasks.
pub struct Executor {
    pool: ThreadPool,
    name: String,
}

impl Executor {
    pub fn new(name: &str, threads: usize) -> Result<Self> {
        let threads = if threads == 0 { default_thread_count() } else { threads };
        let label = name.to_string();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |i| format!("{}-{}", label, i))
            .build()
            .with_context(|| format!("failed to build {} executor", name))?;
        log::info!("[Executor] {} pool started with {} threads", name, threads);
        Ok(Self { pool, name: name.to_string() })
    }

    /// Enqueue a task. Tasks that want to yield re-submit themselves
    /// instead of looping on a worker thread.
    pub fn spawn<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.spawn_fifo(task);
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn default_thread_count() -> usize {
    if let Ok(val) = std::env::var("PAIR_WORKER_CPU_THREADS") {
        if let Ok(n) = val.parse::<usize>() {
            if n > 0 {
                return n;
            }
        }
    }
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(8)
}

/// Everything long-lived that the job drivers share: the two executors and
/// the process-wide stop flag.
pub struct Runtime {
    cpu: Arc<Executor>,
    io: Arc<Executor>,
    stop: Arc<AtomicBool>,
}

impl Runtime {
    pub fn new(cfg: &WorkerConfig) -> Result<Self> {
        Ok(Self {
            cpu: Arc::new(Executor::new("pair-cpu", cfg.cpu_threads)?),
            io: Arc::new(Executor::new("pair-io", cfg.io_threads)?),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn cpu(&self) -> Arc<Executor> {
        self.cpu.clone()
    }

    pub fn io(&self) -> Arc<Executor> {
        self.io.clone()
    }

    /// Shared shutdown flag. Raised once, never lowered.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}
