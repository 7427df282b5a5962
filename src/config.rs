use serde::{Deserialize, Serialize};

/// Runtime configuration for the worker. Every field can be overridden
/// through a `PAIR_WORKER_*` environment variable; unset values fall back to
/// the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Directory holding pending job bodies for the local job queue.
    pub queue_dir: String,
    /// Root directory for the local blob store (bucket = subdirectory).
    pub store_root: String,
    /// Sleep between job-queue polls, in milliseconds.
    pub poll_interval_ms: u64,
    /// CPU executor pool size. 0 means all available cores.
    pub cpu_threads: usize,
    /// I/O executor pool size.
    pub io_threads: usize,
    /// Chunk size requested for streaming downloads, in bytes.
    pub max_bytes_per_chunk: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_dir: "jobs".into(),
            store_root: "buckets".into(),
            poll_interval_ms: 5_000,
            cpu_threads: 0,
            io_threads: 16,
            max_bytes_per_chunk: 80 * 1024 * 1024,
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            queue_dir: env_or("PAIR_WORKER_QUEUE_DIR", d.queue_dir),
            store_root: env_or("PAIR_WORKER_STORE_ROOT", d.store_root),
            poll_interval_ms: env_parse("PAIR_WORKER_POLL_INTERVAL_MS", d.poll_interval_ms),
            cpu_threads: env_parse("PAIR_WORKER_CPU_THREADS", d.cpu_threads),
            io_threads: env_parse("PAIR_WORKER_IO_THREADS", d.io_threads),
            max_bytes_per_chunk: env_parse("PAIR_WORKER_CHUNK_BYTES", d.max_bytes_per_chunk),
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
