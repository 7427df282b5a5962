//! Object-store access: the client interface the worker is written against,
//! plus the streaming handle types shared by every implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stream::Completion;

pub mod local;
pub mod memory;
pub mod streamer;

pub use streamer::{BlobStreamer, GetBlobStreamContext, PutBlobStreamContext, UploadHandle};

/// How many chunks a streaming download may hold before the server-side
/// feeder blocks.
const GET_STREAM_QUEUE_CHUNKS: usize = 16;
/// How many chunks a streaming upload may hold before pushes are rejected.
const PUT_STREAM_QUEUE_CHUNKS: usize = 1024;

/// Opaque cloud identity (project + workload identity provider) forwarded
/// with cross-tenant requests. The bundled stores ignore it; real clients
/// use it to mint attestation tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudIdentity {
    pub project_id: String,
    pub wip_provider: String,
}

impl CloudIdentity {
    pub fn new(project_id: impl Into<String>, wip_provider: impl Into<String>) -> Self {
        Self { project_id: project_id.into(), wip_provider: wip_provider.into() }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("blob not found: {bucket}/{path}")]
    NotFound { bucket: String, path: String },
    #[error("transport failure (code {code})")]
    Transport { code: u32 },
    #[error("stream cancelled")]
    Cancelled,
    #[error("stream closed")]
    StreamClosed,
    #[error("i/o error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone)]
pub struct GetStreamRequest {
    pub bucket: String,
    pub path: String,
    pub max_bytes_per_chunk: usize,
    pub identity: Option<CloudIdentity>,
}

#[derive(Debug, Clone)]
pub struct PutStreamRequest {
    pub bucket: String,
    pub path: String,
    /// First chunk of the upload, carried with the open request.
    pub initial: Vec<u8>,
    pub identity: Option<CloudIdentity>,
}

/// Consumer side of a streaming download. The store's feeder pushes chunks
/// into the bounded queue, records the terminal status, and hangs up;
/// chunks queued before the hang-up remain readable.
pub struct GetStream {
    chunks: Receiver<Vec<u8>>,
    terminal: Arc<Completion<StoreError>>,
}

impl GetStream {
    /// Creates a connected feeder/consumer pair. Store implementations keep
    /// the feeder and hand the consumer to the caller.
    pub fn pair() -> (GetStreamFeeder, GetStream) {
        let (tx, rx) = bounded(GET_STREAM_QUEUE_CHUNKS);
        let terminal = Arc::new(Completion::new());
        (
            GetStreamFeeder { chunks: tx, terminal: terminal.clone() },
            GetStream { chunks: rx, terminal },
        )
    }

    pub fn try_next_chunk(&self) -> Option<Vec<u8>> {
        self.chunks.try_recv().ok()
    }

    /// Waits up to `timeout` for the next chunk. `Ok(None)` means the feeder
    /// hung up and the queue is drained; the terminal status is ready then.
    pub fn next_chunk_timeout(&self, timeout: Duration) -> Result<Option<Vec<u8>>, ()> {
        match self.chunks.recv_timeout(timeout) {
            Ok(chunk) => Ok(Some(chunk)),
            Err(RecvTimeoutError::Disconnected) => Ok(None),
            Err(RecvTimeoutError::Timeout) => Err(()),
        }
    }

    /// Terminal status of the stream; blocks until the feeder finished.
    pub fn wait_terminal(&self) -> StoreResult<()> {
        self.terminal.wait()
    }
}

/// Producer half handed to store implementations.
pub struct GetStreamFeeder {
    chunks: Sender<Vec<u8>>,
    terminal: Arc<Completion<StoreError>>,
}

impl GetStreamFeeder {
    /// Blocks while the consumer-side queue is full.
    pub fn push(&self, chunk: Vec<u8>) -> StoreResult<()> {
        self.chunks.send(chunk).map_err(|_| StoreError::StreamClosed)
    }

    /// Records the terminal status and hangs up the chunk queue.
    pub fn finish(self, result: StoreResult<()>) {
        self.terminal.set(result);
        // Sender drops here; the consumer observes the hang-up after
        // draining whatever is still queued.
    }
}

/// Producer side of a streaming upload.
pub struct PutStream {
    chunks: Option<Sender<Vec<u8>>>,
    cancelled: Arc<AtomicBool>,
    terminal: Arc<Completion<StoreError>>,
}

impl PutStream {
    /// Creates a connected producer/consumer pair. Store implementations
    /// keep the consumer and hand the producer to the caller.
    pub fn pair() -> (PutStream, PutStreamConsumer) {
        let (tx, rx) = bounded(PUT_STREAM_QUEUE_CHUNKS);
        let cancelled = Arc::new(AtomicBool::new(false));
        let terminal = Arc::new(Completion::new());
        (
            PutStream { chunks: Some(tx), cancelled: cancelled.clone(), terminal: terminal.clone() },
            PutStreamConsumer { chunks: rx, cancelled, terminal },
        )
    }

    /// Enqueues one more chunk without blocking.
    pub fn try_push(&self, chunk: Vec<u8>) -> StoreResult<()> {
        match &self.chunks {
            Some(tx) => tx.try_send(chunk).map_err(|_| StoreError::StreamClosed),
            None => Err(StoreError::StreamClosed),
        }
    }

    /// Signals end-of-stream. The upload commits asynchronously; wait on
    /// [`wait_terminal`](Self::wait_terminal) for the outcome.
    pub fn mark_done(&mut self) {
        self.chunks = None;
    }

    /// Aborts the upload. The consumer discards buffered data and reports a
    /// cancelled terminal status.
    pub fn try_cancel(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.chunks = None;
    }

    pub fn wait_terminal(&self) -> StoreResult<()> {
        self.terminal.wait()
    }
}

/// Consumer half handed to store implementations.
pub struct PutStreamConsumer {
    chunks: Receiver<Vec<u8>>,
    cancelled: Arc<AtomicBool>,
    terminal: Arc<Completion<StoreError>>,
}

impl PutStreamConsumer {
    /// Receives the next chunk; `None` once the producer hung up.
    pub fn next_chunk(&self) -> Option<Vec<u8>> {
        self.chunks.recv().ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn finish(self, result: StoreResult<()>) {
        self.terminal.set(result);
    }
}

/// The storage operations the worker needs. Implementations must be safe to
/// share across the executors.
pub trait BlobStore: Send + Sync {
    /// Whole-blob read.
    fn get_blob(
        &self,
        bucket: &str,
        path: &str,
        identity: Option<&CloudIdentity>,
    ) -> StoreResult<Vec<u8>>;

    /// Whole-blob write, replacing any existing object.
    fn put_blob(
        &self,
        bucket: &str,
        path: &str,
        data: Vec<u8>,
        identity: Option<&CloudIdentity>,
    ) -> StoreResult<()>;

    /// Opens a chunked download.
    fn get_blob_stream(&self, req: GetStreamRequest) -> StoreResult<GetStream>;

    /// Opens a chunked upload whose first chunk is `req.initial`.
    fn put_blob_stream(&self, req: PutStreamRequest) -> StoreResult<PutStream>;
}
