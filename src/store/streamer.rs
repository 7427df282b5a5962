use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{
    BlobStore, CloudIdentity, GetStreamRequest, PutStream, PutStreamRequest, StoreError,
    StoreResult,
};
use crate::runtime::Executor;

/// How long the download poller sleeps on an idle queue before re-checking
/// the shutdown flag.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Invoked once per downloaded chunk with `(chunk, done, status)`. The final
/// invocation carries an empty chunk, `done = true` and the stream's
/// terminal status, and happens exactly once.
pub type ChunkCallback = Box<dyn FnMut(&[u8], bool, StoreResult<()>) + Send>;

pub struct GetBlobStreamContext {
    pub bucket: String,
    pub path: String,
    pub max_bytes_per_chunk: usize,
    pub identity: Option<CloudIdentity>,
    pub on_chunk: ChunkCallback,
}

impl GetBlobStreamContext {
    pub fn new(
        bucket: impl Into<String>,
        path: impl Into<String>,
        max_bytes_per_chunk: usize,
        identity: Option<CloudIdentity>,
        on_chunk: ChunkCallback,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            path: path.into(),
            max_bytes_per_chunk,
            identity,
            on_chunk,
        }
    }
}

pub struct PutBlobStreamContext {
    pub bucket: String,
    pub path: String,
    /// First chunk of the upload, sent with the open request.
    pub initial: Vec<u8>,
    pub identity: Option<CloudIdentity>,
}

/// Producer handle for an open streaming upload.
///
/// `push` never blocks; `finish` and `cancel` block until the underlying
/// stream reports completion. Once a terminal status has been observed it is
/// latched: every further call is a no-op returning the same status.
pub struct UploadHandle {
    stream: PutStream,
    terminal: Option<StoreResult<()>>,
}

impl UploadHandle {
    pub fn push(&mut self, data: Vec<u8>) -> StoreResult<()> {
        if let Some(t) = &self.terminal {
            return t.clone();
        }
        match self.stream.try_push(data) {
            Ok(()) => Ok(()),
            Err(_) => {
                self.stream.try_cancel();
                self.latch()
            }
        }
    }

    /// Ends the upload and blocks until it commits.
    pub fn finish(&mut self) -> StoreResult<()> {
        if let Some(t) = &self.terminal {
            return t.clone();
        }
        self.stream.mark_done();
        self.latch()
    }

    /// Aborts the upload and blocks until the stream winds down. The
    /// returned status is the stream's own terminal failure, not the
    /// caller's reason for cancelling.
    pub fn cancel(&mut self) -> StoreResult<()> {
        if let Some(t) = &self.terminal {
            return t.clone();
        }
        self.stream.try_cancel();
        self.latch()
    }

    fn latch(&mut self) -> StoreResult<()> {
        let t = self.stream.wait_terminal();
        self.terminal = Some(t.clone());
        t
    }
}

/// Streaming get/put channels over the blob-store client. Downloads are
/// pumped by a poller task on the I/O executor; uploads hand the caller an
/// [`UploadHandle`].
pub struct BlobStreamer {
    store: Arc<dyn BlobStore>,
    io: Arc<Executor>,
    stop: Arc<AtomicBool>,
}

impl BlobStreamer {
    pub fn new(store: Arc<dyn BlobStore>, io: Arc<Executor>, stop: Arc<AtomicBool>) -> Self {
        Self { store, io, stop }
    }

    /// Opens a download and schedules its poller. The callback runs on the
    /// I/O worker that hosts the poller, so it must stay cheap.
    ///
    /// On shutdown the poller exits early and reports a synthetic
    /// `Cancelled` terminal status, so callers waiting on the done signal
    /// cannot hang.
    pub fn get_blob_stream(&self, ctx: GetBlobStreamContext) -> StoreResult<()> {
        let stream = self.store.get_blob_stream(GetStreamRequest {
            bucket: ctx.bucket.clone(),
            path: ctx.path.clone(),
            max_bytes_per_chunk: ctx.max_bytes_per_chunk,
            identity: ctx.identity,
        })?;
        let stop = self.stop.clone();
        let mut on_chunk = ctx.on_chunk;
        let label = format!("{}/{}", ctx.bucket, ctx.path);
        self.io.spawn(move || loop {
            match stream.next_chunk_timeout(POLL_INTERVAL) {
                Ok(Some(chunk)) => on_chunk(&chunk, false, Ok(())),
                Ok(None) => {
                    let status = stream.wait_terminal();
                    on_chunk(&[], true, status);
                    return;
                }
                Err(()) => {
                    if stop.load(Ordering::SeqCst) {
                        log::warn!("[BlobStreamer] shutdown while streaming {}", label);
                        on_chunk(&[], true, Err(StoreError::Cancelled));
                        return;
                    }
                }
            }
        });
        Ok(())
    }

    /// Opens an upload whose first chunk is `ctx.initial` and returns the
    /// push handle for the rest of the stream.
    pub fn put_blob_stream(&self, ctx: PutBlobStreamContext) -> StoreResult<UploadHandle> {
        let stream = self.store.put_blob_stream(PutStreamRequest {
            bucket: ctx.bucket,
            path: ctx.path,
            initial: ctx.initial,
            identity: ctx.identity,
        })?;
        Ok(UploadHandle { stream, terminal: None })
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryBlobStore;
    use std::sync::mpsc;

    fn streamer(store: Arc<MemoryBlobStore>) -> (BlobStreamer, Arc<AtomicBool>) {
        let io = Arc::new(Executor::new("test-io", 2).unwrap());
        let stop = Arc::new(AtomicBool::new(false));
        (BlobStreamer::new(store, io, stop.clone()), stop)
    }

    #[test]
    fn delivers_chunks_then_done_exactly_once() {
        let store = Arc::new(MemoryBlobStore::new());
        store.insert("b", "list", b"abcdef".to_vec());
        let (streamer, _stop) = streamer(store);

        let (tx, rx) = mpsc::channel();
        streamer
            .get_blob_stream(GetBlobStreamContext::new(
                "b",
                "list",
                2,
                None,
                Box::new(move |chunk, done, status| {
                    tx.send((chunk.to_vec(), done, status)).unwrap();
                }),
            ))
            .unwrap();

        let mut data = Vec::new();
        let mut done_calls = 0;
        for (chunk, done, status) in rx.iter() {
            if done {
                done_calls += 1;
                assert!(status.is_ok());
                assert!(chunk.is_empty());
                break;
            }
            data.extend_from_slice(&chunk);
        }
        assert_eq!(data, b"abcdef");
        assert_eq!(done_calls, 1);
    }

    #[test]
    fn done_callback_carries_stream_failure() {
        let store = Arc::new(MemoryBlobStore::new());
        store.insert("b", "list", b"x\n".to_vec());
        store.fail_stream_with("b", "list", 12345);
        let (streamer, _stop) = streamer(store);

        let (tx, rx) = mpsc::channel();
        streamer
            .get_blob_stream(GetBlobStreamContext::new(
                "b",
                "list",
                1024,
                None,
                Box::new(move |_, done, status| {
                    if done {
                        tx.send(status).unwrap();
                    }
                }),
            ))
            .unwrap();
        assert_eq!(rx.recv().unwrap().unwrap_err(), StoreError::Transport { code: 12345 });
    }

    #[test]
    fn missing_blob_fails_the_open_not_the_callback() {
        let store = Arc::new(MemoryBlobStore::new());
        let (streamer, _stop) = streamer(store);
        let err = streamer
            .get_blob_stream(GetBlobStreamContext::new(
                "b",
                "nope",
                16,
                None,
                Box::new(|_, _, _| panic!("callback must not run")),
            ))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn upload_push_finish_commits_in_order() {
        let store = Arc::new(MemoryBlobStore::new());
        let (streamer, _stop) = streamer(store.clone());
        let mut handle = streamer
            .put_blob_stream(PutBlobStreamContext {
                bucket: "out".into(),
                path: "match.csv".into(),
                initial: b"val1\n".to_vec(),
                identity: None,
            })
            .unwrap();
        handle.push(b"val3\n".to_vec()).unwrap();
        handle.finish().unwrap();
        assert_eq!(store.blob("out", "match.csv").unwrap(), b"val1\nval3\n");
    }

    #[test]
    fn terminal_status_is_latched_after_finish() {
        let store = Arc::new(MemoryBlobStore::new());
        let (streamer, _stop) = streamer(store.clone());
        let mut handle = streamer
            .put_blob_stream(PutBlobStreamContext {
                bucket: "out".into(),
                path: "p".into(),
                initial: Vec::new(),
                identity: None,
            })
            .unwrap();
        handle.finish().unwrap();
        // The stream is gone; both calls replay the latched status.
        assert!(handle.push(b"late".to_vec()).is_ok());
        assert!(handle.finish().is_ok());
        assert_eq!(store.blob("out", "p").unwrap(), b"");
    }

    #[test]
    fn cancel_latches_the_cancelled_status() {
        let store = Arc::new(MemoryBlobStore::new());
        let (streamer, _stop) = streamer(store.clone());
        let mut handle = streamer
            .put_blob_stream(PutBlobStreamContext {
                bucket: "out".into(),
                path: "p".into(),
                initial: b"data".to_vec(),
                identity: None,
            })
            .unwrap();
        assert_eq!(handle.cancel().unwrap_err(), StoreError::Cancelled);
        assert_eq!(handle.push(b"more".to_vec()).unwrap_err(), StoreError::Cancelled);
        assert_eq!(handle.finish().unwrap_err(), StoreError::Cancelled);
        assert!(!store.contains("out", "p"));
    }

    #[test]
    fn shutdown_reports_synthetic_cancelled_done() {
        let store = Arc::new(MemoryBlobStore::new());
        // Feed an empty blob but inject nothing; we want the poller parked on
        // an open queue. Use a blob the feeder finishes immediately, then a
        // second stream where stop beats the data: simplest is an empty blob
        // plus the stop flag raised before the poller observes the hang-up.
        store.insert("b", "slow", Vec::new());
        let io = Arc::new(Executor::new("test-io", 1).unwrap());
        let stop = Arc::new(AtomicBool::new(true));
        // With stop pre-raised, a poller that times out before seeing the
        // hang-up reports Cancelled; one that sees the clean hang-up first
        // reports Ok. Either way the done callback fires exactly once.
        let streamer = BlobStreamer::new(store, io, stop);
        let (tx, rx) = mpsc::channel();
        streamer
            .get_blob_stream(GetBlobStreamContext::new(
                "b",
                "slow",
                16,
                None,
                Box::new(move |_, done, status| {
                    if done {
                        tx.send(status).unwrap();
                    }
                }),
            ))
            .unwrap();
        let status = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(status.is_ok() || status == Err(StoreError::Cancelled));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }
}
