use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;

use super::{
    BlobStore, CloudIdentity, GetStream, GetStreamRequest, PutStream, PutStreamRequest,
    StoreError, StoreResult,
};

type BlobMap = Arc<Mutex<HashMap<(String, String), Vec<u8>>>>;

/// In-memory blob store. Used by the tests and by short-lived local runs;
/// streaming uses real feeder threads so the concurrency behaves like a
/// remote client. Stream failures can be injected per blob to exercise the
/// transport-error paths.
pub struct MemoryBlobStore {
    blobs: BlobMap,
    stream_failures: Mutex<HashMap<(String, String), u32>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: Arc::new(Mutex::new(HashMap::new())),
            stream_failures: Mutex::new(HashMap::new()),
        }
    }

    /// Makes the next streaming download of `bucket/path` deliver its chunks
    /// and then terminate with a transport failure carrying `code`.
    pub fn fail_stream_with(&self, bucket: &str, path: &str, code: u32) {
        self.stream_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((bucket.to_string(), path.to_string()), code);
    }

    pub fn blob(&self, bucket: &str, path: &str) -> Option<Vec<u8>> {
        self.blobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(bucket.to_string(), path.to_string()))
            .cloned()
    }

    pub fn contains(&self, bucket: &str, path: &str) -> bool {
        self.blob(bucket, path).is_some()
    }

    pub fn insert(&self, bucket: &str, path: &str, data: impl Into<Vec<u8>>) {
        self.blobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((bucket.to_string(), path.to_string()), data.into());
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobStore for MemoryBlobStore {
    fn get_blob(
        &self,
        bucket: &str,
        path: &str,
        _identity: Option<&CloudIdentity>,
    ) -> StoreResult<Vec<u8>> {
        self.blob(bucket, path).ok_or_else(|| StoreError::NotFound {
            bucket: bucket.to_string(),
            path: path.to_string(),
        })
    }

    fn put_blob(
        &self,
        bucket: &str,
        path: &str,
        data: Vec<u8>,
        _identity: Option<&CloudIdentity>,
    ) -> StoreResult<()> {
        self.insert(bucket, path, data);
        Ok(())
    }

    fn get_blob_stream(&self, req: GetStreamRequest) -> StoreResult<GetStream> {
        let data = self.get_blob(&req.bucket, &req.path, req.identity.as_ref())?;
        let failure = self
            .stream_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(req.bucket.clone(), req.path.clone()));
        let chunk_size = req.max_bytes_per_chunk.max(1);
        let (feeder, stream) = GetStream::pair();
        thread::spawn(move || {
            for chunk in data.chunks(chunk_size) {
                if feeder.push(chunk.to_vec()).is_err() {
                    return;
                }
            }
            match failure {
                Some(code) => feeder.finish(Err(StoreError::Transport { code })),
                None => feeder.finish(Ok(())),
            }
        });
        Ok(stream)
    }

    fn put_blob_stream(&self, req: PutStreamRequest) -> StoreResult<PutStream> {
        let (producer, consumer) = PutStream::pair();
        let blobs = self.blobs.clone();
        thread::spawn(move || {
            let mut data = req.initial;
            while let Some(chunk) = consumer.next_chunk() {
                data.extend_from_slice(&chunk);
            }
            if consumer.is_cancelled() {
                consumer.finish(Err(StoreError::Cancelled));
                return;
            }
            blobs
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert((req.bucket, req.path), data);
            consumer.finish(Ok(()));
        });
        Ok(producer)
    }
}
