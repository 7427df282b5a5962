use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::thread;

use super::{
    BlobStore, CloudIdentity, GetStream, GetStreamRequest, PutStream, PutStreamRequest,
    StoreError, StoreResult,
};

/// Filesystem-backed blob store: a bucket is a directory under the root, a
/// blob path is a relative file path inside it. Lets the worker run end to
/// end without cloud credentials.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn blob_path(&self, bucket: &str, path: &str) -> PathBuf {
        self.root.join(bucket).join(path)
    }

    fn write_atomic(target: &Path, data: &[u8]) -> StoreResult<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = target.with_extension("tmp-upload");
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(data)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, target)?;
        Ok(())
    }
}

impl BlobStore for LocalBlobStore {
    fn get_blob(
        &self,
        bucket: &str,
        path: &str,
        _identity: Option<&CloudIdentity>,
    ) -> StoreResult<Vec<u8>> {
        let full = self.blob_path(bucket, path);
        match fs::read(&full) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                bucket: bucket.to_string(),
                path: path.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn put_blob(
        &self,
        bucket: &str,
        path: &str,
        data: Vec<u8>,
        _identity: Option<&CloudIdentity>,
    ) -> StoreResult<()> {
        Self::write_atomic(&self.blob_path(bucket, path), &data)
    }

    fn get_blob_stream(&self, req: GetStreamRequest) -> StoreResult<GetStream> {
        let full = self.blob_path(&req.bucket, &req.path);
        let mut file = match fs::File::open(&full) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound { bucket: req.bucket, path: req.path })
            }
            Err(e) => return Err(e.into()),
        };
        let chunk_size = req.max_bytes_per_chunk.max(1);
        let (feeder, stream) = GetStream::pair();
        thread::spawn(move || {
            let mut buf = vec![0u8; chunk_size];
            loop {
                match file.read(&mut buf) {
                    Ok(0) => {
                        feeder.finish(Ok(()));
                        return;
                    }
                    Ok(n) => {
                        if feeder.push(buf[..n].to_vec()).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        feeder.finish(Err(e.into()));
                        return;
                    }
                }
            }
        });
        Ok(stream)
    }

    fn put_blob_stream(&self, req: PutStreamRequest) -> StoreResult<PutStream> {
        let target = self.blob_path(&req.bucket, &req.path);
        let (producer, consumer) = PutStream::pair();
        thread::spawn(move || {
            let mut data = req.initial;
            while let Some(chunk) = consumer.next_chunk() {
                data.extend_from_slice(&chunk);
            }
            if consumer.is_cancelled() {
                consumer.finish(Err(StoreError::Cancelled));
                return;
            }
            consumer.finish(Self::write_atomic(&target, &data));
        });
        Ok(producer)
    }
}
