//! Generate-job driver: fetch the publisher list, assign surrogates, upload
//! the mapping.

pub mod assigner;
pub mod fetcher;
pub mod uploader;

use std::sync::Arc;
use std::thread;

use thiserror::Error;

pub use assigner::{AssignError, SurrogateAssigner, SurrogatePair};
pub use fetcher::{FetchError, PublisherListFetcher};
pub use uploader::{serialize_mapping, MappingUploader, UploadMappingRequest};

use crate::runtime::Executor;
use crate::store::{BlobStore, CloudIdentity, StoreError};
use crate::stream::StreamChannel;

#[derive(Debug, Clone)]
pub struct GeneratePublisherListRequest {
    /// Bucket holding the publisher's list and metadata blobs.
    pub input_bucket: String,
    /// Plaintext ID list, one ID per line.
    pub list_path: String,
    /// Blob whose raw bytes name the output bucket.
    pub metadata_path: String,
    /// Name for the generated mapping blob in the output bucket.
    pub mapping_name: String,
    pub identity: Option<CloudIdentity>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GenerateError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("failed reading output bucket name: {0}")]
    Metadata(StoreError),
    #[error(transparent)]
    Assign(#[from] AssignError),
    #[error("failed pushing plaintexts to the assigner")]
    Push,
    #[error("failed uploading mapping: {0}")]
    Upload(StoreError),
}

pub struct Generator {
    store: Arc<dyn BlobStore>,
    fetcher: PublisherListFetcher,
    assigner: SurrogateAssigner,
    uploader: MappingUploader,
}

impl Generator {
    pub fn new(store: Arc<dyn BlobStore>, cpu: Arc<Executor>) -> Self {
        Self {
            fetcher: PublisherListFetcher::new(store.clone()),
            assigner: SurrogateAssigner::new(cpu),
            uploader: MappingUploader::new(store.clone()),
            store,
        }
    }

    /// Runs one Generate job: fetch the list, assign surrogates, upload the
    /// mapping. Mapping row order follows assigner emission order, which is
    /// unspecified relative to the input list.
    pub fn generate(&self, req: GeneratePublisherListRequest) -> Result<(), GenerateError> {
        let ids = self
            .fetcher
            .fetch_ids(&req.input_bucket, &req.list_path, req.identity.as_ref())?;
        log::info!(
            "[Generator] generating mapping for {} IDs from {}/{}",
            ids.len(),
            req.input_bucket,
            req.list_path
        );

        let output_bucket = self.output_bucket_name(&req)?;
        let pairs = self.assign_all(ids)?;
        crate::metrics::record_surrogates_assigned(pairs.len() as u64);
        let mapping = serialize_mapping(&pairs);

        self.uploader
            .upload(UploadMappingRequest {
                bucket: output_bucket,
                prefix: None,
                upload_name: req.mapping_name.clone(),
                mapping,
                identity: req.identity.clone(),
            })
            .map_err(GenerateError::Upload)
    }

    /// The metadata blob's raw bytes are the output bucket name; a trailing
    /// newline is tolerated.
    fn output_bucket_name(&self, req: &GeneratePublisherListRequest) -> Result<String, GenerateError> {
        let data = self
            .store
            .get_blob(&req.input_bucket, &req.metadata_path, req.identity.as_ref())
            .map_err(GenerateError::Metadata)?;
        Ok(String::from_utf8_lossy(&data).trim_end().to_string())
    }

    /// Pushes every plaintext through the assigner and collects the emitted
    /// pairs. The pushing side runs on a dedicated thread that is joined
    /// before returning.
    fn assign_all(&self, ids: Vec<String>) -> Result<Vec<SurrogatePair>, GenerateError> {
        let expected = ids.len();
        let plaintexts: StreamChannel<String, AssignError> = StreamChannel::new();
        self.assigner.assign(plaintexts.clone())?;

        let pusher = {
            let plaintexts = plaintexts.clone();
            thread::spawn(move || {
                for id in ids {
                    if plaintexts.try_push(id).is_err() {
                        plaintexts.mark_done();
                        return false;
                    }
                }
                plaintexts.mark_done();
                true
            })
        };

        let pairs_stream: StreamChannel<SurrogatePair, AssignError> = StreamChannel::new();
        self.assigner.stream_surrogates(pairs_stream.clone());

        let mut pairs = Vec::with_capacity(expected);
        loop {
            match pairs_stream.try_next() {
                Some(pair) => pairs.push(pair),
                None => {
                    if pairs_stream.is_marked_done() {
                        // Catch anything queued between the empty poll and
                        // the done marker.
                        while let Some(pair) = pairs_stream.try_next() {
                            pairs.push(pair);
                        }
                        break;
                    }
                    thread::yield_now();
                }
            }
        }

        let pushed_ok = pusher.join().map_err(|_| GenerateError::Push)?;
        if !pushed_ok {
            return Err(GenerateError::Push);
        }
        plaintexts.wait_result()?;
        pairs_stream.wait_result()?;
        Ok(pairs)
    }
}
