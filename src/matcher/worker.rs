use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use thiserror::Error;

use crate::csv::{CsvStreamParser, CsvStreamParserConfig, ParseError};
use crate::store::{
    BlobStreamer, CloudIdentity, GetBlobStreamContext, PutBlobStreamContext, StoreError,
    UploadHandle,
};
use crate::store::BlobStore;

use super::table::{MatchTable, TableError};

const PUBLISHER_MAPPING_COLS: usize = 2;
const ADVERTISER_LIST_COLS: usize = 1;
/// Chunk size requested for the advertiser list download.
pub const ADVERTISER_CHUNK_BYTES: usize = 80 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ExportMatchesRequest {
    pub publisher_mapping_bucket: String,
    pub publisher_mapping_path: String,
    pub advertiser_list_bucket: String,
    pub advertiser_list_path: String,
    pub output_bucket: String,
    pub output_path: String,
    pub publisher_identity: Option<CloudIdentity>,
    pub advertiser_identity: Option<CloudIdentity>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MatchError {
    #[error("failed loading publisher mapping: {0}")]
    MappingFetch(StoreError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("publisher mapping rejected: {0}")]
    Table(#[from] TableError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Match-job driver: loads the publisher mapping into the match table, then
/// streams the advertiser list through a CSV parser, marking hits and
/// streaming their surrogates to the output blob.
pub struct MatchWorker {
    store: Arc<dyn BlobStore>,
    streamer: BlobStreamer,
}

impl MatchWorker {
    pub fn new(store: Arc<dyn BlobStore>, streamer: BlobStreamer) -> Self {
        Self { store, streamer }
    }

    pub fn export_matches(&self, req: &ExportMatchesRequest) -> Result<(), MatchError> {
        let table = MatchTable::new();
        self.load_mapping(req, &table)?;
        log::info!(
            "[MatchWorker] mapping loaded with {} entries, streaming advertiser list {}/{}",
            table.len(),
            req.advertiser_list_bucket,
            req.advertiser_list_path
        );

        let parser = Arc::new(CsvStreamParser::new(CsvStreamParserConfig::new(
            ADVERTISER_LIST_COLS,
        )));
        let all_received = Arc::new(AtomicBool::new(false));
        let stream_failure: Arc<Mutex<Option<MatchError>>> = Arc::new(Mutex::new(None));

        let callback = {
            let parser = parser.clone();
            let all_received = all_received.clone();
            let stream_failure = stream_failure.clone();
            Box::new(move |chunk: &[u8], done: bool, status: Result<(), StoreError>| {
                if done {
                    if let Err(e) = status {
                        let mut failure =
                            stream_failure.lock().unwrap_or_else(|p| p.into_inner());
                        // An earlier chunk failure takes precedence.
                        if failure.is_none() {
                            *failure = Some(MatchError::Store(e));
                        }
                    }
                    all_received.store(true, Ordering::SeqCst);
                } else if let Err(e) = parser.add_chunk(chunk) {
                    let mut failure = stream_failure.lock().unwrap_or_else(|p| p.into_inner());
                    if failure.is_none() {
                        *failure = Some(MatchError::Parse(e));
                    }
                }
            })
        };

        self.streamer.get_blob_stream(GetBlobStreamContext::new(
            req.advertiser_list_bucket.clone(),
            req.advertiser_list_path.clone(),
            ADVERTISER_CHUNK_BYTES,
            req.advertiser_identity.clone(),
            callback,
        ))?;

        let mut upload: Option<UploadHandle> = None;
        let mut matched: u64 = 0;
        while !all_received.load(Ordering::SeqCst) {
            matched += self.drain_rows(req, &parser, &table, &mut upload)?;
            thread::yield_now();
        }

        let failure = stream_failure.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(err) = failure {
            cancel_if_open(&mut upload);
            return Err(err);
        }

        // Rows parsed between the last drain and the done marker.
        matched += self.drain_rows(req, &parser, &table, &mut upload)?;
        crate::metrics::record_ids_matched(matched);

        match upload {
            Some(mut handle) => handle.finish().map_err(MatchError::Store),
            None => {
                // No ID matched: succeed without creating an output blob.
                log::info!(
                    "[MatchWorker] no advertiser IDs matched; {}/{} not created",
                    req.output_bucket,
                    req.output_path
                );
                Ok(())
            }
        }
    }

    /// Bulk-loads the two-column publisher mapping into the match table.
    /// A duplicate plaintext key fails the job.
    fn load_mapping(
        &self,
        req: &ExportMatchesRequest,
        table: &MatchTable<String, String>,
    ) -> Result<(), MatchError> {
        let body = self
            .store
            .get_blob(
                &req.publisher_mapping_bucket,
                &req.publisher_mapping_path,
                req.publisher_identity.as_ref(),
            )
            .map_err(MatchError::MappingFetch)?;

        let parser = CsvStreamParser::new(CsvStreamParserConfig::new(PUBLISHER_MAPPING_COLS));
        parser.add_chunk(&body)?;
        while parser.has_row() {
            let row = parser.next_row()?;
            let plaintext = row.column(0).map_err(ParseError::from)?;
            let surrogate = row.column(1).map_err(ParseError::from)?;
            table.add(plaintext.to_string(), surrogate.to_string())?;
        }
        Ok(())
    }

    /// Drains every parsed row, marking matches and streaming their
    /// surrogates; returns how many rows matched. The upload is opened
    /// lazily with the first matched surrogate as its initial data. Any
    /// failure cancels an open upload.
    fn drain_rows(
        &self,
        req: &ExportMatchesRequest,
        parser: &CsvStreamParser,
        table: &MatchTable<String, String>,
        upload: &mut Option<UploadHandle>,
    ) -> Result<u64, MatchError> {
        let mut matched = 0;
        while parser.has_row() {
            let row = match parser.next_row() {
                Ok(row) => row,
                Err(e) => {
                    cancel_if_open(upload);
                    return Err(e.into());
                }
            };
            let plaintext = match row.column(0) {
                Ok(p) => p.to_string(),
                Err(e) => {
                    cancel_if_open(upload);
                    return Err(ParseError::from(e).into());
                }
            };
            let surrogate = match table.mark_matched(&plaintext) {
                Ok(s) => s,
                // An unknown advertiser ID is simply not a match.
                Err(TableError::DoesNotExist) => continue,
                Err(e) => {
                    cancel_if_open(upload);
                    return Err(e.into());
                }
            };

            matched += 1;
            let line = format!("{}\n", surrogate).into_bytes();
            match upload {
                Some(handle) => {
                    if let Err(e) = handle.push(line) {
                        // push already cancelled and latched the stream.
                        return Err(MatchError::Store(e));
                    }
                }
                None => {
                    let handle = self.streamer.put_blob_stream(PutBlobStreamContext {
                        bucket: req.output_bucket.clone(),
                        path: req.output_path.clone(),
                        initial: line,
                        identity: req.publisher_identity.clone(),
                    })?;
                    *upload = Some(handle);
                }
            }
        }
        Ok(matched)
    }
}

fn cancel_if_open(upload: &mut Option<UploadHandle>) {
    if let Some(handle) = upload.as_mut() {
        let _ = handle.cancel();
    }
}
