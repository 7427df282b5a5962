use std::sync::Arc;

use thiserror::Error;

use crate::csv::{CsvStreamParser, CsvStreamParserConfig, ParseError};
use crate::store::{BlobStore, CloudIdentity, StoreError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("PUBLISHER_LIST_FETCHER_ERROR_OPENING_FILE: {0}")]
    Open(StoreError),
    #[error("PUBLISHER_LIST_FETCHER_ERROR_PARSING_DATA: {0}")]
    Parse(ParseError),
}

/// Reads a publisher's plaintext ID list: one blob, one trimmed ID per line.
pub struct PublisherListFetcher {
    store: Arc<dyn BlobStore>,
}

impl PublisherListFetcher {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    pub fn fetch_ids(
        &self,
        bucket: &str,
        path: &str,
        identity: Option<&CloudIdentity>,
    ) -> Result<Vec<String>, FetchError> {
        let data = self
            .store
            .get_blob(bucket, path, identity)
            .map_err(FetchError::Open)?;

        let parser = CsvStreamParser::new(CsvStreamParserConfig::new(1));
        parser.add_chunk(&data).map_err(FetchError::Parse)?;

        let mut ids = Vec::new();
        while parser.has_row() {
            let row = parser.next_row().map_err(FetchError::Parse)?;
            let id = row
                .column(0)
                .map_err(|e| FetchError::Parse(e.into()))?
                .to_string();
            ids.push(id);
        }
        log::debug!("[ListFetcher] fetched {} IDs from {}/{}", ids.len(), bucket, path);
        Ok(ids)
    }
}
