use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crossbeam_channel::{Receiver, Sender};
use memchr::memchr;
use thiserror::Error;

use super::row::{CsvRow, RowError};

/// Hard upper bound on how much data the parser will ever buffer.
pub const MAX_BUFFERED_BYTES: usize = 500 * 1024 * 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Retryable: the caller should drain rows and submit the same chunk again.
    #[error("CSV_STREAM_PARSER_BUFFER_AT_CAPACITY: {buffered} bytes buffered, chunk of {chunk} rejected")]
    BufferAtCapacity { buffered: usize, chunk: usize },
    #[error("CSV_STREAM_PARSER_NO_ROW_AVAILABLE")]
    NoRowAvailable,
    #[error("csv stream parser row queue failed")]
    QueueBroken,
    #[error(transparent)]
    Row(#[from] RowError),
}

impl ParseError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ParseError::BufferAtCapacity { .. })
    }
}

#[derive(Debug, Clone)]
pub struct CsvStreamParserConfig {
    pub num_cols: usize,
    pub trim_whitespace: bool,
    pub delimiter: char,
    pub line_break: u8,
    pub max_buffered_bytes: usize,
}

impl CsvStreamParserConfig {
    pub fn new(num_cols: usize) -> Self {
        Self {
            num_cols,
            trim_whitespace: true,
            delimiter: ',',
            line_break: b'\n',
            max_buffered_bytes: MAX_BUFFERED_BYTES,
        }
    }

    /// The cap is clamped to [`MAX_BUFFERED_BYTES`].
    pub fn with_max_buffered_bytes(mut self, max: usize) -> Self {
        self.max_buffered_bytes = max.min(MAX_BUFFERED_BYTES);
        self
    }

    pub fn with_trim_whitespace(mut self, trim: bool) -> Self {
        self.trim_whitespace = trim;
        self
    }
}

/// Streaming CSV parser: one producer feeds byte chunks with [`add_chunk`],
/// one consumer drains complete rows with [`has_row`]/[`next_row`]. Producer
/// and consumer may run concurrently, but each side must be a single thread.
///
/// `buffered_bytes` always equals the rolling buffer length plus, for every
/// queued row, its length plus one for the consumed line break.
///
/// [`add_chunk`]: CsvStreamParser::add_chunk
/// [`has_row`]: CsvStreamParser::has_row
/// [`next_row`]: CsvStreamParser::next_row
pub struct CsvStreamParser {
    config: CsvStreamParserConfig,
    rolling: Mutex<Vec<u8>>,
    row_tx: Sender<String>,
    row_rx: Receiver<String>,
    buffered: AtomicUsize,
}

impl CsvStreamParser {
    pub fn new(config: CsvStreamParserConfig) -> Self {
        // The queue itself is dimensioned above any legal workload; the byte
        // cap is what actually bounds memory. An enqueue failure is fatal.
        let (row_tx, row_rx) = crossbeam_channel::unbounded();
        Self { config, rolling: Mutex::new(Vec::new()), row_tx, row_rx, buffered: AtomicUsize::new(0) }
    }

    /// Accepts the next chunk of the stream, splitting off every complete
    /// line into the row queue. Rejects the chunk without mutating state if
    /// it would push the buffered total past the cap.
    pub fn add_chunk(&self, chunk: &[u8]) -> Result<(), ParseError> {
        let buffered = self.buffered.load(Ordering::Acquire);
        if chunk.len() + buffered > self.config.max_buffered_bytes {
            return Err(ParseError::BufferAtCapacity { buffered, chunk: chunk.len() });
        }
        self.buffered.fetch_add(chunk.len(), Ordering::AcqRel);

        let mut rolling = self.rolling.lock().unwrap_or_else(|e| e.into_inner());
        rolling.extend_from_slice(chunk);
        while let Some(pos) = memchr(self.config.line_break, &rolling) {
            let line = String::from_utf8_lossy(&rolling[..pos]).into_owned();
            rolling.drain(..=pos);
            if self.row_tx.send(line).is_err() {
                return Err(ParseError::QueueBroken);
            }
        }
        Ok(())
    }

    pub fn has_row(&self) -> bool {
        !self.row_rx.is_empty()
    }

    /// Dequeues one raw line and parses it into a row.
    pub fn next_row(&self) -> Result<CsvRow, ParseError> {
        let line = self.row_rx.try_recv().map_err(|_| ParseError::NoRowAvailable)?;
        self.buffered.fetch_sub(line.len() + 1, Ordering::AcqRel);
        Ok(CsvRow::build(
            &line,
            self.config.num_cols,
            self.config.trim_whitespace,
            self.config.delimiter,
        )?)
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffered.load(Ordering::Acquire)
    }
}
