pub mod table;
pub mod worker;

pub use table::{MatchTable, TableError};
pub use worker::{ExportMatchesRequest, MatchError, MatchWorker, ADVERTISER_CHUNK_BYTES};
