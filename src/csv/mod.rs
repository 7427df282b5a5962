pub mod row;
pub mod stream;

pub use row::{CsvRow, RowError};
pub use stream::{CsvStreamParser, CsvStreamParserConfig, ParseError, MAX_BUFFERED_BYTES};
