use std::sync::Arc;

use crate::store::{BlobStore, CloudIdentity, StoreResult};

use super::assigner::SurrogatePair;

pub struct UploadMappingRequest {
    pub bucket: String,
    /// Optional key prefix inside the bucket.
    pub prefix: Option<String>,
    pub upload_name: String,
    pub mapping: Vec<u8>,
    pub identity: Option<CloudIdentity>,
}

/// Writes the finished plaintext/surrogate mapping in one bulk put.
pub struct MappingUploader {
    store: Arc<dyn BlobStore>,
}

impl MappingUploader {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    pub fn upload(&self, req: UploadMappingRequest) -> StoreResult<()> {
        let name = mapping_name(req.prefix.as_deref(), &req.upload_name);
        log::info!(
            "[MappingUploader] uploading {} byte mapping to {}/{}",
            req.mapping.len(),
            req.bucket,
            name
        );
        self.store
            .put_blob(&req.bucket, &name, req.mapping, req.identity.as_ref())
    }
}

fn mapping_name(prefix: Option<&str>, upload_name: &str) -> String {
    match prefix {
        Some(p) => format!("{}/{}", p, upload_name),
        None => upload_name.to_string(),
    }
}

/// Serializes pairs as `plaintext,surrogate-hex` rows in emission order.
///
/// Rows are read back with a plain delimiter split, so fields go out
/// verbatim: bare LF terminators, no quoting or escaping. Plaintexts
/// containing the delimiter cannot reach this point; the one-column list
/// parse already rejects them.
pub fn serialize_mapping(pairs: &[SurrogatePair]) -> Vec<u8> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .quote_style(csv::QuoteStyle::Never)
        .from_writer(Vec::with_capacity(pairs.len() * 48));
    for pair in pairs {
        let hex = pair.surrogate_hex();
        // The writer only fails on I/O, which a Vec sink never does.
        let _ = writer.write_record([pair.plaintext.as_str(), hex.as_str()]);
    }
    writer.into_inner().unwrap_or_default()
}
