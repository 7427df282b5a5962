use std::collections::BTreeSet;
use std::sync::Arc;

use pair_worker::generator::{
    FetchError, GenerateError, GeneratePublisherListRequest, Generator,
};
use pair_worker::runtime::Executor;
use pair_worker::store::memory::MemoryBlobStore;
use pair_worker::store::StoreError;

fn make_generator(store: Arc<MemoryBlobStore>) -> Generator {
    let cpu = Arc::new(Executor::new("generate-test-cpu", 2).unwrap());
    Generator::new(store, cpu)
}

fn request() -> GeneratePublisherListRequest {
    GeneratePublisherListRequest {
        input_bucket: "pub-in".into(),
        list_path: "list.csv".into(),
        metadata_path: "metadata".into(),
        mapping_name: "mapping.csv".into(),
        identity: None,
    }
}

fn mapping_rows(store: &MemoryBlobStore, bucket: &str, name: &str) -> Vec<(String, String)> {
    let body = String::from_utf8(store.blob(bucket, name).unwrap()).unwrap();
    body.lines()
        .map(|line| {
            let (plaintext, hex) = line.split_once(',').unwrap();
            (plaintext.to_string(), hex.to_string())
        })
        .collect()
}

#[test]
fn generates_a_mapping_with_unique_surrogates() {
    let store = Arc::new(MemoryBlobStore::new());
    store.insert("pub-in", "list.csv", "id1\nid2\nid3\n");
    store.insert("pub-in", "metadata", "output_bucket");
    let generator = make_generator(store.clone());

    generator.generate(request()).unwrap();

    // Rows are bare-LF terminated; no CR may reach the stored bytes.
    let raw = store.blob("output_bucket", "mapping.csv").unwrap();
    assert!(!raw.contains(&b'\r'));
    assert_eq!(raw.iter().filter(|&&b| b == b'\n').count(), 3);

    let rows = mapping_rows(&store, "output_bucket", "mapping.csv");
    assert_eq!(rows.len(), 3);

    // Emission order is unspecified; compare as sets.
    let plaintexts: BTreeSet<&str> = rows.iter().map(|(p, _)| p.as_str()).collect();
    assert_eq!(plaintexts, ["id1", "id2", "id3"].into_iter().collect());

    let surrogates: BTreeSet<&str> = rows.iter().map(|(_, s)| s.as_str()).collect();
    assert_eq!(surrogates.len(), 3);
    for hex in &surrogates {
        assert_eq!(hex.len(), 32);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }
}

#[test]
fn metadata_trailing_newline_is_tolerated() {
    let store = Arc::new(MemoryBlobStore::new());
    store.insert("pub-in", "list.csv", "id1\n");
    store.insert("pub-in", "metadata", "output_bucket\n");
    let generator = make_generator(store.clone());

    generator.generate(request()).unwrap();

    assert!(store.contains("output_bucket", "mapping.csv"));
}

#[test]
fn empty_list_uploads_an_empty_mapping() {
    let store = Arc::new(MemoryBlobStore::new());
    store.insert("pub-in", "list.csv", "");
    store.insert("pub-in", "metadata", "output_bucket");
    let generator = make_generator(store.clone());

    generator.generate(request()).unwrap();

    assert_eq!(store.blob("output_bucket", "mapping.csv").unwrap(), b"");
}

#[test]
fn missing_list_fails_the_job() {
    let store = Arc::new(MemoryBlobStore::new());
    store.insert("pub-in", "metadata", "output_bucket");
    let generator = make_generator(store);

    let err = generator.generate(request()).unwrap_err();
    assert!(matches!(
        err,
        GenerateError::Fetch(FetchError::Open(StoreError::NotFound { .. }))
    ));
}

#[test]
fn missing_metadata_fails_the_job() {
    let store = Arc::new(MemoryBlobStore::new());
    store.insert("pub-in", "list.csv", "id1\n");
    let generator = make_generator(store.clone());

    let err = generator.generate(request()).unwrap_err();
    assert!(matches!(err, GenerateError::Metadata(StoreError::NotFound { .. })));
    assert!(!store.contains("output_bucket", "mapping.csv"));
}

#[test]
fn malformed_list_fails_the_job() {
    let store = Arc::new(MemoryBlobStore::new());
    store.insert("pub-in", "list.csv", "id1,stray\n");
    store.insert("pub-in", "metadata", "output_bucket");
    let generator = make_generator(store);

    let err = generator.generate(request()).unwrap_err();
    assert!(matches!(err, GenerateError::Fetch(FetchError::Parse(_))));
}

#[test]
fn generator_can_run_consecutive_jobs() {
    let store = Arc::new(MemoryBlobStore::new());
    store.insert("pub-in", "list.csv", "id1\nid2\n");
    store.insert("pub-in", "metadata", "output_bucket");
    let generator = make_generator(store.clone());

    generator.generate(request()).unwrap();

    let mut second = request();
    second.mapping_name = "mapping2.csv".into();
    generator.generate(second).unwrap();

    assert_eq!(mapping_rows(&store, "output_bucket", "mapping.csv").len(), 2);
    assert_eq!(mapping_rows(&store, "output_bucket", "mapping2.csv").len(), 2);
}

#[test]
fn large_list_round_trips_through_the_assigner() {
    let store = Arc::new(MemoryBlobStore::new());
    let list: String = (0..10_000).map(|i| format!("user{}@example.com\n", i)).collect();
    store.insert("pub-in", "list.csv", list);
    store.insert("pub-in", "metadata", "output_bucket");
    let generator = make_generator(store.clone());

    generator.generate(request()).unwrap();

    let rows = mapping_rows(&store, "output_bucket", "mapping.csv");
    assert_eq!(rows.len(), 10_000);
    let surrogates: BTreeSet<&str> = rows.iter().map(|(_, s)| s.as_str()).collect();
    assert_eq!(surrogates.len(), 10_000);
}
