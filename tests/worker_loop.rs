use std::sync::Arc;
use std::time::{Duration, Instant};

use pair_worker::config::WorkerConfig;
use pair_worker::generator::Generator;
use pair_worker::jobs;
use pair_worker::matcher::MatchWorker;
use pair_worker::queue::LocalJobQueue;
use pair_worker::runtime::Runtime;
use pair_worker::store::memory::MemoryBlobStore;
use pair_worker::store::{BlobStore, BlobStreamer};

struct Harness {
    queue: Arc<LocalJobQueue>,
    store: Arc<MemoryBlobStore>,
    runtime: Runtime,
    queue_dir: std::path::PathBuf,
}

impl Harness {
    fn new(tag: &str) -> Self {
        let queue_dir = std::env::temp_dir().join(format!(
            "pair-worker-loop-{}-{}",
            tag,
            uuid::Uuid::new_v4().simple()
        ));
        let cfg = WorkerConfig { cpu_threads: 2, io_threads: 2, ..Default::default() };
        Self {
            queue: Arc::new(LocalJobQueue::new(&queue_dir).unwrap()),
            store: Arc::new(MemoryBlobStore::new()),
            runtime: Runtime::new(&cfg).unwrap(),
            queue_dir,
        }
    }

    /// Runs the poll loop on a worker thread until `until` holds, then stops.
    fn run_until(&self, until: impl Fn() -> bool) {
        let loop_handle = {
            let queue = self.queue.clone();
            let store: Arc<dyn BlobStore> = self.store.clone();
            let cpu = self.runtime.cpu();
            let io = self.runtime.io();
            let stop = self.runtime.stop_flag();
            std::thread::spawn(move || {
                let generator = Generator::new(store.clone(), cpu);
                let streamer = BlobStreamer::new(store.clone(), io, stop.clone());
                let matcher = MatchWorker::new(store, streamer);
                jobs::run_worker(&*queue, &generator, &matcher, Duration::from_millis(10), stop);
            })
        };

        let deadline = Instant::now() + Duration::from_secs(20);
        while !until() {
            assert!(Instant::now() < deadline, "worker loop made no progress");
            std::thread::sleep(Duration::from_millis(10));
        }
        self.runtime.request_stop();
        loop_handle.join().unwrap();
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.queue_dir);
    }
}

#[test]
fn generate_then_match_end_to_end() {
    let h = Harness::new("e2e");
    h.store.insert("pub-in", "list.csv", "alice@x.com\nbob@x.com\ncarol@x.com\n");
    // The mapping is written back into the publisher's input bucket, where
    // the match job expects to find it.
    h.store.insert("pub-in", "metadata", "pub-in");
    h.store.insert("adv-in", "adv_list.csv", "bob@x.com\ndave@x.com\n");

    h.queue
        .enqueue(
            "job-1-generate",
            r#"{
                "jobType": "GENERATE_PUB_PAIR_LIST",
                "publisherInputBucket": "pub-in",
                "publisherUserListBlobPath": "list.csv",
                "publisherMetadataBlobPath": "metadata",
                "publisherMappingBlobPath": "mapping.csv"
            }"#,
        )
        .unwrap();
    h.queue
        .enqueue(
            "job-2-match",
            r#"{
                "jobType": "MATCH",
                "publisherInputBucket": "pub-in",
                "publisherMappingBlobPath": "mapping.csv",
                "advertiserInputBucket": "adv-in",
                "advertiserUserListBlobPath": "adv_list.csv",
                "matchOutputBucket": "out",
                "matchListBlobPath": "match.csv"
            }"#,
        )
        .unwrap();

    let store = h.store.clone();
    h.run_until(move || store.contains("out", "match.csv"));

    // Exactly bob matched; his surrogate comes from the generated mapping.
    let mapping = String::from_utf8(h.store.blob("pub-in", "mapping.csv").unwrap()).unwrap();
    let bob_surrogate = mapping
        .lines()
        .find_map(|l| l.strip_prefix("bob@x.com,"))
        .expect("bob missing from mapping");
    let output = String::from_utf8(h.store.blob("out", "match.csv").unwrap()).unwrap();
    assert_eq!(output, format!("{}\n", bob_surrogate));

    assert!(h.queue_dir.join("job-1-generate.done").exists());
    assert!(h.queue_dir.join("job-2-match.done").exists());
}

#[test]
fn failed_job_is_marked_failed_and_loop_continues() {
    let h = Harness::new("failure");
    // Generate job referencing a missing list must fail; the later valid
    // match job still runs.
    h.store.insert("pub-in", "mapping.csv", "key1,val1\n");
    h.store.insert("adv-in", "adv_list.csv", "key1\n");

    h.queue
        .enqueue(
            "job-1-generate",
            r#"{
                "jobType": "GENERATE_PUB_PAIR_LIST",
                "publisherInputBucket": "pub-in",
                "publisherUserListBlobPath": "missing.csv",
                "publisherMetadataBlobPath": "metadata",
                "publisherMappingBlobPath": "mapping.csv"
            }"#,
        )
        .unwrap();
    h.queue
        .enqueue(
            "job-2-match",
            r#"{
                "jobType": "MATCH",
                "publisherInputBucket": "pub-in",
                "publisherMappingBlobPath": "mapping.csv",
                "advertiserInputBucket": "adv-in",
                "advertiserUserListBlobPath": "adv_list.csv",
                "matchOutputBucket": "out",
                "matchListBlobPath": "match.csv"
            }"#,
        )
        .unwrap();

    let store = h.store.clone();
    h.run_until(move || store.contains("out", "match.csv"));

    assert!(h.queue_dir.join("job-1-generate.failed").exists());
    assert!(h.queue_dir.join("job-2-match.done").exists());
}

#[test]
fn unparseable_job_body_is_marked_failed() {
    let h = Harness::new("badbody");
    h.queue.enqueue("job-1-bad", "this is not json").unwrap();

    let dir = h.queue_dir.clone();
    h.run_until(move || dir.join("job-1-bad.failed").exists());

    // The claim must not linger.
    assert!(!h.queue_dir.join("job-1-bad.claimed").exists());
    assert!(!h.queue_dir.join("job-1-bad.json").exists());
}
