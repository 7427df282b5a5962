use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{JobQueue, JobStatus, PreparedJob, QueueError};

/// Directory-backed job queue: every pending job is a `<job_id>.json` file
/// holding the job body. Claiming renames the file to `<job_id>.claimed`;
/// completion replaces it with `<job_id>.done` or `<job_id>.failed`
/// recording the outcome. Jobs are claimed in lexicographic order.
pub struct LocalJobQueue {
    dir: PathBuf,
    claimed: Mutex<HashMap<String, PathBuf>>,
}

impl LocalJobQueue {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, claimed: Mutex::new(HashMap::new()) })
    }

    /// Drops a job body into the queue.
    pub fn enqueue(&self, job_id: &str, body: &str) -> Result<(), QueueError> {
        let path = self.dir.join(format!("{}.json", job_id));
        fs::write(path, body)?;
        Ok(())
    }

    fn pending_files(&self) -> Result<Vec<PathBuf>, QueueError> {
        let mut files: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
            .collect();
        files.sort();
        Ok(files)
    }
}

fn job_id_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl JobQueue for LocalJobQueue {
    fn prepare_next_job(&self) -> Result<Option<PreparedJob>, QueueError> {
        for path in self.pending_files()? {
            let job_id = job_id_of(&path);
            let claimed_path = path.with_extension("claimed");
            // The rename is the claim; losing the race just moves on to the
            // next file.
            if fs::rename(&path, &claimed_path).is_err() {
                continue;
            }
            let body = fs::read_to_string(&claimed_path)?;
            self.claimed
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(job_id.clone(), claimed_path);
            return Ok(Some(PreparedJob { job_id, body }));
        }
        Ok(None)
    }

    fn mark_job_completed(&self, job_id: &str, status: JobStatus) -> Result<(), QueueError> {
        let claimed_path = self
            .claimed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(job_id)
            .ok_or_else(|| QueueError::UnknownJob(job_id.to_string()))?;
        let outcome = match status {
            JobStatus::Success => "done",
            JobStatus::Failure => "failed",
        };
        let record = serde_json::json!({
            "jobId": job_id,
            "status": outcome,
            "completedAt": chrono::Utc::now().to_rfc3339(),
        });
        fs::write(claimed_path.with_extension(outcome), record.to_string())?;
        fs::remove_file(&claimed_path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_queue(tag: &str) -> (LocalJobQueue, PathBuf) {
        let dir = std::env::temp_dir().join(format!(
            "pair-worker-queue-{}-{}",
            tag,
            uuid::Uuid::new_v4().simple()
        ));
        (LocalJobQueue::new(&dir).unwrap(), dir)
    }

    #[test]
    fn empty_queue_has_no_job() {
        let (queue, dir) = scratch_queue("empty");
        assert!(queue.prepare_next_job().unwrap().is_none());
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn claims_jobs_in_order() {
        let (queue, dir) = scratch_queue("order");
        queue.enqueue("job-b", "{\"b\":1}").unwrap();
        queue.enqueue("job-a", "{\"a\":1}").unwrap();
        let first = queue.prepare_next_job().unwrap().unwrap();
        assert_eq!(first.job_id, "job-a");
        let second = queue.prepare_next_job().unwrap().unwrap();
        assert_eq!(second.job_id, "job-b");
        assert_eq!(second.body, "{\"b\":1}");
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn claimed_job_is_not_offered_twice() {
        let (queue, dir) = scratch_queue("claim");
        queue.enqueue("only", "{}").unwrap();
        assert!(queue.prepare_next_job().unwrap().is_some());
        assert!(queue.prepare_next_job().unwrap().is_none());
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn completion_writes_outcome_file() {
        let (queue, dir) = scratch_queue("complete");
        queue.enqueue("j1", "{}").unwrap();
        let job = queue.prepare_next_job().unwrap().unwrap();
        queue.mark_job_completed(&job.job_id, JobStatus::Failure).unwrap();
        assert!(dir.join("j1.failed").exists());
        assert!(!dir.join("j1.claimed").exists());
        let record: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.join("j1.failed")).unwrap()).unwrap();
        assert_eq!(record["status"], "failed");
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn completing_an_unclaimed_job_fails() {
        let (queue, dir) = scratch_queue("unknown");
        let err = queue.mark_job_completed("ghost", JobStatus::Success).unwrap_err();
        assert!(matches!(err, QueueError::UnknownJob(_)));
        fs::remove_dir_all(dir).unwrap();
    }
}
