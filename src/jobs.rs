//! Job body parsing, dispatch, and the worker poll loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::generator::{GeneratePublisherListRequest, Generator};
use crate::matcher::{ExportMatchesRequest, MatchWorker};
use crate::metrics;
use crate::queue::{JobQueue, JobStatus};
use crate::store::CloudIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobType {
    #[serde(rename = "GENERATE_PUB_PAIR_LIST")]
    GeneratePubPairList,
    #[serde(rename = "MATCH")]
    Match,
}

/// Attestation parameters for one tenant's bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationInfo {
    pub project_id: String,
    pub wip_provider: String,
}

impl AttestationInfo {
    pub fn to_identity(&self) -> CloudIdentity {
        CloudIdentity::new(self.project_id.clone(), self.wip_provider.clone())
    }
}

/// The JSON job body carried by the queue. Only the fields relevant to the
/// chosen job type need to be present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairJob {
    pub job_type: JobType,
    #[serde(default)]
    pub publisher_input_bucket: String,
    #[serde(default)]
    pub publisher_user_list_blob_path: String,
    #[serde(default)]
    pub publisher_metadata_blob_path: String,
    #[serde(default)]
    pub publisher_mapping_blob_path: String,
    #[serde(default)]
    pub advertiser_input_bucket: String,
    #[serde(default)]
    pub advertiser_user_list_blob_path: String,
    #[serde(default)]
    pub match_output_bucket: String,
    #[serde(default)]
    pub match_list_blob_path: String,
    #[serde(default)]
    pub publisher_bucket_attestation: Option<AttestationInfo>,
    #[serde(default)]
    pub advertiser_bucket_attestation: Option<AttestationInfo>,
}

impl PairJob {
    pub fn publisher_identity(&self) -> Option<CloudIdentity> {
        self.publisher_bucket_attestation.as_ref().map(AttestationInfo::to_identity)
    }

    pub fn advertiser_identity(&self) -> Option<CloudIdentity> {
        self.advertiser_bucket_attestation.as_ref().map(AttestationInfo::to_identity)
    }
}

/// Runs one parsed job to completion.
pub fn run_job(job: &PairJob, generator: &Generator, matcher: &MatchWorker) -> Result<()> {
    match job.job_type {
        JobType::GeneratePubPairList => {
            log::info!("Processing publisher list generation job");
            generator
                .generate(GeneratePublisherListRequest {
                    input_bucket: job.publisher_input_bucket.clone(),
                    list_path: job.publisher_user_list_blob_path.clone(),
                    metadata_path: job.publisher_metadata_blob_path.clone(),
                    mapping_name: job.publisher_mapping_blob_path.clone(),
                    identity: job.publisher_identity(),
                })
                .with_context(|| {
                    format!(
                        "failed generating publisher mapping {}",
                        job.publisher_mapping_blob_path
                    )
                })?;
            log::info!(
                "Successfully generated publisher mapping to {}",
                job.publisher_mapping_blob_path
            );
        }
        JobType::Match => {
            log::info!("Processing match job");
            matcher
                .export_matches(&ExportMatchesRequest {
                    publisher_mapping_bucket: job.publisher_input_bucket.clone(),
                    publisher_mapping_path: job.publisher_mapping_blob_path.clone(),
                    advertiser_list_bucket: job.advertiser_input_bucket.clone(),
                    advertiser_list_path: job.advertiser_user_list_blob_path.clone(),
                    output_bucket: job.match_output_bucket.clone(),
                    output_path: job.match_list_blob_path.clone(),
                    publisher_identity: job.publisher_identity(),
                    advertiser_identity: job.advertiser_identity(),
                })
                .with_context(|| {
                    format!("failed exporting matches to {}", job.match_list_blob_path)
                })?;
            log::info!("Successfully exported matches to {}", job.match_list_blob_path);
        }
    }
    Ok(())
}

/// The worker poll loop: prepare the next job, run it, report its status,
/// sleep, repeat. Runs until `stop` is raised.
pub fn run_worker(
    queue: &dyn JobQueue,
    generator: &Generator,
    matcher: &MatchWorker,
    poll_interval: Duration,
    stop: Arc<AtomicBool>,
) {
    let mut ticker = metrics::MetricsTicker::new(Duration::from_secs(60));
    while !stop.load(Ordering::SeqCst) {
        ticker.log_if_ready();
        let prepared = match queue.prepare_next_job() {
            Ok(prepared) => prepared,
            Err(e) => {
                log::error!("PrepareNextJob didn't succeed: {:#}", anyhow::Error::from(e));
                std::thread::sleep(poll_interval);
                continue;
            }
        };
        let Some(job) = prepared else {
            log::debug!("Polling for job");
            std::thread::sleep(poll_interval);
            continue;
        };

        log::info!("Received a job: {}", job.job_id);
        let status = match serde_json::from_str::<PairJob>(&job.body) {
            Ok(pair_job) => match run_job(&pair_job, generator, matcher) {
                Ok(()) => JobStatus::Success,
                Err(e) => {
                    log::error!("{:#}", e);
                    JobStatus::Failure
                }
            },
            Err(e) => {
                log::error!("Failed parsing job body for {}: {}", job.job_id, e);
                JobStatus::Failure
            }
        };

        match status {
            JobStatus::Success => metrics::record_job_success(),
            JobStatus::Failure => metrics::record_job_failure(),
        }
        if let Err(e) = queue.mark_job_completed(&job.job_id, status) {
            log::error!("MarkJobCompleted failed for {}: {:#}", job.job_id, anyhow::Error::from(e));
        }
        log::info!("Job {} completed with status {:?}", job.job_id, status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_generate_job_body() {
        let body = r#"{
            "jobType": "GENERATE_PUB_PAIR_LIST",
            "publisherInputBucket": "pub-in",
            "publisherUserListBlobPath": "list.csv",
            "publisherMetadataBlobPath": "meta",
            "publisherMappingBlobPath": "mapping.csv",
            "publisherBucketAttestation": {"projectId": "p1", "wipProvider": "wip"}
        }"#;
        let job: PairJob = serde_json::from_str(body).unwrap();
        assert_eq!(job.job_type, JobType::GeneratePubPairList);
        assert_eq!(job.publisher_input_bucket, "pub-in");
        assert_eq!(job.publisher_mapping_blob_path, "mapping.csv");
        let identity = job.publisher_identity().unwrap();
        assert_eq!(identity.project_id, "p1");
        assert_eq!(identity.wip_provider, "wip");
        assert!(job.advertiser_identity().is_none());
    }

    #[test]
    fn parses_match_job_body_without_attestation() {
        let body = r#"{
            "jobType": "MATCH",
            "publisherInputBucket": "pub-in",
            "publisherMappingBlobPath": "mapping.csv",
            "advertiserInputBucket": "adv-in",
            "advertiserUserListBlobPath": "adv.csv",
            "matchOutputBucket": "out",
            "matchListBlobPath": "match.csv"
        }"#;
        let job: PairJob = serde_json::from_str(body).unwrap();
        assert_eq!(job.job_type, JobType::Match);
        assert_eq!(job.match_output_bucket, "out");
        assert!(job.publisher_identity().is_none());
    }

    #[test]
    fn rejects_unknown_job_type() {
        let body = r#"{"jobType": "SOMETHING_ELSE"}"#;
        assert!(serde_json::from_str::<PairJob>(body).is_err());
    }

    #[test]
    fn job_type_is_required() {
        assert!(serde_json::from_str::<PairJob>("{}").is_err());
    }
}
