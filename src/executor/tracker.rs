//! Job Status Tracker
//!
//! Maps every job to its status, progress counters and error detail. Callers either poll
//! the record or await a terminal status through a `watch` channel per job. Finished
//! entries stay until the caller acknowledges them or the retention period runs out.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::types::{JobAction, JobId, JobRecord, JobStatus};
use crate::error::{LifecycleError, Result};
use crate::membership::types::now_ms;
use crate::schema::types::IndexRef;

/// Error detail written when a job is cancelled.
pub const CANCELLED: &str = "cancelled by caller";

struct TrackedJob {
    record: JobRecord,
    /// Partition -> elements processed. Overwritten on redelivery, never summed twice.
    partitions: BTreeMap<u32, u64>,
    updates: watch::Sender<JobStatus>,
}

impl TrackedJob {
    fn finish(&mut self, status: JobStatus) {
        self.record.status = status.clone();
        self.record.finished_at = Some(now_ms());
        self.updates.send_replace(status);
    }
}

pub struct JobStatusTracker {
    jobs: DashMap<JobId, TrackedJob>,
    retention: Duration,
}

impl JobStatusTracker {
    pub fn new(retention: Duration) -> Arc<Self> {
        Arc::new(Self {
            jobs: DashMap::new(),
            retention,
        })
    }

    pub fn create(
        self: &Arc<Self>,
        index: IndexRef,
        action: JobAction,
        strategy: &str,
        partitions_total: usize,
    ) -> JobHandle {
        let job_id = JobId::new();
        let (updates, _) = watch::channel(JobStatus::Pending);

        self.jobs.insert(
            job_id.clone(),
            TrackedJob {
                record: JobRecord {
                    job_id: job_id.clone(),
                    index,
                    action,
                    strategy: strategy.to_string(),
                    status: JobStatus::Pending,
                    cancelled: false,
                    partitions_total,
                    partitions_done: 0,
                    elements_processed: 0,
                    created_at: now_ms(),
                    finished_at: None,
                },
                partitions: BTreeMap::new(),
                updates,
            },
        );

        JobHandle {
            id: job_id,
            tracker: self.clone(),
        }
    }

    pub fn mark_running(&self, job_id: &JobId) {
        if let Some(mut job) = self.jobs.get_mut(job_id)
            && job.record.status == JobStatus::Pending
        {
            job.record.status = JobStatus::Running;
            job.updates.send_replace(JobStatus::Running);
        }
    }

    /// Records a successful partition. A partition reported twice counts once.
    pub fn record_partition(&self, job_id: &JobId, partition: u32, processed: u64) {
        let Some(mut job) = self.jobs.get_mut(job_id) else {
            return;
        };
        let job = &mut *job;
        job.partitions.insert(partition, processed);
        job.record.partitions_done = job.partitions.len();
        job.record.elements_processed = job.partitions.values().sum();
    }

    /// Marks the job succeeded. No-op if it already reached a terminal status.
    pub fn succeed(&self, job_id: &JobId) -> bool {
        let Some(mut job) = self.jobs.get_mut(job_id) else {
            return false;
        };
        if job.record.status.is_terminal() {
            return false;
        }
        job.finish(JobStatus::Succeeded);
        tracing::info!(
            "Job {} ({} on {}) succeeded: {} element(s) in {} partition(s)",
            job_id,
            job.record.action,
            job.record.index,
            job.record.elements_processed,
            job.record.partitions_done
        );
        true
    }

    /// Marks the job failed. No-op if it already reached a terminal status.
    pub fn fail(&self, job_id: &JobId, error: impl Into<String>) -> bool {
        let Some(mut job) = self.jobs.get_mut(job_id) else {
            return false;
        };
        if job.record.status.is_terminal() {
            return false;
        }
        let error = error.into();
        tracing::error!(
            "Job {} ({} on {}) failed: {}",
            job_id,
            job.record.action,
            job.record.index,
            error
        );
        job.finish(JobStatus::Failed { error });
        true
    }

    /// Cooperative cancellation: the job is marked failed right away and workers stop at
    /// their next partition boundary. Returns false if the job had already finished.
    pub fn cancel(&self, job_id: &JobId) -> Result<bool> {
        let mut job = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| LifecycleError::UnknownJob(job_id.clone()))?;
        if job.record.status.is_terminal() {
            return Ok(false);
        }

        job.record.cancelled = true;
        job.finish(JobStatus::Failed {
            error: CANCELLED.to_string(),
        });
        tracing::warn!("Job {} cancelled", job_id);
        Ok(true)
    }

    pub fn is_cancelled(&self, job_id: &JobId) -> bool {
        self.jobs
            .get(job_id)
            .map(|job| job.record.cancelled)
            .unwrap_or(false)
    }

    /// Non-blocking read of the current record.
    pub fn poll(&self, job_id: &JobId) -> Result<JobRecord> {
        self.jobs
            .get(job_id)
            .map(|job| job.record.clone())
            .ok_or_else(|| LifecycleError::UnknownJob(job_id.clone()))
    }

    /// Waits until the job reaches a terminal status and returns its record.
    pub async fn wait(&self, job_id: &JobId) -> Result<JobRecord> {
        let mut updates = self
            .jobs
            .get(job_id)
            .map(|job| job.updates.subscribe())
            .ok_or_else(|| LifecycleError::UnknownJob(job_id.clone()))?;

        updates
            .wait_for(|status| status.is_terminal())
            .await
            .map_err(|_| LifecycleError::UnknownJob(job_id.clone()))?;

        self.poll(job_id)
    }

    /// Removes a finished entry on behalf of the caller.
    pub fn acknowledge(&self, job_id: &JobId) -> Result<JobRecord> {
        let finished = self
            .jobs
            .get(job_id)
            .map(|job| job.record.status.is_terminal())
            .ok_or_else(|| LifecycleError::UnknownJob(job_id.clone()))?;
        if !finished {
            return Err(LifecycleError::JobNotFinished(job_id.clone()));
        }

        self.jobs
            .remove(job_id)
            .map(|(_, job)| job.record)
            .ok_or_else(|| LifecycleError::UnknownJob(job_id.clone()))
    }

    /// Drops finished entries older than the retention period. Returns how many went.
    pub fn sweep_expired(&self) -> usize {
        let retention = self.retention.as_millis() as u64;
        let now = now_ms();
        let before = self.jobs.len();

        self.jobs.retain(|_, job| match job.record.finished_at {
            Some(finished_at) => now.saturating_sub(finished_at) < retention,
            None => true,
        });

        let swept = before.saturating_sub(self.jobs.len());
        if swept > 0 {
            tracing::debug!("Swept {} expired job record(s)", swept);
        }
        swept
    }

    pub fn list(&self) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> =
            self.jobs.iter().map(|job| job.record.clone()).collect();
        records.sort_by_key(|record| record.created_at);
        records
    }

    /// (pending, running, succeeded, failed)
    pub fn status_counts(&self) -> (usize, usize, usize, usize) {
        let mut pending = 0;
        let mut running = 0;
        let mut succeeded = 0;
        let mut failed = 0;

        for job in self.jobs.iter() {
            match job.record.status {
                JobStatus::Pending => pending += 1,
                JobStatus::Running => running += 1,
                JobStatus::Succeeded => succeeded += 1,
                JobStatus::Failed { .. } => failed += 1,
            }
        }

        (pending, running, succeeded, failed)
    }
}

/// Returned as soon as a job is launched. Resolves once the tracker sees a terminal status.
#[derive(Clone)]
pub struct JobHandle {
    id: JobId,
    tracker: Arc<JobStatusTracker>,
}

impl JobHandle {
    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn poll(&self) -> Result<JobRecord> {
        self.tracker.poll(&self.id)
    }

    pub fn cancel(&self) -> Result<bool> {
        self.tracker.cancel(&self.id)
    }

    /// Resolves to the record of a succeeded job; a failed job becomes `JobFailed`,
    /// a cancelled one `JobCancelled`.
    pub async fn wait(&self) -> Result<JobRecord> {
        let record = self.tracker.wait(&self.id).await?;
        match &record.status {
            JobStatus::Failed { .. } if record.cancelled => {
                Err(LifecycleError::JobCancelled(self.id.clone()))
            }
            JobStatus::Failed { error } => Err(LifecycleError::JobFailed {
                job_id: self.id.clone(),
                index: record.index.clone(),
                action: record.action,
                detail: error.clone(),
            }),
            _ => Ok(record),
        }
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle").field("id", &self.id).finish()
    }
}
