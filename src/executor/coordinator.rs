//! Job Coordinator
//!
//! Launches reindex and removal jobs: validates the action against the current status,
//! computes the partition plan, hands it to the configured `JobExecutor` and records the
//! outcome in the `JobStatusTracker`. The returned `JobHandle` is available immediately.
//!
//! A failed job never touches index status. A successful removal writes REMOVED before the
//! job is reported as succeeded, so a caller awaiting the handle always observes it.

use std::sync::Arc;
use std::time::Duration;

use super::backend::IndexBackends;
use super::elements::ElementSource;
use super::partitioner::StoragePartitioner;
use super::strategy::{JobContext, JobExecutor};
use super::tracker::{JobHandle, JobStatusTracker};
use super::types::{JobAction, JobId, ScanJob};
use super::worker::PartitionWorker;
use crate::error::{LifecycleError, Result};
use crate::schema::state_machine::RequiredWork;
use crate::schema::types::{IndexRef, IndexStatus, SchemaAction};
use crate::schema::writer::StatusWriter;

/// Storage collaborators a scan job reads from and writes to.
#[derive(Clone)]
pub struct ScanResources {
    pub partitioner: Arc<dyn StoragePartitioner>,
    pub source: Arc<dyn ElementSource>,
    pub backends: Arc<IndexBackends>,
}

pub struct JobCoordinator {
    writer: Arc<StatusWriter>,
    resources: ScanResources,
    executor: Arc<dyn JobExecutor>,
    tracker: Arc<JobStatusTracker>,
    partition_retry_limit: u32,
    partition_timeout: Duration,
}

impl JobCoordinator {
    pub fn new(
        writer: Arc<StatusWriter>,
        resources: ScanResources,
        executor: Arc<dyn JobExecutor>,
        tracker: Arc<JobStatusTracker>,
        partition_retry_limit: u32,
        partition_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            writer,
            resources,
            executor,
            tracker,
            partition_retry_limit,
            partition_timeout,
        })
    }

    pub fn tracker(&self) -> &Arc<JobStatusTracker> {
        &self.tracker
    }

    pub fn strategy(&self) -> &'static str {
        self.executor.name()
    }

    /// Validates and starts a job. Returns as soon as the job is tracked.
    pub fn launch(self: &Arc<Self>, index: &IndexRef, action: JobAction) -> Result<JobHandle> {
        let schema_action = match action {
            JobAction::Reindex => SchemaAction::Reindex,
            JobAction::RemoveIndex => SchemaAction::RemoveIndex,
        };

        let plan = self.writer.plan(index, schema_action)?;
        if plan.work != RequiredWork::Job(action) {
            // Only a mixed removal gets here: its backend is never scanned
            let (key, status) = match (plan.definition.keys.first(), plan.transitions.first()) {
                (Some(key), Some(transition)) => (key.clone(), transition.from),
                _ => return Err(LifecycleError::UnknownIndex(index.clone())),
            };
            return Err(LifecycleError::InvalidTransition {
                index: index.clone(),
                key,
                status,
                action: schema_action,
            });
        }

        let backend = self.resources.backends.resolve(&plan.definition.kind)?;
        let ranges = self
            .resources
            .partitioner
            .partition_plan(&plan.definition.element_space());

        let handle = self
            .tracker
            .create(index.clone(), action, self.executor.name(), ranges.len());

        let job = Arc::new(ScanJob {
            job_id: handle.id().clone(),
            definition: plan.definition,
            action,
        });

        tracing::info!(
            "Launching job {} ({} on {}) with {} partition(s) via {}",
            job.job_id,
            action,
            index,
            ranges.len(),
            self.executor.name()
        );

        let ctx = JobContext {
            job: job.clone(),
            plan: ranges,
            worker: Arc::new(PartitionWorker::new(self.resources.source.clone(), backend)),
            tracker: self.tracker.clone(),
            retry_limit: self.partition_retry_limit,
            partition_timeout: self.partition_timeout,
        };

        let coordinator = self.clone();
        tokio::spawn(async move {
            coordinator.drive(job, ctx).await;
        });

        Ok(handle)
    }

    async fn drive(&self, job: Arc<ScanJob>, ctx: JobContext) {
        let job_id: &JobId = &job.job_id;
        self.tracker.mark_running(job_id);

        match self.executor.execute(ctx).await {
            Ok(processed) => {
                if self.tracker.is_cancelled(job_id) {
                    return;
                }

                if job.action == JobAction::RemoveIndex {
                    match self.writer.commit(&job.definition, SchemaAction::RemoveIndex) {
                        Ok(IndexStatus::Removed) => {}
                        Ok(other) => {
                            self.tracker.fail(
                                job_id,
                                format!("index {} ended in {} instead of REMOVED", job.definition.index, other),
                            );
                            return;
                        }
                        Err(e) => {
                            self.tracker.fail(job_id, e.to_string());
                            return;
                        }
                    }
                }

                tracing::debug!("Job {} processed {} element(s)", job_id, processed);
                self.tracker.succeed(job_id);
            }
            Err(LifecycleError::JobCancelled(_)) => {
                tracing::info!("Job {} stopped after cancellation", job_id);
            }
            Err(e) => {
                // Status stays as it was; the caller re-issues the action
                self.tracker.fail(job_id, e.to_string());
            }
        }
    }
}
