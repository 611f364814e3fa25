//! Execution Strategies
//!
//! Two interchangeable ways of running the partitions of a scan job. Both share the same
//! contract: every partition is processed through `PartitionWorker`, a failed partition is
//! re-dispatched up to `retry_limit` more times, cancellation is observed at partition
//! boundaries and a job only succeeds when every partition did.
//!
//! - **`LocalExecutor`**: Processes the partitions one after the other in the calling task.
//! - **`DistributedExecutor`**: Spawns a pool of workers that pull partitions from a shared
//!   `PartitionQueue` under a renewable lease. Workers never talk to each other; they only
//!   share the queue and the `JobStatusTracker`.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use super::queue::{CompletionOutcome, PartitionQueue};
use super::tracker::JobStatusTracker;
use super::types::{KeyRange, ScanJob};
use super::worker::PartitionWorker;
use crate::error::{LifecycleError, Result};

/// Everything an executor needs to run one job.
pub struct JobContext {
    pub job: Arc<ScanJob>,
    pub plan: Vec<KeyRange>,
    pub worker: Arc<PartitionWorker>,
    pub tracker: Arc<JobStatusTracker>,
    pub retry_limit: u32,
    pub partition_timeout: Duration,
}

impl JobContext {
    fn max_attempts(&self) -> u32 {
        self.retry_limit.saturating_add(1)
    }

    fn cancelled(&self) -> bool {
        self.tracker.is_cancelled(&self.job.job_id)
    }
}

#[async_trait]
pub trait JobExecutor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs every partition of the job. Returns the number of elements processed.
    async fn execute(&self, ctx: JobContext) -> Result<u64>;
}

/// Runs one partition attempt on the blocking pool, bounded by the partition timeout.
///
/// A timed-out attempt is reported as failed, but the blocking thread is not interrupted;
/// a late finish is harmless because partition work is idempotent.
async fn run_attempt(
    worker: &Arc<PartitionWorker>,
    job: &Arc<ScanJob>,
    range: KeyRange,
    timeout: Duration,
) -> std::result::Result<u64, String> {
    let worker = worker.clone();
    let job = job.clone();
    let attempt = tokio::task::spawn_blocking(move || worker.process(&job, &range));

    match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(Ok(processed))) => Ok(processed),
        Ok(Ok(Err(e))) => Err(e.to_string()),
        Ok(Err(e)) => Err(format!("worker crashed: {}", e)),
        Err(_) => Err(format!("timed out after {}ms", timeout.as_millis())),
    }
}

/// Single-process strategy.
pub struct LocalExecutor;

impl LocalExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl JobExecutor for LocalExecutor {
    fn name(&self) -> &'static str {
        "single_process"
    }

    async fn execute(&self, ctx: JobContext) -> Result<u64> {
        let job_id = &ctx.job.job_id;
        let mut total = 0u64;

        for range in &ctx.plan {
            if ctx.cancelled() {
                tracing::info!("Job {} cancelled before partition {}", job_id, range.partition);
                return Err(LifecycleError::JobCancelled(job_id.clone()));
            }

            let mut attempts = 0;
            loop {
                attempts += 1;
                match run_attempt(&ctx.worker, &ctx.job, *range, ctx.partition_timeout).await {
                    Ok(processed) => {
                        ctx.tracker.record_partition(job_id, range.partition, processed);
                        total += processed;
                        break;
                    }
                    Err(detail) if attempts >= ctx.max_attempts() => {
                        return Err(LifecycleError::JobPartitionFailure {
                            job_id: job_id.clone(),
                            partition: range.partition,
                            attempts,
                            detail,
                        });
                    }
                    Err(detail) => {
                        tracing::warn!(
                            "Job {} partition {} failed (attempt {}/{}): {}",
                            job_id,
                            range.partition,
                            attempts,
                            ctx.max_attempts(),
                            detail
                        );
                    }
                }
            }
        }

        Ok(total)
    }
}

/// Distributed-parallel strategy.
pub struct DistributedExecutor {
    worker_count: usize,
}

impl DistributedExecutor {
    pub fn new(worker_count: usize) -> Arc<Self> {
        Arc::new(Self {
            worker_count: worker_count.max(1),
        })
    }

    /// The main loop of a single worker.
    ///
    /// 1. Stops if the job was cancelled or another partition failed for good.
    /// 2. Claims the next available partition.
    /// 3. Runs it while a sidecar keeps the lease alive, then reports the outcome.
    async fn worker_loop(worker_id: usize, ctx: Arc<JobContext>, queue: Arc<PartitionQueue>) {
        let job_id = &ctx.job.job_id;

        loop {
            if ctx.cancelled() || queue.has_failed() {
                break;
            }

            let Some(range) = queue.claim_next(worker_id) else {
                if queue.is_finished() {
                    break;
                }
                // Remaining partitions are leased by other workers
                tokio::time::sleep(Duration::from_millis(20)).await;
                continue;
            };

            let renewal = spawn_lease_renewal(queue.clone(), range.partition, worker_id);
            let result = run_attempt(&ctx.worker, &ctx.job, range, ctx.partition_timeout).await;
            drop(renewal);

            let processed = result.as_ref().ok().copied();
            match queue.complete(range.partition, worker_id, result) {
                CompletionOutcome::Done => {
                    if let Some(processed) = processed {
                        ctx.tracker
                            .record_partition(job_id, range.partition, processed);
                    }
                }
                CompletionOutcome::Retry { attempts } => {
                    tracing::warn!(
                        "Job {} partition {} failed on worker {} (attempt {}), re-queued",
                        job_id,
                        range.partition,
                        worker_id,
                        attempts
                    );
                }
                CompletionOutcome::Exhausted { attempts, error } => {
                    tracing::error!(
                        "Job {} partition {} exhausted {} attempt(s): {}",
                        job_id,
                        range.partition,
                        attempts,
                        error
                    );
                }
                CompletionOutcome::Stale => {
                    tracing::debug!(
                        "Worker {} lost the lease on partition {}, result dropped",
                        worker_id,
                        range.partition
                    );
                }
            }
        }

        tracing::trace!("Worker {} for job {} stopped", worker_id, job_id);
    }
}

/// Lease renewal sidecar, stopped when dropped (including when the worker unwinds).
struct LeaseRenewal(tokio::task::JoinHandle<()>);

impl Drop for LeaseRenewal {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Renews the partition lease at a third of its duration.
fn spawn_lease_renewal(queue: Arc<PartitionQueue>, partition: u32, worker_id: usize) -> LeaseRenewal {
    let every = (queue.lease() / 3).max(Duration::from_millis(10));

    LeaseRenewal(tokio::spawn(async move {
        loop {
            tokio::time::sleep(every).await;
            if let Err(e) = queue.renew_lease(partition, worker_id) {
                tracing::trace!("Stopping lease renewal: {}", e);
                break;
            }
        }
    }))
}

#[async_trait]
impl JobExecutor for DistributedExecutor {
    fn name(&self) -> &'static str {
        "distributed"
    }

    async fn execute(&self, ctx: JobContext) -> Result<u64> {
        let job_id = ctx.job.job_id.clone();
        // A worker that stops renewing loses the partition after twice the attempt budget
        let lease = ctx.partition_timeout.saturating_mul(2);
        let queue = Arc::new(PartitionQueue::new(&ctx.plan, ctx.max_attempts(), lease));
        let ctx = Arc::new(ctx);

        let workers = self.worker_count.min(ctx.plan.len().max(1));
        tracing::info!(
            "Job {}: dispatching {} partition(s) to {} worker(s)",
            job_id,
            ctx.plan.len(),
            workers
        );

        let mut pool = JoinSet::new();
        for worker_id in 0..workers {
            pool.spawn(Self::worker_loop(worker_id, ctx.clone(), queue.clone()));
        }
        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                tracing::warn!("Job {} worker task ended abnormally: {}", job_id, e);
            }
        }

        if ctx.cancelled() {
            return Err(LifecycleError::JobCancelled(job_id));
        }
        if let Some((partition, attempts, detail)) = queue.first_failure() {
            return Err(LifecycleError::JobPartitionFailure {
                job_id,
                partition,
                attempts,
                detail,
            });
        }
        if !queue.is_finished() {
            let (pending, running, _, _) = queue.counts();
            return Err(LifecycleError::JobPartitionFailure {
                job_id,
                partition: 0,
                attempts: 0,
                detail: format!(
                    "workers stopped with {} pending and {} running partition(s)",
                    pending, running
                ),
            });
        }

        Ok(queue.total_processed())
    }
}
