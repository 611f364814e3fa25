//! Index Manager
//!
//! Caller-facing entry point of the lifecycle engine. Every action is first validated for
//! every constituent key against the current status, then the required work runs
//! (acknowledgment round, scan job, nothing) and only after that is the new status written.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::ack::coordinator::AckCoordinator;
use crate::ack::protocol::SchemaMessenger;
use crate::ack::types::{AckReport, SchemaEvent, SchemaEventKind};
use crate::config::{LifecycleConfig, StrategyKind};
use crate::error::{LifecycleError, ManualBackendCleanupRequired, Result};
use crate::executor::coordinator::{JobCoordinator, ScanResources};
use crate::executor::strategy::{DistributedExecutor, JobExecutor, LocalExecutor};
use crate::executor::tracker::{JobHandle, JobStatusTracker};
use crate::membership::registry::InstanceRegistry;
use crate::membership::types::{InstanceId, InstanceRecord};
use crate::schema::state_machine::RequiredWork;
use crate::schema::store::SchemaStatusStore;
use crate::schema::types::{
    ConstituentKey, IndexDefinition, IndexKind, IndexRef, IndexStatus, SchemaAction,
    VersionedStatus, aggregate_status,
};
use crate::schema::writer::{StatusWriter, TransitionPlan};

/// What `update_index` did.
#[derive(Debug)]
pub enum UpdateOutcome {
    /// Every live instance confirmed the change and the new status is written.
    Acknowledged {
        status: IndexStatus,
        reports: Vec<AckReport>,
    },
    /// REGISTERED -> ENABLED, no coordination needed.
    Enabled,
    /// A reindex or removal job was launched. Resolve the handle to wait for it.
    Job(JobHandle),
    /// A mixed index was marked REMOVED; its backend data has to be dropped by hand.
    Removed {
        cleanup: ManualBackendCleanupRequired,
    },
}

/// Result of `await_status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusReport {
    pub index: IndexRef,
    pub targets: Vec<IndexStatus>,
    pub statuses: BTreeMap<ConstituentKey, IndexStatus>,
    /// Whether every key reached one of the targets before the timeout.
    pub reached: bool,
    pub elapsed_ms: u64,
}

/// Snapshot of one index for operators and the query planner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexStatusView {
    pub index: IndexRef,
    pub kind: IndexKind,
    pub statuses: BTreeMap<ConstituentKey, VersionedStatus>,
    pub aggregate: IndexStatus,
    pub query_eligible: bool,
}

pub struct IndexManager {
    writer: Arc<StatusWriter>,
    acks: Arc<AckCoordinator>,
    jobs: Arc<JobCoordinator>,
    ack_timeout: Duration,
}

impl IndexManager {
    pub fn new(
        writer: Arc<StatusWriter>,
        acks: Arc<AckCoordinator>,
        jobs: Arc<JobCoordinator>,
        ack_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            writer,
            acks,
            jobs,
            ack_timeout,
        })
    }

    /// Wires the engine from configuration: status writer, acknowledgment coordinator,
    /// job tracker and the configured execution strategy.
    pub fn from_config(
        config: &LifecycleConfig,
        store: Arc<dyn SchemaStatusStore>,
        registry: Arc<InstanceRegistry>,
        messenger: Arc<dyn SchemaMessenger>,
        resources: ScanResources,
    ) -> Arc<Self> {
        let writer = Arc::new(StatusWriter::new(store, config.conflict_retry_limit));
        let acks = AckCoordinator::new(registry, messenger, config.ack_poll_interval());

        let executor: Arc<dyn JobExecutor> = match config.strategy {
            StrategyKind::Distributed => DistributedExecutor::new(config.worker_count),
            StrategyKind::SingleProcess => LocalExecutor::new(),
        };
        let jobs = JobCoordinator::new(
            writer.clone(),
            resources,
            executor,
            JobStatusTracker::new(config.job_retention()),
            config.partition_retry_limit,
            config.partition_timeout(),
        );

        tracing::info!(
            "Index manager ready: strategy={}, ack timeout={}ms",
            jobs.strategy(),
            config.ack_timeout_ms
        );

        Self::new(writer, acks, jobs, config.ack_timeout())
    }

    pub fn store(&self) -> &Arc<dyn SchemaStatusStore> {
        self.writer.store()
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        self.acks.registry()
    }

    pub fn acks(&self) -> &Arc<AckCoordinator> {
        &self.acks
    }

    pub fn tracker(&self) -> &Arc<JobStatusTracker> {
        self.jobs.tracker()
    }

    /// Installs a new index definition. Every key starts INSTALLED.
    pub fn build_index(&self, definition: IndexDefinition) -> Result<IndexDefinition> {
        self.store().define(definition.clone())?;
        tracing::info!(
            "Built index {} ({:?}) over {} key(s), status INSTALLED",
            definition.index,
            definition.kind,
            definition.keys.len()
        );
        Ok(definition)
    }

    pub async fn update_index(&self, index: &IndexRef, action: SchemaAction) -> Result<UpdateOutcome> {
        let plan = self.writer.plan(index, action)?;

        match plan.work {
            RequiredWork::None => {
                let status = self.writer.commit(&plan.definition, action)?;
                self.log_aggregate(index);
                tracing::debug!("Index {} updated to {} without coordination", index, status);
                Ok(UpdateOutcome::Enabled)
            }
            RequiredWork::Acknowledgment => {
                let kind = match action {
                    SchemaAction::DisableIndex => SchemaEventKind::Disabled,
                    _ => SchemaEventKind::Installed,
                };
                let reports = self.acknowledge_all(&plan.definition, kind).await?;
                let status = self.writer.commit(&plan.definition, action)?;
                self.log_aggregate(index);
                Ok(UpdateOutcome::Acknowledged { status, reports })
            }
            RequiredWork::Job(job_action) => {
                let handle = self.jobs.launch(index, job_action)?;
                Ok(UpdateOutcome::Job(handle))
            }
            RequiredWork::ManualBackendCleanup => {
                let backend = cleanup_backend(&plan)?;
                self.writer.commit(&plan.definition, action)?;
                let cleanup = ManualBackendCleanupRequired {
                    index: index.clone(),
                    backend,
                };
                tracing::warn!("{}", cleanup);
                Ok(UpdateOutcome::Removed { cleanup })
            }
        }
    }

    /// One round per constituent key. The first incomplete round aborts the action with
    /// nothing written; the operator evicts and re-issues.
    async fn acknowledge_all(
        &self,
        definition: &IndexDefinition,
        kind: SchemaEventKind,
    ) -> Result<Vec<AckReport>> {
        let mut reports = Vec::with_capacity(definition.keys.len());

        for key in &definition.keys {
            let event = SchemaEvent {
                index: definition.index.clone(),
                key: key.clone(),
                kind,
            };
            let report = self
                .acks
                .request_acknowledgment(event, self.ack_timeout)
                .await;

            if !report.is_complete() {
                let status = self.store().get(&definition.index, key)?.status;
                return Err(LifecycleError::AcknowledgmentTimeout {
                    index: definition.index.clone(),
                    key: key.clone(),
                    status,
                    pending: report.pending(),
                    unreachable: report.unreachable(),
                    waited_ms: report.elapsed_ms,
                });
            }
            reports.push(report);
        }

        Ok(reports)
    }

    /// Polls until every key of the index is in one of `targets`, or the timeout elapses.
    pub async fn await_status(
        &self,
        index: &IndexRef,
        targets: &[IndexStatus],
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<StatusReport> {
        let started = Instant::now();

        loop {
            let statuses: BTreeMap<ConstituentKey, IndexStatus> = self
                .store()
                .statuses(index)?
                .into_iter()
                .map(|(key, versioned)| (key, versioned.status))
                .collect();
            let reached = !statuses.is_empty() && statuses.values().all(|s| targets.contains(s));

            if reached || started.elapsed() >= timeout {
                if !reached {
                    tracing::debug!(
                        "Index {} did not reach {:?} within {}ms",
                        index,
                        targets,
                        timeout.as_millis()
                    );
                }
                return Ok(StatusReport {
                    index: index.clone(),
                    targets: targets.to_vec(),
                    statuses,
                    reached,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                });
            }

            let remaining = timeout.saturating_sub(started.elapsed());
            tokio::time::sleep(poll_interval.min(remaining)).await;
        }
    }

    pub fn aggregate_status(&self, index: &IndexRef) -> Result<IndexStatus> {
        let statuses = self.store().statuses(index)?;
        aggregate_status(statuses.into_iter().map(|(_, v)| v.status))
            .ok_or_else(|| LifecycleError::UnknownIndex(index.clone()))
    }

    /// What the query planner reads: only an index whose every key is ENABLED is eligible.
    pub fn is_query_eligible(&self, index: &IndexRef) -> Result<bool> {
        Ok(self.aggregate_status(index)? == IndexStatus::Enabled)
    }

    pub fn index_status(&self, index: &IndexRef) -> Result<IndexStatusView> {
        let definition = self
            .store()
            .definition(index)
            .ok_or_else(|| LifecycleError::UnknownIndex(index.clone()))?;
        let statuses: BTreeMap<ConstituentKey, VersionedStatus> =
            self.store().statuses(index)?.into_iter().collect();
        let aggregate = aggregate_status(statuses.values().map(|v| v.status))
            .ok_or_else(|| LifecycleError::UnknownIndex(index.clone()))?;

        Ok(IndexStatusView {
            index: index.clone(),
            kind: definition.kind,
            statuses,
            aggregate,
            query_eligible: aggregate == IndexStatus::Enabled,
        })
    }

    pub fn register_instance(
        &self,
        id: InstanceId,
        http_addr: Option<std::net::SocketAddr>,
    ) -> InstanceRecord {
        self.registry().register_instance(id, http_addr)
    }

    /// Manual, audited removal of an instance from every current and future round.
    pub fn evict_instance(&self, id: &InstanceId, reason: &str) -> Result<InstanceRecord> {
        self.registry().deregister_instance(id, reason)
    }

    fn log_aggregate(&self, index: &IndexRef) {
        match self.aggregate_status(index) {
            Ok(aggregate) => tracing::info!(
                "Index {} aggregate status {} (query eligible: {})",
                index,
                aggregate,
                aggregate == IndexStatus::Enabled
            ),
            Err(e) => tracing::warn!("Could not read aggregate status of {}: {}", index, e),
        }
    }
}

/// Backend an operator has to clean up by hand after a removal. Only mixed indexes have
/// one; a composite plan asking for manual cleanup is refused.
pub(crate) fn cleanup_backend(plan: &TransitionPlan) -> Result<String> {
    match &plan.definition.kind {
        IndexKind::Mixed { backend } => Ok(backend.clone()),
        IndexKind::Composite => {
            let (key, status) = plan
                .definition
                .keys
                .iter()
                .zip(&plan.transitions)
                .map(|(key, transition)| (key.clone(), transition.from))
                .next()
                .ok_or_else(|| LifecycleError::InvalidDefinition {
                    index: plan.definition.index.clone(),
                    reason: "an index needs at least one constituent key".to_string(),
                })?;
            Err(LifecycleError::InvalidTransition {
                index: plan.definition.index.clone(),
                key,
                status,
                action: plan.action,
            })
        }
    }
}
