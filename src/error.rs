//! Error types for lifecycle coordination.
//!
//! Every user-visible failure names the index (and constituent key where one applies)
//! together with the status that was observed, so an operator can tell whether to
//! re-register, wait, or evict an instance.

use std::fmt;

use thiserror::Error;

use crate::executor::types::{JobAction, JobId};
use crate::membership::types::InstanceId;
use crate::schema::types::{ConstituentKey, IndexRef, IndexStatus, SchemaAction};

pub type Result<T> = std::result::Result<T, LifecycleError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LifecycleError {
    /// The requested action is not legal for the current status. Never retried.
    #[error("cannot apply {action} to index {index} key {key}: current status is {status}")]
    InvalidTransition {
        index: IndexRef,
        key: ConstituentKey,
        status: IndexStatus,
        action: SchemaAction,
    },

    /// The action needs cluster acknowledgment first; re-run REGISTER_INDEX.
    #[error(
        "cannot apply {action} to index {index} key {key}: status is {status}, \
         run REGISTER_INDEX and wait for every instance to acknowledge"
    )]
    NotRegistered {
        index: IndexRef,
        key: ConstituentKey,
        status: IndexStatus,
        action: SchemaAction,
    },

    #[error("cannot apply {action} to index {index} key {key}: status REMOVED is terminal")]
    TerminalState {
        index: IndexRef,
        key: ConstituentKey,
        action: SchemaAction,
    },

    /// Optimistic write lost a race. Retried automatically by `StatusWriter`.
    #[error(
        "status of index {index} key {key} changed concurrently: \
         expected version {expected}, found version {found} ({status})"
    )]
    Conflict {
        index: IndexRef,
        key: ConstituentKey,
        expected: u64,
        found: u64,
        status: IndexStatus,
    },

    #[error("refusing to move index {index} key {key} from {current} back to {requested}")]
    StatusRegression {
        index: IndexRef,
        key: ConstituentKey,
        current: IndexStatus,
        requested: IndexStatus,
    },

    /// At least one live instance did not confirm in time. Evict it, then re-issue.
    #[error(
        "acknowledgment for index {index} key {key} (status {status}) timed out after {waited_ms}ms; \
         pending: {pending:?}, unreachable: {unreachable:?}; evict unreachable instances and re-issue"
    )]
    AcknowledgmentTimeout {
        index: IndexRef,
        key: ConstituentKey,
        status: IndexStatus,
        pending: Vec<InstanceId>,
        unreachable: Vec<InstanceId>,
        waited_ms: u64,
    },

    #[error("partition {partition} of job {job_id} failed after {attempts} attempt(s): {detail}")]
    JobPartitionFailure {
        job_id: JobId,
        partition: u32,
        attempts: u32,
        detail: String,
    },

    #[error("job {job_id} ({action}) on index {index} failed: {detail}")]
    JobFailed {
        job_id: JobId,
        index: IndexRef,
        action: JobAction,
        detail: String,
    },

    #[error("job {0} was cancelled")]
    JobCancelled(JobId),

    #[error("job {0} has not finished yet")]
    JobNotFinished(JobId),

    #[error("unknown job {0}")]
    UnknownJob(JobId),

    #[error("unknown index {0}")]
    UnknownIndex(IndexRef),

    #[error("index {0} is already defined")]
    IndexExists(IndexRef),

    #[error("index {index} has no constituent key {key}")]
    UnknownKey { index: IndexRef, key: ConstituentKey },

    #[error("invalid index definition {index}: {reason}")]
    InvalidDefinition { index: IndexRef, reason: String },

    #[error("unknown instance {0}")]
    UnknownInstance(InstanceId),

    #[error("no index backend registered under '{0}'")]
    UnknownBackend(String),

    #[error("status store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl LifecycleError {
    /// Whether the caller may retry the same request without operator intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Informational notice returned when a mixed index reaches REMOVED.
///
/// The metadata stub is removed, but the external backend still holds the index data;
/// it is never dropped automatically and has to be cleaned up by an operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualBackendCleanupRequired {
    pub index: IndexRef,
    pub backend: String,
}

impl fmt::Display for ManualBackendCleanupRequired {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "index {} is REMOVED in the schema, but its data in mixed backend '{}' must be deleted manually",
            self.index, self.backend
        )
    }
}
