use crate::schema::types::{IndexDefinition, IndexRef};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier of a scan job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub String);

impl JobId {
    /// Generates a new random UUID v4-based JobId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a scan job does with the entries it derives.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobAction {
    /// Upsert every derived entry (backfill).
    Reindex,
    /// Delete every derived entry that is present.
    RemoveIndex,
}

impl fmt::Display for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reindex => f.write_str("REINDEX"),
            Self::RemoveIndex => f.write_str("REMOVE_INDEX"),
        }
    }
}

/// Represents the lifecycle state of a job in the tracker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum JobStatus {
    /// Created, partitions not dispatched yet.
    Pending,
    /// At least one partition has been dispatched.
    Running,
    /// Every partition reported success.
    Succeeded,
    /// A partition ran out of retries, the job was cancelled, or the final status write failed.
    Failed { error: String },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed { .. })
    }
}

/// A contiguous range of element ids owned by one partition.
///
/// `end` is exclusive. A range without an `end` runs through `u64::MAX` inclusive, which is
/// how the last partition of an unbounded plan reaches the top of the id space.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyRange {
    pub partition: u32,
    pub start: u64,
    pub end: Option<u64>,
}

impl KeyRange {
    pub fn contains(&self, id: u64) -> bool {
        id >= self.start && self.end.is_none_or(|end| id < end)
    }

    pub fn is_empty(&self) -> bool {
        self.end.is_some_and(|end| self.start >= end)
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "[{}, {})", self.start, end),
            None => write!(f, "[{}, {}]", self.start, u64::MAX),
        }
    }
}

/// The definition of a unit of work handed to every partition worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJob {
    pub job_id: JobId,
    pub definition: IndexDefinition,
    pub action: JobAction,
}

/// Tracker entry for one job, as returned by `poll`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub job_id: JobId,
    pub index: IndexRef,
    pub action: JobAction,
    /// Name of the execution strategy that ran the job.
    pub strategy: String,
    pub status: JobStatus,
    pub cancelled: bool,
    pub partitions_total: usize,
    pub partitions_done: usize,
    pub elements_processed: u64,
    pub created_at: u64,
    pub finished_at: Option<u64>,
}
