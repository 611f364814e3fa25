//! Reindex / Removal Job Module
//!
//! This module implements the scan jobs that backfill an index over pre-existing data
//! (REINDEX) or purge a composite index's entries before it is removed (REMOVE_INDEX).
//!
//! ## Architecture Overview
//! A job follows a **Plan -> Dispatch -> Track** model:
//! 1. **Validation**: The `JobCoordinator` checks the action against the current status of
//!    every constituent key through the lifecycle state machine.
//! 2. **Planning**: The `StoragePartitioner` splits the element space into disjoint,
//!    contiguous id ranges.
//! 3. **Dispatch**: A `JobExecutor` runs every range through a `PartitionWorker`, either
//!    sequentially in-process or on a pool of lease-holding workers.
//! 4. **Tracking**: Progress and the terminal outcome land in the `JobStatusTracker`, which
//!    backs the `JobHandle` returned to the caller.
//!
//! Partition work is idempotent (upsert by derived key, delete if present), so a partition
//! may be retried or delivered twice without changing the resulting index state.
//!
//! ## Submodules
//! - **`partitioner`**, **`elements`**, **`backend`**: Storage collaborators at their interface.
//! - **`worker`**: Processes one partition.
//! - **`queue`**: Leased partition work list for the distributed strategy.
//! - **`strategy`**: `JobExecutor` with its single-process and distributed variants.
//! - **`tracker`**: Job status, progress, await/poll, retention.
//! - **`coordinator`**: Launches jobs and writes REMOVED after a successful removal.
//! - **`protocol`** / **`handlers`**: The job endpoints of the admin API.

pub mod backend;
pub mod coordinator;
pub mod elements;
pub mod handlers;
pub mod partitioner;
pub mod protocol;
pub mod queue;
pub mod strategy;
pub mod tracker;
pub mod types;
pub mod worker;

#[cfg(test)]
mod tests;
