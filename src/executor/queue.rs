//! Partition Queue
//!
//! Shared work list of one distributed job. Workers pull partitions from it instead of
//! being assigned any, so a slow or dead worker never holds up the rest.
//!
//! ## Responsibilities
//! - **Claiming**: Handing each pending partition to exactly one worker at a time.
//! - **Leasing**: A claimed partition carries a lease. If the worker stops renewing it (crash,
//!   hang), the lease expires and another worker may claim the partition again.
//! - **Retry accounting**: Every claim counts as an attempt. A partition that fails once too
//!   often is marked `Failed` and the whole job stops dispatching.

use dashmap::DashMap;
use std::time::Duration;

use super::types::KeyRange;
use crate::membership::types::now_ms;

#[derive(Debug, Clone, PartialEq)]
pub enum PartitionState {
    Pending,
    Running { worker: usize, lease_expires: u64 },
    Done { processed: u64 },
    Failed { error: String },
}

#[derive(Debug, Clone)]
pub struct PartitionEntry {
    pub range: KeyRange,
    pub state: PartitionState,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// What happened to a partition after a worker reported back.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    Done,
    /// Failed, but attempts remain; the partition is pending again.
    Retry { attempts: u32 },
    /// Failed for the last time.
    Exhausted { attempts: u32, error: String },
    /// The report arrived after the lease moved on; ignored.
    Stale,
}

pub struct PartitionQueue {
    entries: DashMap<u32, PartitionEntry>,
    max_attempts: u32,
    lease: Duration,
}

impl PartitionQueue {
    pub fn new(plan: &[KeyRange], max_attempts: u32, lease: Duration) -> Self {
        let entries = plan
            .iter()
            .map(|range| {
                (
                    range.partition,
                    PartitionEntry {
                        range: *range,
                        state: PartitionState::Pending,
                        attempts: 0,
                        last_error: None,
                    },
                )
            })
            .collect();

        Self {
            entries,
            max_attempts: max_attempts.max(1),
            lease,
        }
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    /// Claims the lowest available partition: pending, or running with an expired lease.
    pub fn claim_next(&self, worker: usize) -> Option<KeyRange> {
        let now = now_ms();

        let mut candidates: Vec<u32> = self
            .entries
            .iter()
            .filter(|entry| is_available(&entry.state, now))
            .map(|entry| *entry.key())
            .collect();
        candidates.sort_unstable();

        for partition in candidates {
            let Some(mut entry) = self.entries.get_mut(&partition) else {
                continue;
            };
            // Another worker might have raced us
            if !is_available(&entry.state, now) {
                continue;
            }

            if let PartitionState::Running { worker: previous, .. } = entry.state {
                tracing::warn!(
                    "Lease on partition {} held by worker {} expired, reclaiming",
                    partition,
                    previous
                );
            }

            entry.attempts += 1;
            entry.state = PartitionState::Running {
                worker,
                lease_expires: now + self.lease.as_millis() as u64,
            };
            tracing::trace!(
                "Worker {} claimed partition {} (attempt {})",
                worker,
                partition,
                entry.attempts
            );
            return Some(entry.range);
        }

        None
    }

    /// Extends the lease of a partition the worker still holds.
    pub fn renew_lease(&self, partition: u32, worker: usize) -> anyhow::Result<()> {
        let mut entry = self
            .entries
            .get_mut(&partition)
            .ok_or_else(|| anyhow::anyhow!("Partition {} not found", partition))?;

        let held = matches!(
            entry.state,
            PartitionState::Running { worker: holder, .. } if holder == worker
        );
        if !held {
            return Err(anyhow::anyhow!(
                "Partition {} not held by worker {} (state: {:?})",
                partition,
                worker,
                entry.state
            ));
        }

        entry.state = PartitionState::Running {
            worker,
            lease_expires: now_ms() + self.lease.as_millis() as u64,
        };
        Ok(())
    }

    pub fn complete(
        &self,
        partition: u32,
        worker: usize,
        result: std::result::Result<u64, String>,
    ) -> CompletionOutcome {
        let Some(mut entry) = self.entries.get_mut(&partition) else {
            return CompletionOutcome::Stale;
        };

        let held = matches!(
            entry.state,
            PartitionState::Running { worker: holder, .. } if holder == worker
        );
        if !held {
            return CompletionOutcome::Stale;
        }

        match result {
            Ok(processed) => {
                entry.state = PartitionState::Done { processed };
                CompletionOutcome::Done
            }
            Err(error) => {
                entry.last_error = Some(error.clone());
                if entry.attempts >= self.max_attempts {
                    entry.state = PartitionState::Failed {
                        error: error.clone(),
                    };
                    CompletionOutcome::Exhausted {
                        attempts: entry.attempts,
                        error,
                    }
                } else {
                    entry.state = PartitionState::Pending;
                    CompletionOutcome::Retry {
                        attempts: entry.attempts,
                    }
                }
            }
        }
    }

    /// True once every partition is done, or as soon as one has failed for good.
    pub fn is_finished(&self) -> bool {
        self.has_failed()
            || self
                .entries
                .iter()
                .all(|entry| matches!(entry.state, PartitionState::Done { .. }))
    }

    pub fn has_failed(&self) -> bool {
        self.entries
            .iter()
            .any(|entry| matches!(entry.state, PartitionState::Failed { .. }))
    }

    /// The lowest failed partition with its attempt count and error.
    pub fn first_failure(&self) -> Option<(u32, u32, String)> {
        self.entries
            .iter()
            .filter_map(|entry| match &entry.state {
                PartitionState::Failed { error } => {
                    Some((*entry.key(), entry.attempts, error.clone()))
                }
                _ => None,
            })
            .min_by_key(|(partition, _, _)| *partition)
    }

    pub fn total_processed(&self) -> u64 {
        self.entries
            .iter()
            .map(|entry| match entry.state {
                PartitionState::Done { processed } => processed,
                _ => 0,
            })
            .sum()
    }

    /// (pending, running, done, failed)
    pub fn counts(&self) -> (usize, usize, usize, usize) {
        let mut pending = 0;
        let mut running = 0;
        let mut done = 0;
        let mut failed = 0;

        for entry in self.entries.iter() {
            match entry.state {
                PartitionState::Pending => pending += 1,
                PartitionState::Running { .. } => running += 1,
                PartitionState::Done { .. } => done += 1,
                PartitionState::Failed { .. } => failed += 1,
            }
        }

        (pending, running, done, failed)
    }

    pub fn entry(&self, partition: u32) -> Option<PartitionEntry> {
        self.entries.get(&partition).map(|entry| entry.value().clone())
    }
}

fn is_available(state: &PartitionState, now: u64) -> bool {
    match state {
        PartitionState::Pending => true,
        // Lease expiration check
        PartitionState::Running { lease_expires, .. } => now > *lease_expires,
        _ => false,
    }
}
