//! Storage partitioning for scan jobs.
//!
//! Splits the element id space into disjoint, contiguous ranges so every worker reads a
//! slice of the physical layout without coordinating with the others.

use super::types::KeyRange;
use crate::schema::types::ElementSpace;

pub trait StoragePartitioner: Send + Sync {
    /// Ordered sequence of disjoint ranges covering the whole element space.
    fn partition_plan(&self, space: &ElementSpace) -> Vec<KeyRange>;
}

/// Fixed-width range partitioning over element ids.
///
/// `new` covers the whole id space through `u64::MAX`; `with_bound` covers `[0, id_bound)`.
/// Vertices and edges share the same id layout, so the plan does not depend on the
/// element space; label filtering happens while scanning.
pub struct RangePartitioner {
    num_partitions: u32,
    id_bound: Option<u64>,
}

impl RangePartitioner {
    pub fn new(num_partitions: u32) -> Self {
        Self {
            num_partitions: num_partitions.max(1),
            id_bound: None,
        }
    }

    pub fn with_bound(num_partitions: u32, id_bound: u64) -> Self {
        Self {
            num_partitions: num_partitions.max(1),
            id_bound: Some(id_bound),
        }
    }

    pub fn num_partitions(&self) -> u32 {
        self.num_partitions
    }

    fn width(&self) -> u64 {
        let n = self.num_partitions as u64;
        match self.id_bound {
            Some(bound) => bound.div_ceil(n).max(1),
            // ceil(2^64 / n), saturating for a single partition
            None => (u64::MAX / n).saturating_add(1),
        }
    }

    pub fn partition_of(&self, id: u64) -> u32 {
        let partition = id / self.width();
        partition.min(self.num_partitions as u64 - 1) as u32
    }
}

impl StoragePartitioner for RangePartitioner {
    fn partition_plan(&self, _space: &ElementSpace) -> Vec<KeyRange> {
        let width = self.width();
        let ceiling = self.id_bound.unwrap_or(u64::MAX);

        (0..self.num_partitions)
            .map(|partition| {
                let start = (partition as u64).saturating_mul(width).min(ceiling);
                let end = if partition + 1 == self.num_partitions {
                    self.id_bound
                } else {
                    Some(start.saturating_add(width).min(ceiling))
                };
                KeyRange {
                    partition,
                    start,
                    end,
                }
            })
            .filter(|range| !range.is_empty())
            .collect()
    }
}
