use std::sync::Arc;

use super::backend::{IndexBackend, derive_entries};
use super::elements::ElementSource;
use super::types::{JobAction, KeyRange, ScanJob};

/// Processes one partition of a scan job.
///
/// Both actions are idempotent per element: reindex upserts by derived key, removal
/// deletes if present, so a partition may be delivered more than once.
pub struct PartitionWorker {
    source: Arc<dyn ElementSource>,
    backend: Arc<dyn IndexBackend>,
}

impl PartitionWorker {
    pub fn new(source: Arc<dyn ElementSource>, backend: Arc<dyn IndexBackend>) -> Self {
        Self { source, backend }
    }

    /// Returns the number of elements in the range that bear the indexed keys.
    pub fn process(&self, job: &ScanJob, range: &KeyRange) -> anyhow::Result<u64> {
        let definition = &job.definition;
        let mut processed = 0u64;

        for element in self.source.scan(&definition.element_space(), range)? {
            let entries = derive_entries(definition, &element);
            if entries.is_empty() {
                continue;
            }

            for (derived_key, value) in &entries {
                match job.action {
                    JobAction::Reindex => {
                        self.backend
                            .upsert(&definition.index, element.id, derived_key, value)?;
                    }
                    JobAction::RemoveIndex => {
                        self.backend
                            .delete(&definition.index, element.id, derived_key)?;
                    }
                }
            }
            processed += 1;
        }

        tracing::debug!(
            "Job {} partition {} {}: {} element(s)",
            job.job_id,
            range.partition,
            range,
            processed
        );

        Ok(processed)
    }
}
