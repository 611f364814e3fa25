//! Optimistic status writer.
//!
//! Linearizes transitions on a single key: read the versioned status, validate the action
//! against it, write with the version that was read. A lost race re-reads and re-validates
//! against the refreshed status, up to a bounded number of attempts.

use std::sync::Arc;

use super::state_machine::{self, RequiredWork, Transition};
use super::store::SchemaStatusStore;
use super::types::{ConstituentKey, IndexDefinition, IndexRef, IndexStatus, SchemaAction};
use crate::error::{LifecycleError, Result};

/// Validated transition for every key of one index.
#[derive(Debug, Clone)]
pub struct TransitionPlan {
    pub definition: IndexDefinition,
    pub action: SchemaAction,
    pub work: RequiredWork,
    pub transitions: Vec<Transition>,
}

pub struct StatusWriter {
    store: Arc<dyn SchemaStatusStore>,
    conflict_retry_limit: u32,
}

impl StatusWriter {
    pub fn new(store: Arc<dyn SchemaStatusStore>, conflict_retry_limit: u32) -> Self {
        Self {
            store,
            conflict_retry_limit,
        }
    }

    pub fn store(&self) -> &Arc<dyn SchemaStatusStore> {
        &self.store
    }

    /// Validates `action` against every key of the index without writing anything.
    pub fn plan(&self, index: &IndexRef, action: SchemaAction) -> Result<TransitionPlan> {
        let definition = self
            .store
            .definition(index)
            .ok_or_else(|| LifecycleError::UnknownIndex(index.clone()))?;

        let mut transitions = Vec::with_capacity(definition.keys.len());
        for (key, current) in self.store.statuses(index)? {
            transitions.push(state_machine::apply(
                index,
                &key,
                &definition.kind,
                current.status,
                action,
            )?);
        }

        // Accepted transitions for one action on one index kind always carry the same work.
        let work = transitions
            .first()
            .map(|t| t.work)
            .unwrap_or(RequiredWork::None);

        Ok(TransitionPlan {
            definition,
            action,
            work,
            transitions,
        })
    }

    /// Applies `action` to every key of the index, one atomic write per key.
    pub fn commit(&self, definition: &IndexDefinition, action: SchemaAction) -> Result<IndexStatus> {
        let mut last = IndexStatus::Installed;
        for key in &definition.keys {
            last = self.commit_key(definition, key, action)?;
        }
        Ok(last)
    }

    fn commit_key(
        &self,
        definition: &IndexDefinition,
        key: &ConstituentKey,
        action: SchemaAction,
    ) -> Result<IndexStatus> {
        let index = &definition.index;
        let mut attempt = 0;
        let mut intended: Option<IndexStatus> = None;

        loop {
            let current = self.store.get(index, key)?;

            // A concurrent writer already made the same transition.
            if intended == Some(current.status) {
                return Ok(current.status);
            }

            let transition =
                state_machine::apply(index, key, &definition.kind, current.status, action)?;

            if transition.to == current.status {
                return Ok(current.status);
            }

            match self.store.set(index, key, current.version, transition.to) {
                Ok(written) => {
                    tracing::info!(
                        "Index {} key {}: {} -> {} ({})",
                        index,
                        key,
                        transition.from,
                        written.status,
                        action
                    );
                    return Ok(written.status);
                }
                Err(err @ LifecycleError::Conflict { .. }) => {
                    attempt += 1;
                    intended = Some(transition.to);
                    if attempt > self.conflict_retry_limit {
                        return Err(err);
                    }
                    tracing::debug!(
                        "Lost status race on {} key {} (attempt {}), re-reading",
                        index,
                        key,
                        attempt
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }
}
