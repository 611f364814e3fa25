use dashmap::DashMap;
use std::sync::Arc;

use super::types::{SchemaEvent, SchemaEventKind};
use crate::membership::types::{InstanceId, now_ms};
use crate::schema::store::SchemaStatusStore;
use crate::schema::types::IndexStatus;

/// One instance's loaded view of the schema.
///
/// The view reads through the instance's own connection to the status store. An event is
/// recorded only after the definition it names was re-read from there, and an instance
/// may only confirm an event once it is recorded.
pub struct SchemaView {
    instance: InstanceId,
    store: Arc<dyn SchemaStatusStore>,
    loaded: DashMap<SchemaEvent, u64>,
}

impl SchemaView {
    pub fn new(instance: InstanceId, store: Arc<dyn SchemaStatusStore>) -> Self {
        Self {
            instance,
            store,
            loaded: DashMap::new(),
        }
    }

    pub fn instance(&self) -> &InstanceId {
        &self.instance
    }

    /// Re-reads the index named by `event` from the store and records the event.
    ///
    /// Returns `false`, recording nothing, when the store does not know the index or key.
    pub fn reload(&self, event: &SchemaEvent) -> bool {
        let Some(definition) = self.store.definition(&event.index) else {
            tracing::debug!(
                "Instance {} cannot load index {}: not in the status store",
                self.instance,
                event.index
            );
            return false;
        };
        if !definition.has_key(&event.key) {
            tracing::debug!(
                "Instance {} cannot load index {}: no key {}",
                self.instance,
                event.index,
                event.key
            );
            return false;
        }

        match self.store.get(&event.index, &event.key) {
            Ok(current) => {
                self.record(event, current.status);
                true
            }
            Err(e) => {
                tracing::warn!(
                    "Instance {} failed to read index {} key {}: {}",
                    self.instance,
                    event.index,
                    event.key,
                    e
                );
                false
            }
        }
    }

    fn record(&self, event: &SchemaEvent, status: IndexStatus) {
        if self.loaded.insert(event.clone(), now_ms()).is_none() {
            tracing::debug!(
                "Instance {} loaded {:?} for index {} key {} (stored status {})",
                self.instance,
                event.kind,
                event.index,
                event.key,
                status
            );
        }
    }

    pub fn has_loaded(&self, event: &SchemaEvent) -> bool {
        self.loaded.contains_key(event)
    }

    /// Loads everything the store already knows, for an instance joining late.
    pub fn load_all(&self) -> usize {
        let mut count = 0;
        for definition in self.store.definitions() {
            let Ok(statuses) = self.store.statuses(&definition.index) else {
                continue;
            };
            for (key, current) in statuses {
                let mut kinds = vec![SchemaEventKind::Installed];
                if current.status >= IndexStatus::Disabled {
                    kinds.push(SchemaEventKind::Disabled);
                }
                for kind in kinds {
                    let event = SchemaEvent {
                        index: definition.index.clone(),
                        key: key.clone(),
                        kind,
                    };
                    self.record(&event, current.status);
                    count += 1;
                }
            }
        }

        tracing::info!("Instance {} loaded {} schema events", self.instance, count);
        count
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }
}
