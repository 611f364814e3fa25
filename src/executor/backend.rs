//! Index backends and entry derivation.
//!
//! The job engine only talks to backends through `upsert` and `delete`, both idempotent.
//! It never asks a backend to drop a whole index.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::elements::{Element, ElementId};
use crate::error::{LifecycleError, Result};
use crate::schema::types::{IndexDefinition, IndexKind, IndexRef};

pub trait IndexBackend: Send + Sync {
    /// Writes the entry, replacing any previous entry with the same derived key.
    fn upsert(
        &self,
        index: &IndexRef,
        element: ElementId,
        derived_key: &str,
        value: &serde_json::Value,
    ) -> anyhow::Result<()>;

    /// Deletes the entry if present. Returns whether something was deleted.
    fn delete(&self, index: &IndexRef, element: ElementId, derived_key: &str)
    -> anyhow::Result<bool>;
}

/// Index entries derived from one element for one index.
///
/// Composite indexes produce a single entry, and only when the element carries every
/// constituent key. Mixed indexes produce one entry per key the element carries.
pub fn derive_entries(
    definition: &IndexDefinition,
    element: &Element,
) -> Vec<(String, serde_json::Value)> {
    match definition.kind {
        IndexKind::Composite => {
            let mut values = serde_json::Map::new();
            let mut parts = Vec::with_capacity(definition.keys.len() + 1);
            parts.push(definition.index.to_string());

            for key in &definition.keys {
                let Some(value) = element.property(key.as_str()) else {
                    return Vec::new();
                };
                parts.push(format!("{}={}", key, value));
                values.insert(key.to_string(), value.clone());
            }

            vec![(parts.join("/"), serde_json::Value::Object(values))]
        }
        IndexKind::Mixed { .. } => definition
            .keys
            .iter()
            .filter_map(|key| {
                element
                    .property(key.as_str())
                    .map(|value| (format!("{}/{}", definition.index, key), value.clone()))
            })
            .collect(),
    }
}

type EntryKey = (IndexRef, ElementId, String);

/// In-memory backend with call counters and failure injection.
#[derive(Default)]
pub struct InMemoryIndexBackend {
    entries: DashMap<EntryKey, serde_json::Value>,
    upserts: AtomicU64,
    deletes: AtomicU64,
    /// Element id -> number of calls still to fail.
    failures: DashMap<ElementId, u32>,
}

impl InMemoryIndexBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes the next `times` calls touching `element` fail.
    pub fn fail_element(&self, element: ElementId, times: u32) {
        self.failures.insert(element, times);
    }

    fn check_failure(&self, element: ElementId) -> anyhow::Result<()> {
        if let Some(mut remaining) = self.failures.get_mut(&element)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(anyhow::anyhow!("injected failure on element {}", element));
        }
        Ok(())
    }

    pub fn upsert_calls(&self) -> u64 {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> u64 {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Every entry of one index, keyed by (element, derived key).
    pub fn entries_for(&self, index: &IndexRef) -> BTreeMap<(ElementId, String), serde_json::Value> {
        self.entries
            .iter()
            .filter(|entry| &entry.key().0 == index)
            .map(|entry| {
                let (_, element, derived_key) = entry.key();
                ((*element, derived_key.clone()), entry.value().clone())
            })
            .collect()
    }
}

impl IndexBackend for InMemoryIndexBackend {
    fn upsert(
        &self,
        index: &IndexRef,
        element: ElementId,
        derived_key: &str,
        value: &serde_json::Value,
    ) -> anyhow::Result<()> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.check_failure(element)?;
        self.entries.insert(
            (index.clone(), element, derived_key.to_string()),
            value.clone(),
        );
        Ok(())
    }

    fn delete(
        &self,
        index: &IndexRef,
        element: ElementId,
        derived_key: &str,
    ) -> anyhow::Result<bool> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.check_failure(element)?;
        Ok(self
            .entries
            .remove(&(index.clone(), element, derived_key.to_string()))
            .is_some())
    }
}

/// Registry mapping index kinds to the backend that stores their entries.
pub struct IndexBackends {
    composite: Arc<dyn IndexBackend>,
    mixed: DashMap<String, Arc<dyn IndexBackend>>,
}

impl IndexBackends {
    pub fn new(composite: Arc<dyn IndexBackend>) -> Arc<Self> {
        Arc::new(Self {
            composite,
            mixed: DashMap::new(),
        })
    }

    /// Registers a mixed backend under the name index definitions refer to.
    pub fn register_mixed(&self, name: &str, backend: Arc<dyn IndexBackend>) {
        self.mixed.insert(name.to_string(), backend);
        tracing::info!("Registered mixed index backend: {}", name);
    }

    pub fn resolve(&self, kind: &IndexKind) -> Result<Arc<dyn IndexBackend>> {
        match kind {
            IndexKind::Composite => Ok(self.composite.clone()),
            IndexKind::Mixed { backend } => self
                .mixed
                .get(backend)
                .map(|entry| entry.value().clone())
                .ok_or_else(|| LifecycleError::UnknownBackend(backend.clone())),
        }
    }

    pub fn list_mixed(&self) -> Vec<String> {
        self.mixed.iter().map(|entry| entry.key().clone()).collect()
    }
}
