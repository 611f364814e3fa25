//! Element iteration for scan jobs.
//!
//! A partition worker reads its range through `ElementSource::scan`, which returns a
//! finite, lazy iterator. Calling `scan` again with the same range restarts from the
//! beginning, which is what a retried partition does.

use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use super::types::KeyRange;
use crate::schema::types::{ElementCategory, ElementSpace};

pub type ElementId = u64;

/// Elements are read from the store in batches of this size.
const SCAN_BATCH: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Element {
    pub id: ElementId,
    pub category: ElementCategory,
    pub label: String,
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl Element {
    pub fn vertex(id: ElementId, label: impl Into<String>) -> Self {
        Self {
            id,
            category: ElementCategory::Vertex,
            label: label.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn edge(id: ElementId, label: impl Into<String>) -> Self {
        Self {
            id,
            category: ElementCategory::Edge,
            label: label.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&serde_json::Value> {
        self.properties.get(key)
    }

    pub fn in_space(&self, space: &ElementSpace) -> bool {
        match space {
            ElementSpace::Vertices => self.category == ElementCategory::Vertex,
            ElementSpace::Edges => self.category == ElementCategory::Edge,
            ElementSpace::EdgesLabeled(label) => {
                self.category == ElementCategory::Edge && &self.label == label
            }
        }
    }
}

pub trait ElementSource: Send + Sync {
    /// Lazily yields the elements of `space` whose id falls inside `range`, in id order.
    fn scan<'a>(
        &'a self,
        space: &ElementSpace,
        range: &KeyRange,
    ) -> anyhow::Result<Box<dyn Iterator<Item = Element> + Send + 'a>>;
}

/// In-memory graph store, used by single-node deployments and tests.
#[derive(Default)]
pub struct InMemoryGraph {
    elements: RwLock<BTreeMap<ElementId, Element>>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, element: Element) -> anyhow::Result<()> {
        let mut elements = self
            .elements
            .write()
            .map_err(|_| anyhow::anyhow!("graph lock poisoned"))?;
        elements.insert(element.id, element);
        Ok(())
    }

    pub fn remove(&self, id: ElementId) -> anyhow::Result<Option<Element>> {
        let mut elements = self
            .elements
            .write()
            .map_err(|_| anyhow::anyhow!("graph lock poisoned"))?;
        Ok(elements.remove(&id))
    }

    pub fn len(&self) -> usize {
        self.elements.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<Element> for InMemoryGraph {
    fn from_iter<T: IntoIterator<Item = Element>>(iter: T) -> Self {
        let elements = iter.into_iter().map(|e| (e.id, e)).collect();
        Self {
            elements: RwLock::new(elements),
        }
    }
}

impl ElementSource for InMemoryGraph {
    fn scan<'a>(
        &'a self,
        space: &ElementSpace,
        range: &KeyRange,
    ) -> anyhow::Result<Box<dyn Iterator<Item = Element> + Send + 'a>> {
        // Fail fast instead of on the first batch
        if self.elements.read().is_err() {
            return Err(anyhow::anyhow!("graph lock poisoned"));
        }

        Ok(Box::new(RangeScan {
            graph: self,
            space: space.clone(),
            cursor: range.start,
            end: range.end,
            buffer: VecDeque::new(),
            exhausted: range.is_empty(),
        }))
    }
}

/// Batched cursor over one range. The read lock is only held while a batch is copied out,
/// so writers are never blocked for a whole partition.
struct RangeScan<'a> {
    graph: &'a InMemoryGraph,
    space: ElementSpace,
    cursor: ElementId,
    end: Option<ElementId>,
    buffer: VecDeque<Element>,
    exhausted: bool,
}

impl RangeScan<'_> {
    fn refill(&mut self) {
        let Ok(elements) = self.graph.elements.read() else {
            tracing::warn!("Graph lock poisoned, ending scan at id {}", self.cursor);
            self.exhausted = true;
            return;
        };

        let upper = self.end.map_or(Bound::Unbounded, Bound::Excluded);
        let mut scanned = 0;
        for (id, element) in elements.range((Bound::Included(self.cursor), upper)) {
            scanned += 1;
            if element.in_space(&self.space) {
                self.buffer.push_back(element.clone());
            }
            // Nothing can follow u64::MAX
            let Some(next) = id.checked_add(1) else {
                break;
            };
            self.cursor = next;
            if scanned == SCAN_BATCH {
                return;
            }
        }
        self.exhausted = true;
    }
}

impl Iterator for RangeScan<'_> {
    type Item = Element;

    fn next(&mut self) -> Option<Element> {
        while self.buffer.is_empty() && !self.exhausted {
            self.refill();
        }
        self.buffer.pop_front()
    }
}
