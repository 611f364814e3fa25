use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies an index.
///
/// Global indexes are identified by name alone; vertex-centric indexes are scoped to the
/// relation type (edge label) that owns them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexRef {
    pub name: String,
    pub relation_type: Option<String>,
}

impl IndexRef {
    pub fn global(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            relation_type: None,
        }
    }

    pub fn vertex_centric(name: impl Into<String>, relation_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            relation_type: Some(relation_type.into()),
        }
    }

    pub fn is_vertex_centric(&self) -> bool {
        self.relation_type.is_some()
    }
}

impl fmt::Display for IndexRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.relation_type {
            Some(relation) => write!(f, "{}@{}", self.name, relation),
            None => f.write_str(&self.name),
        }
    }
}

/// A property key or edge label the index is built over. Each one carries its own status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstituentKey(pub String);

impl ConstituentKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConstituentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum IndexKind {
    /// Exact-match index kept in the same storage layer as the graph.
    Composite,
    /// Full-text/range index held by a named external backend.
    Mixed { backend: String },
}

impl IndexKind {
    pub fn is_mixed(&self) -> bool {
        matches!(self, Self::Mixed { .. })
    }
}

/// What kind of element the index covers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ElementCategory {
    Vertex,
    Edge,
}

/// The set of elements a scan job has to visit for one index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ElementSpace {
    Vertices,
    Edges,
    /// Edges of a single relation type, used by vertex-centric indexes.
    EdgesLabeled(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexDefinition {
    pub index: IndexRef,
    pub kind: IndexKind,
    pub element: ElementCategory,
    pub keys: Vec<ConstituentKey>,
}

impl IndexDefinition {
    pub fn composite(index: IndexRef, element: ElementCategory, keys: &[&str]) -> Self {
        Self {
            index,
            kind: IndexKind::Composite,
            element,
            keys: keys.iter().map(|k| ConstituentKey::new(*k)).collect(),
        }
    }

    pub fn mixed(
        index: IndexRef,
        backend: impl Into<String>,
        element: ElementCategory,
        keys: &[&str],
    ) -> Self {
        Self {
            index,
            kind: IndexKind::Mixed {
                backend: backend.into(),
            },
            element,
            keys: keys.iter().map(|k| ConstituentKey::new(*k)).collect(),
        }
    }

    pub fn element_space(&self) -> ElementSpace {
        match (&self.index.relation_type, self.element) {
            (Some(relation), _) => ElementSpace::EdgesLabeled(relation.clone()),
            (None, ElementCategory::Vertex) => ElementSpace::Vertices,
            (None, ElementCategory::Edge) => ElementSpace::Edges,
        }
    }

    pub fn has_key(&self, key: &ConstituentKey) -> bool {
        self.keys.contains(key)
    }
}

/// Lifecycle status of an index key.
///
/// The derived ordering follows the lifecycle, which makes "pointwise minimum over
/// INSTALLED < REGISTERED < ENABLED" a plain `min`.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub enum IndexStatus {
    Installed,
    Registered,
    Enabled,
    Disabled,
    Removed,
}

impl IndexStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Removed)
    }

    pub fn is_retired(&self) -> bool {
        matches!(self, Self::Disabled | Self::Removed)
    }
}

impl fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Installed => "INSTALLED",
            Self::Registered => "REGISTERED",
            Self::Enabled => "ENABLED",
            Self::Disabled => "DISABLED",
            Self::Removed => "REMOVED",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for IndexStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INSTALLED" => Ok(Self::Installed),
            "REGISTERED" => Ok(Self::Registered),
            "ENABLED" => Ok(Self::Enabled),
            "DISABLED" => Ok(Self::Disabled),
            "REMOVED" => Ok(Self::Removed),
            other => Err(format!("unknown index status '{other}'")),
        }
    }
}

/// Lifecycle actions an operator can request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchemaAction {
    RegisterIndex,
    EnableIndex,
    DisableIndex,
    Reindex,
    RemoveIndex,
}

impl fmt::Display for SchemaAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RegisterIndex => "REGISTER_INDEX",
            Self::EnableIndex => "ENABLE_INDEX",
            Self::DisableIndex => "DISABLE_INDEX",
            Self::Reindex => "REINDEX",
            Self::RemoveIndex => "REMOVE_INDEX",
        };
        f.write_str(name)
    }
}

/// A status as read from the store, together with the version a write must quote.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionedStatus {
    pub status: IndexStatus,
    pub version: u64,
}

/// Aggregate status of an index over its constituent keys.
///
/// All keys REMOVED gives REMOVED; any DISABLED or REMOVED key gives DISABLED; otherwise
/// the minimum over INSTALLED < REGISTERED < ENABLED. `None` for an index without keys.
pub fn aggregate_status<I>(statuses: I) -> Option<IndexStatus>
where
    I: IntoIterator<Item = IndexStatus>,
{
    let statuses: Vec<IndexStatus> = statuses.into_iter().collect();
    if statuses.is_empty() {
        return None;
    }
    if statuses.iter().all(|s| *s == IndexStatus::Removed) {
        return Some(IndexStatus::Removed);
    }
    if statuses.iter().any(|s| s.is_retired()) {
        return Some(IndexStatus::Disabled);
    }
    statuses.into_iter().min()
}
