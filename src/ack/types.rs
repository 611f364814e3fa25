use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::membership::types::InstanceId;
use crate::schema::types::{ConstituentKey, IndexRef};

/// Which schema change is being broadcast.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SchemaEventKind {
    /// A new definition exists and must be loaded before the index is registered.
    Installed,
    /// The index is being taken out of query use and incremental maintenance.
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SchemaEvent {
    pub index: IndexRef,
    pub key: ConstituentKey,
    pub kind: SchemaEventKind,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AckState {
    Acked,
    /// Reachable, but has not loaded the change yet.
    Pending,
    /// Did not answer at all. Indistinguishable from "slow" without an operator.
    Unreachable,
}

/// Outcome of one acknowledgment round, classified per target instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AckReport {
    pub event: SchemaEvent,
    pub targets: BTreeMap<InstanceId, AckState>,
    pub elapsed_ms: u64,
}

impl AckReport {
    pub fn is_complete(&self) -> bool {
        self.targets.values().all(|state| *state == AckState::Acked)
    }

    pub fn acked(&self) -> Vec<InstanceId> {
        self.with_state(AckState::Acked)
    }

    pub fn pending(&self) -> Vec<InstanceId> {
        self.with_state(AckState::Pending)
    }

    pub fn unreachable(&self) -> Vec<InstanceId> {
        self.with_state(AckState::Unreachable)
    }

    fn with_state(&self, wanted: AckState) -> Vec<InstanceId> {
        self.targets
            .iter()
            .filter(|(_, state)| **state == wanted)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// A round in flight. Dropped when it completes or times out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AckRound {
    pub round_id: String,
    pub event: SchemaEvent,
    pub required: BTreeSet<InstanceId>,
    pub acked: BTreeSet<InstanceId>,
    pub started_at: u64,
    pub deadline: u64,
}
