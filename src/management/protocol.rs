//! Admin API Definitions
//!
//! Endpoints and Data Transfer Objects of the operator-facing HTTP surface: index
//! lifecycle actions, status queries and instance management.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::ack::types::{AckReport, AckRound};
use crate::executor::types::{JobId, JobRecord};
use crate::membership::types::{EvictionRecord, InstanceId, InstanceRecord, Liveness};
use crate::schema::types::{IndexDefinition, IndexRef, IndexStatus, SchemaAction};

pub const ENDPOINT_INDEX: &str = "/index";
pub const ENDPOINT_INDEX_ACTION: &str = "/index/:name/action";
pub const ENDPOINT_INDEX_STATUS: &str = "/index/:name/status";
pub const ENDPOINT_INDEX_AWAIT: &str = "/index/:name/await";
pub const ENDPOINT_INSTANCES: &str = "/instances";
pub const ENDPOINT_INSTANCE_REGISTER: &str = "/instances/register";
pub const ENDPOINT_INSTANCE_EVICT: &str = "/instances/:id/evict";
pub const ENDPOINT_INSTANCE_HEARTBEAT: &str = "/instances/:id/heartbeat";

/// Selects a vertex-centric index by its relation type; global indexes omit it.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct IndexQuery {
    pub relation_type: Option<String>,
}

impl IndexQuery {
    pub fn index_ref(&self, name: String) -> IndexRef {
        match &self.relation_type {
            Some(relation) => IndexRef::vertex_centric(name, relation.clone()),
            None => IndexRef::global(name),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BuildIndexRequest {
    pub definition: IndexDefinition,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BuildIndexResponse {
    pub index: IndexRef,
    pub status: IndexStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateIndexRequest {
    pub action: SchemaAction,
    #[serde(default)]
    pub relation_type: Option<String>,
    /// Block until a launched job finishes instead of returning its id.
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UpdateIndexResponse {
    pub index: Option<IndexRef>,
    pub status: Option<IndexStatus>,
    pub acks: Vec<AckReport>,
    pub job_id: Option<JobId>,
    pub job: Option<JobRecord>,
    pub manual_cleanup: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AwaitQuery {
    #[serde(default)]
    pub relation_type: Option<String>,
    /// Comma-separated statuses, e.g. `REGISTERED,ENABLED`.
    pub targets: String,
    #[serde(default)]
    pub poll_ms: Option<u64>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InstanceView {
    pub record: InstanceRecord,
    pub liveness: Liveness,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InstancesResponse {
    pub instances: Vec<InstanceView>,
    pub evictions: Vec<EvictionRecord>,
    pub active_rounds: Vec<AckRound>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterInstanceRequest {
    pub id: InstanceId,
    pub http_addr: Option<SocketAddr>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EvictRequest {
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub lease_token: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub accepted: bool,
}
