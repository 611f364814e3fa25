//! Acknowledgment Protocol Definitions
//!
//! Endpoints and Data Transfer Objects exchanged between the instance that runs an
//! acknowledgment round and the instances that have to confirm the schema change, plus
//! the `SchemaMessenger` seam the round is driven through.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::types::SchemaEvent;
use crate::membership::types::{InstanceId, InstanceRecord};

/// Endpoint telling an instance to reload the schema for an event.
pub const ENDPOINT_SCHEMA_ANNOUNCE: &str = "/internal/schema/announce";
/// Endpoint asking an instance whether it has loaded an event.
pub const ENDPOINT_SCHEMA_CONFIRM: &str = "/internal/schema/confirm";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnounceRequest {
    pub event: SchemaEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmRequest {
    pub event: SchemaEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmResponse {
    pub instance: InstanceId,
    pub loaded: bool,
}

/// Transport used by an acknowledgment round.
///
/// Messages may be delayed or lost, so the round re-announces on every poll. An `Err`
/// from either call classifies the target as unreachable for that poll.
#[async_trait]
pub trait SchemaMessenger: Send + Sync {
    async fn announce(&self, target: &InstanceRecord, event: &SchemaEvent) -> anyhow::Result<()>;

    async fn confirm(&self, target: &InstanceRecord, event: &SchemaEvent) -> anyhow::Result<bool>;
}
