use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Heartbeat-based view of an instance, for operators only.
///
/// `Stale` never removes an instance from acknowledgment rounds; only an explicit
/// eviction does that.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Liveness {
    Live,
    Stale,
}

/// A coordinator process sharing the schema metadata.
///
/// `lease_token` is bumped every time the same id registers again, so heartbeats sent by
/// an older incarnation of the process can be told apart and ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceRecord {
    pub id: InstanceId,
    pub http_addr: Option<SocketAddr>,
    pub lease_token: u64,
    pub registered_at: u64,
    pub last_heartbeat: u64,
}

/// Audit entry written for every deregistration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvictionRecord {
    pub id: InstanceId,
    pub reason: String,
    pub evicted_at: u64,
    pub last_heartbeat: u64,
}

/// Helper to get the current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
