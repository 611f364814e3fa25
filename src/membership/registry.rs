use dashmap::DashMap;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

use super::types::{EvictionRecord, InstanceId, InstanceRecord, Liveness, now_ms};
use crate::error::{LifecycleError, Result};

pub struct InstanceRegistry {
    members: DashMap<InstanceId, InstanceRecord>,
    evictions: DashMap<u64, EvictionRecord>,
    eviction_seq: AtomicU64,
    stale_after: Duration,
}

impl InstanceRegistry {
    pub fn new(stale_after: Duration) -> Arc<Self> {
        Arc::new(Self {
            members: DashMap::new(),
            evictions: DashMap::new(),
            eviction_seq: AtomicU64::new(0),
            stale_after,
        })
    }

    /// Adds an instance, or re-registers it under a fresh lease token.
    pub fn register_instance(&self, id: InstanceId, http_addr: Option<SocketAddr>) -> InstanceRecord {
        let now = now_ms();
        match self.members.get_mut(&id) {
            Some(mut existing) => {
                existing.lease_token += 1;
                existing.http_addr = http_addr;
                existing.last_heartbeat = now;
                tracing::info!(
                    "Instance {} re-registered (lease token {})",
                    id,
                    existing.lease_token
                );
                existing.clone()
            }
            None => {
                let record = InstanceRecord {
                    id: id.clone(),
                    http_addr,
                    lease_token: 1,
                    registered_at: now,
                    last_heartbeat: now,
                };
                self.members.insert(id.clone(), record.clone());
                info!("Instance {} joined, registry size now: {}", id, self.members.len());
                record
            }
        }
    }

    /// Removes an instance from the registry and appends an audit entry.
    ///
    /// Used both for graceful shutdown and for manual eviction of an instance that
    /// stopped answering. Acknowledgment rounds in flight recompute over the remaining set.
    pub fn deregister_instance(&self, id: &InstanceId, reason: &str) -> Result<InstanceRecord> {
        let (_, record) = self
            .members
            .remove(id)
            .ok_or_else(|| LifecycleError::UnknownInstance(id.clone()))?;

        let seq = self.eviction_seq.fetch_add(1, Ordering::SeqCst);
        self.evictions.insert(
            seq,
            EvictionRecord {
                id: id.clone(),
                reason: reason.to_string(),
                evicted_at: now_ms(),
                last_heartbeat: record.last_heartbeat,
            },
        );

        tracing::warn!(
            "Instance {} deregistered ({}), registry size now: {}",
            id,
            reason,
            self.members.len()
        );

        Ok(record)
    }

    /// Records a heartbeat. Returns `false` when the token belongs to an older incarnation.
    pub fn heartbeat(&self, id: &InstanceId, lease_token: u64) -> Result<bool> {
        let mut member = self
            .members
            .get_mut(id)
            .ok_or_else(|| LifecycleError::UnknownInstance(id.clone()))?;

        if lease_token != member.lease_token {
            tracing::debug!(
                "Ignoring heartbeat from {} with stale lease token {} (current {})",
                id,
                lease_token,
                member.lease_token
            );
            return Ok(false);
        }

        member.last_heartbeat = now_ms();
        Ok(true)
    }

    /// Every registered instance. Membership only shrinks through deregistration.
    pub fn list_live(&self) -> BTreeSet<InstanceId> {
        self.members.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn get_member(&self, id: &InstanceId) -> Option<InstanceRecord> {
        self.members.get(id).map(|entry| entry.value().clone())
    }

    pub fn liveness(&self) -> Vec<(InstanceRecord, Liveness)> {
        let now = now_ms();
        let stale_after = self.stale_after.as_millis() as u64;

        let mut report: Vec<(InstanceRecord, Liveness)> = self
            .members
            .iter()
            .map(|entry| {
                let record = entry.value().clone();
                let state = if now.saturating_sub(record.last_heartbeat) > stale_after {
                    Liveness::Stale
                } else {
                    Liveness::Live
                };
                (record, state)
            })
            .collect();
        report.sort_by(|a, b| a.0.id.cmp(&b.0.id));
        report
    }

    pub fn eviction_log(&self) -> Vec<EvictionRecord> {
        let mut entries: Vec<(u64, EvictionRecord)> = self
            .evictions
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, record)| record).collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
