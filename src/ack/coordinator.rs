//! Acknowledgment Round Driver
//!
//! Broadcasts a schema event to every registered instance and polls until all of them
//! confirm or the round's deadline passes.
//!
//! ## Round Semantics
//! - The target set is recomputed from the registry on every poll. Evicting an instance
//!   mid-round removes it from the completion condition immediately.
//! - An instance that does not answer is reported `Unreachable`, one that answers without
//!   having loaded the event is `Pending`. Neither is ever dropped automatically.
//! - The event is re-announced on every poll, since messages may be lost.
//! - The deadline bounds every poll as well: an instance still silent when it passes is
//!   classified `Unreachable`, however long its messenger call would have taken.

use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

use super::protocol::SchemaMessenger;
use super::types::{AckReport, AckRound, AckState, SchemaEvent};
use crate::membership::registry::InstanceRegistry;
use crate::membership::types::{InstanceId, InstanceRecord, now_ms};

pub struct AckCoordinator {
    registry: Arc<InstanceRegistry>,
    messenger: Arc<dyn SchemaMessenger>,
    poll_interval: Duration,
    rounds: DashMap<String, AckRound>,
}

impl AckCoordinator {
    pub fn new(
        registry: Arc<InstanceRegistry>,
        messenger: Arc<dyn SchemaMessenger>,
        poll_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            messenger,
            poll_interval,
            rounds: DashMap::new(),
        })
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    /// Runs one round. Always returns a report; check `AckReport::is_complete`.
    pub async fn request_acknowledgment(&self, event: SchemaEvent, timeout: Duration) -> AckReport {
        let started = Instant::now();
        let deadline = started + timeout;
        let round_id = uuid::Uuid::new_v4().to_string();
        let now = now_ms();

        self.rounds.insert(
            round_id.clone(),
            AckRound {
                round_id: round_id.clone(),
                event: event.clone(),
                required: self.registry.list_live(),
                acked: BTreeSet::new(),
                started_at: now,
                deadline: now + timeout.as_millis() as u64,
            },
        );

        // Unregisters the round even if the caller drops this future mid-round
        let _round = RoundGuard {
            rounds: &self.rounds,
            round_id: round_id.clone(),
        };

        tracing::info!(
            "Acknowledgment round {} started: {:?} for index {} key {} ({} instances)",
            round_id,
            event.kind,
            event.index,
            event.key,
            self.registry.len()
        );

        let mut acked: BTreeSet<InstanceId> = BTreeSet::new();

        loop {
            let live = self.registry.list_live();
            acked.retain(|id| live.contains(id));

            let targets = self.poll_round(&live, &mut acked, &event, deadline).await;

            if let Some(mut round) = self.rounds.get_mut(&round_id) {
                round.required = live.clone();
                round.acked = acked.clone();
            }

            let report = AckReport {
                event: event.clone(),
                targets,
                elapsed_ms: started.elapsed().as_millis() as u64,
            };

            if report.is_complete() {
                tracing::info!(
                    "Acknowledgment round {} complete: {} instance(s) acked in {}ms",
                    round_id,
                    report.targets.len(),
                    report.elapsed_ms
                );
                return report;
            }

            if started.elapsed() >= timeout {
                tracing::warn!(
                    "Acknowledgment round {} timed out for index {} key {}: pending={:?} unreachable={:?}",
                    round_id,
                    event.index,
                    event.key,
                    report.pending(),
                    report.unreachable()
                );
                return report;
            }

            tracing::trace!(
                "Round {}: {}/{} acked",
                round_id,
                acked.len(),
                live.len()
            );
            let remaining = timeout.saturating_sub(started.elapsed());
            tokio::time::sleep(self.poll_interval.min(remaining)).await;
        }
    }

    async fn poll_round(
        &self,
        live: &BTreeSet<InstanceId>,
        acked: &mut BTreeSet<InstanceId>,
        event: &SchemaEvent,
        deadline: Instant,
    ) -> BTreeMap<InstanceId, AckState> {
        let mut targets = BTreeMap::new();
        let mut polls = JoinSet::new();

        for id in live {
            if acked.contains(id) {
                targets.insert(id.clone(), AckState::Acked);
                continue;
            }
            let Some(record) = self.registry.get_member(id) else {
                // Evicted between listing and lookup
                continue;
            };

            // Stays unreachable if the poll task itself dies
            targets.insert(id.clone(), AckState::Unreachable);

            let messenger = self.messenger.clone();
            let event = event.clone();
            polls.spawn(async move {
                let state = poll_instance(messenger.as_ref(), &record, &event).await;
                (record.id, state)
            });
        }

        loop {
            let joined =
                match tokio::time::timeout_at(deadline.into(), polls.join_next()).await {
                    Ok(Some(joined)) => joined,
                    Ok(None) => break,
                    Err(_) => {
                        // Dropping the set aborts the stragglers; they stay Unreachable
                        tracing::debug!(
                            "Round deadline passed with {} instance(s) still silent",
                            polls.len()
                        );
                        break;
                    }
                };
            match joined {
                Ok((id, state)) => {
                    if state == AckState::Acked {
                        acked.insert(id.clone());
                    }
                    targets.insert(id, state);
                }
                Err(e) => {
                    tracing::warn!("Acknowledgment poll task failed: {}", e);
                }
            }
        }

        targets
    }

    pub fn active_rounds(&self) -> Vec<AckRound> {
        self.rounds
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}

async fn poll_instance(
    messenger: &dyn SchemaMessenger,
    record: &InstanceRecord,
    event: &SchemaEvent,
) -> AckState {
    if let Err(e) = messenger.announce(record, event).await {
        tracing::debug!("Announce to {} failed: {}", record.id, e);
        return AckState::Unreachable;
    }

    match messenger.confirm(record, event).await {
        Ok(true) => AckState::Acked,
        Ok(false) => AckState::Pending,
        Err(e) => {
            tracing::debug!("Confirm from {} failed: {}", record.id, e);
            AckState::Unreachable
        }
    }
}

/// Removes a round from the active set when the round ends, however it ends.
struct RoundGuard<'a> {
    rounds: &'a DashMap<String, AckRound>,
    round_id: String,
}

impl Drop for RoundGuard<'_> {
    fn drop(&mut self) {
        self.rounds.remove(&self.round_id);
    }
}
