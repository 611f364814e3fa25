//! Instance Registry Module
//!
//! Tracks the coordinator processes ("instances") that share the schema status store.
//! Acknowledgment rounds are computed over this set.
//!
//! ## Core Mechanisms
//! - **Registration**: An instance registers on start and receives a lease token; registering
//!   the same id again bumps the token so heartbeats from an old incarnation are ignored.
//! - **Liveness**: Heartbeats feed an operator-facing `Live`/`Stale` report. Staleness is
//!   informational only.
//! - **Eviction**: Removing an instance is always an explicit call and is written to an
//!   audit log, because a slow instance cannot be told apart from a dead one automatically.

pub mod registry;
pub mod types;
