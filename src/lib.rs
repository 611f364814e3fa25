//! Index Lifecycle Coordination Library
//!
//! This library crate defines the modules that move a secondary index of a distributed
//! graph store through its lifecycle and drive the scan jobs that backfill or purge it.
//! It serves as the foundation for the node binary (`main.rs`).
//!
//! ## Architecture Modules
//! The system is composed of five loosely coupled subsystems:
//!
//! - **`membership`**: The instance registry. Tracks every coordinator process sharing the
//!   schema metadata, records heartbeats and keeps an audit log of manual evictions.
//! - **`schema`**: The versioned status store (single source of truth for index status),
//!   the pure lifecycle state machine and the optimistic status writer built on top of it.
//! - **`ack`**: The acknowledgment protocol. Broadcasts a schema change to every registered
//!   instance and waits until all of them confirm they loaded it.
//! - **`executor`**: The reindex/removal job engine. Partitions the element space, runs the
//!   partitions through a pluggable execution strategy and tracks job outcomes.
//! - **`management`**: The caller-facing `IndexManager` tying the subsystems together behind
//!   `build_index`, `update_index` and `await_status`.

pub mod ack;
pub mod config;
pub mod error;
pub mod executor;
pub mod management;
pub mod membership;
pub mod schema;

pub use error::{LifecycleError, ManualBackendCleanupRequired, Result};
