//! Schema Status Module
//!
//! The single source of truth for index lifecycle state, shared by every instance.
//!
//! ## Core Concepts
//! - **Per-key status**: Each constituent key of an index carries its own status; the
//!   index's effective status is aggregated from them (`types::aggregate_status`).
//! - **Optimistic concurrency**: Every record is versioned. Writers quote the version they
//!   read, so concurrent transitions on the same key are linearized.
//! - **State machine**: `state_machine::apply` is the pure transition table; nothing is
//!   written that it does not allow.
//! - **Durability**: `FileSchemaStore` persists the store as an atomic JSON snapshot so the
//!   records survive restarts.

pub mod state_machine;
pub mod store;
pub mod types;
pub mod writer;
