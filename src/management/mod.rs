//! Index Management Module
//!
//! The operator-facing layer. `IndexManager` ties the status writer, the acknowledgment
//! coordinator and the job coordinator together behind three calls:
//!
//! - **`build_index`**: Installs a definition; every constituent key starts INSTALLED.
//! - **`update_index`**: Applies a lifecycle action. The state machine decides what has to
//!   happen first (a cluster-wide acknowledgment round, a scan job, or nothing) and the new
//!   status is only written once that work succeeded.
//! - **`await_status`**: Polls the status store until the index reaches a target status.
//!
//! Instance eviction goes through here as well, so it is always an explicit, logged call.

pub mod handlers;
pub mod manager;
pub mod protocol;

#[cfg(test)]
mod tests;
