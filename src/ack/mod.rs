//! Acknowledgment Protocol Module
//!
//! Makes sure every registered instance has loaded a schema change before the change is
//! acted upon (an index registered for reindexing, or disabled).
//!
//! ## Protocol
//! 1. **Announce**: The round sends the event to every instance in the registry.
//! 2. **Load**: Each instance records the event in its `SchemaView`.
//! 3. **Confirm**: The round polls each instance until it reports the event as loaded.
//! 4. **Decide**: The round completes only when all currently registered instances have
//!    confirmed. Unreachable instances block it until an operator evicts them.
//!
//! ## Submodules
//! - **`coordinator`**: Drives rounds and classifies each target.
//! - **`messenger`**: In-process and HTTP implementations of the `SchemaMessenger` seam.
//! - **`view`**: Per-instance record of loaded schema events.
//! - **`protocol`**: Endpoints, DTOs and the messenger trait.
//! - **`handlers`**: The instance side of the HTTP protocol.

pub mod coordinator;
pub mod handlers;
pub mod messenger;
pub mod protocol;
pub mod types;
pub mod view;
