//! Lifecycle State Machine
//!
//! Pure transition logic: given the current status of one index key and a requested
//! action, decide the status the key ends up in and what has to happen before that
//! status may be written.

use super::types::{ConstituentKey, IndexKind, IndexRef, IndexStatus, SchemaAction};
use crate::error::{LifecycleError, Result};
use crate::executor::types::JobAction;

/// Work that must complete before the target status is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredWork {
    None,
    Acknowledgment,
    Job(JobAction),
    /// Mixed index removal: nothing is deleted, the operator is told to clean up.
    ManualBackendCleanup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: IndexStatus,
    pub to: IndexStatus,
    pub work: RequiredWork,
}

pub fn apply(
    index: &IndexRef,
    key: &ConstituentKey,
    kind: &IndexKind,
    current: IndexStatus,
    action: SchemaAction,
) -> Result<Transition> {
    use IndexStatus::*;
    use SchemaAction::*;

    let (to, work) = match (current, action) {
        (Removed, _) => {
            return Err(LifecycleError::TerminalState {
                index: index.clone(),
                key: key.clone(),
                action,
            });
        }

        (Installed, RegisterIndex) => (Registered, RequiredWork::Acknowledgment),
        (Installed, Reindex | EnableIndex | DisableIndex) => {
            return Err(LifecycleError::NotRegistered {
                index: index.clone(),
                key: key.clone(),
                status: current,
                action,
            });
        }

        (Registered | Enabled, Reindex) => (current, RequiredWork::Job(JobAction::Reindex)),
        (Registered, EnableIndex) => (Enabled, RequiredWork::None),
        (Registered | Enabled, DisableIndex) => (Disabled, RequiredWork::Acknowledgment),

        (Disabled, RemoveIndex) => match kind {
            IndexKind::Composite => (Removed, RequiredWork::Job(JobAction::RemoveIndex)),
            IndexKind::Mixed { .. } => (Removed, RequiredWork::ManualBackendCleanup),
        },

        _ => {
            return Err(LifecycleError::InvalidTransition {
                index: index.clone(),
                key: key.clone(),
                status: current,
                action,
            });
        }
    };

    Ok(Transition {
        from: current,
        to,
        work,
    })
}
