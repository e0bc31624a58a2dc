//! Optimistic task lists.
//!
//! [`MutationStore`] holds the tasks of the active scope and applies every
//! user change locally before the remote service confirms it. Each change
//! is a [`txn::Transaction`] that knows how to revert exactly what it
//! touched; failed calls roll back before the error is returned.
//! Consumers follow the list through [`MutationStore::subscribe`] and the
//! [`StoreEvent`] channel.

pub mod assign;
pub mod palette;
pub mod status;
pub mod store;
pub mod txn;

pub use assign::AssignOutcome;
pub use status::{TaskFilter, effective_status, next};
pub use store::{CreateOutcome, MutationStore, TaskSnapshot};
pub use txn::{Change, Transaction, Undo};

use serde::Deserialize;
use thiserror::Error;

use taskdeck_proto::task::{IdentityId, MAX_TASK_TITLE_LENGTH, Scope, TaskId};

use crate::remote::RemoteError;

/// How a failed remote call is reported to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The session expired; mutations are suspended until sign-in.
    AuthenticationExpired,
    /// The service could not be reached; the user may retry.
    TransportFailure,
    /// The service refused the change; its message is shown verbatim.
    Rejected,
}

/// Errors that can occur during task mutations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MutationError {
    /// The service no longer accepts the session.
    #[error("session expired, sign in again")]
    AuthenticationExpired,
    /// The remote call failed in transit.
    #[error("could not reach the task service: {0}")]
    TransportFailure(String),
    /// The service refused the change.
    #[error("{0}")]
    Rejected(String),
    /// Mutations are suspended until the user signs in again.
    #[error("changes are paused until you sign in again")]
    Suspended,
    /// No scope has been loaded.
    #[error("no task list is loaded")]
    NoScope,
    /// A personal list was requested without a signed-in identity.
    #[error("not signed in")]
    NotSignedIn,
    /// The task is not in the loaded list.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),
    /// The task has not been confirmed by the service yet.
    #[error("task {0} is still being created")]
    Unconfirmed(TaskId),
    /// Task title cannot be empty.
    #[error("task title cannot be empty")]
    TitleEmpty,
    /// Task title exceeds the maximum length.
    #[error("task title too long (max {max} characters)")]
    TitleTooLong {
        /// Configured maximum.
        max: usize,
    },
    /// An edit that changes nothing.
    #[error("nothing to change")]
    EmptyPatch,
    /// Assignment requires a team list.
    #[error("assignees exist only on team tasks")]
    NotTeamScope,
    /// The member is not on the team roster.
    #[error("{0} is not a member of this team")]
    NotOnRoster(IdentityId),
    /// The member is not assigned to the task.
    #[error("{0} is not assigned to this task")]
    NotAssigned(IdentityId),
}

impl MutationError {
    /// Classification of a failed remote call, or `None` for errors raised
    /// locally before any call was made.
    #[must_use]
    pub const fn kind(&self) -> Option<FailureKind> {
        match self {
            Self::AuthenticationExpired => Some(FailureKind::AuthenticationExpired),
            Self::TransportFailure(_) => Some(FailureKind::TransportFailure),
            Self::Rejected(_) => Some(FailureKind::Rejected),
            _ => None,
        }
    }

    /// Returns `true` if trying again may succeed.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::TransportFailure(_))
    }
}

impl From<RemoteError> for MutationError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::AuthenticationExpired => Self::AuthenticationExpired,
            RemoteError::Transport(msg) => Self::TransportFailure(msg),
            RemoteError::Rejected { message, .. } => Self::Rejected(message),
        }
    }
}

/// Which operation a [`StoreEvent`] is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    /// `create`.
    Create,
    /// `cycle_status`.
    CycleStatus,
    /// `edit_fields`.
    Edit,
    /// `delete`.
    Delete,
    /// `assign`.
    Assign,
    /// `unassign`.
    Unassign,
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::CycleStatus => write!(f, "cycle-status"),
            Self::Edit => write!(f, "edit"),
            Self::Delete => write!(f, "delete"),
            Self::Assign => write!(f, "assign"),
            Self::Unassign => write!(f, "unassign"),
        }
    }
}

/// Events emitted by the store for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// The service confirmed a mutation.
    Confirmed {
        /// Operation.
        kind: MutationKind,
        /// Task affected (the server ID for confirmed creates).
        task_id: TaskId,
    },
    /// A mutation failed and its local change was reverted.
    RolledBack {
        /// Operation.
        kind: MutationKind,
        /// Task affected.
        task_id: TaskId,
        /// Why.
        error: MutationError,
    },
    /// The list was replaced by the service's copy.
    Reloaded {
        /// Scope reloaded.
        scope: Scope,
        /// Number of tasks.
        count: usize,
    },
    /// The session expired; mutations are suspended.
    AuthenticationExpired,
}

/// What to do after the service confirms a create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreateReconcile {
    /// Replace the temporary entry's ID and fields with the returned record.
    #[default]
    Merge,
    /// Reload the whole list.
    Reload,
}

/// Store settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Longest accepted title, in characters.
    pub max_title_len: usize,
    /// Reconciliation after a confirmed create.
    pub create_reconcile: CreateReconcile,
    /// Capacity of the event channel.
    pub event_buffer: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_title_len: MAX_TASK_TITLE_LENGTH,
            create_reconcile: CreateReconcile::Merge,
            event_buffer: 64,
        }
    }
}
