//! Remote task service abstraction.
//!
//! Defines the [`TaskRemote`] trait the task store and the CLI talk to.
//! Implementations:
//! - [`http::HttpRemote`]: JSON over HTTP against the task service
//! - [`loopback::LoopbackRemote`]: in-memory service for tests, with
//!   scripted failures and held calls

pub mod http;
pub mod loopback;

use taskdeck_proto::auth::ErrorBody;
use taskdeck_proto::codec::CodecError;
use taskdeck_proto::task::{IdentityId, NewTask, Scope, TaskId, TaskPatch, TaskRecord};
use taskdeck_proto::team::{JoinCode, TeamDetail, TeamId, TeamRecord};

/// Errors reported by a remote call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The session credential is missing or no longer accepted.
    #[error("authentication expired")]
    AuthenticationExpired,

    /// The request never produced a usable response (network failure,
    /// timeout, server error, unparseable body).
    #[error("transport failure: {0}")]
    Transport(String),

    /// The service refused the request. `message` is the service's own
    /// wording and is shown to the user unchanged.
    #[error("{message}")]
    Rejected {
        /// HTTP status code of the refusal.
        status: u16,
        /// Reason given by the service.
        message: String,
    },
}

impl RemoteError {
    /// Classifies a non-success HTTP status and its body.
    ///
    /// `401` means the credential expired. Other `4xx` responses are
    /// rejections carrying the body's `detail` text; `5xx` responses are
    /// transport failures.
    #[must_use]
    pub fn from_status(status: u16, body: &[u8]) -> Self {
        if status == 401 {
            return Self::AuthenticationExpired;
        }
        let detail = detail_of(body);
        if (400..500).contains(&status) {
            let message = detail.unwrap_or_else(|| format!("request rejected ({status})"));
            Self::Rejected { status, message }
        } else {
            let message = detail.map_or_else(
                || format!("server error ({status})"),
                |d| format!("server error ({status}): {d}"),
            );
            Self::Transport(message)
        }
    }
}

/// Extracts the service's `detail` text from an error body.
pub(crate) fn detail_of(body: &[u8]) -> Option<String> {
    taskdeck_proto::codec::decode::<ErrorBody>(body)
        .map(|b| b.detail)
        .ok()
        .filter(|d| !d.trim().is_empty())
}

impl From<CodecError> for RemoteError {
    fn from(err: CodecError) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Async interface to the task service.
///
/// Task operations address a [`Scope`]: personal tasks belong to the
/// signed-in identity, team tasks to a team the identity is a member of.
/// Create and update may answer with a partial record or no body at all;
/// callers reconcile or reload accordingly.
pub trait TaskRemote: Send + Sync {
    /// Lists every task in `scope`.
    fn list_tasks(
        &self,
        scope: &Scope,
    ) -> impl std::future::Future<Output = Result<Vec<TaskRecord>, RemoteError>> + Send;

    /// Creates a task. Returns the stored record when the service sends one.
    fn create_task(
        &self,
        scope: &Scope,
        task: &NewTask,
    ) -> impl std::future::Future<Output = Result<Option<TaskRecord>, RemoteError>> + Send;

    /// Applies a partial update. Only the fields present in `patch` are sent.
    fn update_task(
        &self,
        scope: &Scope,
        id: &TaskId,
        patch: &TaskPatch,
    ) -> impl std::future::Future<Output = Result<Option<TaskRecord>, RemoteError>> + Send;

    /// Deletes a task.
    fn delete_task(
        &self,
        scope: &Scope,
        id: &TaskId,
    ) -> impl std::future::Future<Output = Result<(), RemoteError>> + Send;

    /// Adds `member` to the assignees of a team task.
    fn assign(
        &self,
        team_id: &TeamId,
        task_id: &TaskId,
        member: &IdentityId,
    ) -> impl std::future::Future<Output = Result<(), RemoteError>> + Send;

    /// Removes `member` from the assignees of a team task.
    fn unassign(
        &self,
        team_id: &TeamId,
        task_id: &TaskId,
        member: &IdentityId,
    ) -> impl std::future::Future<Output = Result<(), RemoteError>> + Send;

    /// Fetches a team and its roster.
    fn team_detail(
        &self,
        team_id: &TeamId,
    ) -> impl std::future::Future<Output = Result<TeamDetail, RemoteError>> + Send;

    /// Lists the teams the signed-in identity belongs to.
    fn list_teams(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<TeamRecord>, RemoteError>> + Send;

    /// Creates a team owned by the signed-in identity.
    fn create_team(
        &self,
        name: &str,
    ) -> impl std::future::Future<Output = Result<TeamRecord, RemoteError>> + Send;

    /// Joins a team by code.
    fn join_team(
        &self,
        code: &JoinCode,
    ) -> impl std::future::Future<Output = Result<TeamRecord, RemoteError>> + Send;
}
