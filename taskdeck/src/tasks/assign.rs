//! Assignee management for team tasks.
//!
//! Extends [`MutationStore`] with roster refresh and optimistic
//! assign/unassign. Both are idempotent: assigning a member who is already
//! assigned, or unassigning one who is not, succeeds without a remote call.

use taskdeck_proto::task::{IdentityId, TaskId};
use taskdeck_proto::team::RosterMember;

use super::store::MutationStore;
use super::txn::Change;
use super::{MutationError, MutationKind, palette};
use crate::auth::IdentityProvider;
use crate::remote::TaskRemote;

/// Result of an assign or unassign request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOutcome {
    /// The change was applied and confirmed.
    Applied,
    /// The task already had the requested assignment; nothing was sent.
    Unchanged,
    /// The scope changed before the service answered.
    ScopeChanged,
}

impl<R: TaskRemote, I: IdentityProvider> MutationStore<R, I> {
    /// The roster fetched by the last [`refresh_roster`](Self::refresh_roster).
    #[must_use]
    pub fn roster(&self) -> Vec<RosterMember> {
        self.shared.state.lock().roster.clone()
    }

    /// Fetches the loaded team's roster and refreshes the display name,
    /// initials, and color of every assignee on it.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError::NoScope`] or
    /// [`MutationError::NotTeamScope`] if no team is loaded, or the
    /// classified remote error.
    pub async fn refresh_roster(&self) -> Result<Vec<RosterMember>, MutationError> {
        let (team_id, generation) = {
            let state = self.shared.state.lock();
            let scope = state.scope.as_ref().ok_or(MutationError::NoScope)?;
            let team_id = scope.team_id().ok_or(MutationError::NotTeamScope)?.clone();
            (team_id, state.generation)
        };
        let detail = match self.remote.team_detail(&team_id).await {
            Ok(detail) => detail,
            Err(err) => {
                let error = MutationError::from(err);
                tracing::warn!(team_id = %team_id, error = %error, "roster refresh failed");
                if error == MutationError::AuthenticationExpired {
                    self.expire_session();
                }
                return Err(error);
            }
        };
        let roster = detail.members;
        {
            let mut state = self.shared.state.lock();
            if state.generation != generation {
                tracing::info!(team_id = %team_id, "scope changed during roster refresh");
                return Ok(roster);
            }
            let mut changed = false;
            for task in &mut state.tasks {
                for assignee in &mut task.assignees {
                    let Some(member) = roster.iter().find(|m| m.identity == assignee.identity)
                    else {
                        continue;
                    };
                    if assignee.display_name != member.display_name {
                        *assignee =
                            palette::decorate(member.identity.clone(), &member.display_name);
                        changed = true;
                    }
                }
            }
            state.roster.clone_from(&roster);
            if changed {
                self.shared.publish(&mut state);
            }
        }
        tracing::debug!(team_id = %team_id, members = roster.len(), "roster refreshed");
        Ok(roster)
    }

    /// Assigns a roster member to a team task.
    ///
    /// The roster is fetched first if it has not been loaded yet.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError::NotTeamScope`] outside a team list,
    /// [`MutationError::NotOnRoster`] for a non-member,
    /// [`MutationError::Unconfirmed`] or [`MutationError::TaskNotFound`] for
    /// an unaddressable task, or the classified remote error after the
    /// assignee list has been restored.
    pub async fn assign(
        &self,
        task_id: &TaskId,
        member: &IdentityId,
    ) -> Result<AssignOutcome, MutationError> {
        Self::ensure_confirmed(task_id)?;
        self.require_team_scope()?;
        if self.shared.state.lock().roster.is_empty() {
            self.refresh_roster().await?;
        }
        {
            let state = self.shared.state.lock();
            if state.task(task_id)?.is_assigned(member) {
                return Ok(AssignOutcome::Unchanged);
            }
        }
        let (scope, flight) = self.begin(MutationKind::Assign, |state, _| {
            let entry = state
                .roster
                .iter()
                .find(|m| &m.identity == member)
                .ok_or_else(|| MutationError::NotOnRoster(member.clone()))?;
            Ok(Change::AddAssignee {
                id: task_id.clone(),
                assignee: palette::decorate(entry.identity.clone(), &entry.display_name),
            })
        })?;
        let Some(team_id) = scope.team_id() else {
            return Err(MutationError::NotTeamScope);
        };
        let outcome = self.remote.assign(team_id, task_id, member).await;
        Ok(match self.settle(flight, outcome)? {
            Some(()) => AssignOutcome::Applied,
            None => AssignOutcome::ScopeChanged,
        })
    }

    /// Removes a member from a team task's assignees.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError::NotTeamScope`] outside a team list,
    /// [`MutationError::Unconfirmed`] or [`MutationError::TaskNotFound`] for
    /// an unaddressable task, or the classified remote error after the
    /// assignee has been put back in its position.
    pub async fn unassign(
        &self,
        task_id: &TaskId,
        member: &IdentityId,
    ) -> Result<AssignOutcome, MutationError> {
        Self::ensure_confirmed(task_id)?;
        self.require_team_scope()?;
        {
            let state = self.shared.state.lock();
            if !state.task(task_id)?.is_assigned(member) {
                return Ok(AssignOutcome::Unchanged);
            }
        }
        let (scope, flight) = self.begin(MutationKind::Unassign, |_, _| {
            Ok(Change::RemoveAssignee {
                id: task_id.clone(),
                identity: member.clone(),
            })
        })?;
        let Some(team_id) = scope.team_id() else {
            return Err(MutationError::NotTeamScope);
        };
        let outcome = self.remote.unassign(team_id, task_id, member).await;
        Ok(match self.settle(flight, outcome)? {
            Some(()) => AssignOutcome::Applied,
            None => AssignOutcome::ScopeChanged,
        })
    }

    fn require_team_scope(&self) -> Result<(), MutationError> {
        match self.shared.state.lock().scope.as_ref() {
            None => Err(MutationError::NoScope),
            Some(scope) if scope.team_id().is_none() => Err(MutationError::NotTeamScope),
            Some(_) => Ok(()),
        }
    }
}
