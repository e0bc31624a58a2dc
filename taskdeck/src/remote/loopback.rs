//! In-memory task service for testing.
//!
//! [`LoopbackRemote`] keeps tasks, teams, and rosters in process and
//! answers the [`TaskRemote`] calls the way the real service does
//! (sequential integer IDs, newest task first, the same rejection
//! wording). Tests drive failure and timing through a FIFO script:
//! [`fail_next`](LoopbackRemote::fail_next) makes the next call fail, and
//! [`hold_next`](LoopbackRemote::hold_next) parks the next call until the
//! returned [`PendingCall`] is resolved, which lets a test decide the order
//! in which concurrent calls complete.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use taskdeck_proto::auth::Identity;
use taskdeck_proto::task::{
    AssigneeRecord, IdentityId, NewTask, Scope, TaskId, TaskPatch, TaskRecord, TaskStatus,
};
use taskdeck_proto::team::{
    JOIN_CODE_ALPHABET, JOIN_CODE_LEN, JoinCode, MemberRole, RosterMember, TeamDetail, TeamId,
    TeamRecord,
};

use super::{RemoteError, TaskRemote};

/// A call as received by the loopback service, recorded in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    /// `list_tasks`.
    ListTasks(Scope),
    /// `create_task`.
    CreateTask(Scope, NewTask),
    /// `update_task`, with the exact patch sent.
    UpdateTask(Scope, TaskId, TaskPatch),
    /// `delete_task`.
    DeleteTask(Scope, TaskId),
    /// `assign`.
    Assign {
        /// Team.
        team_id: TeamId,
        /// Task.
        task_id: TaskId,
        /// Member assigned.
        member: IdentityId,
    },
    /// `unassign`.
    Unassign {
        /// Team.
        team_id: TeamId,
        /// Task.
        task_id: TaskId,
        /// Member removed.
        member: IdentityId,
    },
    /// `team_detail`.
    TeamDetail(TeamId),
    /// `list_teams`.
    ListTeams,
    /// `create_team`.
    CreateTeam(String),
    /// `join_team`.
    JoinTeam(JoinCode),
}

/// How much of the stored record a create call answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CreateEcho {
    /// The complete stored record.
    #[default]
    Full,
    /// Only `id`, `title`, and `status`, as the team endpoint does.
    Partial,
    /// An empty body.
    Empty,
}

/// A call parked by [`LoopbackRemote::hold_next`].
///
/// Dropping it without resolving fails the held call with a transport
/// error.
#[derive(Debug)]
pub struct PendingCall {
    entered: Option<oneshot::Receiver<()>>,
    release: oneshot::Sender<Result<(), RemoteError>>,
}

impl PendingCall {
    /// Waits until the held call has reached the service.
    pub async fn entered(&mut self) {
        if let Some(rx) = self.entered.take() {
            let _ = rx.await;
        }
    }

    /// Lets the held call proceed and apply its effect.
    pub fn succeed(self) {
        let _ = self.release.send(Ok(()));
    }

    /// Fails the held call without applying its effect.
    pub fn fail(self, error: RemoteError) {
        let _ = self.release.send(Err(error));
    }
}

#[derive(Debug)]
struct HeldCall {
    entered: oneshot::Sender<()>,
    release: oneshot::Receiver<Result<(), RemoteError>>,
}

#[derive(Debug)]
enum Script {
    Fail(RemoteError),
    Hold(HeldCall),
}

#[derive(Debug)]
struct ServiceState {
    caller: Identity,
    next_id: i64,
    tasks: HashMap<Scope, Vec<TaskRecord>>,
    teams: Vec<(TeamDetail, String)>,
    script: VecDeque<Script>,
    calls: Vec<RemoteCall>,
    create_echo: CreateEcho,
}

impl ServiceState {
    fn allocate_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn next_code(&self) -> String {
        let mut n = self.teams.len();
        let base = JOIN_CODE_ALPHABET.len();
        let mut code = String::with_capacity(JOIN_CODE_LEN);
        for _ in 0..JOIN_CODE_LEN {
            code.push(char::from(JOIN_CODE_ALPHABET[n % base]));
            n /= base;
        }
        code
    }

    fn team_mut(&mut self, team_id: &TeamId) -> Result<&mut TeamDetail, RemoteError> {
        self.teams
            .iter_mut()
            .map(|(detail, _)| detail)
            .find(|detail| &detail.id == team_id)
            .ok_or_else(|| rejected(404, "Team not found"))
    }

    fn task_mut(&mut self, scope: &Scope, id: &TaskId) -> Result<&mut TaskRecord, RemoteError> {
        self.tasks
            .get_mut(scope)
            .and_then(|list| list.iter_mut().find(|t| &t.id == id))
            .ok_or_else(|| rejected(404, "Task not found"))
    }
}

fn rejected(status: u16, message: &str) -> RemoteError {
    RemoteError::Rejected {
        status,
        message: message.to_string(),
    }
}

fn apply_patch(record: &mut TaskRecord, patch: &TaskPatch) {
    if let Some(title) = &patch.title {
        record.title.clone_from(title);
    }
    if let Some(description) = &patch.description {
        record.description.clone_from(description);
    }
    if let Some(due) = patch.due {
        record.due = due;
    }
    if let Some(status) = patch.status {
        record.status = status;
    }
    if let Some(category) = &patch.category {
        record.category.clone_from(category);
    }
}

/// In-process task service. Clones share the same state.
#[derive(Debug, Clone)]
pub struct LoopbackRemote {
    state: Arc<Mutex<ServiceState>>,
}

impl Default for LoopbackRemote {
    fn default() -> Self {
        Self::new(Identity {
            id: IdentityId::from(1),
            display_name: "Loopback User".to_string(),
        })
    }
}

impl LoopbackRemote {
    /// Creates an empty service that treats `caller` as the signed-in user
    /// for team creation, joining, and listing.
    #[must_use]
    pub fn new(caller: Identity) -> Self {
        Self {
            state: Arc::new(Mutex::new(ServiceState {
                caller,
                next_id: 1,
                tasks: HashMap::new(),
                teams: Vec::new(),
                script: VecDeque::new(),
                calls: Vec::new(),
                create_echo: CreateEcho::Full,
            })),
        }
    }

    /// Makes the next call fail with `error` without touching any state.
    pub fn fail_next(&self, error: RemoteError) {
        self.state.lock().script.push_back(Script::Fail(error));
    }

    /// Parks the next call until the returned handle is resolved.
    #[must_use]
    pub fn hold_next(&self) -> PendingCall {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        self.state.lock().script.push_back(Script::Hold(HeldCall {
            entered: entered_tx,
            release: release_rx,
        }));
        PendingCall {
            entered: Some(entered_rx),
            release: release_tx,
        }
    }

    /// Chooses how create calls answer.
    pub fn set_create_echo(&self, echo: CreateEcho) {
        self.state.lock().create_echo = echo;
    }

    /// Stores a task directly, bypassing the script and the call log.
    pub fn seed_task(&self, scope: &Scope, task: NewTask) -> TaskRecord {
        let mut state = self.state.lock();
        let id = state.allocate_id();
        let record = TaskRecord {
            id: TaskId::from(id),
            title: task.title,
            status: TaskStatus::Pending,
            description: task.description,
            due: task.due,
            category: task.category,
            assignees: Vec::new(),
        };
        state
            .tasks
            .entry(scope.clone())
            .or_default()
            .insert(0, record.clone());
        record
    }

    /// Creates a team with the given roster, bypassing the script and the
    /// call log.
    pub fn seed_team(&self, name: &str, members: Vec<RosterMember>) -> TeamDetail {
        let mut state = self.state.lock();
        let id = TeamId::from(state.allocate_id());
        let code = state.next_code();
        let detail = TeamDetail {
            id,
            name: name.to_string(),
            members,
        };
        state.teams.push((detail.clone(), code));
        detail
    }

    /// Replaces the roster of a team.
    pub fn set_roster(&self, team_id: &TeamId, members: Vec<RosterMember>) {
        let mut state = self.state.lock();
        if let Ok(detail) = state.team_mut(team_id) {
            detail.members = members;
        }
    }

    /// Join code of a team, if it exists.
    #[must_use]
    pub fn join_code(&self, team_id: &TeamId) -> Option<String> {
        self.state
            .lock()
            .teams
            .iter()
            .find(|(detail, _)| &detail.id == team_id)
            .map(|(_, code)| code.clone())
    }

    /// Current tasks of a scope, newest first.
    #[must_use]
    pub fn tasks(&self, scope: &Scope) -> Vec<TaskRecord> {
        self.state
            .lock()
            .tasks
            .get(scope)
            .cloned()
            .unwrap_or_default()
    }

    /// Every call received so far, in arrival order.
    #[must_use]
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().calls.clone()
    }

    /// Forgets the recorded calls.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Records the call and runs the next scripted step, if any.
    async fn admit(&self, call: RemoteCall) -> Result<(), RemoteError> {
        let script = {
            let mut state = self.state.lock();
            state.calls.push(call);
            state.script.pop_front()
        };
        match script {
            None => Ok(()),
            Some(Script::Fail(error)) => Err(error),
            Some(Script::Hold(held)) => {
                let _ = held.entered.send(());
                held.release.await.unwrap_or_else(|_| {
                    Err(RemoteError::Transport("held call abandoned".to_string()))
                })
            }
        }
    }
}

impl TaskRemote for LoopbackRemote {
    async fn list_tasks(&self, scope: &Scope) -> Result<Vec<TaskRecord>, RemoteError> {
        self.admit(RemoteCall::ListTasks(scope.clone())).await?;
        Ok(self.tasks(scope))
    }

    async fn create_task(
        &self,
        scope: &Scope,
        task: &NewTask,
    ) -> Result<Option<TaskRecord>, RemoteError> {
        self.admit(RemoteCall::CreateTask(scope.clone(), task.clone()))
            .await?;
        if task.title.trim().is_empty() {
            return Err(rejected(422, "Title is required"));
        }
        let mut state = self.state.lock();
        let id = state.allocate_id();
        let record = TaskRecord {
            id: TaskId::from(id),
            title: task.title.clone(),
            status: TaskStatus::Pending,
            description: task.description.clone(),
            due: task.due,
            category: task.category.clone(),
            assignees: Vec::new(),
        };
        state
            .tasks
            .entry(scope.clone())
            .or_default()
            .insert(0, record.clone());
        Ok(match state.create_echo {
            CreateEcho::Full => Some(record),
            CreateEcho::Partial => Some(TaskRecord {
                description: None,
                due: None,
                category: None,
                ..record
            }),
            CreateEcho::Empty => None,
        })
    }

    async fn update_task(
        &self,
        scope: &Scope,
        id: &TaskId,
        patch: &TaskPatch,
    ) -> Result<Option<TaskRecord>, RemoteError> {
        self.admit(RemoteCall::UpdateTask(
            scope.clone(),
            id.clone(),
            patch.clone(),
        ))
        .await?;
        if patch.title.as_ref().is_some_and(|t| t.trim().is_empty()) {
            return Err(rejected(422, "Title is required"));
        }
        let mut state = self.state.lock();
        let record = state.task_mut(scope, id)?;
        apply_patch(record, patch);
        Ok(Some(record.clone()))
    }

    async fn delete_task(&self, scope: &Scope, id: &TaskId) -> Result<(), RemoteError> {
        self.admit(RemoteCall::DeleteTask(scope.clone(), id.clone()))
            .await?;
        let mut state = self.state.lock();
        let list = state
            .tasks
            .get_mut(scope)
            .ok_or_else(|| rejected(404, "Task not found"))?;
        let index = list
            .iter()
            .position(|t| &t.id == id)
            .ok_or_else(|| rejected(404, "Task not found"))?;
        list.remove(index);
        Ok(())
    }

    async fn assign(
        &self,
        team_id: &TeamId,
        task_id: &TaskId,
        member: &IdentityId,
    ) -> Result<(), RemoteError> {
        self.admit(RemoteCall::Assign {
            team_id: team_id.clone(),
            task_id: task_id.clone(),
            member: member.clone(),
        })
        .await?;
        let mut state = self.state.lock();
        let roster_entry = state
            .team_mut(team_id)?
            .members
            .iter()
            .find(|m| &m.identity == member)
            .cloned()
            .ok_or_else(|| rejected(400, "Target user not in team"))?;
        let scope = Scope::Team {
            team_id: team_id.clone(),
        };
        let record = state.task_mut(&scope, task_id)?;
        if !record.assignees.iter().any(|a| &a.identity == member) {
            record.assignees.push(AssigneeRecord {
                identity: roster_entry.identity,
                display_name: roster_entry.display_name,
            });
        }
        Ok(())
    }

    async fn unassign(
        &self,
        team_id: &TeamId,
        task_id: &TaskId,
        member: &IdentityId,
    ) -> Result<(), RemoteError> {
        self.admit(RemoteCall::Unassign {
            team_id: team_id.clone(),
            task_id: task_id.clone(),
            member: member.clone(),
        })
        .await?;
        let mut state = self.state.lock();
        state.team_mut(team_id)?;
        let scope = Scope::Team {
            team_id: team_id.clone(),
        };
        let record = state.task_mut(&scope, task_id)?;
        record.assignees.retain(|a| &a.identity != member);
        Ok(())
    }

    async fn team_detail(&self, team_id: &TeamId) -> Result<TeamDetail, RemoteError> {
        self.admit(RemoteCall::TeamDetail(team_id.clone())).await?;
        let mut state = self.state.lock();
        state.team_mut(team_id).map(|detail| detail.clone())
    }

    async fn list_teams(&self) -> Result<Vec<TeamRecord>, RemoteError> {
        self.admit(RemoteCall::ListTeams).await?;
        let state = self.state.lock();
        let caller = state.caller.id.clone();
        Ok(state
            .teams
            .iter()
            .filter(|(detail, _)| detail.members.iter().any(|m| m.identity == caller))
            .map(|(detail, code)| TeamRecord {
                id: detail.id.clone(),
                name: detail.name.clone(),
                join_code: Some(code.clone()),
            })
            .collect())
    }

    async fn create_team(&self, name: &str) -> Result<TeamRecord, RemoteError> {
        self.admit(RemoteCall::CreateTeam(name.to_string())).await?;
        if name.trim().is_empty() {
            return Err(rejected(422, "Team name is required"));
        }
        let mut state = self.state.lock();
        let id = TeamId::from(state.allocate_id());
        let code = state.next_code();
        let owner = RosterMember {
            identity: state.caller.id.clone(),
            display_name: state.caller.display_name.clone(),
            role: MemberRole::Owner,
        };
        state.teams.push((
            TeamDetail {
                id: id.clone(),
                name: name.to_string(),
                members: vec![owner],
            },
            code.clone(),
        ));
        Ok(TeamRecord {
            id,
            name: name.to_string(),
            join_code: Some(code),
        })
    }

    async fn join_team(&self, code: &JoinCode) -> Result<TeamRecord, RemoteError> {
        self.admit(RemoteCall::JoinTeam(code.clone())).await?;
        let mut state = self.state.lock();
        let caller = RosterMember {
            identity: state.caller.id.clone(),
            display_name: state.caller.display_name.clone(),
            role: MemberRole::Member,
        };
        let (detail, stored) = state
            .teams
            .iter_mut()
            .find(|(_, stored)| code.matches(stored))
            .ok_or_else(|| rejected(404, "Invalid join code"))?;
        if !detail.members.iter().any(|m| m.identity == caller.identity) {
            detail.members.push(caller);
        }
        Ok(TeamRecord {
            id: detail.id.clone(),
            name: detail.name.clone(),
            join_code: Some(stored.clone()),
        })
    }
}
