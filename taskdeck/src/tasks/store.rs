//! The optimistic mutation store.
//!
//! Every mutation runs in three steps:
//! 1. Under the state lock: validate, capture a [`Transaction`], apply it,
//!    publish a snapshot. Nothing awaits while the lock is held.
//! 2. Call the remote service.
//! 3. Under the lock again: keep the change (reconciling server-canonical
//!    fields) or roll back exactly what step 1 touched, publish, and emit a
//!    [`StoreEvent`].
//!
//! Mutations are not serialized. Loading a scope bumps a generation
//! counter; a mutation that resolves under another generation is dropped
//! without commit or rollback. Dropping a mutation future before it
//! resolves rolls its change back.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use taskdeck_proto::task::{
    NewTask, Scope, Task, TaskId, TaskPatch, TaskRecord, TaskStatus, TeamId,
};
use taskdeck_proto::team::RosterMember;

use super::txn::{Change, Transaction};
use super::{
    CreateReconcile, MutationError, MutationKind, StoreConfig, StoreEvent, palette, status,
};
use crate::auth::IdentityProvider;
use crate::remote::{RemoteError, TaskRemote};

/// Immutable view of the list, published after every change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSnapshot {
    /// Loaded scope.
    pub scope: Option<Scope>,
    /// Increases with every publication.
    pub version: u64,
    /// Tasks in display order.
    pub tasks: Arc<[Task]>,
}

/// Result of a successful create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The temporary entry now carries the server ID.
    Confirmed(TaskId),
    /// The service confirmed without a usable record, or the store is set
    /// to reload; the list was reloaded.
    Reloaded,
    /// The service stored the task but the list could not be reloaded.
    /// The temporary entry was removed; the task shows up on the next
    /// successful reload.
    Unreconciled(MutationError),
    /// The scope changed before the service answered.
    ScopeChanged,
}

/// Builds a local task from a service record.
pub(crate) fn task_from_record(record: TaskRecord, scope: &Scope) -> Task {
    Task {
        id: record.id,
        title: record.title,
        status: record.status,
        description: record.description,
        due: record.due,
        category: record.category,
        assignees: record
            .assignees
            .into_iter()
            .map(|a| palette::decorate(a.identity, &a.display_name))
            .collect(),
        scope: scope.clone(),
    }
}

pub(super) struct StoreState {
    pub(super) scope: Option<Scope>,
    pub(super) generation: u64,
    pub(super) tasks: Vec<Task>,
    pub(super) roster: Vec<RosterMember>,
    version: u64,
}

impl StoreState {
    pub(super) fn task(&self, id: &TaskId) -> Result<&Task, MutationError> {
        self.tasks
            .iter()
            .find(|t| &t.id == id)
            .ok_or_else(|| MutationError::TaskNotFound(id.clone()))
    }
}

pub(super) struct Shared {
    pub(super) state: Mutex<StoreState>,
    snapshots: watch::Sender<TaskSnapshot>,
}

impl Shared {
    pub(super) fn publish(&self, state: &mut StoreState) {
        state.version += 1;
        self.snapshots.send_replace(TaskSnapshot {
            scope: state.scope.clone(),
            version: state.version,
            tasks: state.tasks.clone().into(),
        });
    }

    /// Rolls `txn` back if the scope is still the one it was applied to.
    fn revert(&self, txn: &Transaction, generation: u64) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation {
            return false;
        }
        txn.rollback(&mut state.tasks);
        self.publish(&mut state);
        true
    }
}

/// An applied change awaiting the remote outcome.
///
/// Dropped unresolved, it rolls the change back.
pub(super) struct InFlight<'a> {
    shared: &'a Shared,
    txn: Option<Transaction>,
    generation: u64,
    kind: MutationKind,
    target: TaskId,
}

impl InFlight<'_> {
    /// Keeps the change. Returns `false` if the scope changed meanwhile.
    fn commit(mut self) -> bool {
        self.txn = None;
        self.shared.state.lock().generation == self.generation
    }

    /// Reverts the change. Returns `false` if the scope changed meanwhile.
    fn rollback(mut self) -> bool {
        self.txn
            .take()
            .is_some_and(|txn| self.shared.revert(&txn, self.generation))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(txn) = self.txn.take() {
            tracing::warn!(
                task_id = %self.target,
                kind = %self.kind,
                "mutation abandoned before the service answered; rolling back"
            );
            self.shared.revert(&txn, self.generation);
        }
    }
}

/// Holds the active scope's tasks and applies mutations optimistically.
pub struct MutationStore<R: TaskRemote, I: IdentityProvider> {
    /// Remote service.
    pub(super) remote: R,
    /// Identity and session gate.
    pub(super) identity: I,
    /// Settings.
    config: StoreConfig,
    /// List state and snapshot publisher.
    pub(super) shared: Shared,
    /// Channel for emitting store events to the presentation layer.
    event_tx: mpsc::Sender<StoreEvent>,
}

impl<R: TaskRemote, I: IdentityProvider> MutationStore<R, I> {
    /// Creates an empty store with no scope loaded.
    ///
    /// Returns the store and a receiver for [`StoreEvent`]s.
    pub fn new(remote: R, identity: I, config: StoreConfig) -> (Self, mpsc::Receiver<StoreEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));
        let (snapshots, _) = watch::channel(TaskSnapshot {
            scope: None,
            version: 0,
            tasks: Arc::from(Vec::new()),
        });
        let store = Self {
            remote,
            identity,
            config,
            shared: Shared {
                state: Mutex::new(StoreState {
                    scope: None,
                    generation: 0,
                    tasks: Vec::new(),
                    roster: Vec::new(),
                    version: 0,
                }),
                snapshots,
            },
            event_tx,
        };
        (store, event_rx)
    }

    /// Subscribes to snapshots. The receiver sees the current one first.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TaskSnapshot> {
        self.shared.snapshots.subscribe()
    }

    /// The latest snapshot.
    #[must_use]
    pub fn snapshot(&self) -> TaskSnapshot {
        self.shared.snapshots.borrow().clone()
    }

    /// Tasks currently visible, in display order.
    #[must_use]
    pub fn tasks(&self) -> Vec<Task> {
        self.shared.state.lock().tasks.clone()
    }

    /// A task currently visible.
    #[must_use]
    pub fn task(&self, id: &TaskId) -> Option<Task> {
        self.shared.state.lock().task(id).ok().cloned()
    }

    /// The loaded scope.
    #[must_use]
    pub fn scope(&self) -> Option<Scope> {
        self.shared.state.lock().scope.clone()
    }

    /// The remote service this store talks to.
    #[must_use]
    pub const fn remote(&self) -> &R {
        &self.remote
    }

    // -----------------------------------------------------------------------
    // Scope loading
    // -----------------------------------------------------------------------

    /// Makes `scope` the active scope and loads its tasks.
    ///
    /// Mutations still in flight for the previous scope are dropped when
    /// they resolve.
    ///
    /// # Errors
    ///
    /// Returns the classified remote error if the list cannot be fetched;
    /// the scope stays selected with an empty list.
    pub async fn load_scope(&self, scope: Scope) -> Result<usize, MutationError> {
        {
            let mut state = self.shared.state.lock();
            state.generation += 1;
            state.scope = Some(scope.clone());
            state.tasks.clear();
            state.roster.clear();
            self.shared.publish(&mut state);
        }
        tracing::info!(%scope, "scope loaded");
        self.reload().await
    }

    /// Loads the signed-in identity's personal tasks.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError::NotSignedIn`] without an identity, else as
    /// [`load_scope`](Self::load_scope).
    pub async fn load_personal(&self) -> Result<usize, MutationError> {
        let identity = self
            .identity
            .identity()
            .ok_or(MutationError::NotSignedIn)?;
        self.load_scope(Scope::Personal { owner: identity.id })
            .await
    }

    /// Loads a team's tasks.
    ///
    /// # Errors
    ///
    /// As [`load_scope`](Self::load_scope).
    pub async fn load_team(&self, team_id: TeamId) -> Result<usize, MutationError> {
        self.load_scope(Scope::Team { team_id }).await
    }

    /// Replaces the list with the service's copy.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError::NoScope`] if nothing is loaded, or the
    /// classified remote error; the list is left as it was.
    pub async fn reload(&self) -> Result<usize, MutationError> {
        let (scope, generation) = {
            let state = self.shared.state.lock();
            let scope = state.scope.clone().ok_or(MutationError::NoScope)?;
            (scope, state.generation)
        };
        let records = match self.remote.list_tasks(&scope).await {
            Ok(records) => records,
            Err(err) => {
                let error = MutationError::from(err);
                tracing::warn!(%scope, error = %error, "reload failed");
                if error == MutationError::AuthenticationExpired {
                    self.expire_session();
                }
                return Err(error);
            }
        };
        let count = records.len();
        {
            let mut state = self.shared.state.lock();
            if state.generation != generation {
                tracing::info!(%scope, "scope changed during reload; discarding result");
                return Ok(count);
            }
            state.tasks = records
                .into_iter()
                .map(|r| task_from_record(r, &scope))
                .collect();
            self.shared.publish(&mut state);
        }
        tracing::debug!(%scope, count, "list reloaded");
        self.emit(StoreEvent::Reloaded { scope, count });
        Ok(count)
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Adds a task. It appears at the top of the list immediately, under a
    /// temporary ID, as `Pending`.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError::TitleEmpty`] or
    /// [`MutationError::TitleTooLong`] for an invalid title,
    /// [`MutationError::Suspended`] or [`MutationError::NoScope`] if no
    /// change can be made, or the classified remote error after the
    /// temporary entry has been removed. A reload that fails after the
    /// service stored the task is reported as
    /// [`CreateOutcome::Unreconciled`], not as an error.
    pub async fn create(&self, fields: NewTask) -> Result<CreateOutcome, MutationError> {
        self.validate_title(&fields.title)?;
        let temp_id = TaskId::local();
        let (scope, flight) = self.begin(MutationKind::Create, |_, scope| {
            Ok(Change::Insert(Task {
                id: temp_id.clone(),
                title: fields.title.clone(),
                status: TaskStatus::Pending,
                description: fields.description.clone(),
                due: fields.due,
                category: fields.category.clone(),
                assignees: Vec::new(),
                scope: scope.clone(),
            }))
        })?;
        let outcome = self.remote.create_task(&scope, &fields).await;
        let Some(record) = self.settle(flight, outcome)? else {
            return Ok(CreateOutcome::ScopeChanged);
        };
        match (self.config.create_reconcile, record) {
            (CreateReconcile::Merge, Some(record)) => {
                let id = record.id.clone();
                self.merge_created(&temp_id, record);
                tracing::debug!(task_id = %id, temp_id = %temp_id, "create reconciled");
                self.emit(StoreEvent::Confirmed {
                    kind: MutationKind::Create,
                    task_id: id.clone(),
                });
                Ok(CreateOutcome::Confirmed(id))
            }
            _ => match self.reload().await {
                Ok(_) => Ok(CreateOutcome::Reloaded),
                Err(error) => {
                    self.drop_temporary(&temp_id);
                    tracing::warn!(
                        temp_id = %temp_id,
                        error = %error,
                        "created task not reloaded"
                    );
                    Ok(CreateOutcome::Unreconciled(error))
                }
            },
        }
    }

    /// Advances a task's status one step through the cycle.
    ///
    /// Returns the new status.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError::Unconfirmed`] for a task still being
    /// created, [`MutationError::TaskNotFound`] if it is not listed, or the
    /// classified remote error after the prior status has been restored.
    pub async fn cycle_status(&self, id: &TaskId) -> Result<TaskStatus, MutationError> {
        Self::ensure_confirmed(id)?;
        let mut target = TaskStatus::Pending;
        let (scope, flight) = self.begin(MutationKind::CycleStatus, |state, _| {
            target = status::next(state.task(id)?.status);
            Ok(Change::Patch {
                id: id.clone(),
                patch: TaskPatch::status(target),
            })
        })?;
        let patch = TaskPatch::status(target);
        let outcome = self.remote.update_task(&scope, id, &patch).await;
        if let Some(record) = self.settle(flight, outcome)? {
            self.reconcile_fields(id, &patch, record);
        }
        Ok(target)
    }

    /// Changes the fields present in `patch`. Only those fields are sent.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError::EmptyPatch`] for a patch that changes
    /// nothing, a title error for an invalid new title,
    /// [`MutationError::Unconfirmed`] or [`MutationError::TaskNotFound`] for
    /// an unaddressable task, or the classified remote error after the
    /// touched fields have been restored.
    pub async fn edit_fields(&self, id: &TaskId, patch: TaskPatch) -> Result<(), MutationError> {
        if patch.is_empty() {
            return Err(MutationError::EmptyPatch);
        }
        if let Some(title) = &patch.title {
            self.validate_title(title)?;
        }
        Self::ensure_confirmed(id)?;
        let (scope, flight) = self.begin(MutationKind::Edit, |_, _| {
            Ok(Change::Patch {
                id: id.clone(),
                patch: patch.clone(),
            })
        })?;
        let outcome = self.remote.update_task(&scope, id, &patch).await;
        if let Some(record) = self.settle(flight, outcome)? {
            self.reconcile_fields(id, &patch, record);
        }
        Ok(())
    }

    /// Removes a task.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError::Unconfirmed`] or
    /// [`MutationError::TaskNotFound`] for an unaddressable task, or the
    /// classified remote error after the task has been put back in place.
    pub async fn delete(&self, id: &TaskId) -> Result<(), MutationError> {
        Self::ensure_confirmed(id)?;
        let (scope, flight) =
            self.begin(MutationKind::Delete, |_, _| Ok(Change::Remove(id.clone())))?;
        let outcome = self.remote.delete_task(&scope, id).await;
        self.settle(flight, outcome)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Mutation plumbing
    // -----------------------------------------------------------------------

    fn validate_title(&self, title: &str) -> Result<(), MutationError> {
        if title.trim().is_empty() {
            return Err(MutationError::TitleEmpty);
        }
        if title.chars().count() > self.config.max_title_len {
            return Err(MutationError::TitleTooLong {
                max: self.config.max_title_len,
            });
        }
        Ok(())
    }

    pub(super) fn ensure_confirmed(id: &TaskId) -> Result<(), MutationError> {
        if id.is_local() {
            return Err(MutationError::Unconfirmed(id.clone()));
        }
        Ok(())
    }

    /// Validates, captures, and applies a change in one critical section.
    pub(super) fn begin(
        &self,
        kind: MutationKind,
        prepare: impl FnOnce(&StoreState, &Scope) -> Result<Change, MutationError>,
    ) -> Result<(Scope, InFlight<'_>), MutationError> {
        if self.identity.gate().is_suspended() {
            return Err(MutationError::Suspended);
        }
        let mut state = self.shared.state.lock();
        let scope = state.scope.clone().ok_or(MutationError::NoScope)?;
        let change = prepare(&*state, &scope)?;
        let txn = Transaction::prepare(&state.tasks, change)?;
        txn.apply(&mut state.tasks);
        let generation = state.generation;
        self.shared.publish(&mut state);
        drop(state);

        let target = txn.target().clone();
        tracing::debug!(task_id = %target, %kind, %scope, "optimistic change applied");
        Ok((
            scope,
            InFlight {
                shared: &self.shared,
                txn: Some(txn),
                generation,
                kind,
                target,
            },
        ))
    }

    /// Commits or rolls back according to the remote outcome.
    ///
    /// Returns `Ok(None)` if the scope changed before the outcome arrived.
    pub(super) fn settle<T>(
        &self,
        flight: InFlight<'_>,
        outcome: Result<T, RemoteError>,
    ) -> Result<Option<T>, MutationError> {
        let kind = flight.kind;
        let task_id = flight.target.clone();
        match outcome {
            Ok(value) => {
                if !flight.commit() {
                    tracing::info!(task_id = %task_id, %kind, "scope changed; confirmation dropped");
                    return Ok(None);
                }
                tracing::debug!(task_id = %task_id, %kind, "change confirmed");
                if kind != MutationKind::Create {
                    self.emit(StoreEvent::Confirmed { kind, task_id });
                }
                Ok(Some(value))
            }
            Err(err) => {
                let error = MutationError::from(err);
                if flight.rollback() {
                    tracing::warn!(task_id = %task_id, %kind, error = %error, "change rolled back");
                    self.emit(StoreEvent::RolledBack {
                        kind,
                        task_id,
                        error: error.clone(),
                    });
                } else {
                    tracing::info!(task_id = %task_id, %kind, error = %error, "scope changed; rollback dropped");
                }
                if error == MutationError::AuthenticationExpired {
                    self.expire_session();
                }
                Err(error)
            }
        }
    }

    /// Replaces the temporary entry's ID and fields with the service's.
    fn drop_temporary(&self, temp_id: &TaskId) {
        let mut state = self.shared.state.lock();
        let before = state.tasks.len();
        state.tasks.retain(|t| &t.id != temp_id);
        if state.tasks.len() != before {
            self.shared.publish(&mut state);
        }
    }

    fn merge_created(&self, temp_id: &TaskId, record: TaskRecord) {
        let mut state = self.shared.state.lock();
        if state.tasks.iter().any(|t| t.id == record.id) {
            // A reload already listed the confirmed task.
            state.tasks.retain(|t| &t.id != temp_id);
        } else if let Some(task) = state.tasks.iter_mut().find(|t| &t.id == temp_id) {
            task.id = record.id;
            task.title = record.title;
            task.status = record.status;
            if record.description.is_some() {
                task.description = record.description;
            }
            if record.due.is_some() {
                task.due = record.due;
            }
            if record.category.is_some() {
                task.category = record.category;
            }
            if !record.assignees.is_empty() {
                task.assignees = record
                    .assignees
                    .into_iter()
                    .map(|a| palette::decorate(a.identity, &a.display_name))
                    .collect();
            }
        }
        self.shared.publish(&mut state);
    }

    /// Applies server-canonical values for the fields `sent` touched, where
    /// the service stored something other than what was sent.
    fn reconcile_fields(&self, id: &TaskId, sent: &TaskPatch, record: Option<TaskRecord>) {
        let Some(record) = record else {
            return;
        };
        let mut canonical = TaskPatch::default();
        if sent.title.as_ref().is_some_and(|t| *t != record.title) {
            canonical.title = Some(record.title);
        }
        if sent.status.is_some_and(|s| s != record.status) {
            canonical.status = Some(record.status);
        }
        if sent.description.is_some()
            && record.description.is_some()
            && sent.description.as_ref() != Some(&record.description)
        {
            canonical.description = Some(record.description);
        }
        if sent.due.is_some() && record.due.is_some() && sent.due != Some(record.due) {
            canonical.due = Some(record.due);
        }
        if sent.category.is_some()
            && record.category.is_some()
            && sent.category.as_ref() != Some(&record.category)
        {
            canonical.category = Some(record.category);
        }
        if canonical.is_empty() {
            return;
        }
        let mut state = self.shared.state.lock();
        if let Some(task) = state.tasks.iter_mut().find(|t| &t.id == id) {
            tracing::debug!(task_id = %id, fields = ?canonical.fields(), "applying canonical fields");
            task.apply(&canonical);
            self.shared.publish(&mut state);
        }
    }

    pub(super) fn expire_session(&self) {
        if self.identity.gate().suspend() {
            tracing::warn!("authentication expired; changes suspended until sign-in");
            self.emit(StoreEvent::AuthenticationExpired);
        }
    }

    pub(super) fn emit(&self, event: StoreEvent) {
        let _ = self.event_tx.try_send(event);
    }
}
