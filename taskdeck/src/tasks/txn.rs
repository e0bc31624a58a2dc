//! Optimistic changes as explicit transaction values.
//!
//! A [`Transaction`] pairs a [`Change`] with the [`Undo`] captured from the
//! list right before the change is applied. Rolling back only touches what
//! the change touched: the fields it patched, the entry it inserted or
//! removed, or the assignee it added or removed. Other changes made to the
//! list in the meantime survive the rollback.

use taskdeck_proto::task::{Assignee, IdentityId, Task, TaskId, TaskPatch};

use super::MutationError;

/// A change to apply to the local task list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Prepend a new task.
    Insert(Task),
    /// Remove a task.
    Remove(TaskId),
    /// Merge a partial update into a task.
    Patch {
        /// Task to patch.
        id: TaskId,
        /// Fields to change.
        patch: TaskPatch,
    },
    /// Append an assignee.
    AddAssignee {
        /// Task to change.
        id: TaskId,
        /// Member to add.
        assignee: Assignee,
    },
    /// Remove an assignee.
    RemoveAssignee {
        /// Task to change.
        id: TaskId,
        /// Member to remove.
        identity: IdentityId,
    },
}

impl Change {
    /// The task this change targets.
    #[must_use]
    pub const fn target(&self) -> &TaskId {
        match self {
            Self::Insert(task) => &task.id,
            Self::Remove(id)
            | Self::Patch { id, .. }
            | Self::AddAssignee { id, .. }
            | Self::RemoveAssignee { id, .. } => id,
        }
    }
}

/// The prior state a [`Change`] displaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Undo {
    /// Remove the inserted task.
    Remove {
        /// Inserted task.
        id: TaskId,
    },
    /// Put a removed task back.
    Reinsert {
        /// The task as it was when removed.
        task: Task,
        /// Its index at removal time.
        index: usize,
        /// The task that preceded it, if any.
        after: Option<TaskId>,
    },
    /// Restore patched fields.
    Fields {
        /// Patched task.
        id: TaskId,
        /// Prior values of exactly the patched fields.
        before: TaskPatch,
    },
    /// Drop an added assignee.
    Unassign {
        /// Task changed.
        id: TaskId,
        /// Member added.
        identity: IdentityId,
    },
    /// Put a removed assignee back at its position.
    Reassign {
        /// Task changed.
        id: TaskId,
        /// The removed assignee.
        assignee: Assignee,
        /// Its index in the assignee list.
        index: usize,
    },
}

/// An optimistic change together with what it takes to revert it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    change: Change,
    before: Undo,
}

fn position(tasks: &[Task], id: &TaskId) -> Option<usize> {
    tasks.iter().position(|t| &t.id == id)
}

fn find<'a>(tasks: &'a [Task], id: &TaskId) -> Result<&'a Task, MutationError> {
    tasks
        .iter()
        .find(|t| &t.id == id)
        .ok_or_else(|| MutationError::TaskNotFound(id.clone()))
}

impl Transaction {
    /// Captures the state `change` will displace from `tasks`.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError::TaskNotFound`] if the change targets a
    /// task that is not in the list, or [`MutationError::NotAssigned`] if
    /// it removes an assignee the task does not have.
    pub fn prepare(tasks: &[Task], change: Change) -> Result<Self, MutationError> {
        let before = match &change {
            Change::Insert(task) => Undo::Remove {
                id: task.id.clone(),
            },
            Change::Remove(id) => {
                let index = position(tasks, id)
                    .ok_or_else(|| MutationError::TaskNotFound(id.clone()))?;
                Undo::Reinsert {
                    task: tasks[index].clone(),
                    index,
                    after: index.checked_sub(1).map(|i| tasks[i].id.clone()),
                }
            }
            Change::Patch { id, patch } => Undo::Fields {
                id: id.clone(),
                before: patch.capture(find(tasks, id)?),
            },
            Change::AddAssignee { id, assignee } => {
                find(tasks, id)?;
                Undo::Unassign {
                    id: id.clone(),
                    identity: assignee.identity.clone(),
                }
            }
            Change::RemoveAssignee { id, identity } => {
                let task = find(tasks, id)?;
                let index = task
                    .assignees
                    .iter()
                    .position(|a| &a.identity == identity)
                    .ok_or_else(|| MutationError::NotAssigned(identity.clone()))?;
                Undo::Reassign {
                    id: id.clone(),
                    assignee: task.assignees[index].clone(),
                    index,
                }
            }
        };
        Ok(Self { change, before })
    }

    /// The change this transaction applies.
    #[must_use]
    pub const fn change(&self) -> &Change {
        &self.change
    }

    /// The captured prior state.
    #[must_use]
    pub const fn before(&self) -> &Undo {
        &self.before
    }

    /// The task this transaction targets.
    #[must_use]
    pub const fn target(&self) -> &TaskId {
        self.change.target()
    }

    /// Applies the change to `tasks`.
    pub fn apply(&self, tasks: &mut Vec<Task>) {
        match &self.change {
            Change::Insert(task) => tasks.insert(0, task.clone()),
            Change::Remove(id) => tasks.retain(|t| &t.id != id),
            Change::Patch { id, patch } => {
                if let Some(task) = tasks.iter_mut().find(|t| &t.id == id) {
                    task.apply(patch);
                }
            }
            Change::AddAssignee { id, assignee } => {
                if let Some(task) = tasks.iter_mut().find(|t| &t.id == id)
                    && !task.is_assigned(&assignee.identity)
                {
                    task.assignees.push(assignee.clone());
                }
            }
            Change::RemoveAssignee { id, identity } => {
                if let Some(task) = tasks.iter_mut().find(|t| &t.id == id) {
                    task.assignees.retain(|a| &a.identity != identity);
                }
            }
        }
    }

    /// Reverts the change in `tasks`.
    ///
    /// A removed task goes back right after the task that preceded it, or
    /// at its old index (clamped) if that neighbour is gone; it is not
    /// duplicated if something already put it back.
    pub fn rollback(&self, tasks: &mut Vec<Task>) {
        match &self.before {
            Undo::Remove { id } => tasks.retain(|t| &t.id != id),
            Undo::Reinsert { task, index, after } => {
                if position(tasks, &task.id).is_some() {
                    return;
                }
                let at = match after {
                    None => 0,
                    Some(prev) => {
                        position(tasks, prev).map_or_else(|| (*index).min(tasks.len()), |p| p + 1)
                    }
                };
                tasks.insert(at, task.clone());
            }
            Undo::Fields { id, before } => {
                if let Some(task) = tasks.iter_mut().find(|t| &t.id == id) {
                    task.apply(before);
                }
            }
            Undo::Unassign { id, identity } => {
                if let Some(task) = tasks.iter_mut().find(|t| &t.id == id) {
                    task.assignees.retain(|a| &a.identity != identity);
                }
            }
            Undo::Reassign {
                id,
                assignee,
                index,
            } => {
                if let Some(task) = tasks.iter_mut().find(|t| &t.id == id)
                    && !task.is_assigned(&assignee.identity)
                {
                    let at = (*index).min(task.assignees.len());
                    task.assignees.insert(at, assignee.clone());
                }
            }
        }
    }
}
