//! Status cycling, overdue derivation, and list filtering.

use chrono::NaiveDate;

use taskdeck_proto::task::{Task, TaskStatus};

/// Next status in the cycle `Pending -> InProgress -> Completed -> Pending`.
///
/// `Overdue` is never produced; it cycles like `Pending`.
#[must_use]
pub const fn next(status: TaskStatus) -> TaskStatus {
    match status {
        TaskStatus::Pending | TaskStatus::Overdue => TaskStatus::InProgress,
        TaskStatus::InProgress => TaskStatus::Completed,
        TaskStatus::Completed => TaskStatus::Pending,
    }
}

/// Status to display for `task` on `today`.
///
/// A task past its due date that is not completed shows as `Overdue`. The
/// stored status is never changed by this.
#[must_use]
pub fn effective_status(task: &Task, today: NaiveDate) -> TaskStatus {
    match task.due {
        Some(due) if due < today && task.status != TaskStatus::Completed => TaskStatus::Overdue,
        _ => task.status,
    }
}

/// Filter over a task list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    /// Keep only tasks whose effective status equals this.
    pub status: Option<TaskStatus>,
    /// Keep only tasks whose title contains this, ignoring case.
    pub query: Option<String>,
}

impl TaskFilter {
    /// Returns `true` if `task` passes the filter on `today`.
    #[must_use]
    pub fn matches(&self, task: &Task, today: NaiveDate) -> bool {
        if let Some(status) = self.status
            && effective_status(task, today) != status
        {
            return false;
        }
        match self.query.as_deref().map(str::trim) {
            Some(query) if !query.is_empty() => task
                .title
                .to_lowercase()
                .contains(&query.to_lowercase()),
            _ => true,
        }
    }

    /// Tasks that pass the filter, in list order.
    #[must_use]
    pub fn apply<'a>(&self, tasks: &'a [Task], today: NaiveDate) -> Vec<&'a Task> {
        tasks.iter().filter(|t| self.matches(t, today)).collect()
    }
}
