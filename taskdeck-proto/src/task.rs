//! Task model, partial updates, and the task payloads exchanged with the
//! remote service.
//!
//! Field names on the wire follow the service's JSON (`"In Progress"` for
//! the in-progress status, `YYYY-MM-DD` for due dates, `userID`/`userName`
//! for assignees).

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

pub use crate::id::{IdentityId, TaskId, TeamId};

/// Maximum allowed task title length in characters (the service's column width).
pub const MAX_TASK_TITLE_LENGTH: usize = 200;

/// Prefix marking identifiers minted on this device before the service confirmed them.
const LOCAL_ID_PREFIX: &str = "local-";

impl TaskId {
    /// Creates a temporary, never-synced task identifier.
    #[must_use]
    pub fn local() -> Self {
        Self::new(format!("{LOCAL_ID_PREFIX}{}", Uuid::now_v7()))
    }

    /// Returns `true` if this identifier was minted locally and has not
    /// been replaced by a server-assigned one.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.as_str().starts_with(LOCAL_ID_PREFIX)
    }
}

/// Status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Not started.
    #[default]
    Pending,
    /// Actively being worked on.
    #[serde(rename = "In Progress")]
    InProgress,
    /// Done.
    Completed,
    /// Past its due date without being completed.
    Overdue,
}

impl TaskStatus {
    /// All statuses, in display order.
    pub const ALL: [Self; 4] = [
        Self::Pending,
        Self::InProgress,
        Self::Completed,
        Self::Overdue,
    ];
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::InProgress => write!(f, "In Progress"),
            Self::Completed => write!(f, "Completed"),
            Self::Overdue => write!(f, "Overdue"),
        }
    }
}

/// Error returned when a status name cannot be parsed.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown task status: {0}")]
pub struct ParseStatusError(String);

impl std::str::FromStr for TaskStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .collect::<String>()
            .to_ascii_lowercase();
        match folded.as_str() {
            "pending" => Ok(Self::Pending),
            "inprogress" => Ok(Self::InProgress),
            "completed" | "done" => Ok(Self::Completed),
            "overdue" => Ok(Self::Overdue),
            _ => Err(ParseStatusError(s.to_string())),
        }
    }
}

/// The partition a task belongs to for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// A personal list owned by one identity.
    Personal {
        /// Owner of the list.
        owner: IdentityId,
    },
    /// A team list.
    Team {
        /// Team the list belongs to.
        team_id: TeamId,
    },
}

impl Scope {
    /// Returns the team ID for team scopes.
    #[must_use]
    pub const fn team_id(&self) -> Option<&TeamId> {
        match self {
            Self::Team { team_id } => Some(team_id),
            Self::Personal { .. } => None,
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Personal { owner } => write!(f, "personal:{owner}"),
            Self::Team { team_id } => write!(f, "team:{team_id}"),
        }
    }
}

/// A member assigned to a task, with display attributes derived from
/// their name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignee {
    /// Identity of the assigned member.
    pub identity: IdentityId,
    /// Member's display name.
    pub display_name: String,
    /// One or two upper-case initials.
    pub initials: String,
    /// Palette color (hex string).
    pub color_tag: String,
}

/// A task as held in the local view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Server-assigned ID, or a local one while creation is pending.
    pub id: TaskId,
    /// Non-empty title.
    pub title: String,
    /// Stored status.
    pub status: TaskStatus,
    /// Optional free-form description.
    pub description: Option<String>,
    /// Optional due date.
    pub due: Option<NaiveDate>,
    /// Optional category label.
    pub category: Option<String>,
    /// Assigned members, unique by identity, in assignment order.
    pub assignees: Vec<Assignee>,
    /// Personal or team scope.
    pub scope: Scope,
}

impl Task {
    /// Returns `true` if `identity` is among the assignees.
    #[must_use]
    pub fn is_assigned(&self, identity: &IdentityId) -> bool {
        self.assignees.iter().any(|a| &a.identity == identity)
    }

    /// Merges every field present in `patch` into this task.
    pub fn apply(&mut self, patch: &TaskPatch) {
        if let Some(title) = &patch.title {
            self.title.clone_from(title);
        }
        if let Some(description) = &patch.description {
            self.description.clone_from(description);
        }
        if let Some(due) = patch.due {
            self.due = due;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(category) = &patch.category {
            self.category.clone_from(category);
        }
    }
}

/// Fields for a task creation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    /// Task title.
    pub title: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional due date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<NaiveDate>,
    /// Optional category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl NewTask {
    /// Creates a request with just a title.
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Deserializes a present field (including `null`) as `Some(..)`, so a
/// missing key and an explicit `null` stay distinguishable.
fn present<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// A partial update. Only fields that are `Some` are sent and applied.
///
/// Optional task fields use a nested `Option`: `Some(None)` clears the
/// field (sent as `null`), `None` leaves it untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    /// New title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New description, or `Some(None)` to clear it.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub description: Option<Option<String>>,
    /// New due date, or `Some(None)` to clear it.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub due: Option<Option<NaiveDate>>,
    /// New status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    /// New category, or `Some(None)` to clear it.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub category: Option<Option<String>>,
}

impl TaskPatch {
    /// A patch that only changes the status.
    #[must_use]
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// A patch that only changes the title.
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// Returns `true` if the patch touches no field.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.due.is_none()
            && self.status.is_none()
            && self.category.is_none()
    }

    /// Captures the current values in `task` of exactly the fields this
    /// patch touches. Applying the result restores those fields.
    #[must_use]
    pub fn capture(&self, task: &Task) -> Self {
        Self {
            title: self.title.as_ref().map(|_| task.title.clone()),
            description: self.description.as_ref().map(|_| task.description.clone()),
            due: self.due.map(|_| task.due),
            status: self.status.map(|_| task.status),
            category: self.category.as_ref().map(|_| task.category.clone()),
        }
    }

    /// Names of the touched fields, in wire order.
    #[must_use]
    pub fn fields(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.title.is_some() {
            names.push("title");
        }
        if self.description.is_some() {
            names.push("description");
        }
        if self.due.is_some() {
            names.push("due");
        }
        if self.status.is_some() {
            names.push("status");
        }
        if self.category.is_some() {
            names.push("category");
        }
        names
    }
}

/// An assignee as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssigneeRecord {
    /// Member identity.
    #[serde(rename = "userID")]
    pub identity: IdentityId,
    /// Member display name.
    #[serde(rename = "userName")]
    pub display_name: String,
}

/// A task as reported by the service.
///
/// Create and update responses may carry only a subset of fields; absent
/// optional fields decode as `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Server-assigned ID.
    pub id: TaskId,
    /// Title.
    pub title: String,
    /// Stored status (service default is pending).
    #[serde(default)]
    pub status: TaskStatus,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Due date.
    #[serde(default)]
    pub due: Option<NaiveDate>,
    /// Category.
    #[serde(default)]
    pub category: Option<String>,
    /// Assignees (team tasks only).
    #[serde(default)]
    pub assignees: Vec<AssigneeRecord>,
}
