//! Team, membership, and roster definitions.
//!
//! [`Team`] and [`Membership`] are the locally persisted ledger records;
//! [`TeamRecord`], [`TeamDetail`], and [`RosterMember`] mirror the remote
//! service's team endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use crate::id::{IdentityId, TeamId};

/// Length of a join code in characters.
pub const JOIN_CODE_LEN: usize = 6;

/// Characters a generated join code is drawn from (no `I`, `O`, `0`, `1`).
pub const JOIN_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Errors produced when parsing a join code.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum JoinCodeError {
    /// The code does not have exactly [`JOIN_CODE_LEN`] characters.
    #[error("join code must be exactly {JOIN_CODE_LEN} characters (got {0})")]
    WrongLength(usize),
}

/// A normalized (trimmed, upper-case) join code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JoinCode(String);

impl JoinCode {
    /// Normalizes user input into a join code.
    ///
    /// # Errors
    ///
    /// Returns [`JoinCodeError::WrongLength`] if the trimmed input is not
    /// exactly [`JOIN_CODE_LEN`] characters long.
    pub fn parse(input: &str) -> Result<Self, JoinCodeError> {
        let normalized = input.trim().to_uppercase();
        let len = normalized.chars().count();
        if len != JOIN_CODE_LEN {
            return Err(JoinCodeError::WrongLength(len));
        }
        Ok(Self(normalized))
    }

    /// Returns the normalized code.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison against a stored code.
    #[must_use]
    pub fn matches(&self, stored: &str) -> bool {
        stored.to_uppercase() == self.0
    }
}

impl std::fmt::Display for JoinCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who may manage a team record.
///
/// Records written before creators were tracked have no creator and are
/// [`OwnershipStatus::Unowned`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnershipStatus {
    /// The team has a recorded creator.
    Owned(IdentityId),
    /// Legacy record without a creator.
    Unowned,
}

/// A team in the local ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    /// Team identifier.
    pub id: TeamId,
    /// Display name.
    pub name: String,
    /// Join code as stored (compare case-insensitively).
    pub code: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Creator, absent on legacy records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator_id: Option<IdentityId>,
}

impl Team {
    /// Ownership of this record.
    #[must_use]
    pub fn ownership(&self) -> OwnershipStatus {
        self.creator_id
            .clone()
            .map_or(OwnershipStatus::Unowned, OwnershipStatus::Owned)
    }

    /// Returns `true` if `identity` is the recorded creator.
    #[must_use]
    pub fn is_creator(&self, identity: &IdentityId) -> bool {
        self.creator_id.as_ref() == Some(identity)
    }
}

/// Membership of one identity in one team.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    /// Member identity.
    pub user_id: IdentityId,
    /// Team joined.
    pub team_id: TeamId,
}

/// A team as listed by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamRecord {
    /// Server-issued team ID.
    #[serde(rename = "teamID")]
    pub id: TeamId,
    /// Team name.
    #[serde(rename = "teamName", default)]
    pub name: String,
    /// Join code, when the service discloses it.
    #[serde(rename = "joinCode", default, skip_serializing_if = "Option::is_none")]
    pub join_code: Option<String>,
}

/// Role of a member on a team roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    /// Team creator.
    Owner,
    /// Regular member.
    Member,
    /// Any role this client does not know about.
    #[serde(other)]
    Unknown,
}

/// One entry of a team roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterMember {
    /// Member identity.
    #[serde(rename = "userID")]
    pub identity: IdentityId,
    /// Member display name.
    #[serde(rename = "userName")]
    pub display_name: String,
    /// Member role.
    pub role: MemberRole,
}

/// A team with its roster, as returned by `GET /api/teams/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamDetail {
    /// Team ID.
    #[serde(rename = "teamID")]
    pub id: TeamId,
    /// Team name.
    #[serde(rename = "teamName")]
    pub name: String,
    /// Roster.
    #[serde(default)]
    pub members: Vec<RosterMember>,
}

/// Body of `POST /api/teams`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTeamRequest {
    /// Name of the new team.
    #[serde(rename = "teamName")]
    pub name: String,
}

/// Body of `POST /api/teams/join`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinTeamRequest {
    /// Code to join with.
    #[serde(rename = "joinCode")]
    pub join_code: JoinCode,
}

/// Body of `POST /api/teams/{id}/tasks/{taskId}/assign`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignRequest {
    /// Member to assign.
    #[serde(rename = "userID")]
    pub identity: IdentityId,
}
