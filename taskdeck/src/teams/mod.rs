//! Local team membership.
//!
//! The [`MembershipLedger`] keeps the teams this device knows about, who
//! belongs to them, and which one is selected, persisted through a
//! [`LedgerStorage`]. The identity supplied by the sign-in layer is
//! authoritative: the cached user record is overwritten whenever it
//! disagrees.

pub mod codes;
pub mod ledger;
pub mod storage;

pub use ledger::MembershipLedger;
pub use storage::{FileStorage, InMemoryStorage, LedgerStorage, StorageError, StorageKey};

use serde::Deserialize;
use thiserror::Error;

use taskdeck_proto::codec::CodecError;
use taskdeck_proto::team::{JoinCodeError, Team, TeamId};

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// No identity is signed in.
    #[error("not signed in")]
    NoIdentity,
    /// Team name cannot be empty.
    #[error("team name cannot be empty")]
    NameEmpty,
    /// The join code is malformed.
    #[error(transparent)]
    InvalidCode(#[from] JoinCodeError),
    /// No known team uses the join code.
    #[error("no team found for join code {0}")]
    CodeNotFound(String),
    /// The team is not in the ledger.
    #[error("team not found: {0}")]
    TeamNotFound(TeamId),
    /// Only the creator may delete the team.
    #[error("only the creator can delete team {0}")]
    NotCreator(TeamId),
    /// The team has no recorded creator and policy forbids deleting it.
    #[error("team {0} has no recorded creator and cannot be deleted")]
    UnownedTeam(TeamId),
    /// The creator must delete the team instead of leaving.
    #[error("the creator cannot leave team {0}; delete it instead")]
    CreatorCannotLeave(TeamId),
    /// The identity is not a member of the team.
    #[error("not a member of team {0}")]
    NotMember(TeamId),
    /// No unused identifier or join code could be generated.
    #[error("could not generate an unused team identifier or join code")]
    CodeSpaceExhausted,
    /// Persisting failed; the ledger is unchanged.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// A record could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Who may delete a team that has no recorded creator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnownedDeletePolicy {
    /// Any member may delete it.
    #[default]
    AnyMember,
    /// Nobody may delete it.
    Deny,
}

/// Result of joining by code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// A membership was added.
    Joined(Team),
    /// The identity was already a member; nothing was added.
    AlreadyMember(Team),
}

impl JoinOutcome {
    /// The team joined.
    #[must_use]
    pub const fn team(&self) -> &Team {
        match self {
            Self::Joined(team) | Self::AlreadyMember(team) => team,
        }
    }
}

/// How [`MembershipLedger::load`] reconciled the cached user record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySync {
    /// The cached record matched the signed-in identity.
    InSync,
    /// The cached record was missing or stale and has been overwritten.
    Replaced,
    /// No identity is signed in; the cached record was kept as is.
    Unresolved,
}
