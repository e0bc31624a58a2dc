//! Identity and authentication payloads.

use serde::{Deserialize, Serialize};

pub use crate::id::IdentityId;

/// An authenticated user as asserted by the auth endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// User ID.
    #[serde(rename = "userID", alias = "userId")]
    pub id: IdentityId,
    /// Display name.
    #[serde(rename = "userName")]
    pub display_name: String,
}

/// The signed-in user as persisted by the local membership ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalUser {
    /// Identity the ledger acts as.
    pub id: IdentityId,
    /// Display name.
    pub name: String,
    /// Initials derived from the name.
    pub initials: String,
}

/// Body of `POST /api/auth/login` and `POST /api/auth/register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Account name.
    #[serde(rename = "userName")]
    pub user_name: String,
    /// Account password.
    pub password: String,
}

/// Response of the login and register endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    /// The signed-in user.
    pub user: Identity,
}

/// Error body returned by the service on non-success responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable reason.
    pub detail: String,
}
