//! Session state shared between the remote client, the task store, and the
//! team ledger.
//!
//! [`AuthSession`] holds the signed-in [`Identity`] and the session
//! credential the service issued for it. Consumers only see it through the
//! [`IdentityProvider`] trait, so tests can hand in a fixed identity.
//!
//! A [`SessionGate`] is carried alongside: when the service reports that
//! the credential has expired, the gate is suspended and every further
//! mutation attempt fails fast until a new sign-in resumes it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use taskdeck_proto::auth::Identity;

/// Errors reported by the sign-in endpoints.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The service refused the request (wrong password, name taken).
    #[error("{0}")]
    Rejected(String),

    /// The request never produced a usable response.
    #[error("transport failure: {0}")]
    Transport(String),

    /// A successful sign-in response carried no session cookie.
    #[error("sign-in response carried no session cookie")]
    MissingSession,
}

/// Session credential sent to the service with every request.
///
/// Holds the `name=value` pair of the session cookie. The value is never
/// printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    /// Wraps a `name=value` cookie pair.
    pub fn new(pair: impl Into<String>) -> Self {
        Self(pair.into())
    }

    /// Extracts the cookie pair from a `Set-Cookie` header value.
    ///
    /// Returns `None` if the header carries no `name=value` pair.
    #[must_use]
    pub fn from_set_cookie(header: &str) -> Option<Self> {
        let pair = header.split(';').next()?.trim();
        let (name, _) = pair.split_once('=')?;
        if name.trim().is_empty() {
            return None;
        }
        Some(Self(pair.to_string()))
    }

    /// Returns the value to send in a `Cookie` header.
    #[must_use]
    pub fn header_value(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = self.0.split('=').next().unwrap_or_default();
        write!(f, "SessionToken({name}=<redacted>)")
    }
}

/// Flag that blocks mutations while re-authentication is pending.
///
/// Cloning yields a handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct SessionGate {
    suspended: Arc<AtomicBool>,
}

impl SessionGate {
    /// Creates an open gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Suspends mutations. Returns `true` if the gate was open before.
    pub fn suspend(&self) -> bool {
        !self.suspended.swap(true, Ordering::SeqCst)
    }

    /// Re-opens the gate after a successful sign-in.
    pub fn resume(&self) {
        self.suspended.store(false, Ordering::SeqCst);
    }

    /// Returns `true` while mutations are suspended.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }
}

/// Source of the current identity and its credential.
pub trait IdentityProvider: Send + Sync {
    /// The signed-in identity, if any.
    fn identity(&self) -> Option<Identity>;

    /// The credential to attach to remote calls, if any.
    fn credential(&self) -> Option<SessionToken>;

    /// The gate that suspends mutations after an authentication failure.
    fn gate(&self) -> &SessionGate;
}

#[derive(Debug, Default)]
struct SessionState {
    identity: Option<Identity>,
    token: Option<SessionToken>,
}

/// Shared, cloneable session handle.
#[derive(Debug, Clone, Default)]
pub struct AuthSession {
    state: Arc<RwLock<SessionState>>,
    gate: SessionGate,
}

impl AuthSession {
    /// Creates a signed-out session with an open gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a session that is already signed in.
    #[must_use]
    pub fn signed_in(identity: Identity, token: SessionToken) -> Self {
        let session = Self::new();
        session.establish(identity, token);
        session
    }

    /// Records a successful sign-in and resumes the gate.
    pub fn establish(&self, identity: Identity, token: SessionToken) {
        {
            let mut state = self.state.write();
            state.identity = Some(identity);
            state.token = Some(token);
        }
        self.gate.resume();
    }

    /// Updates the identity without touching the credential.
    pub fn set_identity(&self, identity: Identity) {
        self.state.write().identity = Some(identity);
    }

    /// Drops identity and credential, and suspends the gate.
    pub fn clear(&self) {
        {
            let mut state = self.state.write();
            state.identity = None;
            state.token = None;
        }
        self.gate.suspend();
    }
}

impl IdentityProvider for AuthSession {
    fn identity(&self) -> Option<Identity> {
        self.state.read().identity.clone()
    }

    fn credential(&self) -> Option<SessionToken> {
        self.state.read().token.clone()
    }

    fn gate(&self) -> &SessionGate {
        &self.gate
    }
}
