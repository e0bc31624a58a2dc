//! HTTP implementation of [`TaskRemote`] and the sign-in client.
//!
//! Bodies are JSON encoded with [`taskdeck_proto::codec`]. Every task and
//! team call carries the session cookie taken from the injected
//! [`IdentityProvider`]; a call made without one fails with
//! [`RemoteError::AuthenticationExpired`] before touching the network.
//! Timeouts are enforced by the underlying `reqwest` client.

use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use reqwest::{Client, Method};
use url::Url;

use taskdeck_proto::auth::{AuthResponse, Credentials, Identity};
use taskdeck_proto::codec;
use taskdeck_proto::task::{IdentityId, NewTask, Scope, TaskId, TaskPatch, TaskRecord};
use taskdeck_proto::team::{
    AssignRequest, CreateTeamRequest, JoinCode, JoinTeamRequest, TeamDetail, TeamId, TeamRecord,
};

use super::{RemoteError, TaskRemote, detail_of};
use crate::auth::{AuthError, AuthSession, IdentityProvider, SessionToken};

/// Builds the shared HTTP client with the transport-level timeout.
///
/// # Errors
///
/// Returns [`RemoteError::Transport`] if the TLS backend cannot be
/// initialized.
pub fn build_client(timeout: Duration) -> Result<Client, RemoteError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| RemoteError::Transport(format!("failed to build HTTP client: {e}")))
}

/// A response with its status, session cookie, and raw body.
struct RawResponse {
    status: u16,
    session: Option<SessionToken>,
    body: Vec<u8>,
}

impl RawResponse {
    const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, RemoteError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| RemoteError::Transport(format!("API base {base} cannot carry a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn scope_segments(scope: &Scope) -> Vec<&str> {
    match scope {
        Scope::Personal { .. } => vec!["api", "tasks"],
        Scope::Team { team_id } => vec!["api", "teams", team_id.as_str(), "tasks"],
    }
}

fn transport_error(err: &reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Transport("request timed out".to_string())
    } else if err.is_connect() {
        RemoteError::Transport(format!("connection failed: {err}"))
    } else {
        RemoteError::Transport(err.to_string())
    }
}

async fn execute(
    client: &Client,
    method: Method,
    url: Url,
    session: Option<&SessionToken>,
    body: Option<Vec<u8>>,
) -> Result<RawResponse, RemoteError> {
    tracing::trace!(%method, %url, "remote request");
    let mut request = client.request(method, url);
    if let Some(token) = session {
        request = request.header(COOKIE, token.header_value());
    }
    if let Some(body) = body {
        request = request.header(CONTENT_TYPE, "application/json").body(body);
    }
    let response = request.send().await.map_err(|e| transport_error(&e))?;
    let status = response.status().as_u16();
    let session = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(SessionToken::from_set_cookie);
    let body = response
        .bytes()
        .await
        .map_err(|e| transport_error(&e))?
        .to_vec();
    Ok(RawResponse {
        status,
        session,
        body,
    })
}

/// [`TaskRemote`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRemote<I: IdentityProvider> {
    client: Client,
    base: Url,
    identity: I,
}

impl<I: IdentityProvider> HttpRemote<I> {
    /// Creates a remote rooted at `base` (e.g. `http://localhost:8000`).
    pub const fn new(client: Client, base: Url, identity: I) -> Self {
        Self {
            client,
            base,
            identity,
        }
    }

    /// Sends an authenticated request and returns the success body.
    async fn call(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<Vec<u8>>,
    ) -> Result<Vec<u8>, RemoteError> {
        let token = self
            .identity
            .credential()
            .ok_or(RemoteError::AuthenticationExpired)?;
        let url = endpoint(&self.base, segments)?;
        let response = execute(&self.client, method, url, Some(&token), body).await?;
        if response.is_success() {
            Ok(response.body)
        } else {
            let err = RemoteError::from_status(response.status, &response.body);
            tracing::debug!(status = response.status, error = %err, "remote call refused");
            Err(err)
        }
    }
}

impl<I: IdentityProvider> TaskRemote for HttpRemote<I> {
    async fn list_tasks(&self, scope: &Scope) -> Result<Vec<TaskRecord>, RemoteError> {
        let body = self.call(Method::GET, &scope_segments(scope), None).await?;
        Ok(codec::decode(&body)?)
    }

    async fn create_task(
        &self,
        scope: &Scope,
        task: &NewTask,
    ) -> Result<Option<TaskRecord>, RemoteError> {
        let payload = codec::encode(task)?;
        let body = self
            .call(Method::POST, &scope_segments(scope), Some(payload))
            .await?;
        Ok(codec::decode_optional(&body)?)
    }

    async fn update_task(
        &self,
        scope: &Scope,
        id: &TaskId,
        patch: &TaskPatch,
    ) -> Result<Option<TaskRecord>, RemoteError> {
        let mut segments = scope_segments(scope);
        segments.push(id.as_str());
        let payload = codec::encode(patch)?;
        let body = self.call(Method::PATCH, &segments, Some(payload)).await?;
        Ok(codec::decode_optional(&body)?)
    }

    async fn delete_task(&self, scope: &Scope, id: &TaskId) -> Result<(), RemoteError> {
        let mut segments = scope_segments(scope);
        segments.push(id.as_str());
        self.call(Method::DELETE, &segments, None).await?;
        Ok(())
    }

    async fn assign(
        &self,
        team_id: &TeamId,
        task_id: &TaskId,
        member: &IdentityId,
    ) -> Result<(), RemoteError> {
        let payload = codec::encode(&AssignRequest {
            identity: member.clone(),
        })?;
        let segments = [
            "api",
            "teams",
            team_id.as_str(),
            "tasks",
            task_id.as_str(),
            "assign",
        ];
        self.call(Method::POST, &segments, Some(payload)).await?;
        Ok(())
    }

    async fn unassign(
        &self,
        team_id: &TeamId,
        task_id: &TaskId,
        member: &IdentityId,
    ) -> Result<(), RemoteError> {
        let segments = [
            "api",
            "teams",
            team_id.as_str(),
            "tasks",
            task_id.as_str(),
            "assign",
            member.as_str(),
        ];
        self.call(Method::DELETE, &segments, None).await?;
        Ok(())
    }

    async fn team_detail(&self, team_id: &TeamId) -> Result<TeamDetail, RemoteError> {
        let body = self
            .call(Method::GET, &["api", "teams", team_id.as_str()], None)
            .await?;
        Ok(codec::decode(&body)?)
    }

    async fn list_teams(&self) -> Result<Vec<TeamRecord>, RemoteError> {
        let body = self.call(Method::GET, &["api", "teams"], None).await?;
        Ok(codec::decode(&body)?)
    }

    async fn create_team(&self, name: &str) -> Result<TeamRecord, RemoteError> {
        let payload = codec::encode(&CreateTeamRequest {
            name: name.to_string(),
        })?;
        let body = self
            .call(Method::POST, &["api", "teams"], Some(payload))
            .await?;
        let mut record: TeamRecord = codec::decode(&body)?;
        if record.name.is_empty() {
            record.name = name.to_string();
        }
        Ok(record)
    }

    async fn join_team(&self, code: &JoinCode) -> Result<TeamRecord, RemoteError> {
        let payload = codec::encode(&JoinTeamRequest {
            join_code: code.clone(),
        })?;
        let body = self
            .call(Method::POST, &["api", "teams", "join"], Some(payload))
            .await?;
        Ok(codec::decode(&body)?)
    }
}

// ---------------------------------------------------------------------------
// Sign-in client
// ---------------------------------------------------------------------------

fn auth_transport(err: RemoteError) -> AuthError {
    AuthError::Transport(err.to_string())
}

fn auth_rejection(status: u16, body: &[u8]) -> AuthError {
    AuthError::Rejected(detail_of(body).unwrap_or_else(|| format!("request rejected ({status})")))
}

/// Client for the `/api/auth` endpoints.
///
/// Successful sign-ins are recorded in the shared [`AuthSession`], which
/// the task remote, the store, and the ledger read from.
#[derive(Debug, Clone)]
pub struct HttpAuthClient {
    client: Client,
    base: Url,
    session: AuthSession,
}

impl HttpAuthClient {
    /// Creates a sign-in client that records into `session`.
    pub const fn new(client: Client, base: Url, session: AuthSession) -> Self {
        Self {
            client,
            base,
            session,
        }
    }

    /// The session this client records into.
    #[must_use]
    pub const fn session(&self) -> &AuthSession {
        &self.session
    }

    /// Signs in with name and password.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Rejected`] with the service's message on bad
    /// credentials, [`AuthError::MissingSession`] if no cookie came back,
    /// or [`AuthError::Transport`] if the service could not be reached.
    pub async fn login(&self, user_name: &str, password: &str) -> Result<Identity, AuthError> {
        self.sign_in("login", user_name, password).await
    }

    /// Creates an account and signs in as it.
    ///
    /// # Errors
    ///
    /// Same as [`login`](Self::login).
    pub async fn register(&self, user_name: &str, password: &str) -> Result<Identity, AuthError> {
        self.sign_in("register", user_name, password).await
    }

    async fn sign_in(
        &self,
        action: &str,
        user_name: &str,
        password: &str,
    ) -> Result<Identity, AuthError> {
        let credentials = Credentials {
            user_name: user_name.to_string(),
            password: password.to_string(),
        };
        let payload = codec::encode(&credentials).map_err(|e| AuthError::Transport(e.to_string()))?;
        let url = endpoint(&self.base, &["api", "auth", action]).map_err(auth_transport)?;
        let response = execute(&self.client, Method::POST, url, None, Some(payload))
            .await
            .map_err(auth_transport)?;
        if !response.is_success() {
            return Err(auth_rejection(response.status, &response.body));
        }
        let AuthResponse { user } =
            codec::decode(&response.body).map_err(|e| AuthError::Transport(e.to_string()))?;
        let token = response.session.ok_or(AuthError::MissingSession)?;
        self.session.establish(user.clone(), token);
        tracing::info!(user_id = %user.id, action, "signed in");
        Ok(user)
    }

    /// Signs out. The local session is cleared and mutations are suspended
    /// even if the service cannot be reached.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Transport`] if the request failed.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let token = self.session.credential();
        self.session.clear();
        let url = endpoint(&self.base, &["api", "auth", "logout"]).map_err(auth_transport)?;
        let response = execute(&self.client, Method::POST, url, token.as_ref(), None)
            .await
            .map_err(auth_transport)?;
        if !response.is_success() && response.status != 401 {
            return Err(auth_rejection(response.status, &response.body));
        }
        tracing::info!("signed out");
        Ok(())
    }

    /// Asks the service who the current session belongs to.
    ///
    /// Returns `Ok(None)` when there is no session or the service no longer
    /// accepts it; in the latter case the local session is cleared.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Transport`] if the request failed, or
    /// [`AuthError::Rejected`] on any other refusal.
    pub async fn me(&self) -> Result<Option<Identity>, AuthError> {
        let Some(token) = self.session.credential() else {
            return Ok(None);
        };
        let url = endpoint(&self.base, &["api", "auth", "me"]).map_err(auth_transport)?;
        let response = execute(&self.client, Method::GET, url, Some(&token), None)
            .await
            .map_err(auth_transport)?;
        if response.status == 401 {
            self.session.clear();
            return Ok(None);
        }
        if !response.is_success() {
            return Err(auth_rejection(response.status, &response.body));
        }
        let identity: Identity =
            codec::decode(&response.body).map_err(|e| AuthError::Transport(e.to_string()))?;
        self.session.set_identity(identity.clone());
        Ok(Some(identity))
    }
}
