//! Integration tests for the HTTP remote and sign-in client.
//!
//! Runs both against an in-process axum stub on 127.0.0.1:0 that records
//! every request and answers from a per-route script.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::similar_names,
    clippy::significant_drop_tightening
)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;
use url::Url;

use taskdeck::auth::{AuthError, AuthSession, IdentityProvider, SessionToken};
use taskdeck::remote::http::{HttpAuthClient, HttpRemote, build_client};
use taskdeck::remote::{RemoteError, TaskRemote};
use taskdeck::tasks::{MutationError, MutationStore, StoreConfig};
use taskdeck_proto::auth::Identity;
use taskdeck_proto::task::{IdentityId, NewTask, Scope, TaskId, TaskPatch, TaskStatus};
use taskdeck_proto::team::{JoinCode, TeamId};

// ---------------------------------------------------------------------------
// Stub service
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Recorded {
    method: Method,
    path: String,
    cookie: Option<String>,
    body: String,
}

#[derive(Debug, Clone)]
struct Canned {
    status: u16,
    body: String,
    set_cookie: Option<String>,
}

#[derive(Debug, Default)]
struct Stub {
    requests: Mutex<Vec<Recorded>>,
    routes: Mutex<HashMap<(Method, String), Canned>>,
}

impl Stub {
    fn respond(&self, method: Method, path: &str, status: u16, body: &str) {
        self.routes.lock().insert(
            (method, path.to_string()),
            Canned {
                status,
                body: body.to_string(),
                set_cookie: None,
            },
        );
    }

    fn respond_with_cookie(&self, method: Method, path: &str, body: &str, cookie: &str) {
        self.routes.lock().insert(
            (method, path.to_string()),
            Canned {
                status: 200,
                body: body.to_string(),
                set_cookie: Some(cookie.to_string()),
            },
        );
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().clone()
    }

    fn last(&self) -> Recorded {
        self.requests.lock().last().cloned().expect("a request")
    }
}

async fn answer(
    State(stub): State<Arc<Stub>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    stub.requests.lock().push(Recorded {
        method: method.clone(),
        path: path.clone(),
        cookie: headers
            .get(header::COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body: String::from_utf8_lossy(&body).into_owned(),
    });
    let canned = stub.routes.lock().get(&(method, path)).cloned();
    let Some(canned) = canned else {
        return (StatusCode::NOT_FOUND, r#"{"detail":"Not Found"}"#).into_response();
    };
    let mut response = (StatusCode::from_u16(canned.status).unwrap(), canned.body).into_response();
    if let Some(cookie) = canned.set_cookie {
        response
            .headers_mut()
            .insert(header::SET_COOKIE, HeaderValue::from_str(&cookie).unwrap());
    }
    response
}

async fn spawn_stub() -> (Arc<Stub>, Url) {
    let stub = Arc::new(Stub::default());
    let app = Router::new().fallback(answer).with_state(stub.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (stub, Url::parse(&format!("http://{addr}")).unwrap())
}

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

fn signed_in() -> AuthSession {
    AuthSession::signed_in(
        Identity {
            id: IdentityId::from(1),
            display_name: "ana".to_string(),
        },
        SessionToken::new("session=abc123"),
    )
}

fn make_remote(base: &Url, session: AuthSession) -> HttpRemote<AuthSession> {
    let client = build_client(Duration::from_secs(5)).unwrap();
    HttpRemote::new(client, base.clone(), session)
}

fn make_auth(base: &Url) -> HttpAuthClient {
    let client = build_client(Duration::from_secs(5)).unwrap();
    HttpAuthClient::new(client, base.clone(), AuthSession::new())
}

fn personal() -> Scope {
    Scope::Personal {
        owner: IdentityId::from(1),
    }
}

fn team(id: i64) -> Scope {
    Scope::Team {
        team_id: TeamId::from(id),
    }
}

// ---------------------------------------------------------------------------
// Sign-in
// ---------------------------------------------------------------------------

#[tokio::test]
async fn login_captures_session_cookie_for_later_calls() {
    let (stub, base) = spawn_stub().await;
    stub.respond_with_cookie(
        Method::POST,
        "/api/auth/login",
        r#"{"user":{"userID":1,"userName":"ana"}}"#,
        "session=abc123; HttpOnly; Path=/; SameSite=Lax",
    );
    stub.respond(
        Method::GET,
        "/api/tasks",
        200,
        r#"[{"id":7,"title":"Ship","status":"In Progress","due":"2026-03-01"}]"#,
    );

    let auth = make_auth(&base);
    let user = auth.login("ana", "secret").await.unwrap();
    assert_eq!(user.id, IdentityId::from(1));
    assert_eq!(
        stub.last().body,
        r#"{"userName":"ana","password":"secret"}"#
    );

    let remote = make_remote(&base, auth.session().clone());
    let tasks = remote.list_tasks(&personal()).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, TaskId::from(7));
    assert_eq!(tasks[0].status, TaskStatus::InProgress);
    assert_eq!(tasks[0].due.unwrap().to_string(), "2026-03-01");
    assert_eq!(stub.last().cookie.as_deref(), Some("session=abc123"));
}

#[tokio::test]
async fn login_rejection_carries_service_message() {
    let (stub, base) = spawn_stub().await;
    stub.respond(
        Method::POST,
        "/api/auth/login",
        401,
        r#"{"detail":"Invalid username or password"}"#,
    );
    let auth = make_auth(&base);
    let err = auth.login("ana", "wrong").await.unwrap_err();
    assert_eq!(
        err,
        AuthError::Rejected("Invalid username or password".to_string())
    );
    assert!(auth.session().identity().is_none());
}

#[tokio::test]
async fn register_without_cookie_is_missing_session() {
    let (stub, base) = spawn_stub().await;
    stub.respond(
        Method::POST,
        "/api/auth/register",
        200,
        r#"{"user":{"userID":2,"userName":"bo"}}"#,
    );
    let auth = make_auth(&base);
    let err = auth.register("bo", "pw").await.unwrap_err();
    assert_eq!(err, AuthError::MissingSession);
}

#[tokio::test]
async fn me_with_expired_session_signs_out() {
    let (stub, base) = spawn_stub().await;
    stub.respond_with_cookie(
        Method::POST,
        "/api/auth/login",
        r#"{"user":{"userID":1,"userName":"ana"}}"#,
        "session=abc123; Path=/",
    );
    stub.respond(Method::GET, "/api/auth/me", 401, r#"{"detail":"Not authenticated"}"#);

    let auth = make_auth(&base);
    auth.login("ana", "secret").await.unwrap();
    assert!(auth.me().await.unwrap().is_none());
    assert!(auth.session().credential().is_none());
    assert!(auth.session().gate().is_suspended());
}

#[tokio::test]
async fn logout_clears_session_even_when_refused() {
    let (stub, base) = spawn_stub().await;
    stub.respond_with_cookie(
        Method::POST,
        "/api/auth/login",
        r#"{"user":{"userID":1,"userName":"ana"}}"#,
        "session=abc123; Path=/",
    );
    stub.respond(Method::POST, "/api/auth/logout", 500, "");
    let auth = make_auth(&base);
    auth.login("ana", "secret").await.unwrap();

    auth.logout().await.unwrap_err();
    assert!(auth.session().identity().is_none());
    assert_eq!(stub.last().cookie.as_deref(), Some("session=abc123"));
}

// ---------------------------------------------------------------------------
// Task and team calls
// ---------------------------------------------------------------------------

#[tokio::test]
async fn calls_without_session_never_reach_the_service() {
    let (stub, base) = spawn_stub().await;
    let remote = make_remote(&base, AuthSession::new());
    let err = remote.list_tasks(&personal()).await.unwrap_err();
    assert_eq!(err, RemoteError::AuthenticationExpired);
    assert!(stub.requests().is_empty());
}

#[tokio::test]
async fn status_codes_are_classified() {
    let (stub, base) = spawn_stub().await;
    let remote = make_remote(&base, signed_in());

    stub.respond(Method::DELETE, "/api/tasks/1", 401, r#"{"detail":"Not authenticated"}"#);
    assert_eq!(
        remote
            .delete_task(&personal(), &TaskId::from(1))
            .await
            .unwrap_err(),
        RemoteError::AuthenticationExpired
    );

    stub.respond(Method::DELETE, "/api/tasks/2", 404, r#"{"detail":"Task not found"}"#);
    assert_eq!(
        remote
            .delete_task(&personal(), &TaskId::from(2))
            .await
            .unwrap_err(),
        RemoteError::Rejected {
            status: 404,
            message: "Task not found".to_string(),
        }
    );

    stub.respond(Method::DELETE, "/api/tasks/3", 503, "upstream unavailable");
    assert!(matches!(
        remote
            .delete_task(&personal(), &TaskId::from(3))
            .await
            .unwrap_err(),
        RemoteError::Transport(_)
    ));
}

#[tokio::test]
async fn update_sends_only_patched_fields() {
    let (stub, base) = spawn_stub().await;
    stub.respond(
        Method::PATCH,
        "/api/teams/5/tasks/9",
        200,
        r#"{"id":9,"title":"Ship","status":"Completed"}"#,
    );
    let remote = make_remote(&base, signed_in());
    let record = remote
        .update_task(&team(5), &TaskId::from(9), &TaskPatch::status(TaskStatus::Completed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, TaskStatus::Completed);

    let request = stub.last();
    assert_eq!(request.method, Method::PATCH);
    assert_eq!(request.body, r#"{"status":"Completed"}"#);
}

#[tokio::test]
async fn clearing_a_field_sends_null() {
    let (stub, base) = spawn_stub().await;
    stub.respond(Method::PATCH, "/api/tasks/4", 200, "");
    let remote = make_remote(&base, signed_in());
    let patch = TaskPatch {
        due: Some(None),
        ..TaskPatch::default()
    };
    let record = remote
        .update_task(&personal(), &TaskId::from(4), &patch)
        .await
        .unwrap();
    assert!(record.is_none());
    assert_eq!(stub.last().body, r#"{"due":null}"#);
}

#[tokio::test]
async fn create_posts_to_scope_collection() {
    let (stub, base) = spawn_stub().await;
    stub.respond(
        Method::POST,
        "/api/teams/5/tasks",
        201,
        r#"{"id":"t-11","title":"Draft report"}"#,
    );
    let remote = make_remote(&base, signed_in());
    let record = remote
        .create_task(&team(5), &NewTask::titled("Draft report"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.id, TaskId::new("t-11"));
    assert_eq!(record.status, TaskStatus::Pending);
    assert_eq!(stub.last().body, r#"{"title":"Draft report"}"#);
}

#[tokio::test]
async fn assignment_routes() {
    let (stub, base) = spawn_stub().await;
    stub.respond(Method::POST, "/api/teams/5/tasks/9/assign", 200, "{}");
    stub.respond(Method::DELETE, "/api/teams/5/tasks/9/assign/3", 204, "");
    let remote = make_remote(&base, signed_in());

    remote
        .assign(&TeamId::from(5), &TaskId::from(9), &IdentityId::from(3))
        .await
        .unwrap();
    assert_eq!(stub.last().body, r#"{"userID":3}"#);

    remote
        .unassign(&TeamId::from(5), &TaskId::from(9), &IdentityId::from(3))
        .await
        .unwrap();
    let request = stub.last();
    assert_eq!(request.method, Method::DELETE);
    assert_eq!(request.path, "/api/teams/5/tasks/9/assign/3");
}

#[tokio::test]
async fn team_routes() {
    let (stub, base) = spawn_stub().await;
    stub.respond(
        Method::POST,
        "/api/teams",
        200,
        r#"{"teamID":12,"joinCode":"K7M2QP"}"#,
    );
    stub.respond(
        Method::POST,
        "/api/teams/join",
        200,
        r#"{"teamID":12,"teamName":"Alpha"}"#,
    );
    stub.respond(
        Method::GET,
        "/api/teams/12",
        200,
        r#"{"teamID":12,"teamName":"Alpha","members":[{"userID":1,"userName":"ana","role":"owner"},{"userID":2,"userName":"bo","role":"admin"}]}"#,
    );
    let remote = make_remote(&base, signed_in());

    let created = remote.create_team("Alpha").await.unwrap();
    assert_eq!(created.id, TeamId::from(12));
    assert_eq!(created.name, "Alpha");
    assert_eq!(created.join_code.as_deref(), Some("K7M2QP"));
    assert_eq!(stub.last().body, r#"{"teamName":"Alpha"}"#);

    let joined = remote
        .join_team(&JoinCode::parse("k7m2qp").unwrap())
        .await
        .unwrap();
    assert_eq!(joined.name, "Alpha");
    assert_eq!(stub.last().body, r#"{"joinCode":"K7M2QP"}"#);

    let detail = remote.team_detail(&TeamId::from(12)).await.unwrap();
    assert_eq!(detail.members.len(), 2);
    assert_eq!(
        detail.members[1].role,
        taskdeck_proto::team::MemberRole::Unknown
    );
}

#[tokio::test]
async fn base_path_prefix_is_kept() {
    let (stub, base) = spawn_stub().await;
    stub.respond(Method::GET, "/deck/api/teams", 200, "[]");
    let remote = make_remote(&base.join("deck/").unwrap(), signed_in());
    assert!(remote.list_teams().await.unwrap().is_empty());
    assert_eq!(stub.last().path, "/deck/api/teams");
}

#[tokio::test]
async fn unreachable_service_is_a_transport_failure() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let base = Url::parse(&format!("http://{addr}")).unwrap();
    let remote = make_remote(&base, signed_in());
    let err = remote.list_tasks(&personal()).await.unwrap_err();
    assert!(matches!(err, RemoteError::Transport(_)));
}

#[tokio::test]
async fn garbage_body_is_a_transport_failure() {
    let (stub, base) = spawn_stub().await;
    stub.respond(Method::GET, "/api/tasks", 200, "<html>oops</html>");
    let remote = make_remote(&base, signed_in());
    let err = remote.list_tasks(&personal()).await.unwrap_err();
    assert!(matches!(err, RemoteError::Transport(_)));
}

// ---------------------------------------------------------------------------
// Store over HTTP
// ---------------------------------------------------------------------------

#[tokio::test]
async fn store_rolls_back_over_http() {
    let (stub, base) = spawn_stub().await;
    stub.respond(
        Method::GET,
        "/api/tasks",
        200,
        r#"[{"id":2,"title":"b"},{"id":1,"title":"a"}]"#,
    );
    stub.respond(Method::DELETE, "/api/tasks/1", 503, "");
    let session = signed_in();
    let (store, _events) = MutationStore::new(
        make_remote(&base, session.clone()),
        session,
        StoreConfig::default(),
    );
    store.load_personal().await.unwrap();
    let before = store.tasks();

    let err = store.delete(&TaskId::from(1)).await.unwrap_err();
    assert!(matches!(err, MutationError::TransportFailure(_)));
    assert_eq!(store.tasks(), before);
}

#[tokio::test]
async fn store_suspends_after_http_401() {
    let (stub, base) = spawn_stub().await;
    stub.respond(Method::GET, "/api/tasks", 200, r#"[{"id":1,"title":"a"}]"#);
    stub.respond(Method::PATCH, "/api/tasks/1", 401, r#"{"detail":"Not authenticated"}"#);
    let session = signed_in();
    let (store, _events) = MutationStore::new(
        make_remote(&base, session.clone()),
        session.clone(),
        StoreConfig::default(),
    );
    store.load_personal().await.unwrap();

    let err = store.cycle_status(&TaskId::from(1)).await.unwrap_err();
    assert_eq!(err, MutationError::AuthenticationExpired);
    assert!(session.gate().is_suspended());
    assert_eq!(
        store.task(&TaskId::from(1)).unwrap().status,
        TaskStatus::Pending
    );
    let sent = stub.requests().len();
    assert_eq!(
        store.delete(&TaskId::from(1)).await.unwrap_err(),
        MutationError::Suspended
    );
    assert_eq!(stub.requests().len(), sent);
}
