//! Integration tests for the optimistic mutation store.
//!
//! Drives `MutationStore` against the loopback service: confirmed and
//! failed mutations, rollback fidelity, interleaved calls, scope changes,
//! and session expiry.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::similar_names,
    clippy::redundant_clone
)]

use tokio::sync::mpsc;

use taskdeck::auth::{AuthSession, IdentityProvider, SessionToken};
use taskdeck::remote::RemoteError;
use taskdeck::remote::loopback::{CreateEcho, LoopbackRemote, RemoteCall};
use taskdeck::tasks::{
    CreateOutcome, CreateReconcile, FailureKind, MutationError, MutationKind, MutationStore,
    StoreConfig, StoreEvent,
};
use taskdeck_proto::auth::Identity;
use taskdeck_proto::task::{IdentityId, NewTask, Scope, TaskId, TaskPatch, TaskStatus, TeamId};

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

type Store = MutationStore<LoopbackRemote, AuthSession>;

fn make_identity() -> Identity {
    Identity {
        id: IdentityId::from(1),
        display_name: "Ana Lima".to_string(),
    }
}

fn make_session() -> AuthSession {
    AuthSession::signed_in(make_identity(), SessionToken::new("session=abc"))
}

fn personal() -> Scope {
    Scope::Personal {
        owner: IdentityId::from(1),
    }
}

fn transport() -> RemoteError {
    RemoteError::Transport("connection reset".to_string())
}

fn make_store_with(
    remote: LoopbackRemote,
    session: AuthSession,
    config: StoreConfig,
) -> (Store, mpsc::Receiver<StoreEvent>) {
    MutationStore::new(remote, session, config)
}

/// Store over a personal list seeded with `titles` (last title on top),
/// already loaded, with the load event drained.
async fn make_loaded_store(titles: &[&str]) -> (Store, mpsc::Receiver<StoreEvent>) {
    let remote = LoopbackRemote::new(make_identity());
    for title in titles {
        remote.seed_task(&personal(), NewTask::titled(*title));
    }
    let (store, mut events) =
        make_store_with(remote, make_session(), StoreConfig::default());
    store.load_personal().await.unwrap();
    drain(&mut events);
    store.remote().clear_calls();
    (store, events)
}

fn drain(events: &mut mpsc::Receiver<StoreEvent>) -> Vec<StoreEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

fn titles(store: &Store) -> Vec<String> {
    store.tasks().into_iter().map(|t| t.title).collect()
}

fn id_of(store: &Store, title: &str) -> TaskId {
    store
        .tasks()
        .into_iter()
        .find(|t| t.title == title)
        .map(|t| t.id)
        .expect("task listed")
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

#[tokio::test]
async fn offline_create_appears_pending_then_disappears() {
    let (store, mut events) = make_loaded_store(&["Existing"]).await;
    let mut held = store.remote().hold_next();

    let create = store.create(NewTask::titled("Draft report"));
    let drive = async {
        held.entered().await;
        let top = store.tasks().into_iter().next().unwrap();
        assert_eq!(top.title, "Draft report");
        assert_eq!(top.status, TaskStatus::Pending);
        assert!(top.id.is_local());
        held.fail(transport());
    };
    let (result, ()) = tokio::join!(create, drive);

    let err = result.unwrap_err();
    assert_eq!(err.kind(), Some(FailureKind::TransportFailure));
    assert!(err.is_retriable());
    assert_eq!(titles(&store), vec!["Existing"]);
    assert_eq!(store.remote().tasks(&personal()).len(), 1);

    let seen = drain(&mut events);
    assert!(seen.iter().any(|e| matches!(
        e,
        StoreEvent::RolledBack {
            kind: MutationKind::Create,
            ..
        }
    )));
}

#[tokio::test]
async fn confirmed_create_takes_server_id() {
    let (store, mut events) = make_loaded_store(&[]).await;
    let outcome = store
        .create(NewTask {
            title: "Write tests".to_string(),
            description: Some("cover rollback".to_string()),
            ..NewTask::default()
        })
        .await
        .unwrap();

    let CreateOutcome::Confirmed(id) = outcome else {
        panic!("expected a confirmed create, got {outcome:?}");
    };
    assert!(!id.is_local());
    let task = store.task(&id).unwrap();
    assert_eq!(task.title, "Write tests");
    assert_eq!(task.description.as_deref(), Some("cover rollback"));
    assert_eq!(store.tasks().len(), 1);
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        StoreEvent::Confirmed {
            kind: MutationKind::Create,
            task_id,
        } if *task_id == id
    )));
}

#[tokio::test]
async fn partial_echo_keeps_local_fields() {
    let (store, _events) = make_loaded_store(&[]).await;
    store.remote().set_create_echo(CreateEcho::Partial);
    let outcome = store
        .create(NewTask {
            title: "Plan".to_string(),
            category: Some("work".to_string()),
            ..NewTask::default()
        })
        .await
        .unwrap();
    let CreateOutcome::Confirmed(id) = outcome else {
        panic!("expected a confirmed create");
    };
    assert_eq!(store.task(&id).unwrap().category.as_deref(), Some("work"));
}

#[tokio::test]
async fn empty_echo_triggers_reload() {
    let (store, _events) = make_loaded_store(&["Old"]).await;
    store.remote().set_create_echo(CreateEcho::Empty);
    let outcome = store.create(NewTask::titled("New")).await.unwrap();
    assert_eq!(outcome, CreateOutcome::Reloaded);
    assert_eq!(titles(&store), vec!["New", "Old"]);
    assert!(store.tasks().iter().all(|t| !t.id.is_local()));
    assert!(matches!(
        store.remote().calls().last(),
        Some(RemoteCall::ListTasks(_))
    ));
}

#[tokio::test]
async fn reload_policy_reloads_after_every_create() {
    let remote = LoopbackRemote::new(make_identity());
    let config = StoreConfig {
        create_reconcile: CreateReconcile::Reload,
        ..StoreConfig::default()
    };
    let (store, _events) = make_store_with(remote, make_session(), config);
    store.load_personal().await.unwrap();
    let outcome = store.create(NewTask::titled("Only")).await.unwrap();
    assert_eq!(outcome, CreateOutcome::Reloaded);
    assert_eq!(titles(&store), vec!["Only"]);
}

#[tokio::test]
async fn stored_create_with_failed_reload_drops_temporary_entry() {
    let (store, _events) = make_loaded_store(&["Old"]).await;
    store.remote().set_create_echo(CreateEcho::Empty);
    let mut held = store.remote().hold_next();
    store.remote().fail_next(transport());

    let create = store.create(NewTask::titled("New"));
    let drive = async {
        held.entered().await;
        assert_eq!(titles(&store), vec!["New", "Old"]);
        held.succeed();
    };
    let (result, ()) = tokio::join!(create, drive);

    let CreateOutcome::Unreconciled(error) = result.unwrap() else {
        panic!("expected an unreconciled create");
    };
    assert!(error.is_retriable());
    assert_eq!(titles(&store), vec!["Old"]);
    assert!(store.tasks().iter().all(|t| !t.id.is_local()));
    assert_eq!(store.remote().tasks(&personal()).len(), 2);

    store.reload().await.unwrap();
    assert_eq!(titles(&store), vec!["New", "Old"]);
    assert!(store.tasks().iter().all(|t| !t.id.is_local()));
}

#[tokio::test]
async fn reload_policy_create_with_expired_session_is_unreconciled() {
    let remote = LoopbackRemote::new(make_identity());
    let config = StoreConfig {
        create_reconcile: CreateReconcile::Reload,
        ..StoreConfig::default()
    };
    let (store, mut events) = make_store_with(remote, make_session(), config);
    store.load_personal().await.unwrap();
    let mut held = store.remote().hold_next();
    store.remote().fail_next(RemoteError::AuthenticationExpired);

    let create = store.create(NewTask::titled("Only"));
    let drive = async {
        held.entered().await;
        held.succeed();
    };
    let (result, ()) = tokio::join!(create, drive);

    assert_eq!(
        result.unwrap(),
        CreateOutcome::Unreconciled(MutationError::AuthenticationExpired)
    );
    assert!(store.tasks().is_empty());
    assert_eq!(store.remote().tasks(&personal()).len(), 1);
    assert!(
        drain(&mut events)
            .iter()
            .any(|e| matches!(e, StoreEvent::AuthenticationExpired))
    );
}

// ---------------------------------------------------------------------------
// Status cycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn in_progress_cycles_to_completed() {
    let (store, mut events) = make_loaded_store(&["Ship"]).await;
    let id = id_of(&store, "Ship");
    assert_eq!(store.cycle_status(&id).await.unwrap(), TaskStatus::InProgress);
    drain(&mut events);

    let next = store.cycle_status(&id).await.unwrap();
    assert_eq!(next, TaskStatus::Completed);
    assert_eq!(store.task(&id).unwrap().status, TaskStatus::Completed);
    assert_eq!(
        store.remote().tasks(&personal())[0].status,
        TaskStatus::Completed
    );
    let seen = drain(&mut events);
    assert!(
        seen.iter()
            .all(|e| !matches!(e, StoreEvent::RolledBack { .. }))
    );
}

#[tokio::test]
async fn cycle_sends_only_the_status() {
    let (store, _events) = make_loaded_store(&["Ship"]).await;
    let id = id_of(&store, "Ship");
    store.cycle_status(&id).await.unwrap();
    assert_eq!(
        store.remote().calls(),
        vec![RemoteCall::UpdateTask(
            personal(),
            id,
            TaskPatch::status(TaskStatus::InProgress)
        )]
    );
}

// ---------------------------------------------------------------------------
// Rollback fidelity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_edit_restores_list_exactly() {
    let (store, _events) = make_loaded_store(&["a", "b", "c"]).await;
    let before = store.tasks();
    let id = id_of(&store, "b");
    store.remote().fail_next(transport());

    let patch = TaskPatch {
        title: Some("b2".to_string()),
        description: Some(Some("details".to_string())),
        ..TaskPatch::default()
    };
    let err = store.edit_fields(&id, patch).await.unwrap_err();
    assert!(matches!(err, MutationError::TransportFailure(_)));
    assert_eq!(store.tasks(), before);
}

#[tokio::test]
async fn failed_cycle_restores_prior_status() {
    let (store, _events) = make_loaded_store(&["a", "b"]).await;
    let id = id_of(&store, "a");
    store.cycle_status(&id).await.unwrap();
    let before = store.tasks();

    store.remote().fail_next(transport());
    store.cycle_status(&id).await.unwrap_err();
    assert_eq!(store.tasks(), before);
    assert_eq!(store.task(&id).unwrap().status, TaskStatus::InProgress);
}

#[tokio::test]
async fn failed_delete_restores_original_position() {
    let (store, _events) = make_loaded_store(&["a", "b", "c", "d"]).await;
    let before = store.tasks();
    let id = id_of(&store, "c");
    store.remote().fail_next(transport());

    store.delete(&id).await.unwrap_err();
    assert_eq!(store.tasks(), before);
    assert_eq!(titles(&store), vec!["d", "c", "b", "a"]);
}

#[tokio::test]
async fn rejection_message_is_surfaced_verbatim() {
    let (store, _events) = make_loaded_store(&["a"]).await;
    let id = id_of(&store, "a");
    store.remote().fail_next(RemoteError::Rejected {
        status: 404,
        message: "Task not found".to_string(),
    });
    let err = store.delete(&id).await.unwrap_err();
    assert_eq!(err, MutationError::Rejected("Task not found".to_string()));
    assert_eq!(err.to_string(), "Task not found");
    assert!(!err.is_retriable());
    assert_eq!(titles(&store), vec!["a"]);
}

#[tokio::test]
async fn reload_replaces_list_with_service_copy() {
    let (store, _events) = make_loaded_store(&["a"]).await;
    store
        .remote()
        .seed_task(&personal(), NewTask::titled("added elsewhere"));
    assert_eq!(store.reload().await.unwrap(), 2);
    assert_eq!(titles(&store), vec!["added elsewhere", "a"]);
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn interleaved_failure_keeps_other_confirmed_change() {
    let (store, _events) = make_loaded_store(&["a", "b"]).await;
    let a = id_of(&store, "a");
    let b = id_of(&store, "b");
    let mut held = store.remote().hold_next();

    let slow = store.edit_fields(&a, TaskPatch::title("a2"));
    let drive = async {
        held.entered().await;
        store.edit_fields(&b, TaskPatch::title("b2")).await.unwrap();
        assert_eq!(titles(&store), vec!["b2", "a2"]);
        held.fail(transport());
    };
    let (result, ()) = tokio::join!(slow, drive);

    result.unwrap_err();
    assert_eq!(titles(&store), vec!["b2", "a"]);
}

#[tokio::test]
async fn failed_delete_survives_concurrent_insert() {
    let (store, _events) = make_loaded_store(&["a", "b", "c"]).await;
    let b = id_of(&store, "b");
    let mut held = store.remote().hold_next();

    let delete = store.delete(&b);
    let drive = async {
        held.entered().await;
        store.create(NewTask::titled("fresh")).await.unwrap();
        held.fail(transport());
    };
    let (result, ()) = tokio::join!(delete, drive);

    result.unwrap_err();
    assert_eq!(titles(&store), vec!["fresh", "c", "b", "a"]);
}

#[tokio::test]
async fn slower_rollback_overwrites_newer_write_to_same_field() {
    let (store, mut events) = make_loaded_store(&["Original"]).await;
    let id = id_of(&store, "Original");
    let mut first = store.remote().hold_next();
    let mut second = store.remote().hold_next();

    let edit_one = store.edit_fields(&id, TaskPatch::title("one"));
    let edit_two = store.edit_fields(&id, TaskPatch::title("two"));
    let drive = async {
        first.entered().await;
        second.entered().await;
        assert_eq!(titles(&store), vec!["two"]);
        second.succeed();
        loop {
            match events.recv().await {
                Some(StoreEvent::Confirmed {
                    kind: MutationKind::Edit,
                    ..
                }) => break,
                Some(_) => {}
                None => panic!("event channel closed"),
            }
        }
        first.fail(transport());
    };
    let (one, two, ()) = tokio::join!(edit_one, edit_two, drive);

    one.unwrap_err();
    two.unwrap();
    // The first edit restores the title it captured, undoing the
    // confirmed second edit locally; the service keeps "two".
    assert_eq!(titles(&store), vec!["Original"]);
    assert_eq!(store.remote().tasks(&personal())[0].title, "two");
}

#[tokio::test]
async fn rollback_only_touches_fields_it_changed() {
    let (store, _events) = make_loaded_store(&["a"]).await;
    let id = id_of(&store, "a");
    let mut held = store.remote().hold_next();

    let edit = store.edit_fields(
        &id,
        TaskPatch {
            description: Some(Some("slow".to_string())),
            ..TaskPatch::default()
        },
    );
    let drive = async {
        held.entered().await;
        store.cycle_status(&id).await.unwrap();
        held.fail(transport());
    };
    let (result, ()) = tokio::join!(edit, drive);

    result.unwrap_err();
    let task = store.task(&id).unwrap();
    assert_eq!(task.description, None);
    assert_eq!(task.status, TaskStatus::InProgress);
}

// ---------------------------------------------------------------------------
// Scope changes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn confirmation_after_scope_change_is_dropped() {
    let (store, _events) = make_loaded_store(&["mine"]).await;
    let team = Scope::Team {
        team_id: TeamId::from(90),
    };
    store
        .remote()
        .seed_task(&team, NewTask::titled("team task"));
    let mut held = store.remote().hold_next();

    let create = store.create(NewTask::titled("late"));
    let drive = async {
        held.entered().await;
        store.load_scope(team.clone()).await.unwrap();
        held.succeed();
    };
    let (result, ()) = tokio::join!(create, drive);

    assert_eq!(result.unwrap(), CreateOutcome::ScopeChanged);
    assert_eq!(store.scope(), Some(team));
    assert_eq!(titles(&store), vec!["team task"]);
}

#[tokio::test]
async fn rollback_after_scope_change_is_dropped() {
    let (store, _events) = make_loaded_store(&["mine"]).await;
    let mine = id_of(&store, "mine");
    let team = Scope::Team {
        team_id: TeamId::from(91),
    };
    store.remote().seed_task(&team, NewTask::titled("theirs"));
    let mut held = store.remote().hold_next();

    let delete = store.delete(&mine);
    let drive = async {
        held.entered().await;
        store.load_scope(team.clone()).await.unwrap();
        held.fail(transport());
    };
    let (result, ()) = tokio::join!(delete, drive);

    result.unwrap_err();
    assert_eq!(titles(&store), vec!["theirs"]);
}

// ---------------------------------------------------------------------------
// Session expiry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn authentication_expiry_suspends_mutations() {
    let (store, mut events) = make_loaded_store(&["a"]).await;
    let id = id_of(&store, "a");
    store
        .remote()
        .fail_next(RemoteError::AuthenticationExpired);

    let err = store.cycle_status(&id).await.unwrap_err();
    assert_eq!(err, MutationError::AuthenticationExpired);
    assert_eq!(err.kind(), Some(FailureKind::AuthenticationExpired));
    assert_eq!(store.task(&id).unwrap().status, TaskStatus::Pending);
    assert!(
        drain(&mut events)
            .iter()
            .any(|e| matches!(e, StoreEvent::AuthenticationExpired))
    );

    store.remote().clear_calls();
    let err = store.create(NewTask::titled("blocked")).await.unwrap_err();
    assert_eq!(err, MutationError::Suspended);
    assert!(store.remote().calls().is_empty());
    assert_eq!(titles(&store), vec!["a"]);
}

#[tokio::test]
async fn signing_in_again_resumes_mutations() {
    let session = make_session();
    let remote = LoopbackRemote::new(make_identity());
    remote.seed_task(&personal(), NewTask::titled("a"));
    let (store, _events) = make_store_with(remote, session.clone(), StoreConfig::default());
    store.load_personal().await.unwrap();
    let id = id_of(&store, "a");

    store
        .remote()
        .fail_next(RemoteError::AuthenticationExpired);
    store.delete(&id).await.unwrap_err();
    assert!(session.gate().is_suspended());

    session.establish(make_identity(), SessionToken::new("session=def"));
    store.delete(&id).await.unwrap();
    assert!(store.tasks().is_empty());
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

#[tokio::test]
async fn subscribers_see_optimistic_and_rolled_back_snapshots() {
    let (store, _events) = make_loaded_store(&["a"]).await;
    let mut rx = store.subscribe();
    let _ = rx.borrow_and_update();
    let id = id_of(&store, "a");
    let mut held = store.remote().hold_next();

    let delete = store.delete(&id);
    let drive = async {
        held.entered().await;
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().tasks.is_empty());
        held.fail(transport());
    };
    let (result, ()) = tokio::join!(delete, drive);

    result.unwrap_err();
    assert!(rx.has_changed().unwrap());
    let snapshot = rx.borrow_and_update().clone();
    assert_eq!(snapshot.tasks.len(), 1);
    assert_eq!(snapshot.scope, Some(personal()));
}
