//! Cross-module lifecycle tests: sign-in, restore-on-boot, sign-out,
//! and profile mutation against a mocked backend.

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gymlog_core::{
    ClientConfig, MemoryCredentialStore, ProfileUpdate, SessionError, SessionManager, SessionState,
};

fn test_config(server: &MockServer) -> ClientConfig {
    ClientConfig {
        base_url: server.uri(),
        request_timeout_secs: 5,
        refresh_max_retries: 1,
        refresh_backoff_ms: 10,
    }
}

fn ana_session() -> serde_json::Value {
    json!({
        "user": {"id": "u1", "name": "Ana", "email": "a@b.com"},
        "token": "access-1",
        "refresh_token": "refresh-1"
    })
}

async fn mount_sign_in(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/sessions"))
        .and(body_json(json!({"email": "a@b.com", "password": "secret1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(ana_session()))
        .mount(server)
        .await;
}

async fn signed_in_manager(
    server: &MockServer,
    store: Arc<MemoryCredentialStore>,
) -> SessionManager {
    mount_sign_in(server).await;
    let session = SessionManager::new(test_config(server), store).unwrap();
    session.bootstrap().await.unwrap();
    session.sign_in("a@b.com", "secret1").await.unwrap();
    session
}

#[tokio::test]
async fn sign_in_transitions_to_authenticated_and_persists() {
    let server = MockServer::start().await;
    mount_sign_in(&server).await;

    let store = Arc::new(MemoryCredentialStore::new());
    let session = SessionManager::new(test_config(&server), store.clone()).unwrap();
    session.bootstrap().await.unwrap();
    assert_eq!(session.state(), SessionState::Unauthenticated);

    let user = session.sign_in("a@b.com", "secret1").await.unwrap();
    assert_eq!(user.id, "u1");
    assert_eq!(user.name, "Ana");
    assert!(matches!(
        session.state(),
        SessionState::Authenticated { .. }
    ));

    let record = store.record().await.unwrap();
    assert_eq!(record.user.id, "u1");
    assert_eq!(record.tokens.access_token, "access-1");
    assert_eq!(record.tokens.refresh_token, "refresh-1");
}

#[tokio::test]
async fn sign_in_rejection_surfaces_the_backend_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"message": "E-mail and/or password incorrect."})),
        )
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCredentialStore::new());
    let session = SessionManager::new(test_config(&server), store.clone()).unwrap();
    session.bootstrap().await.unwrap();

    let err = session.sign_in("a@b.com", "wrong").await.unwrap_err();
    match err {
        SessionError::InvalidCredentials(message) => {
            assert_eq!(message, "E-mail and/or password incorrect.")
        }
        other => panic!("expected InvalidCredentials, got {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Unauthenticated);
    assert!(store.record().await.is_none());
}

#[tokio::test]
async fn transport_failure_is_distinct_from_rejection() {
    // Nothing listens here; the connection is refused.
    let config = ClientConfig {
        base_url: "http://127.0.0.1:9".to_string(),
        request_timeout_secs: 2,
        refresh_max_retries: 1,
        refresh_backoff_ms: 10,
    };
    let session = SessionManager::new(config, Arc::new(MemoryCredentialStore::new())).unwrap();
    session.bootstrap().await.unwrap();

    let err = session.sign_in("a@b.com", "secret1").await.unwrap_err();
    assert!(matches!(err, SessionError::Network(_)));
}

#[tokio::test]
async fn restart_restores_the_identical_identity_and_usable_tokens() {
    let server = MockServer::start().await;
    let store = Arc::new(MemoryCredentialStore::new());
    {
        let session = signed_in_manager(&server, store.clone()).await;
        drop(session); // "process exit"
    }

    let session = SessionManager::new(test_config(&server), store).unwrap();
    assert!(session.is_bootstrapping());
    session.bootstrap().await.unwrap();

    let user = session.current_user().unwrap();
    assert_eq!(user.id, "u1");
    assert_eq!(user.name, "Ana");

    // The restored pair is attached to authenticated requests as-is.
    Mock::given(method("GET"))
        .and(path("/users/profile"))
        .and(header("authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({"id": "u1", "name": "Ana", "email": "a@b.com"}),
        ))
        .mount(&server)
        .await;
    let profile = session.api().fetch_profile().await.unwrap();
    assert_eq!(profile.id, "u1");
}

#[tokio::test]
async fn bootstrap_is_idempotent_and_reads_storage_once() {
    let server = MockServer::start().await;
    let store = Arc::new(MemoryCredentialStore::new());
    {
        signed_in_manager(&server, store.clone()).await;
    }
    let loads_before = store.loads().await;

    let session = SessionManager::new(test_config(&server), store.clone()).unwrap();
    session.bootstrap().await.unwrap();
    let state_after_first = session.state();
    session.bootstrap().await.unwrap();

    assert_eq!(session.state(), state_after_first);
    assert_eq!(store.loads().await - loads_before, 1);
}

#[tokio::test]
async fn bootstrap_storage_failure_surfaces_but_resolves_navigation() {
    let server = MockServer::start().await;
    let store = Arc::new(MemoryCredentialStore::new());
    store.fail_loads(true).await;

    let session = SessionManager::new(test_config(&server), store).unwrap();
    let err = session.bootstrap().await.unwrap_err();
    assert!(matches!(err, SessionError::Storage(_)));
    // Navigation must not stay wedged on the loading placeholder.
    assert_eq!(session.state(), SessionState::Unauthenticated);
}

#[tokio::test]
async fn sign_out_clears_storage_and_state() {
    let server = MockServer::start().await;
    let store = Arc::new(MemoryCredentialStore::new());
    let session = signed_in_manager(&server, store.clone()).await;

    session.sign_out().await.unwrap();
    assert_eq!(session.state(), SessionState::Unauthenticated);
    assert!(store.record().await.is_none());

    // Safe to call again from any state.
    session.sign_out().await.unwrap();
    assert_eq!(session.state(), SessionState::Unauthenticated);
}

#[tokio::test]
async fn sign_in_persistence_failure_is_tolerated_but_surfaced() {
    let server = MockServer::start().await;
    mount_sign_in(&server).await;
    let store = Arc::new(MemoryCredentialStore::new());
    store.fail_saves(true).await;

    let session = SessionManager::new(test_config(&server), store).unwrap();
    session.bootstrap().await.unwrap();

    let err = session.sign_in("a@b.com", "secret1").await.unwrap_err();
    assert!(matches!(err, SessionError::Storage(_)));
    // The in-memory session is still authoritative.
    assert_eq!(session.current_user().unwrap().id, "u1");
}

#[tokio::test]
async fn subscribers_observe_committed_transitions() {
    let server = MockServer::start().await;
    mount_sign_in(&server).await;

    let session =
        SessionManager::new(test_config(&server), Arc::new(MemoryCredentialStore::new())).unwrap();
    let mut updates = session.subscribe();
    assert!(updates.borrow().is_bootstrapping());

    session.bootstrap().await.unwrap();
    updates.changed().await.unwrap();
    assert_eq!(*updates.borrow_and_update(), SessionState::Unauthenticated);

    session.sign_in("a@b.com", "secret1").await.unwrap();
    updates.changed().await.unwrap();
    // The `Ref` must drop before the receiver does; don't leave the
    // borrow in tail position.
    match &*updates.borrow_and_update() {
        SessionState::Authenticated { user } => assert_eq!(user.name, "Ana"),
        other => panic!("expected Authenticated, got {other:?}"),
    };
}

#[tokio::test]
async fn profile_operations_require_a_session() {
    let server = MockServer::start().await;
    let session =
        SessionManager::new(test_config(&server), Arc::new(MemoryCredentialStore::new())).unwrap();
    session.bootstrap().await.unwrap();

    let err = session
        .update_profile(ProfileUpdate::rename("Ana Maria"))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::NotAuthenticated));

    let err = session
        .update_avatar(vec![1, 2, 3], "image/jpeg")
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::NotAuthenticated));
}

#[tokio::test]
async fn update_profile_commits_only_after_backend_success() {
    let server = MockServer::start().await;
    let store = Arc::new(MemoryCredentialStore::new());
    let session = signed_in_manager(&server, store.clone()).await;

    Mock::given(method("PUT"))
        .and(path("/users"))
        .and(body_json(json!({"name": "Ana Maria"})))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let merged = session
        .update_profile(ProfileUpdate::rename("Ana Maria"))
        .await
        .unwrap();
    assert_eq!(merged.name, "Ana Maria");
    assert_eq!(merged.id, "u1");
    assert_eq!(session.current_user().unwrap().name, "Ana Maria");
    assert_eq!(store.record().await.unwrap().user.name, "Ana Maria");
}

#[tokio::test]
async fn update_profile_rejection_leaves_identity_untouched() {
    let server = MockServer::start().await;
    let store = Arc::new(MemoryCredentialStore::new());
    let session = signed_in_manager(&server, store.clone()).await;

    Mock::given(method("PUT"))
        .and(path("/users"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"message": "Old password incorrect."})),
        )
        .mount(&server)
        .await;

    let err = session
        .update_profile(ProfileUpdate {
            name: Some("Ana Maria".to_string()),
            password: Some("newpass1".to_string()),
            old_password: Some("wrong".to_string()),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidCredentials(_)));
    assert_eq!(session.current_user().unwrap().name, "Ana");
    assert_eq!(store.record().await.unwrap().user.name, "Ana");
}

#[tokio::test]
async fn update_avatar_merges_the_returned_reference() {
    let server = MockServer::start().await;
    let store = Arc::new(MemoryCredentialStore::new());
    let session = signed_in_manager(&server, store.clone()).await;

    Mock::given(method("PATCH"))
        .and(path("/users/avatar"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"avatar": "u1-photo.png"})))
        .mount(&server)
        .await;

    let merged = session
        .update_avatar(vec![0x89, 0x50, 0x4e, 0x47], "image/png")
        .await
        .unwrap();
    assert_eq!(merged.avatar.as_deref(), Some("u1-photo.png"));
    assert_eq!(
        store.record().await.unwrap().user.avatar.as_deref(),
        Some("u1-photo.png")
    );
    assert_eq!(
        session.api().avatar_url("u1-photo.png"),
        format!("{}/avatar/u1-photo.png", server.uri())
    );
}

#[tokio::test]
async fn update_avatar_failure_never_commits_a_partial_reference() {
    let server = MockServer::start().await;
    let store = Arc::new(MemoryCredentialStore::new());
    let session = signed_in_manager(&server, store.clone()).await;

    Mock::given(method("PATCH"))
        .and(path("/users/avatar"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"message": "upload failed"})))
        .mount(&server)
        .await;

    let err = session
        .update_avatar(vec![1, 2, 3], "image/jpeg")
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Network(_)));
    assert!(session.current_user().unwrap().avatar.is_none());
    assert!(store.record().await.unwrap().user.avatar.is_none());
}

#[tokio::test]
async fn sign_up_creates_the_account_then_signs_in() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users"))
        .and(body_json(json!({
            "name": "Ana",
            "email": "a@b.com",
            "password": "secret1"
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    mount_sign_in(&server).await;

    let session =
        SessionManager::new(test_config(&server), Arc::new(MemoryCredentialStore::new())).unwrap();
    session.bootstrap().await.unwrap();

    let user = session.sign_up("Ana", "a@b.com", "secret1").await.unwrap();
    assert_eq!(user.id, "u1");
    assert!(matches!(
        session.state(),
        SessionState::Authenticated { .. }
    ));
}
