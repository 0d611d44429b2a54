//! Integration tests for the HTTP backend.
//!
//! Runs `ApiClient` (alone and behind a `SessionStore`) against a local
//! mock of the auth and table endpoints.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use postboard_core::backend::{AuthBackend, AuthEvent, BackendError};
use postboard_core::models::{Credentials, ProfileRow};
use postboard_core::{ApiClient, SessionStore};
use serde_json::{json, Map};
use wiremock::matchers::{body_json, body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ANON_KEY: &str = "anon-test-key";

fn can_bind_localhost() -> bool {
    std::net::TcpListener::bind("127.0.0.1:0").is_ok()
}

fn client_for(server: &MockServer) -> ApiClient {
    ApiClient::new(&server.uri(), ANON_KEY, Duration::from_secs(5)).expect("build client")
}

fn session_json(user_id: &str, email: Option<&str>, expires_in: i64) -> serde_json::Value {
    json!({
        "access_token": format!("access-{}", user_id),
        "token_type": "bearer",
        "expires_in": expires_in,
        "refresh_token": format!("refresh-{}", user_id),
        "user": { "id": user_id, "email": email, "user_metadata": {} }
    })
}

async fn mount_sign_in(server: &MockServer, user_id: &str, email: Option<&str>, expires_in: i64) {
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "password"))
        .and(header("apikey", ANON_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_json(user_id, email, expires_in)))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_sign_in_holds_session_and_emits() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "password"))
        .and(header("apikey", ANON_KEY))
        .and(body_json(json!({ "email": "bob@example.com", "password": "hunter22" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_json("u-bob", Some("bob@example.com"), 3600)))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let mut changes = client.on_auth_state_change();

    let response = client
        .sign_in(&Credentials::new("bob@example.com", "hunter22"))
        .await
        .expect("sign in");
    let session = response.session.expect("session returned");
    assert_eq!(session.user.id, "u-bob");
    assert!(session.expires_at.is_some());

    let identity = client.current_identity().await.expect("identity held");
    assert_eq!(identity.email.as_deref(), Some("bob@example.com"));

    let change = changes.next().await.expect("notification");
    assert_eq!(change.event, AuthEvent::SignedIn);
}

#[tokio::test]
async fn test_sign_in_error_message_is_surfaced() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Invalid login credentials"
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .sign_in(&Credentials::new("bob@example.com", "wrong"))
        .await
        .expect_err("bad credentials");
    assert!(matches!(err, BackendError::Auth(ref m) if m == "Invalid login credentials"));
    assert!(client.current_identity().await.is_none());
}

#[tokio::test]
async fn test_sign_up_pending_confirmation() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/signup"))
        .and(body_partial_json(json!({
            "email": "alice@example.com",
            "data": { "username": "alice" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "u-alice",
            "email": "alice@example.com",
            "confirmation_sent_at": "2024-01-01T00:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let mut metadata = Map::new();
    metadata.insert("username".to_string(), json!("alice"));
    let response = client
        .sign_up(&Credentials::new("alice@example.com", "secret1"), metadata)
        .await
        .expect("sign up");

    assert_eq!(response.identity.map(|i| i.id), Some("u-alice".to_string()));
    assert!(response.session.is_none());
    assert!(client.current_identity().await.is_none());
}

#[tokio::test]
async fn test_profile_lookup_and_insert() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .and(query_param("id", "eq.u-missing"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .and(query_param("id", "eq.u-carol"))
        .and(query_param("select", "*"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "u-carol", "username": "carol", "display_name": "Carol C." }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/profiles"))
        .and(header("Prefer", "return=minimal"))
        .and(body_json(json!({ "id": "u-dan", "username": "dan", "display_name": "dan" })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(client.get_profile("u-missing").await.expect("lookup").is_none());

    let row = client.get_profile("u-carol").await.expect("lookup").expect("row");
    assert_eq!(row.username, "carol");
    assert_eq!(row.display_name.as_deref(), Some("Carol C."));

    client
        .insert_profile(&ProfileRow::new("u-dan", "dan"))
        .await
        .expect("insert");
}

#[tokio::test]
async fn test_sign_out_clears_session_when_request_fails() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let server = MockServer::start().await;
    mount_sign_in(&server, "u-bob", Some("bob@example.com"), 3600).await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/logout"))
        .and(header("authorization", "Bearer access-u-bob"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client
        .sign_in(&Credentials::new("bob@example.com", "hunter22"))
        .await
        .expect("sign in");
    let mut changes = client.on_auth_state_change();

    let err = client.sign_out().await.expect_err("logout fails");
    assert!(matches!(err, BackendError::Server(_)));
    assert!(client.current_identity().await.is_none());
    assert!(client.current_session().await.expect("no error").is_none());

    let change = changes.next().await.expect("notification");
    assert_eq!(change.event, AuthEvent::SignedOut);
}

#[tokio::test]
async fn test_current_session_refreshes_near_expiry() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let server = MockServer::start().await;
    // Expires inside the refresh buffer
    mount_sign_in(&server, "u-erin", Some("erin@example.com"), 30).await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "refresh_token"))
        .and(body_json(json!({ "refresh_token": "refresh-u-erin" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-renewed",
            "token_type": "bearer",
            "expires_in": 3600,
            "refresh_token": "refresh-renewed",
            "user": { "id": "u-erin", "email": "erin@example.com" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client
        .sign_in(&Credentials::new("erin@example.com", "secret1"))
        .await
        .expect("sign in");
    let mut changes = client.on_auth_state_change();

    let session = client
        .current_session()
        .await
        .expect("current session")
        .expect("session kept");
    assert_eq!(session.access_token, "access-renewed");
    assert!(!session.needs_refresh());

    let change = changes.next().await.expect("notification");
    assert_eq!(change.event, AuthEvent::TokenRefreshed);
}

#[tokio::test]
async fn test_store_sign_in_creates_missing_profile() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let server = MockServer::start().await;
    mount_sign_in(&server, "u-bob", Some("bob@example.com"), 3600).await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .and(header("authorization", "Bearer access-u-bob"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/profiles"))
        .and(body_json(json!({ "id": "u-bob", "username": "bob", "display_name": "bob" })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1..)
        .mount(&server)
        .await;

    let store = SessionStore::new(Arc::new(client_for(&server)));
    store.sign_in("bob@example.com", "hunter22").await.expect("sign in");

    let state = store.state();
    let identity = state.identity.expect("identity");
    let profile = state.profile.expect("profile");
    assert_eq!(identity.id, profile.id);
    assert_eq!(profile.username, "bob");
    assert_eq!(profile.email.as_deref(), Some("bob@example.com"));
}

#[tokio::test]
async fn test_current_session_kept_when_refresh_times_out() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let server = MockServer::start().await;
    mount_sign_in(&server, "u-erin", Some("erin@example.com"), 30).await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "refresh_token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(session_json("u-erin", Some("erin@example.com"), 3600))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let client = ApiClient::new(&server.uri(), ANON_KEY, Duration::from_secs(1)).expect("build client");
    client
        .sign_in(&Credentials::new("erin@example.com", "secret1"))
        .await
        .expect("sign in");

    let session = client
        .current_session()
        .await
        .expect("current session")
        .expect("unexpired session kept");
    assert_eq!(session.access_token, "access-u-erin");
    let identity = client.current_identity().await.expect("identity kept");
    assert_eq!(identity.id, "u-erin");
}

#[tokio::test]
async fn test_current_session_discarded_when_refresh_rejected() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let server = MockServer::start().await;
    mount_sign_in(&server, "u-erin", Some("erin@example.com"), 30).await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "refresh_token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Invalid Refresh Token: Already Used"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client
        .sign_in(&Credentials::new("erin@example.com", "secret1"))
        .await
        .expect("sign in");

    assert!(client.current_session().await.expect("no error").is_none());
    assert!(client.current_identity().await.is_none());
}
