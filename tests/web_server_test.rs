mod common;

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use serde_json::{json, Value};

use common::{dispatcher_with, test_settings, CountingStore, Script, ScriptedModel};
use repurposely::web_server::{router, AppState};

const USER_HEADER: &str = "x-user-id";

fn server_with(script: Script) -> (TestServer, Arc<CountingStore>) {
    let model = Arc::new(ScriptedModel::new(script));
    let store = Arc::new(CountingStore::default());
    let dispatcher = dispatcher_with(model, store.clone(), test_settings());
    let state = AppState::new(dispatcher, USER_HEADER).unwrap();
    (TestServer::new(router(state)).unwrap(), store)
}

fn user(id: &'static str) -> (HeaderName, HeaderValue) {
    (HeaderName::from_static(USER_HEADER), HeaderValue::from_static(id))
}

#[tokio::test]
async fn test_index_renders_welcome() {
    let (server, _) = server_with(Script::Reply(vec![]));
    let response = server.get("/").await;
    response.assert_status_ok();
    assert!(response.text().contains("Welcome to Repurposely AI Writer!"));
    assert!(response.text().contains("30-day content plan"));
}

#[tokio::test]
async fn test_submit_streams_events_and_persists() {
    let (server, store) = server_with(Script::Reply(vec!["Here's", " a draft."]));
    let (name, value) = user("alice");

    let response = server
        .post("/api/chats/draft-1/messages")
        .add_header(name.clone(), value.clone())
        .json(&json!({"content": "Write an intro about tea"}))
        .await;
    response.assert_status_ok();

    let body = response.text();
    let user_at = body.find("event: user").expect("user event");
    let delta_at = body.find("event: delta").expect("delta event");
    let done_at = body.find("event: done").expect("done event");
    assert!(user_at < delta_at && delta_at < done_at);
    assert_eq!(body.matches("event: done").count(), 1);
    assert!(!body.contains("event: error"));
    assert!(body.contains("Here's a draft."));
    assert_eq!(store.saves(), 1);

    let rendered: Value = server
        .get("/api/chats/draft-1")
        .add_header(name.clone(), value.clone())
        .await
        .json();
    let rendered = rendered.as_array().unwrap();
    assert_eq!(rendered.len(), 2);
    assert_eq!(rendered[0]["id"], "draft-1-0");
    assert_eq!(rendered[0]["display"]["kind"], "user_text");
    assert_eq!(rendered[1]["display"]["value"], "Here's a draft.");

    let chats: Value = server.get("/api/chats").add_header(name, value).await.json();
    assert_eq!(chats.as_array().unwrap().len(), 1);
    assert_eq!(chats[0]["title"], "Write an intro about tea");
    assert_eq!(chats[0]["path"], "/chat/draft-1");
}

#[tokio::test]
async fn test_model_failure_streams_error_event() {
    let (server, _) = server_with(Script::Fail("upstream exploded"));

    let response = server
        .post("/api/chats/c1/messages")
        .json(&json!({"content": "hello"}))
        .await;
    response.assert_status_ok();

    let body = response.text();
    assert!(body.contains("event: error"));
    assert!(body.contains("upstream exploded"));
    assert!(!body.contains("event: done"));
}

#[tokio::test]
async fn test_anonymous_chat_is_not_saved() {
    let (server, store) = server_with(Script::Reply(vec!["Hi!"]));

    server
        .post("/api/chats/anon-1/messages")
        .json(&json!({"content": "hello"}))
        .await
        .assert_status_ok();
    assert_eq!(store.saves(), 0);

    let chats: Value = server.get("/api/chats").await.json();
    assert_eq!(chats, json!([]));

    let rendered: Value = server.get("/api/chats/anon-1").await.json();
    assert_eq!(rendered, json!([]));
}

#[tokio::test]
async fn test_anonymous_callers_share_nothing() {
    let (server, _) = server_with(Script::Reply(vec!["secret reply"]));

    server
        .post("/api/chats/shared/messages")
        .json(&json!({"content": "my private draft"}))
        .await
        .assert_status_ok();

    let rendered: Value = server.get("/api/chats/shared").await.json();
    assert_eq!(rendered, json!([]));

    // A second anonymous turn on the same id starts from an empty history.
    let response = server
        .post("/api/chats/shared/messages")
        .json(&json!({"content": "another caller"}))
        .await;
    response.assert_status_ok();
    assert!(!response.text().contains("my private draft"));
}

#[tokio::test]
async fn test_signed_in_chat_is_not_visible_to_anonymous_callers() {
    let (server, _) = server_with(Script::Reply(vec!["for alice"]));
    let (name, value) = user("alice");

    server
        .post("/api/chats/alice-chat/messages")
        .add_header(name, value)
        .json(&json!({"content": "alice only"}))
        .await
        .assert_status_ok();

    let rendered: Value = server.get("/api/chats/alice-chat").await.json();
    assert_eq!(rendered, json!([]));
}

#[tokio::test]
async fn test_unknown_chat_renders_empty() {
    let (server, _) = server_with(Script::Reply(vec![]));
    let (name, value) = user("alice");
    let rendered: Value = server
        .get("/api/chats/never-seen")
        .add_header(name, value)
        .await
        .json();
    assert_eq!(rendered, json!([]));
}

#[tokio::test]
async fn test_rejects_empty_content_and_bad_ids() {
    let (server, _) = server_with(Script::Reply(vec!["unused"]));

    let response = server
        .post("/api/chats/c1/messages")
        .json(&json!({"content": "  "}))
        .expect_failure()
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let response = server
        .post("/api/chats/bad.id/messages")
        .json(&json!({"content": "hello"}))
        .expect_failure()
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_chat() {
    let (server, _) = server_with(Script::Reply(vec!["Done."]));
    let (name, value) = user("alice");

    server
        .post("/api/chats/to-delete/messages")
        .add_header(name.clone(), value.clone())
        .json(&json!({"content": "temporary"}))
        .await
        .assert_status_ok();

    server
        .delete("/api/chats/to-delete")
        .expect_failure()
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    let (other_name, other_value) = user("bob");
    server
        .delete("/api/chats/to-delete")
        .add_header(other_name, other_value)
        .expect_failure()
        .await
        .assert_status(StatusCode::NOT_FOUND);

    server
        .delete("/api/chats/to-delete")
        .add_header(name.clone(), value.clone())
        .await
        .assert_status(StatusCode::NO_CONTENT);

    let chats: Value = server.get("/api/chats").add_header(name.clone(), value.clone()).await.json();
    assert_eq!(chats, json!([]));
    let rendered: Value = server.get("/api/chats/to-delete").add_header(name, value).await.json();
    assert_eq!(rendered, json!([]));
}
