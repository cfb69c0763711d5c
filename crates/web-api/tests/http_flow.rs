mod support;

use domain::{UserId, UserRole};
use serde_json::{json, Value};

use support::TestApp;

async fn get_json(app: &TestApp, path: &str, token: &str) -> Value {
    let response = app
        .http
        .get(app.url(path))
        .bearer_auth(token)
        .send()
        .await
        .expect("get");
    assert_eq!(response.status(), 200, "GET {path}");
    response.json().await.expect("json body")
}

async fn post_json(app: &TestApp, path: &str, token: &str) -> Value {
    let response = app
        .http
        .post(app.url(path))
        .bearer_auth(token)
        .send()
        .await
        .expect("post");
    assert_eq!(response.status(), 200, "POST {path}");
    response.json().await.expect("json body")
}

#[tokio::test]
async fn health_is_public() {
    let app = TestApp::spawn().await;
    let response = app.http.get(app.url("/health")).send().await.expect("health");
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn api_requires_credentials() {
    let app = TestApp::spawn().await;

    let response = app
        .http
        .get(app.url("/api/v1/messages/offline"))
        .send()
        .await
        .expect("offline");
    assert_eq!(response.status(), 401);

    let response = app
        .http
        .get(app.url("/api/v1/messages/offline"))
        .bearer_auth("garbage")
        .send()
        .await
        .expect("offline");
    assert_eq!(response.status(), 401);
    let body: Value = response.json().await.expect("error json");
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn offline_receiver_retrieves_queued_messages_once() {
    let app = TestApp::spawn().await;
    let (_, alice_token) = app.create_user("alice", UserRole::User).await;
    let (bob, bob_token) = app.create_user("bob", UserRole::User).await;

    for content in ["one", "two"] {
        let response = app
            .http
            .post(app.url("/api/v1/messages"))
            .bearer_auth(&alice_token)
            .json(&json!({ "receiver_id": bob.to_string(), "content": content }))
            .send()
            .await
            .expect("send");
        assert_eq!(response.status(), 201);
        let message: Value = response.json().await.expect("message json");
        assert_eq!(message["status"], "sent");
        assert_eq!(message["type"], "text");
    }
    app.settle().await;
    assert_eq!(app.offline.len(bob).await, 2);

    let first = get_json(&app, "/api/v1/messages/offline", &bob_token).await;
    assert_eq!(first["count"], 2);
    let contents: Vec<&str> = first["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, ["one", "two"]);

    let second = get_json(&app, "/api/v1/messages/offline", &bob_token).await;
    assert_eq!(second["count"], 0);
}

#[tokio::test]
async fn invalid_sends_are_rejected() {
    let app = TestApp::spawn().await;
    let (alice, alice_token) = app.create_user("alice", UserRole::User).await;

    let send = |body: Value| {
        app.http
            .post(app.url("/api/v1/messages"))
            .bearer_auth(&alice_token)
            .json(&body)
            .send()
    };

    let unknown = send(json!({ "receiver_id": UserId::generate().to_string(), "content": "hi" }))
        .await
        .expect("send");
    assert_eq!(unknown.status(), 404);
    let body: Value = unknown.json().await.expect("error json");
    assert_eq!(body["code"], "USER_NOT_FOUND");

    let to_self = send(json!({ "receiver_id": alice.to_string(), "content": "hi" }))
        .await
        .expect("send");
    assert_eq!(to_self.status(), 400);

    assert!(app.messages.is_empty().await);
}

#[tokio::test]
async fn media_message_keeps_attachment() {
    let app = TestApp::spawn().await;
    let (_, alice_token) = app.create_user("alice", UserRole::User).await;
    let (bob, _) = app.create_user("bob", UserRole::User).await;

    let response = app
        .http
        .post(app.url("/api/v1/messages"))
        .bearer_auth(&alice_token)
        .json(&json!({
            "receiver_id": bob.to_string(),
            "content": "[voice]",
            "type": "voice",
            "file_url": "https://cdn.example.com/v/1.amr",
            "file_size": 2048,
            "duration": 7
        }))
        .send()
        .await
        .expect("send");
    assert_eq!(response.status(), 201);

    let message: Value = response.json().await.expect("message json");
    assert_eq!(message["type"], "voice");
    assert_eq!(message["file_url"], "https://cdn.example.com/v/1.amr");
    assert_eq!(message["file_size"], 2048);
    assert_eq!(message["duration"], 7);
}

#[tokio::test]
async fn recall_checks_sender_and_existence() {
    let app = TestApp::spawn().await;
    let (_, alice_token) = app.create_user("alice", UserRole::User).await;
    let (bob, bob_token) = app.create_user("bob", UserRole::User).await;

    let message: Value = app
        .http
        .post(app.url("/api/v1/messages"))
        .bearer_auth(&alice_token)
        .json(&json!({ "receiver_id": bob.to_string(), "content": "hello" }))
        .send()
        .await
        .expect("send")
        .json()
        .await
        .expect("message json");
    let recall_url = app.url(&format!("/api/v1/messages/{}/recall", message["id"].as_str().unwrap()));

    let by_receiver = app
        .http
        .post(&recall_url)
        .bearer_auth(&bob_token)
        .send()
        .await
        .expect("recall");
    assert_eq!(by_receiver.status(), 403);

    let missing = app
        .http
        .post(app.url(&format!("/api/v1/messages/{}/recall", UserId::generate())))
        .bearer_auth(&alice_token)
        .send()
        .await
        .expect("recall");
    assert_eq!(missing.status(), 404);

    let by_sender = app
        .http
        .post(&recall_url)
        .bearer_auth(&alice_token)
        .send()
        .await
        .expect("recall");
    assert_eq!(by_sender.status(), 200);
    let recalled: Value = by_sender.json().await.expect("message json");
    assert_eq!(recalled["status"], "recalled");

    // recalled 是终态
    let again = app
        .http
        .post(&recall_url)
        .bearer_auth(&alice_token)
        .send()
        .await
        .expect("recall");
    assert_eq!(again.status(), 409);
}

#[tokio::test]
async fn mark_as_read_is_idempotent() {
    let app = TestApp::spawn().await;
    let (_, alice_token) = app.create_user("alice", UserRole::User).await;
    let (bob, bob_token) = app.create_user("bob", UserRole::User).await;

    let mut conversation = String::new();
    for content in ["a", "b", "c"] {
        let message: Value = app
            .http
            .post(app.url("/api/v1/messages"))
            .bearer_auth(&alice_token)
            .json(&json!({ "receiver_id": bob.to_string(), "content": content }))
            .send()
            .await
            .expect("send")
            .json()
            .await
            .expect("message json");
        conversation = message["conversation_id"].as_str().unwrap().to_string();
    }
    app.settle().await;

    let unread_path = format!("/api/v1/conversations/{conversation}/unread");
    let read_path = format!("/api/v1/conversations/{conversation}/read");

    assert_eq!(get_json(&app, &unread_path, &bob_token).await["unread"], 3);
    assert_eq!(post_json(&app, &read_path, &bob_token).await["updated"], 3);
    assert_eq!(get_json(&app, &unread_path, &bob_token).await["unread"], 0);
    assert_eq!(post_json(&app, &read_path, &bob_token).await["updated"], 0);
    assert_eq!(get_json(&app, &unread_path, &bob_token).await["unread"], 0);
}

#[tokio::test]
async fn requests_beyond_capacity_get_429() {
    let app = TestApp::spawn_rate_limited(3).await;

    for _ in 0..3 {
        let response = app.http.get(app.url("/health")).send().await.expect("health");
        assert_eq!(response.status(), 200);
    }

    let denied = app.http.get(app.url("/health")).send().await.expect("health");
    assert_eq!(denied.status(), 429);
    assert!(denied.headers().contains_key("retry-after"));
    let body: Value = denied.json().await.expect("error json");
    assert_eq!(body["code"], "RATE_LIMITED");

    // 不同来源使用独立的桶
    let other = app
        .http
        .get(app.url("/health"))
        .header("x-forwarded-for", "198.51.100.4")
        .send()
        .await
        .expect("health");
    assert_eq!(other.status(), 200);
}

/// alice 依次给 bob 发送若干条消息，返回会话 id 和消息 id
async fn seed_conversation(
    app: &TestApp,
    alice_token: &str,
    bob: UserId,
    contents: &[&str],
) -> (String, Vec<String>) {
    let mut conversation = String::new();
    let mut ids = Vec::new();
    for content in contents {
        let message: Value = app
            .http
            .post(app.url("/api/v1/messages"))
            .bearer_auth(alice_token)
            .json(&json!({ "receiver_id": bob.to_string(), "content": content }))
            .send()
            .await
            .expect("send")
            .json()
            .await
            .expect("message json");
        conversation = message["conversation_id"].as_str().unwrap().to_string();
        ids.push(message["id"].as_str().unwrap().to_string());
    }
    (conversation, ids)
}

fn contents_of(body: &Value) -> Vec<String> {
    body["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn conversation_messages_are_paged_for_members_only() {
    let app = TestApp::spawn().await;
    let (_, alice_token) = app.create_user("alice", UserRole::User).await;
    let (bob, bob_token) = app.create_user("bob", UserRole::User).await;
    let (_, mallory_token) = app.create_user("mallory", UserRole::User).await;
    let (conversation, _) = seed_conversation(&app, &alice_token, bob, &["a", "b", "c"]).await;

    let path = format!("/api/v1/conversations/{conversation}/messages?page=1&page_size=2");
    let first = get_json(&app, &path, &bob_token).await;
    assert_eq!(first["total"], 3);
    assert_eq!(first["page"], 1);
    assert_eq!(first["page_size"], 2);
    assert_eq!(contents_of(&first), ["c", "b"]);

    let path = format!("/api/v1/conversations/{conversation}/messages?page=2&page_size=2");
    assert_eq!(contents_of(&get_json(&app, &path, &alice_token).await), ["a"]);

    let forbidden = app
        .http
        .get(app.url(&format!("/api/v1/conversations/{conversation}/messages")))
        .bearer_auth(&mallory_token)
        .send()
        .await
        .expect("list as outsider");
    assert_eq!(forbidden.status(), 403);
    let body: Value = forbidden.json().await.expect("error json");
    assert_eq!(body["code"], "NOT_CONVERSATION_MEMBER");

    let missing = app
        .http
        .get(app.url(&format!("/api/v1/conversations/{}/messages", UserId::generate())))
        .bearer_auth(&bob_token)
        .send()
        .await
        .expect("list unknown");
    assert_eq!(missing.status(), 404);
}

#[tokio::test]
async fn history_uses_cursor_and_clamps_limit() {
    let app = TestApp::spawn().await;
    let (_, alice_token) = app.create_user("alice", UserRole::User).await;
    let (bob, bob_token) = app.create_user("bob", UserRole::User).await;
    let (_, mallory_token) = app.create_user("mallory", UserRole::User).await;
    let (conversation, ids) = seed_conversation(&app, &alice_token, bob, &["a", "b", "c"]).await;

    let base = format!("/api/v1/conversations/{conversation}/history");
    let all = get_json(&app, &format!("{base}?limit=500"), &bob_token).await;
    assert_eq!(all["total"], 3);
    assert_eq!(contents_of(&all), ["c", "b", "a"]);

    let defaulted = get_json(&app, &format!("{base}?limit=0"), &bob_token).await;
    assert_eq!(defaulted["total"], 3);

    let before_c = get_json(&app, &format!("{base}?before={}&limit=1", ids[2]), &bob_token).await;
    assert_eq!(contents_of(&before_c), ["b"]);

    let forbidden = app
        .http
        .get(app.url(&base))
        .bearer_auth(&mallory_token)
        .send()
        .await
        .expect("history as outsider");
    assert_eq!(forbidden.status(), 403);
}

#[tokio::test]
async fn search_finds_own_messages_by_keyword() {
    let app = TestApp::spawn().await;
    let (_, alice_token) = app.create_user("alice", UserRole::User).await;
    let (bob, bob_token) = app.create_user("bob", UserRole::User).await;
    let (_, carol_token) = app.create_user("carol", UserRole::User).await;
    seed_conversation(&app, &alice_token, bob, &["apple", "Banana split", "cherry"]).await;

    let found = get_json(&app, "/api/v1/messages/search?keyword=banana", &bob_token).await;
    assert_eq!(found["total"], 1);
    assert_eq!(found["page"], 1);
    assert_eq!(found["page_size"], 20);
    assert_eq!(contents_of(&found), ["Banana split"]);

    let outsider = get_json(&app, "/api/v1/messages/search?keyword=banana", &carol_token).await;
    assert_eq!(outsider["total"], 0);

    let empty = get_json(&app, "/api/v1/messages/search?keyword=", &bob_token).await;
    assert_eq!(empty["total"], 0);
    assert!(empty["messages"].as_array().unwrap().is_empty());
}
