use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use reqwest::StatusCode;
use serde_json::{Value, json};

use vectorsmith_api::app::{AppServices, build_app};
use vectorsmith_core::UserId;
use vectorsmith_generation::{CompletionRequest, ModelProvider, ProviderError, TextStream};
use vectorsmith_infra::config::Settings;
use vectorsmith_infra::store::InMemoryStore;

const SVG_CHUNKS: [&str; 3] = [
    r#"<svg viewBox="0 0 800 800">"#,
    r#"<circle cx="400" cy="400" r="120"/>"#,
    "</svg>",
];

/// Answers every completion with the same fragments.
struct FixedProvider;

#[async_trait]
impl ModelProvider for FixedProvider {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn stream_completion(&self, _request: CompletionRequest) -> Result<TextStream, ProviderError> {
        let fragments = SVG_CHUNKS.iter().map(|c| Ok::<_, ProviderError>(c.to_string())).collect::<Vec<_>>();
        Ok(Box::pin(stream::iter(fragments)))
    }
}

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(users: &[(UserId, i64)]) -> Self {
        let store = Arc::new(InMemoryStore::new());
        for (user, credits) in users {
            store.upsert_user(*user, *credits).unwrap();
        }
        let services = AppServices::in_memory(store, Arc::new(FixedProvider), &Settings::default());

        // Same router as prod, bound to an ephemeral port.
        let app = build_app(Arc::new(services));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn as_user(builder: reqwest::RequestBuilder, user: UserId) -> reqwest::RequestBuilder {
    builder.header("x-user-id", user.to_string())
}

/// `data:` payloads of an SSE body, in order.
fn sse_frames(body: &str) -> Vec<Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim()).expect("frame is JSON"))
        .collect()
}

async fn balance(client: &reqwest::Client, srv: &TestServer, user: UserId) -> i64 {
    let body: Value = as_user(client.get(srv.url("/credits")), user)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    body["balance"].as_i64().unwrap()
}

#[tokio::test]
async fn health_needs_no_identity() {
    let srv = TestServer::spawn(&[]).await;
    let res = reqwest::get(srv.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn identity_is_required_for_everything_else() {
    let srv = TestServer::spawn(&[]).await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/credits")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "unauthenticated");

    let res = client
        .get(srv.url("/credits"))
        .header("x-user-id", "nope")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn stream_relays_frames_and_charges_on_completion() {
    let user = UserId::new();
    let srv = TestServer::spawn(&[(user, 3)]).await;
    let client = reqwest::Client::new();

    let res = as_user(client.post(srv.url("/generations/stream")), user)
        .json(&json!({ "subject": "mountain sunset", "style": "minimalist", "aspectRatio": "16:9" }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let headers = res.headers();
    assert!(headers["content-type"].to_str().unwrap().starts_with("text/event-stream"));
    assert_eq!(headers["cache-control"], "no-cache, no-transform");
    assert_eq!(headers["x-accel-buffering"], "no");

    let frames = sse_frames(&res.text().await.unwrap());
    assert_eq!(frames.first().unwrap()["status"], "started");
    let id = frames[0]["id"].as_i64().unwrap();
    let streamed: String = frames
        .iter()
        .filter(|f| f["status"] == "streaming")
        .map(|f| f["chunk"].as_str().unwrap())
        .collect();
    assert_eq!(streamed, SVG_CHUNKS.concat());
    assert_eq!(frames.last().unwrap(), &json!({ "status": "completed", "id": id }));

    let detail: Value = as_user(client.get(srv.url(&format!("/generations/{id}"))), user)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(detail["config"]["height"], 450);
    let content = detail["versions"][0]["content"].as_str().unwrap();
    assert!(content.contains(r#"xmlns="http://www.w3.org/2000/svg""#));

    assert_eq!(balance(&client, &srv, user).await, 2);
}

#[tokio::test]
async fn stream_without_credit_is_a_single_error_frame() {
    let user = UserId::new();
    let srv = TestServer::spawn(&[(user, 0)]).await;
    let client = reqwest::Client::new();

    let res = as_user(client.post(srv.url("/generations/stream")), user)
        .json(&json!({ "subject": "owl" }))
        .send()
        .await
        .unwrap();

    let frames = sse_frames(&res.text().await.unwrap());
    assert_eq!(frames, vec![json!({ "status": "error", "message": "Insufficient credits" })]);
}

#[tokio::test]
async fn malformed_body_is_a_json_400() {
    let user = UserId::new();
    let srv = TestServer::spawn(&[(user, 1)]).await;
    let client = reqwest::Client::new();

    let res = as_user(client.post(srv.url("/generations")), user)
        .json(&json!({ "style": "no subject" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_body");
}

#[tokio::test]
async fn owner_edits_and_shares_a_generation() {
    let owner = UserId::new();
    let stranger = UserId::new();
    let srv = TestServer::spawn(&[(owner, 2), (stranger, 0)]).await;
    let client = reqwest::Client::new();

    let res = as_user(client.post(srv.url("/generations")), owner)
        .json(&json!({ "subject": "owl" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: Value = res.json().await.unwrap();
    let id = created["id"].as_i64().unwrap();
    assert_eq!(created["versions"][0]["versionNumber"], 1);
    assert_eq!(created["versions"][0]["aiGenerated"], true);
    assert_eq!(balance(&client, &srv, owner).await, 1);

    // Private by default.
    let res = as_user(client.get(srv.url(&format!("/generations/{id}"))), stranger)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = as_user(client.patch(srv.url(&format!("/generations/{id}/visibility"))), stranger)
        .json(&json!({ "isPublic": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = as_user(client.post(srv.url(&format!("/generations/{id}/versions"))), owner)
        .json(&json!({ "content": "<svg xmlns=\"http://www.w3.org/2000/svg\"/>" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let v2: Value = res.json().await.unwrap();
    assert_eq!(v2["versionNumber"], 2);

    let res = as_user(client.post(srv.url(&format!("/generations/{id}/versions"))), owner)
        .json(&json!({ "content": "<svg/>", "versionNumber": 2 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let v1_id = created["versions"][0]["id"].as_i64().unwrap();
    let res = as_user(client.put(srv.url(&format!("/versions/{v1_id}"))), owner)
        .json(&json!({ "content": "<svg/>" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let v1: Value = res.json().await.unwrap();
    assert_eq!(v1["content"], "<svg/>");
    assert_eq!(v1["editHistory"].as_array().unwrap().len(), 2);
    assert_eq!(v1["editHistory"][0]["content"], "<svg/>");

    let res = as_user(client.patch(srv.url(&format!("/generations/{id}/visibility"))), owner)
        .json(&json!({ "isPublic": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let listing: Value = as_user(client.get(srv.url("/generations?page=1&page_size=10")), stranger)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listing["total"], 1);
    assert_eq!(listing["pageSize"], 10);
    assert_eq!(listing["items"][0]["id"], id);
    assert_eq!(listing["items"][0]["latestVersion"], 2);
}

#[tokio::test]
async fn admin_sees_private_records_and_bad_ids_are_rejected() {
    let owner = UserId::new();
    let admin = UserId::new();
    let srv = TestServer::spawn(&[(owner, 1), (admin, 0)]).await;
    let client = reqwest::Client::new();

    let created: Value = as_user(client.post(srv.url("/generations")), owner)
        .json(&json!({ "subject": "owl" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_i64().unwrap();

    let res = as_user(client.get(srv.url(&format!("/generations/{id}"))), admin)
        .header("x-user-role", "admin")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = as_user(client.get(srv.url("/generations/abc")), admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_id");

    let res = as_user(client.get(srv.url("/generations/999")), owner)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
