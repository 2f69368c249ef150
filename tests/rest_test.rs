//! Integration tests for the REST API.
//! Spins up the real axum server on a random port and drives the full
//! seed → plan → apply → undo → redo lifecycle over HTTP.

use async_trait::async_trait;
use islad::{
    config::IslaConfig,
    plan::model::{ModelRequest, PlanModel},
    patch::error::PatchError,
    rest, storage::Storage, AppContext,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

/// Find a free local port by binding to port 0.
fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Canned model backend so no network is needed.
struct CannedModel {
    response: String,
}

#[async_trait]
impl PlanModel for CannedModel {
    async fn generate(&self, _request: &ModelRequest) -> Result<String, PatchError> {
        Ok(self.response.clone())
    }
}

async fn start_server(dir: &TempDir, canned: &str) -> String {
    let (_ctx, base) = start_server_with_ctx(dir, canned).await;
    base
}

async fn start_server_with_ctx(dir: &TempDir, canned: &str) -> (Arc<AppContext>, String) {
    let port = find_free_port();
    let sync_port = find_free_port();
    let config = IslaConfig::new(
        Some(port),
        Some(sync_port),
        Some(dir.path().to_path_buf()),
        Some("error".to_string()),
        None,
    );
    let storage = Storage::new(dir.path()).await.unwrap();
    let model = Arc::new(CannedModel {
        response: canned.to_string(),
    });
    let ctx = Arc::new(AppContext::new(config, storage, model));

    let server_ctx = ctx.clone();
    tokio::spawn(async move {
        let _ = rest::start_rest_server(server_ctx).await;
    });
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    (ctx, format!("http://127.0.0.1:{port}"))
}

#[tokio::test]
async fn health_reports_status_and_ports() {
    let dir = TempDir::new().unwrap();
    let base = start_server(&dir, "{}").await;

    let body: Value = reqwest::get(format!("{base}/api/v1/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["openProjects"], 0);
    assert!(body["port"].as_u64().is_some());
    assert!(body["syncPort"].as_u64().is_some());
}

#[tokio::test]
async fn unknown_project_is_404() {
    let dir = TempDir::new().unwrap();
    let base = start_server(&dir, "{}").await;

    let resp = reqwest::get(format!("{base}/api/v1/projects/nope"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("nope"));
}

#[tokio::test]
async fn plan_requires_a_user_message() {
    let dir = TempDir::new().unwrap();
    let base = start_server(&dir, "{}").await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/api/v1/plan"))
        .json(&json!({
            "templateSlug": "medtrack",
            "messages": [{ "role": "user", "content": "   " }]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn plan_accepts_image_only_user_message() {
    let dir = TempDir::new().unwrap();
    let base = start_server(&dir, "{\"changes\":[]}").await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/api/v1/plan"))
        .json(&json!({
            "templateSlug": "medtrack",
            "messages": [{
                "role": "user",
                "content": "",
                "images": ["data:image/png;base64,AA"]
            }]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn plan_returns_raw_model_text() {
    let canned = r#"{"changes":[{"patchType":"replace-snippet","filePath":"app/live/medtrack/page.tsx","match":"bg-sky-500","content":"bg-emerald-500","description":"recolor button"}]}"#;
    let dir = TempDir::new().unwrap();
    let base = start_server(&dir, canned).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/api/v1/plan"))
        .json(&json!({
            "templateSlug": "medtrack",
            "messages": [{ "role": "user", "content": "make the button green" }]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["projectId"], "medtrack");
    assert_eq!(body["raw"].as_str().unwrap(), canned);
}

#[tokio::test]
async fn apply_undo_redo_round_trip() {
    let dir = TempDir::new().unwrap();
    let base = start_server(&dir, "{}").await;
    let client = reqwest::Client::new();

    let raw_plan = r#"{"changes":[{"patchType":"replace-snippet","filePath":"app/live/medtrack/page.tsx","match":"bg-sky-500","content":"bg-emerald-500","description":"recolor"}]}"#;

    // Apply (seeds the project from the template on first touch)
    let resp = client
        .post(format!("{base}/api/v1/projects/medtrack/apply"))
        .json(&json!({ "rawPlan": raw_plan, "templateSlug": "medtrack" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["canUndo"], true);
    assert_eq!(body["canRedo"], false);

    let snapshot: Value = client
        .get(format!("{base}/api/v1/projects/medtrack"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(snapshot["content"].as_str().unwrap().contains("bg-emerald-500"));

    // Undo restores the seed
    let resp = client
        .post(format!("{base}/api/v1/projects/medtrack/undo"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["canUndo"], false);
    assert_eq!(body["canRedo"], true);

    let snapshot: Value = client
        .get(format!("{base}/api/v1/projects/medtrack"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(snapshot["content"].as_str().unwrap().contains("bg-sky-500"));

    // Redo brings the edit back
    let resp = client
        .post(format!("{base}/api/v1/projects/medtrack/redo"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let snapshot: Value = client
        .get(format!("{base}/api/v1/projects/medtrack"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(snapshot["content"].as_str().unwrap().contains("bg-emerald-500"));
}

#[tokio::test]
async fn undo_at_boundary_is_quiet() {
    let dir = TempDir::new().unwrap();
    let (ctx, base) = start_server_with_ctx(&dir, "{}").await;
    let client = reqwest::Client::new();

    let raw_plan = r#"{"changes":[{"patchType":"replace-snippet","filePath":"app/live/medtrack/page.tsx","match":"bg-sky-500","content":"bg-emerald-500","description":"recolor"}]}"#;
    client
        .post(format!("{base}/api/v1/projects/medtrack/apply"))
        .json(&json!({ "rawPlan": raw_plan, "templateSlug": "medtrack" }))
        .send()
        .await
        .unwrap();

    // A real undo moves the cursor and announces a preview reload.
    let version_before = ctx.sync.preview_version();
    let body: Value = client
        .post(format!("{base}/api/v1/projects/medtrack/undo"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["moved"], true);
    assert!(ctx.sync.preview_version() > version_before);

    // Now at the seed baseline: the call succeeds but announces nothing.
    let version_before = ctx.sync.preview_version();
    let resp = client
        .post(format!("{base}/api/v1/projects/medtrack/undo"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["moved"], false);
    assert_eq!(body["canUndo"], false);
    assert_eq!(ctx.sync.preview_version(), version_before);
}

#[tokio::test]
async fn malformed_plan_is_422() {
    let dir = TempDir::new().unwrap();
    let base = start_server(&dir, "{}").await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/api/v1/projects/medtrack/apply"))
        .json(&json!({
            "rawPlan": "sorry, I cannot help with that",
            "templateSlug": "medtrack"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 422);
}

#[tokio::test]
async fn traversal_path_is_400() {
    let dir = TempDir::new().unwrap();
    let base = start_server(&dir, "{}").await;
    let client = reqwest::Client::new();

    let raw_plan = r#"{"changes":[{"patchType":"replace","filePath":"../../etc/passwd","content":"x"}]}"#;
    let resp = client
        .post(format!("{base}/api/v1/projects/medtrack/apply"))
        .json(&json!({ "rawPlan": raw_plan, "templateSlug": "medtrack" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn stale_snippet_is_409() {
    let dir = TempDir::new().unwrap();
    let base = start_server(&dir, "{}").await;
    let client = reqwest::Client::new();

    let raw_plan = r#"{"changes":[{"patchType":"replace-snippet","filePath":"app/live/medtrack/page.tsx","match":"no-such-snippet-anywhere","content":"x"}]}"#;
    let resp = client
        .post(format!("{base}/api/v1/projects/medtrack/apply"))
        .json(&json!({ "rawPlan": raw_plan, "templateSlug": "medtrack" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
}
