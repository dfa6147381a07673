//! Integration tests for the HTTP surface.
//!
//! Builds the real axum router over an in-memory SQLite database and sends
//! requests via `tower::ServiceExt::oneshot` (no TCP listener needed).
//! Upstream providers are wiremock servers.

mod common;

use axum::body::Body;
use http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{memory_db, openai_completion, openai_sse, test_config};
use llmpool::api::{create_router, AppState, CHANNEL_HEADER, REQUEST_ID_HEADER, RETRIES_HEADER};

async fn setup_test_app(max_retries: u32) -> axum::Router {
    let db = memory_db().await;
    let state = AppState::new(db, test_config(max_retries))
        .await
        .expect("Failed to build app state");
    create_router(state)
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> http::Response<Body> {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: http::Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn provider_body(name: &str, base_url: &str, pool: &str, priority: i64) -> Value {
    json!({
        "name": name,
        "base_url": base_url,
        "api_key": format!("sk-{}", name),
        "pool_type": pool,
        "models": [format!("{}-model", name)],
        "priority": priority,
    })
}

fn dispatch_body() -> Value {
    json!({
        "messages": [
            {"role": "system", "content": "Extract metadata."},
            {"role": "user", "content": "Some paper"}
        ]
    })
}

#[tokio::test]
async fn test_health_reports_pool_sizes() {
    let app = setup_test_app(3).await;

    let response = send(&app, "GET", "/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));

    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["pools"]["metadata"], 0);
    assert_eq!(body["pools"]["analysis"], 0);
}

#[tokio::test]
async fn test_create_then_list_redacts_credentials() {
    let app = setup_test_app(3).await;

    let response = send(
        &app,
        "POST",
        "/api/admin/llm-providers",
        Some(provider_body("alpha", "https://alpha.test/v1", "metadata", 1)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = json_body(response).await;
    assert_eq!(created["credentials"], "[REDACTED]");

    send(
        &app,
        "POST",
        "/api/admin/llm-providers",
        Some(provider_body("beta", "https://beta.test/v1", "analysis", 1)),
    )
    .await;

    let response = send(&app, "GET", "/api/admin/llm-providers?pool_type=metadata", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let list = json_body(response).await;
    let list = list.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["name"], "alpha");
    assert!(!list[0].to_string().contains("sk-alpha"));

    let all = json_body(send(&app, "GET", "/api/admin/llm-providers", None).await).await;
    assert_eq!(all.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_set_primary_then_rebuild_reorders_channels() {
    let app = setup_test_app(3).await;

    send(
        &app,
        "POST",
        "/api/admin/llm-providers",
        Some(provider_body("a", "https://a.test/v1", "analysis", 1)),
    )
    .await;
    let b = json_body(
        send(
            &app,
            "POST",
            "/api/admin/llm-providers",
            Some(provider_body("b", "https://b.test/v1", "analysis", 5)),
        )
        .await,
    )
    .await;

    let response = send(
        &app,
        "POST",
        &format!("/api/admin/llm-providers/{}/set-primary", b["id"]),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["is_primary"], true);

    let response = send(&app, "POST", "/api/admin/pools/rebuild?pool=analysis", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["pools"]["analysis"], 2);

    let channels = json_body(send(&app, "GET", "/api/admin/pools/analysis/channels", None).await).await;
    let ids: Vec<&str> = channels["channels"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["[b-model] @ b.test#0", "[a-model] @ a.test#0"]);
    assert!(!channels.to_string().contains("sk-"));
}

#[tokio::test]
async fn test_update_toggle_and_delete() {
    let app = setup_test_app(3).await;
    let created = json_body(
        send(
            &app,
            "POST",
            "/api/admin/llm-providers",
            Some(provider_body("p", "https://p.test/v1", "metadata", 3)),
        )
        .await,
    )
    .await;
    let id = created["id"].as_i64().unwrap();

    let updated = json_body(
        send(
            &app,
            "PUT",
            &format!("/api/admin/llm-providers/{}", id),
            Some(json!({"priority": 1, "models": ["m1", "m2"]})),
        )
        .await,
    )
    .await;
    assert_eq!(updated["priority"], 1);
    assert_eq!(updated["models"], json!(["m1", "m2"]));
    assert_eq!(updated["name"], "p");

    let toggled = json_body(
        send(&app, "POST", &format!("/api/admin/llm-providers/{}/toggle", id), None).await,
    )
    .await;
    assert_eq!(toggled["enabled"], false);

    let response = send(&app, "DELETE", &format!("/api/admin/llm-providers/{}", id), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({"id": id, "deleted": true}));

    let response = send(&app, "DELETE", &format!("/api/admin/llm-providers/{}", id), None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_config_set_and_get() {
    let app = setup_test_app(3).await;

    let missing = json_body(send(&app, "GET", "/api/admin/config/max_retries", None).await).await;
    assert_eq!(missing["value"], Value::Null);

    let response = send(
        &app,
        "POST",
        "/api/admin/config",
        Some(json!({"key": "max_retries", "value": 5})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let fetched = json_body(send(&app, "GET", "/api/admin/config/max_retries", None).await).await;
    assert_eq!(fetched, json!({"key": "max_retries", "value": "5"}));

    for bad in [json!(0), json!("many"), json!(-2)] {
        let response = send(
            &app,
            "POST",
            "/api/admin/config",
            Some(json!({"key": "max_retries", "value": bad})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "value {}", bad);
    }
}

#[tokio::test]
async fn test_unknown_pool_and_empty_pool_errors() {
    let app = setup_test_app(3).await;

    let response = send(&app, "POST", "/v1/pools/summaries/dispatch", Some(dispatch_body())).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(&app, "POST", "/v1/pools/metadata/dispatch", Some(dispatch_body())).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert!(body["error"]["message"].as_str().unwrap().contains("metadata"));

    let response = send(&app, "POST", "/v1/pools/analysis/stream", Some(dispatch_body())).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let response = send(
        &app,
        "POST",
        "/v1/pools/metadata/dispatch",
        Some(json!({"messages": []})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_dispatch_end_to_end_with_failover_headers() {
    let app = setup_test_app(2).await;
    let a = MockServer::start().await;
    let b = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&a)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_completion("{\"title\":\"T\"}")))
        .expect(1)
        .mount(&b)
        .await;

    send(
        &app,
        "POST",
        "/api/admin/llm-providers",
        Some(provider_body("a", &format!("{}/v1", a.uri()), "metadata", 1)),
    )
    .await;
    send(
        &app,
        "POST",
        "/api/admin/llm-providers",
        Some(provider_body("b", &format!("{}/v1", b.uri()), "metadata", 2)),
    )
    .await;
    send(&app, "POST", "/api/admin/pools/rebuild", None).await;

    let mut body = dispatch_body();
    body["validate"] = json!({"json_fields": ["title"]});
    let response = send(&app, "POST", "/v1/pools/metadata/dispatch", Some(body)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let channel = response.headers()[CHANNEL_HEADER].to_str().unwrap().to_string();
    assert!(channel.starts_with("[b-model]"));
    let retries = response.headers()[RETRIES_HEADER].to_str().unwrap().to_string();
    assert!(retries.starts_with("2/[a-model]"), "retries header {}", retries);
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));

    let json = json_body(response).await;
    assert_eq!(json["attempts"], 3);
    assert_eq!(json["text"], "{\"title\":\"T\"}");
}

#[tokio::test]
async fn test_dispatch_exhausted_is_bad_gateway() {
    let app = setup_test_app(1).await;
    let a = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&a)
        .await;

    send(
        &app,
        "POST",
        "/api/admin/llm-providers",
        Some(provider_body("a", &format!("{}/v1", a.uri()), "analysis", 1)),
    )
    .await;
    send(&app, "POST", "/api/admin/pools/rebuild?pool=analysis", None).await;

    let response = send(&app, "POST", "/v1/pools/analysis/dispatch", Some(dispatch_body())).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = json_body(response).await;
    assert!(body["error"]["message"].as_str().unwrap().contains("429"));
}

#[tokio::test]
async fn test_stream_endpoint_emits_sse_events() {
    let app = setup_test_app(1).await;
    let a = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(openai_sse(&["Hel", "lo"], true), "text/event-stream"),
        )
        .mount(&a)
        .await;

    send(
        &app,
        "POST",
        "/api/admin/llm-providers",
        Some(provider_body("a", &format!("{}/v1", a.uri()), "analysis", 1)),
    )
    .await;
    send(&app, "POST", "/api/admin/pools/rebuild", None).await;

    let response = send(&app, "POST", "/v1/pools/analysis/stream", Some(dispatch_body())).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("event: chunk"));
    assert!(text.contains(r#"{"text":"Hel"}"#));
    assert!(text.contains("event: done"));
    assert!(text.contains(r#""text":"Hello""#));
}
