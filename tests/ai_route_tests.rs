use axum::{
    Json, Router,
    body::{Body, to_bytes},
    http::{HeaderMap, Request, StatusCode, header},
    routing::post,
};
use planpilot::assistant::{
    AssistantClient, CHAT_FALLBACK_REPLY, ChatSession, UpstreamClient,
};
use planpilot::config::LlmConfig;
use planpilot::server::{PilotState, pilot_router};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower::ServiceExt;
use url::Url;

/// OpenAI-compatible stand-in: echoes the system prompt, or fails for `"fail"`.
async fn fake_completions(headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some("Bearer upstream-key");
    if !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": { "message": "Invalid API Key" } })),
        );
    }
    let system = body["messages"][0]["content"].as_str().unwrap_or_default();
    if system == "fail" {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": { "message": "over capacity" } })),
        );
    }
    let text = format!(
        "{system}|{}|{}",
        body["max_tokens"],
        body["messages"].as_array().map_or(0, Vec::len)
    );
    (
        StatusCode::OK,
        Json(json!({ "choices": [{ "message": { "role": "assistant", "content": text } }] })),
    )
}

async fn spawn_upstream() -> Url {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind fake upstream");
    let addr = listener.local_addr().expect("no local addr");
    let app = Router::new().route("/v1/chat/completions", post(fake_completions));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Url::parse(&format!("http://{addr}/v1/chat/completions")).expect("invalid upstream url")
}

async fn app(access_key: &str, rps: u32) -> Router {
    let cfg = LlmConfig {
        upstream_url: spawn_upstream().await,
        api_key: "upstream-key".to_string(),
        ..LlmConfig::default()
    };
    let upstream = UpstreamClient::with_client(&cfg, reqwest::Client::new());
    pilot_router(PilotState::with_upstream(upstream, access_key, rps), &[])
}

fn post_ai(body: &str, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/ai")
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header("authorization", format!("Bearer {key}"));
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("failed to build request")
}

async fn json_body(resp: axum::response::Response) -> Value {
    let body = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("failed to read response body");
    serde_json::from_slice(&body).expect("response body was not json")
}

#[tokio::test]
async fn answers_are_normalized_to_content_blocks() {
    let app = app("", 10).await;
    let resp = app
        .oneshot(post_ai(
            r#"{"system":"be brief","messages":[{"role":"user","content":"hi"}]}"#,
            None,
        ))
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key("x-request-id"));
    assert_eq!(
        json_body(resp).await,
        json!({ "content": [{ "type": "text", "text": "be brief|1000|2" }] })
    );
}

#[tokio::test]
async fn explicit_max_tokens_is_forwarded() {
    let app = app("", 10).await;
    let resp = app
        .oneshot(post_ai(
            r#"{"system":"s","messages":[],"max_tokens":64}"#,
            None,
        ))
        .await
        .expect("request failed");
    assert_eq!(
        json_body(resp).await["content"][0]["text"],
        json!("s|64|1")
    );
}

#[tokio::test]
async fn upstream_errors_pass_through() {
    let app = app("", 10).await;
    let resp = app
        .oneshot(post_ai(r#"{"system":"fail","messages":[]}"#, None))
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        json_body(resp).await,
        json!({ "error": { "message": "over capacity" } })
    );
}

#[tokio::test]
async fn other_methods_are_not_allowed() {
    let app = app("", 10).await;
    let resp = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/ai")
                .body(Body::empty())
                .expect("failed to build request"),
        )
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(json_body(resp).await, json!({ "error": "Method not allowed" }));
}

#[tokio::test]
async fn configured_key_is_required() {
    let app = app("pwd", 10).await;

    let resp = app
        .clone()
        .oneshot(post_ai(r#"{"messages":[]}"#, None))
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app
        .clone()
        .oneshot(post_ai(r#"{"messages":[]}"#, Some("wrong")))
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app
        .clone()
        .oneshot(post_ai("not-json", Some("pwd")))
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app
        .oneshot(post_ai(r#"{"messages":[]}"#, Some("pwd")))
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn excess_requests_are_rate_limited() {
    // one per second with a burst of two
    let app = app("", 1).await;
    let mut statuses = Vec::new();
    for _ in 0..3 {
        let resp = app
            .clone()
            .oneshot(post_ai(r#"{"messages":[]}"#, None))
            .await
            .expect("request failed");
        statuses.push(resp.status());
    }
    assert_eq!(
        statuses,
        [StatusCode::OK, StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]
    );
}

#[tokio::test]
async fn unknown_paths_are_not_found() {
    let app = app("", 10).await;
    let resp = app
        .oneshot(
            Request::builder()
                .uri("/nope")
                .body(Body::empty())
                .expect("failed to build request"),
        )
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

async fn serve(app: Router) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind service");
    let addr = listener.local_addr().expect("no local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Url::parse(&format!("http://{addr}/api/ai")).expect("invalid service url")
}

#[tokio::test]
async fn chat_session_keeps_the_conversation() {
    let endpoint = serve(app("pwd", 10).await).await;
    let client = AssistantClient::new(endpoint, Some("pwd".to_string())).expect("client build failed");
    let mut chat = ChatSession::new(client, Some(200));

    assert_eq!(chat.send("   ", "ctx".to_string()).await.expect("blank send failed"), None);
    assert!(chat.messages().is_empty());

    let reply = chat
        .send("What is due?", "ctx".to_string())
        .await
        .expect("send failed");
    assert_eq!(reply.as_deref(), Some("ctx|200|2"));

    let reply = chat
        .send("And tomorrow?", "ctx".to_string())
        .await
        .expect("send failed");
    assert_eq!(reply.as_deref(), Some("ctx|200|4"));
    assert_eq!(chat.messages().len(), 4);
}

#[tokio::test]
async fn chat_session_records_the_fallback_on_failure() {
    let endpoint = serve(app("pwd", 10).await).await;
    let client = AssistantClient::new(endpoint, Some("wrong".to_string())).expect("client build failed");
    let mut chat = ChatSession::new(client, None);

    assert!(chat.send("hello", "ctx".to_string()).await.is_err());
    let last = chat.messages().last().expect("no reply recorded");
    assert_eq!(last.content, CHAT_FALLBACK_REPLY);
}
