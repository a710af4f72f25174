//! HTTP surface integration tests: routing, status codes, and payload
//! shapes, driven through the full router with scripted collaborators.

mod helpers;

use axum::http::StatusCode;
use bankiq_agent::build_router;
use helpers::*;
use serde_json::json;
use std::time::Duration;

const PEER_CSV: &str = "Bank,Metric,Quarter,Value\nJPMorgan Chase,ROA,2025-Q1,1.32\nZions Bancorporation,ROA,2025-Q1,1.05\n";

#[tokio::test]
async fn health_reports_module_and_uptime() {
    let app = build_router(test_state(ScriptedInvoker::text(&[]), vec![]));

    let (status, body) = request_json(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "bankiq-agent");
    assert!(body["uptime_seconds"].is_u64());
}

#[tokio::test]
async fn submit_returns_202_with_job_id() {
    let app = build_router(test_state(ScriptedInvoker::text(&["hi"]), vec![]));

    let (status, body) = request_json(
        &app,
        "POST",
        "/jobs",
        Some(json!({"prompt": "hello there"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "queued");
    assert!(body["job_id"].is_string());
}

#[tokio::test]
async fn blank_prompt_is_rejected_without_creating_a_job() {
    let app = build_router(test_state(ScriptedInvoker::text(&[]), vec![]));

    let (status, body) =
        request_json(&app, "POST", "/jobs", Some(json!({"prompt": "   "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    let (_, jobs) = request_json(&app, "GET", "/admin/jobs", None).await;
    assert_eq!(jobs["jobs"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn unknown_job_is_404_everywhere() {
    let app = build_router(test_state(ScriptedInvoker::text(&[]), vec![]));
    let id = uuid::Uuid::new_v4();

    for uri in [
        format!("/jobs/{id}"),
        format!("/jobs/{id}/result"),
        format!("/jobs/{id}/stream"),
    ] {
        let (status, _) = request_json(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "GET {uri}");
    }

    let (status, _) = request_json(&app, "DELETE", &format!("/jobs/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn result_before_terminal_is_conflict() {
    let app = build_router(test_state(
        ScriptedInvoker::slow(&["eventually"], Duration::from_millis(500)),
        vec![],
    ));

    let (_, submitted) =
        request_json(&app, "POST", "/jobs", Some(json!({"prompt": "slow one"}))).await;
    let id = submitted["job_id"].as_str().unwrap().to_string();

    let (status, body) = request_json(&app, "GET", &format!("/jobs/{id}/result"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");

    request_json(&app, "DELETE", &format!("/jobs/{id}"), None).await;
}

#[tokio::test]
async fn completed_job_serves_result_and_replayed_stream() {
    let app = build_router(test_state(ScriptedInvoker::text(&["A", "B", "C"]), vec![]));

    let (_, submitted) =
        request_json(&app, "POST", "/jobs", Some(json!({"prompt": "stream me"}))).await;
    let id = submitted["job_id"].as_str().unwrap().to_string();

    let terminal = wait_terminal(&app, &id).await;
    assert_eq!(terminal["status"], "completed");

    let (status, body) = request_json(&app, "GET", &format!("/jobs/{id}/result"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "ABC");

    // The SSE endpoint replays the buffered chunks and then closes with a
    // terminal event, so the whole body is collectable after completion.
    let (status, sse) = raw_request(&app, &format!("/jobs/{id}/stream")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(sse.contains("event: chunk"));
    assert!(sse.contains("event: done"));
    let first_chunk = sse.find(r#""payload":"A""#).unwrap();
    let last_chunk = sse.find(r#""payload":"C""#).unwrap();
    assert!(first_chunk < last_chunk);
}

#[tokio::test]
async fn cancel_reports_true_then_false() {
    let app = build_router(test_state(
        ScriptedInvoker::slow(&["x", "y"], Duration::from_millis(200)),
        vec![],
    ));

    let (_, submitted) =
        request_json(&app, "POST", "/jobs", Some(json!({"prompt": "cancel me"}))).await;
    let id = submitted["job_id"].as_str().unwrap().to_string();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let (status, body) = request_json(&app, "DELETE", &format!("/jobs/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], true);

    let (_, body) = request_json(&app, "DELETE", &format!("/jobs/{id}"), None).await;
    assert_eq!(body["cancelled"], false);

    let (_, result) = request_json(&app, "GET", &format!("/jobs/{id}/result"), None).await;
    assert_eq!(result["error"]["code"], "Cancelled");
}

#[tokio::test]
async fn cache_admin_surface_round_trips() {
    let app = build_router(test_state(ScriptedInvoker::text(&[]), vec![]));

    let (status, stats) = request_json(&app, "GET", "/admin/cache-stats", None).await;
    assert_eq!(status, StatusCode::OK);
    for category in ["filings", "bank-metrics", "bank-search"] {
        assert!(stats["categories"][category]["count"].is_u64(), "{category}");
    }

    let (status, cleared) = request_json(
        &app,
        "POST",
        "/admin/cache-clear",
        Some(json!({"category": "bank-metrics"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cleared["cleared"], "bank-metrics");

    let (status, cleared) = request_json(
        &app,
        "POST",
        "/admin/cache-clear",
        Some(json!({"category": "all"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cleared["cleared"], "all");

    let (status, _) = request_json(
        &app,
        "POST",
        "/admin/cache-clear",
        Some(json!({"category": "sessions"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn uploads_store_and_feed_local_jobs() {
    let app = build_router(test_state(ScriptedInvoker::text(&["peer summary"]), vec![]));

    let (status, uploaded) = request_json(
        &app,
        "POST",
        "/uploads",
        Some(json!({"filename": "peers.csv", "content": PEER_CSV})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(uploaded["rows"], 2);
    let upload_id = uploaded["upload_id"].as_str().unwrap().to_string();

    let (status, _) = request_json(
        &app,
        "POST",
        "/uploads",
        Some(json!({"filename": "bad.csv", "content": "Institution,Score\nJPM,9\n"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // A job referencing the upload resolves [local_upload, live] and is
    // satisfied locally.
    let (_, submitted) = request_json(
        &app,
        "POST",
        "/jobs",
        Some(json!({
            "prompt": "compare my peers on ROA",
            "bank": "JPMorgan Chase",
            "peer_banks": ["Zions Bancorporation"],
            "metric": "ROA",
            "upload_id": upload_id,
        })),
    )
    .await;
    let id = submitted["job_id"].as_str().unwrap().to_string();

    let terminal = wait_terminal(&app, &id).await;
    assert_eq!(terminal["status"], "completed");
    assert_eq!(terminal["source"], "local_upload");
}

/// Fetch a URI and return the full body as text (for SSE transcripts).
async fn raw_request(app: &axum::Router, uri: &str) -> (StatusCode, String) {
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    let response = app
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .uri(uri)
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&bytes).to_string())
}
