//! Integration tests for the training orchestrator API.
//!
//! These drive the real router end to end: admission, polling, control
//! signals, prediction and the error taxonomy.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use neuroforge::{api_router, AppState, Config};
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceExt;

fn test_app() -> Router {
    let state = AppState::new(Config::default()).expect("state init");
    api_router(state)
}

/// Helper to make a JSON request to the router.
async fn json_request(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    };

    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let value: Value = serde_json::from_slice(&bytes).unwrap_or(json!({}));
    (status, value)
}

fn iris_layers() -> Value {
    json!([
        {"type": "input", "neurons": 4},
        {"type": "hidden", "neurons": 16, "activation": "relu"},
        {"type": "output", "neurons": 3, "activation": "softmax"}
    ])
}

/// Poll the status endpoint until the session reaches a terminal state.
async fn wait_for_terminal(app: &Router, session_id: &str, timeout: Duration) -> Value {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let (status, body) = json_request(
            app,
            "GET",
            &format!("/api/training/{session_id}/status"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let state = body["status"].as_str().unwrap_or_default().to_string();
        if matches!(state.as_str(), "completed" | "stopped" | "failed") {
            return body;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "session {session_id} stuck in state {state}"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

// ============================================================================
// Health, datasets, templates
// ============================================================================

#[tokio::test]
async fn health_endpoint_returns_ok() {
    let app = test_app();
    let (status, body) = json_request(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn datasets_are_listed_and_described() {
    let app = test_app();

    let (status, body) = json_request(&app, "GET", "/api/datasets", None).await;
    assert_eq!(status, StatusCode::OK);
    let datasets = body.as_array().expect("array of datasets");
    let iris = datasets
        .iter()
        .find(|d| d["id"] == "iris")
        .expect("iris registered");
    assert_eq!(iris["task_type"], "classification");
    assert_eq!(iris["num_classes"], 3);
    assert_eq!(iris["num_features"], 4);
    assert!(iris["hyperparameters"]["learning_rate"].is_number());

    let (status, detail) = json_request(&app, "GET", "/api/datasets/iris", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["input_shape"], json!([4]));
    assert_eq!(detail["output_shape"], json!([3]));

    let (status, missing) = json_request(&app, "GET", "/api/datasets/imagenet", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(missing["detail"].as_str().expect("detail").contains("imagenet"));
}

#[tokio::test]
async fn dataset_preview_enforces_sample_bounds() {
    let app = test_app();

    let (status, body) =
        json_request(&app, "GET", "/api/datasets/iris/preview?num_samples=5", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["features"].as_array().expect("features").len(), 5);
    assert_eq!(body["labels"].as_array().expect("labels").len(), 5);

    let (status, _) =
        json_request(&app, "GET", "/api/datasets/iris/preview?num_samples=0", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) =
        json_request(&app, "GET", "/api/datasets/iris/preview?num_samples=101", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn templates_are_served_and_filterable() {
    let app = test_app();

    let (status, all) = json_request(&app, "GET", "/api/templates", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(all.as_array().expect("templates").len() >= 4);

    let (status, filtered) =
        json_request(&app, "GET", "/api/templates?dataset_id=iris", None).await;
    assert_eq!(status, StatusCode::OK);
    for template in filtered.as_array().expect("filtered templates") {
        assert_eq!(template["dataset_id"], "iris");
    }

    let (status, one) = json_request(&app, "GET", "/api/templates/glyphs-cnn", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(one["dataset_id"], "glyphs");

    let (status, _) = json_request(&app, "GET", "/api/templates/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ============================================================================
// Model configurations
// ============================================================================

#[tokio::test]
async fn model_configs_are_validated_and_stored() {
    let app = test_app();

    let (status, created) = json_request(
        &app,
        "POST",
        "/api/models",
        Some(json!({
            "name": "iris classifier",
            "dataset_id": "iris",
            "layers": iris_layers()
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "created");
    assert!(created["created_at"].is_string());
    let model_id = created["id"].as_str().expect("model id").to_string();

    let (status, fetched) =
        json_request(&app, "GET", &format!("/api/models/{model_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["name"], "iris classifier");

    let (status, _) = json_request(&app, "GET", "/api/models/unknown", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Bad architecture is rejected up front.
    let (status, rejected) = json_request(
        &app,
        "POST",
        "/api/models",
        Some(json!({
            "name": "broken",
            "dataset_id": "iris",
            "layers": [
                {"type": "input", "neurons": 4},
                {"type": "output", "neurons": 5, "activation": "softmax"}
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(rejected["detail"].as_str().expect("detail").contains("output"));
}

// ============================================================================
// Scenario 1: Iris happy path
// ============================================================================

#[tokio::test]
async fn iris_training_completes_with_good_accuracy() {
    let app = test_app();

    let (status, accepted) = json_request(
        &app,
        "POST",
        "/api/models/new/train",
        Some(json!({
            "dataset_id": "iris",
            "layers": iris_layers(),
            "epochs": 5,
            "learning_rate": 0.01,
            "batch_size": 16,
            "max_samples": 100,
            "optimizer": "adam"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(accepted["total_epochs"], 5);
    assert!(accepted["poll_interval_seconds"].is_number());
    let session_id = accepted["session_id"].as_str().expect("session id").to_string();

    let done = wait_for_terminal(&app, &session_id, Duration::from_secs(30)).await;
    assert_eq!(done["status"], "completed");

    let metrics = done["metrics"].as_array().expect("metrics");
    assert_eq!(metrics.len(), 5);
    for (i, metric) in metrics.iter().enumerate() {
        assert_eq!(metric["epoch"], (i + 1) as i64);
        let accuracy = metric["accuracy"].as_f64().expect("accuracy present");
        assert!((0.0..=1.0).contains(&accuracy));
    }
    let final_accuracy = metrics[4]["accuracy"].as_f64().expect("final accuracy");
    assert!(
        final_accuracy >= 0.7,
        "final accuracy too low: {final_accuracy}"
    );

    // since_epoch filters the metrics tail but not the progress fields.
    let (status, tail) = json_request(
        &app,
        "GET",
        &format!("/api/training/{session_id}/status?since_epoch=3"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tail["current_epoch"], 5);
    let tail_metrics = tail["metrics"].as_array().expect("tail");
    assert_eq!(tail_metrics.len(), 2);
    assert!(tail_metrics.iter().all(|m| m["epoch"].as_i64().unwrap() > 3));
}

// ============================================================================
// Scenario 2: Dimension mismatch
// ============================================================================

#[tokio::test]
async fn output_arity_mismatch_is_a_400() {
    let app = test_app();
    let (status, body) = json_request(
        &app,
        "POST",
        "/api/models/new/train",
        Some(json!({
            "dataset_id": "iris",
            "layers": [
                {"type": "input", "neurons": 4},
                {"type": "hidden", "neurons": 16, "activation": "relu"},
                {"type": "output", "neurons": 5, "activation": "softmax"}
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let detail = body["detail"].as_str().expect("detail");
    assert!(detail.contains("output"), "unexpected detail: {detail}");
}

// ============================================================================
// Scenario 3: Double start on one model
// ============================================================================

#[tokio::test]
async fn second_train_on_same_model_conflicts() {
    let app = test_app();

    let (status, created) = json_request(
        &app,
        "POST",
        "/api/models",
        Some(json!({
            "name": "contended",
            "dataset_id": "iris",
            "layers": iris_layers()
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let model_id = created["id"].as_str().expect("id").to_string();

    let (status, first) = json_request(
        &app,
        "POST",
        &format!("/api/models/{model_id}/train"),
        Some(json!({"epochs": 100})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let first_id = first["session_id"].as_str().expect("id").to_string();

    let (status, conflict) = json_request(
        &app,
        "POST",
        &format!("/api/models/{model_id}/train"),
        Some(json!({"epochs": 5})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(conflict["detail"].as_str().expect("detail").contains("active"));

    let (status, _) = json_request(
        &app,
        "POST",
        &format!("/api/training/{first_id}/stop"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    wait_for_terminal(&app, &first_id, Duration::from_secs(30)).await;
}

// ============================================================================
// Scenario 4: Pause / resume
// ============================================================================

#[tokio::test]
async fn pause_halts_progress_and_resume_finishes() {
    let app = test_app();

    // The glyph convnet trains slowly enough for control signals to land
    // mid-run.
    let (status, accepted) = json_request(
        &app,
        "POST",
        "/api/models/new/train",
        Some(json!({
            "dataset_id": "glyphs",
            "layers": [
                {"type": "input"},
                {"type": "conv2d", "filters": 8, "kernel": 3, "activation": "relu"},
                {"type": "maxpool2d", "pool": 2},
                {"type": "flatten"},
                {"type": "hidden", "neurons": 32, "activation": "relu"},
                {"type": "output", "neurons": 3, "activation": "softmax"}
            ],
            "epochs": 30
        })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let session_id = accepted["session_id"].as_str().expect("id").to_string();

    // Wait for training to make some progress, then pause.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    loop {
        let (_, body) = json_request(
            &app,
            "GET",
            &format!("/api/training/{session_id}/status"),
            None,
        )
        .await;
        if body["current_epoch"].as_i64().unwrap_or(0) >= 1 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "no progress");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let (status, _) = json_request(
        &app,
        "POST",
        &format!("/api/training/{session_id}/pause"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Wait until the engine actually parks at the epoch boundary.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    let paused_epoch = loop {
        let (_, body) = json_request(
            &app,
            "GET",
            &format!("/api/training/{session_id}/status"),
            None,
        )
        .await;
        if body["status"] == "paused" {
            break body["current_epoch"].as_i64().expect("epoch");
        }
        assert!(tokio::time::Instant::now() < deadline, "never paused");
        tokio::time::sleep(Duration::from_millis(10)).await;
    };

    // While paused the epoch counter must not advance.
    for _ in 0..2 {
        tokio::time::sleep(Duration::from_millis(150)).await;
        let (_, body) = json_request(
            &app,
            "GET",
            &format!("/api/training/{session_id}/status"),
            None,
        )
        .await;
        assert_eq!(body["status"], "paused");
        assert_eq!(body["current_epoch"].as_i64().expect("epoch"), paused_epoch);
    }

    // Pause on a paused session is a no-op success.
    let (status, _) = json_request(
        &app,
        "POST",
        &format!("/api/training/{session_id}/pause"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = json_request(
        &app,
        "POST",
        &format!("/api/training/{session_id}/resume"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let done = wait_for_terminal(&app, &session_id, Duration::from_secs(60)).await;
    assert_eq!(done["status"], "completed");
    assert_eq!(done["metrics"].as_array().expect("metrics").len(), 30);
}

// ============================================================================
// Scenario 5: Numeric failure
// ============================================================================

#[tokio::test]
async fn absurd_learning_rate_fails_through_polling_not_http() {
    let app = test_app();

    let (status, accepted) = json_request(
        &app,
        "POST",
        "/api/models/new/train",
        Some(json!({
            "dataset_id": "iris",
            "layers": iris_layers(),
            "epochs": 10,
            "learning_rate": 1e6
        })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let session_id = accepted["session_id"].as_str().expect("id").to_string();

    let done = wait_for_terminal(&app, &session_id, Duration::from_secs(30)).await;
    assert_eq!(done["status"], "failed");
    let message = done["error_message"].as_str().expect("error recorded");
    assert!(
        message.contains("Diverged") || message.contains("NumericNaN"),
        "unexpected failure message: {message}"
    );
    assert!(!done["metrics"].as_array().expect("metrics").is_empty());
}

// ============================================================================
// Scenario 6: Predict gating and output shape
// ============================================================================

#[tokio::test]
async fn predict_is_rejected_until_completed_then_deterministic() {
    let app = test_app();

    let (status, accepted) = json_request(
        &app,
        "POST",
        "/api/models/new/train",
        Some(json!({
            "dataset_id": "iris",
            "layers": iris_layers(),
            "epochs": 100
        })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let session_id = accepted["session_id"].as_str().expect("id").to_string();

    // Still running (or pending): prediction conflicts.
    let (status, rejected) = json_request(
        &app,
        "POST",
        &format!("/api/training/{session_id}/predict"),
        Some(json!({"inputs": [0.1, 0.2, 0.3, 0.4]})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(rejected["detail"].as_str().expect("detail").contains("not ready"));

    let (status, _) = json_request(
        &app,
        "POST",
        &format!("/api/training/{session_id}/stop"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    wait_for_terminal(&app, &session_id, Duration::from_secs(30)).await;

    // Train a fresh session to completion for the prediction checks.
    let (_, accepted) = json_request(
        &app,
        "POST",
        "/api/models/new/train",
        Some(json!({
            "dataset_id": "iris",
            "layers": iris_layers(),
            "epochs": 10
        })),
    )
    .await;
    let session_id = accepted["session_id"].as_str().expect("id").to_string();
    let done = wait_for_terminal(&app, &session_id, Duration::from_secs(30)).await;
    assert_eq!(done["status"], "completed");

    let inputs = json!({"inputs": [0.2, 0.6, 0.15, 0.1]});
    let (status, first) = json_request(
        &app,
        "POST",
        &format!("/api/training/{session_id}/predict"),
        Some(inputs.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(first["prediction"].is_number());
    let probabilities = first["probabilities"].as_array().expect("probabilities");
    assert_eq!(probabilities.len(), 3);
    let sum: f64 = probabilities.iter().map(|p| p.as_f64().unwrap_or(0.0)).sum();
    assert!((sum - 1.0).abs() < 1e-4);
    assert!(first["confidence"].as_f64().expect("confidence") > 0.0);

    // Equal inputs yield equal outputs.
    let (_, second) = json_request(
        &app,
        "POST",
        &format!("/api/training/{session_id}/predict"),
        Some(inputs),
    )
    .await;
    assert_eq!(first, second);

    // Wrong arity is a 400, not a crash.
    let (status, _) = json_request(
        &app,
        "POST",
        &format!("/api/training/{session_id}/predict"),
        Some(json!({"inputs": [1.0, 2.0]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Stop on a terminal session stays a no-op success.
    let (status, stopped) = json_request(
        &app,
        "POST",
        &format!("/api/training/{session_id}/stop"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stopped["status"], "completed");
}

// ============================================================================
// Misc contract details
// ============================================================================

#[tokio::test]
async fn status_endpoint_is_not_cacheable_and_404s_unknown_sessions() {
    let app = test_app();

    let (status, body) = json_request(&app, "GET", "/api/training/ghost/status", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["detail"].as_str().expect("detail").contains("ghost"));

    let (_, accepted) = json_request(
        &app,
        "POST",
        "/api/models/new/train",
        Some(json!({
            "dataset_id": "iris",
            "layers": iris_layers(),
            "epochs": 1
        })),
    )
    .await;
    let session_id = accepted["session_id"].as_str().expect("id").to_string();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!("/api/training/{session_id}/status"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(
        response
            .headers()
            .get("cache-control")
            .and_then(|v| v.to_str().ok()),
        Some("no-store")
    );
    wait_for_terminal(&app, &session_id, Duration::from_secs(30)).await;
}

#[tokio::test]
async fn unknown_layer_kind_is_unprocessable_with_a_detail_body() {
    let app = test_app();

    // The layer enum is closed: an unrecognized `type` tag fails body
    // extraction, and the rejection must still wear the {detail} envelope.
    let bad_layers = json!([
        {"type": "input", "neurons": 4},
        {"type": "attention", "heads": 8},
        {"type": "output", "neurons": 3}
    ]);

    let (status, body) = json_request(
        &app,
        "POST",
        "/api/models/new/train",
        Some(json!({"dataset_id": "iris", "layers": bad_layers.clone()})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].is_string(), "missing detail: {body}");

    let (status, body) = json_request(
        &app,
        "POST",
        "/api/models",
        Some(json!({
            "name": "bad",
            "dataset_id": "iris",
            "layers": bad_layers
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].is_string(), "missing detail: {body}");
}

#[tokio::test]
async fn syntactically_broken_body_is_a_400_with_a_detail_body() {
    let app = test_app();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/models/new/train")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let body: Value = serde_json::from_slice(&bytes).expect("json error body");
    assert!(body["detail"].is_string(), "missing detail: {body}");
}

#[tokio::test]
async fn training_on_unknown_dataset_or_model_is_404() {
    let app = test_app();

    let (status, _) = json_request(
        &app,
        "POST",
        "/api/models/new/train",
        Some(json!({
            "dataset_id": "imagenet",
            "layers": iris_layers()
        })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = json_request(
        &app,
        "POST",
        "/api/models/ghost/train",
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // "new" without an architecture is a 400.
    let (status, body) = json_request(
        &app,
        "POST",
        "/api/models/new/train",
        Some(json!({"dataset_id": "iris"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().expect("detail").contains("layers"));
}
