//! GitHub webhook endpoint.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use curasync_core::push::PushEvent;
use curasync_runner::{EnqueueOutcome, JobRunner, QueuedJob};
use hmac::{Hmac, Mac};
use serde_json::{Value, json};
use sha2::Sha256;
use tracing::{info, warn};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new().route("/github", post(github_webhook))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Handle GitHub webhook events.
async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let event_type = header(&headers, "X-GitHub-Event").unwrap_or("unknown");
    let delivery = header(&headers, "X-GitHub-Delivery");

    if let Some(secret) = &state.webhook_secret {
        let signature = header(&headers, "X-Hub-Signature-256");
        if !verify_github_signature(secret, &body, signature) {
            warn!(?delivery, "Invalid webhook signature");
            return Err(ApiError::Unauthorized("invalid signature".to_string()));
        }
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON: {}", e)))?;

    info!(
        event = %event_type,
        ?delivery,
        repo = ?payload.get("repository").and_then(|r| r.get("full_name")).and_then(|n| n.as_str()),
        "Received GitHub webhook"
    );

    match event_type {
        "push" => {
            let push = PushEvent::from_github_payload(&payload)
                .ok_or_else(|| ApiError::BadRequest("malformed push event".to_string()))?;
            handle_push_event(&state, delivery, push)
        }
        "ping" => {
            info!("Ping event received - webhook is configured correctly");
            Ok((StatusCode::OK, Json(json!({ "status": "pong" }))))
        }
        _ => {
            info!(event = %event_type, "Unhandled event type");
            Ok((StatusCode::OK, Json(json!({ "status": "ignored" }))))
        }
    }
}

/// Queue a run when the push satisfies the workflow's triggers.
fn handle_push_event(
    state: &AppState,
    delivery: Option<&str>,
    push: PushEvent,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    info!(
        repo = %push.repository_full_name,
        branch = ?push.branch,
        sha = %push.after,
        "Processing push event"
    );

    let Some(run) = JobRunner::dispatch(&state.workflow, &push) else {
        return Ok((StatusCode::OK, Json(json!({ "status": "skipped" }))));
    };
    let run_id = run.id;

    match state.queue.enqueue(delivery, QueuedJob { run, push })? {
        EnqueueOutcome::Queued => Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "status": "queued", "run_id": run_id.to_string() })),
        )),
        EnqueueOutcome::Duplicate => Ok((StatusCode::OK, Json(json!({ "status": "duplicate" })))),
    }
}

/// Verify GitHub webhook signature.
fn verify_github_signature(secret: &str, body: &[u8], signature: Option<&str>) -> bool {
    let Some(signature) = signature else {
        return false;
    };

    // Signature format: "sha256=<hex>"
    let Some(sig_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let Ok(sig_bytes) = hex::decode(sig_hex) else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);

    mac.verify_slice(&sig_bytes).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use curasync_runner::JobQueue;
    use std::sync::Arc;
    use tower::ServiceExt;

    const SECRET: &str = "It's a Secret to Everybody";

    fn sign(body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn push_body(branch: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "ref": format!("refs/heads/{}", branch),
            "before": "0000000000000000000000000000000000000000",
            "after": "1111111111111111111111111111111111111111",
            "repository": {
                "full_name": "lab/curations",
                "clone_url": "https://github.com/lab/curations.git"
            },
            "pusher": { "name": "octocat" }
        }))
        .unwrap()
    }

    fn app(secret: Option<&str>) -> (axum::Router, tokio::sync::mpsc::Receiver<QueuedJob>) {
        let workflow = curasync_config::default_workflow().unwrap();
        let (queue, rx) = JobQueue::new(8);
        let state = AppState::new(Arc::new(workflow), Arc::new(queue), secret.map(String::from));
        (crate::routes::router(state), rx)
    }

    fn request(event: &str, delivery: &str, body: Vec<u8>, signature: Option<String>) -> Request<Body> {
        let mut builder = Request::post("/webhooks/github")
            .header("X-GitHub-Event", event)
            .header("X-GitHub-Delivery", delivery)
            .header("Content-Type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header("X-Hub-Signature-256", signature);
        }
        builder.body(Body::from(body)).unwrap()
    }

    #[test]
    fn test_verify_signature() {
        // Example from GitHub's webhook documentation
        assert!(verify_github_signature(
            SECRET,
            b"Hello, World!",
            Some("sha256=757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17")
        ));
        assert!(!verify_github_signature(SECRET, b"Hello, World!", Some("sha256=00")));
        assert!(!verify_github_signature(SECRET, b"Hello, World!", Some("sha1=757107")));
        assert!(!verify_github_signature(SECRET, b"Hello, World!", None));
    }

    #[tokio::test]
    async fn test_push_to_main_is_queued_once_per_delivery() {
        let (app, mut rx) = app(Some(SECRET));
        let body = push_body("main");

        let response = app
            .clone()
            .oneshot(request("push", "d-1", body.clone(), Some(sign(&body))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let response = app
            .oneshot(request("push", "d-1", body.clone(), Some(sign(&body))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let job = rx.try_recv().unwrap();
        assert_eq!(job.push.branch.as_deref(), Some("main"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_bad_signature_is_rejected() {
        let (app, mut rx) = app(Some(SECRET));
        let body = push_body("main");
        let response = app
            .oneshot(request("push", "d-2", body, Some("sha256=deadbeef".to_string())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_push_to_other_branch_is_skipped() {
        let (app, mut rx) = app(None);
        let response = app
            .oneshot(request("push", "d-3", push_body("feature/x"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_ping_and_health() {
        let (app, _rx) = app(None);
        let response = app
            .clone()
            .oneshot(request("ping", "d-4", b"{\"zen\":\"Keep it logically awesome.\"}".to_vec(), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn test_invalid_json() {
        let (app, _rx) = app(None);
        let response = app
            .oneshot(request("push", "d-5", b"not json".to_vec(), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
