pub mod dispatch;

pub use dispatch::{Dispatcher, Job, WorkerPool};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::webhook::{EventKind, InboundEvent, SignatureVerifier};

const SIGNATURE_HEADER: &str = "x-hub-signature-256";
const EVENT_HEADER: &str = "x-github-event";
const DELIVERY_HEADER: &str = "x-github-delivery";

pub struct AppState {
    pub verifier: SignatureVerifier,
    pub dispatcher: Dispatcher,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhook", post(webhook))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve until `shutdown` resolves, then stop accepting connections.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "listening for webhooks");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

fn header<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// POST /webhook
///
/// Verifies the signature over the raw body before anything else is read, then
/// acknowledges. Only comment events are parsed and queued; the pipeline runs
/// after the reply.
async fn webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let delivery = header(&headers, DELIVERY_HEADER).unwrap_or("unknown").to_string();
    let signature = header(&headers, SIGNATURE_HEADER).unwrap_or_default();

    if !state.verifier.verify(&body, signature) {
        warn!(%delivery, "rejected webhook with invalid signature");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Invalid signature"})),
        );
    }

    let kind = EventKind::from_header(header(&headers, EVENT_HEADER).unwrap_or_default());
    // only comment payloads are read; other kinds may carry any JSON shape
    if !kind.is_comment() {
        debug!(%delivery, %kind, "acknowledged event without processing");
        return ok();
    }

    let event: InboundEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!(%delivery, %kind, error = %e, "verified body is not a valid event");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Invalid payload"})),
            );
        }
    };

    match state.dispatcher.submit(Job {
        delivery: delivery.clone(),
        kind,
        event,
    }) {
        Ok(()) => {
            debug!(%delivery, "event queued");
            ok()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        ),
    }
}

fn ok() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

/// GET /health
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    const SECRET: &str = "webhook-secret";

    const COMMENT_EVENT: &str = r#"{
        "action": "created",
        "comment": {"id": 5, "body": "Fix the typo", "user": {"login": "alice"}},
        "issue": {"number": 12, "pull_request": {"url": "https://api.github.com/repos/acme/widgets/pulls/12"}},
        "repository": {"name": "widgets", "full_name": "acme/widgets", "owner": {"login": "acme"}}
    }"#;

    async fn start(capacity: usize) -> (String, mpsc::Receiver<Job>) {
        let (dispatcher, rx) = Dispatcher::bounded(capacity);
        let state = Arc::new(AppState {
            verifier: SignatureVerifier::new(SECRET),
            dispatcher,
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, state, std::future::pending()));
        (format!("http://{addr}"), rx)
    }

    async fn post(base: &str, kind: &str, body: &str, signature: Option<String>) -> (u16, Value) {
        let mut req = reqwest::Client::new()
            .post(format!("{base}/webhook"))
            .header("X-GitHub-Event", kind)
            .header("X-GitHub-Delivery", "delivery-1")
            .body(body.to_string());
        if let Some(sig) = signature {
            req = req.header("X-Hub-Signature-256", sig);
        }
        let resp = req.send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    fn sign(body: &str) -> String {
        SignatureVerifier::new(SECRET).sign(body.as_bytes())
    }

    #[tokio::test]
    async fn test_signed_comment_event_is_queued() {
        let (base, mut rx) = start(4).await;
        let (status, body) = post(&base, "issue_comment", COMMENT_EVENT, Some(sign(COMMENT_EVENT))).await;
        assert_eq!(status, 200);
        assert_eq!(body, json!({"status": "ok"}));

        let job = rx.try_recv().unwrap();
        assert_eq!(job.delivery, "delivery-1");
        assert_eq!(job.kind, EventKind::IssueComment);
        assert_eq!(job.event.pull_request_number(), Some(12));
    }

    #[tokio::test]
    async fn test_tampered_signature_is_rejected_without_activity() {
        let (base, mut rx) = start(4).await;
        let tampered = COMMENT_EVENT.replace("Fix the typo", "Fix the typo!");
        let (status, body) = post(&base, "issue_comment", &tampered, Some(sign(COMMENT_EVENT))).await;
        assert_eq!(status, 401);
        assert_eq!(body, json!({"error": "Invalid signature"}));

        let (status, _) = post(&base, "issue_comment", COMMENT_EVENT, None).await;
        assert_eq!(status, 401);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_ping_and_unknown_events_are_acknowledged_only() {
        let (base, mut rx) = start(4).await;
        let ping = r#"{"zen": "Keep it logically awesome.", "hook_id": 1}"#;
        let (status, _) = post(&base, "ping", ping, Some(sign(ping))).await;
        assert_eq!(status, 200);
        let (status, _) = post(&base, "push", ping, Some(sign(ping))).await;
        assert_eq!(status, 200);

        // bodies that are not comment events at all
        let array = "[1,2]";
        let (status, body) = post(&base, "ping", array, Some(sign(array))).await;
        assert_eq!(status, 200);
        assert_eq!(body, json!({"status": "ok"}));
        let odd_repo = r#"{"repository":{"name":"w"}}"#;
        let (status, _) = post(&base, "push", odd_repo, Some(sign(odd_repo))).await;
        assert_eq!(status, 200);
        let garbage = "not json";
        let (status, _) = post(&base, "ping", garbage, Some(sign(garbage))).await;
        assert_eq!(status, 200);

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_invalid_payload_after_valid_signature() {
        let (base, _rx) = start(4).await;
        let body = "not json";
        let (status, json) = post(&base, "issue_comment", body, Some(sign(body))).await;
        assert_eq!(status, 400);
        assert_eq!(json, json!({"error": "Invalid payload"}));
    }

    #[tokio::test]
    async fn test_dispatch_failure_is_500() {
        let (base, rx) = start(1).await;
        drop(rx);
        let (status, json) = post(&base, "issue_comment", COMMENT_EVENT, Some(sign(COMMENT_EVENT))).await;
        assert_eq!(status, 500);
        assert!(json["error"].as_str().unwrap().contains("closed"));
    }

    #[tokio::test]
    async fn test_health() {
        let (base, _rx) = start(1).await;
        let body: Value = reqwest::get(format!("{base}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert!(chrono::DateTime::parse_from_rfc3339(body["timestamp"].as_str().unwrap()).is_ok());
    }
}
