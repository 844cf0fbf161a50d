//! HTTP endpoints: alert ingestion and dashboard state.
//!
//! Two servers, as the detector and the dashboard are deployed separately:
//! - alert port: `POST /alert`
//! - dashboard port: `GET /state` (pull) and `GET /state/stream` (SSE push)

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::ingest::{AlertIngest, AlertPayload};
use crate::state::{DashboardState, DriverState};

#[derive(Serialize)]
struct AlertResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl AlertResponse {
    fn success() -> Self {
        Self {
            status: "success",
            message: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error",
            message: Some(message.into()),
        }
    }
}

pub fn alert_router(ingest: AlertIngest) -> Router {
    Router::new()
        .route("/alert", post(handle_alert))
        .with_state(ingest)
}

pub fn dashboard_router(state: Arc<DriverState>) -> Router {
    Router::new()
        .route("/state", get(handle_state))
        .route("/state/stream", get(handle_state_stream))
        .with_state(state)
}

/// Bind `addr` and serve `app` in the background until `cancel` fires.
pub async fn serve(name: &'static str, addr: String, app: Router, cancel: CancellationToken) {
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!("Failed to bind {name} API on {addr}: {e}");
            return;
        }
    };
    info!("{name} API listening on {addr}");

    tokio::spawn(async move {
        let shutdown = async move { cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
            warn!("{name} API server error: {e}");
        }
    });
}

// --- Handlers ---

async fn handle_alert(
    State(ingest): State<AlertIngest>,
    payload: Result<Json<AlertPayload>, JsonRejection>,
) -> Response {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            warn!("Malformed alert: {rejection}");
            return (
                StatusCode::BAD_REQUEST,
                Json(AlertResponse::error(rejection.body_text())),
            )
                .into_response();
        }
    };

    match ingest.ingest(&payload) {
        Ok(_) => Json(AlertResponse::success()).into_response(),
        Err(e) => {
            warn!("Rejected alert: {e}");
            (StatusCode::BAD_REQUEST, Json(AlertResponse::error(e.to_string()))).into_response()
        }
    }
}

async fn handle_state(State(state): State<Arc<DriverState>>) -> Json<DashboardState> {
    Json(state.dashboard())
}

async fn handle_state_stream(
    State(state): State<Arc<DriverState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = WatchStream::new(state.subscribe()).map(|snapshot| {
        let data = serde_json::to_string(&snapshot).unwrap_or_default();
        Ok(Event::default().event("state").data(data))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::gate::Arbiter;
    use crate::queues::channels;
    use crate::state::{AlertKind, AssistantMode};

    fn alert_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/alert")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn valid_alert_is_ingested() {
        let state = Arc::new(DriverState::new(true));
        let (senders, mut receivers) = channels();
        let app = alert_router(AlertIngest::new(state.clone(), senders.alerts, senders.speaker, false));

        let response = app
            .oneshot(alert_request(r#"{"type": "DROWSY", "state": true}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!({"status": "success"}));
        assert!(state.flags().drowsy);
        assert_eq!(receivers.alerts.try_recv().unwrap(), AlertKind::Drowsy);
    }

    #[tokio::test]
    async fn unknown_alert_type_is_a_bad_request() {
        let state = Arc::new(DriverState::new(true));
        let (senders, _receivers) = channels();
        let app = alert_router(AlertIngest::new(state, senders.alerts, senders.speaker, false));

        let response = app.oneshot(alert_request(r#"{"type": "SNEEZE"}"#)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["status"], "error");
        assert!(body["message"].as_str().unwrap().contains("SNEEZE"));
    }

    #[tokio::test]
    async fn malformed_json_is_a_bad_request() {
        let state = Arc::new(DriverState::new(true));
        let (senders, _receivers) = channels();
        let app = alert_router(AlertIngest::new(state, senders.alerts, senders.speaker, false));

        let response = app.oneshot(alert_request("{not json")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["status"], "error");
    }

    #[tokio::test]
    async fn state_reflects_mode_and_flags() {
        let state = Arc::new(DriverState::new(true));
        let arbiter = Arbiter::new(state.clone());
        arbiter.set_mode(AssistantMode::Listening);
        state.set_flag(AlertKind::Stress, true);

        let response = dashboard_router(state)
            .oneshot(Request::builder().uri("/state").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(
            body_json(response).await,
            serde_json::json!({
                "state": "listening",
                "alert": {"drowsy": false, "drunk": false, "stress": true}
            })
        );
    }

    #[tokio::test]
    async fn stream_pushes_current_state_first() {
        let state = Arc::new(DriverState::new(true));
        let response = dashboard_router(state)
            .oneshot(Request::builder().uri("/state/stream").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(
            response.headers()["content-type"],
            "text/event-stream"
        );
        let mut frames = response.into_body().into_data_stream();
        let first = frames.next().await.unwrap().unwrap();
        let text = String::from_utf8_lossy(&first);
        assert!(text.contains("event: state"));
        assert!(text.contains(r#""state":"standby""#));
    }
}
