//! HTTP surface: JSON in, JSON out, always 200.
//!
//! Clients only inspect the body, so failures are reported as
//! `{"error": "..."}` rather than through status codes.

use crate::engine::EngineHandle;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use emoflix_core::{AggregateDecision, SingleDecision};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tracing::Instrument;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
}

#[derive(Debug, Deserialize)]
pub struct DetectRequest {
    pub image: String,
}

#[derive(Debug, Deserialize)]
pub struct DetectMultiRequest {
    /// Missing and `null` both count as an empty batch. Entries are kept as raw
    /// JSON so one bad element fails only its own frame.
    #[serde(default)]
    pub images: Option<Vec<Value>>,
}

impl DetectMultiRequest {
    /// String entries as payloads; anything else becomes `None`.
    pub fn frames(self) -> Vec<Option<String>> {
        self.images
            .unwrap_or_default()
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct HealthBody {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Either a successful payload or an error body, serialized flat.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ApiResponse<T> {
    Ok(T),
    Err(ErrorBody),
}

impl<T> ApiResponse<T> {
    fn error(message: impl ToString) -> Self {
        ApiResponse::Err(ErrorBody {
            error: message.to_string(),
        })
    }
}

/// Build the router with permissive CORS and a request body cap.
pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/", get(health_handler))
        .route("/detect-emotion", post(detect_handler))
        .route("/detect-emotion-multi", post(detect_multi_handler))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn health_handler() -> Json<HealthBody> {
    Json(HealthBody {
        status: "AI service is running",
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn detect_handler(
    State(state): State<AppState>,
    body: Result<Json<DetectRequest>, JsonRejection>,
) -> Json<ApiResponse<SingleDecision>> {
    let span = tracing::info_span!("detect_emotion", request_id = %Uuid::new_v4());
    async move {
        let Json(req) = match body {
            Ok(body) => body,
            Err(rejection) => {
                tracing::warn!(error = %rejection.body_text(), "rejected request body");
                return Json(ApiResponse::error(rejection.body_text()));
            }
        };
        tracing::info!(payload_len = req.image.len(), "received image");

        match state.engine.detect(req.image).await {
            Ok(decision) => Json(ApiResponse::Ok(decision)),
            Err(e) => {
                tracing::error!(error = %e, "emotion detection failed");
                Json(ApiResponse::error(e))
            }
        }
    }
    .instrument(span)
    .await
}

pub async fn detect_multi_handler(
    State(state): State<AppState>,
    body: Result<Json<DetectMultiRequest>, JsonRejection>,
) -> Json<ApiResponse<AggregateDecision>> {
    let span = tracing::info_span!("detect_emotion_multi", request_id = %Uuid::new_v4());
    async move {
        let Json(req) = match body {
            Ok(body) => body,
            Err(rejection) => {
                tracing::warn!(error = %rejection.body_text(), "rejected request body");
                return Json(ApiResponse::error(rejection.body_text()));
            }
        };
        let frames = req.frames();
        tracing::info!(frames = frames.len(), "received images");

        match state.engine.detect_multi(frames).await {
            Ok(decision) => Json(ApiResponse::Ok(decision)),
            Err(e) => {
                tracing::error!(error = %e, "multi-frame emotion detection failed");
                Json(ApiResponse::error(e))
            }
        }
    }
    .instrument(span)
    .await
}
