//! HTTP surface: `POST /schedule/level` and `GET /healthz`.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::error::LevelingError;
use crate::service::{LevelRequest, LevelResponse, LevelingService};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<LevelingService>,
}

impl AppState {
    pub fn new(service: LevelingService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/schedule/level", post(level_schedule))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn error_status(err: &LevelingError) -> StatusCode {
    match err {
        LevelingError::NotFound { .. } => StatusCode::NOT_FOUND,
        LevelingError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        LevelingError::CycleDetected { .. } | LevelingError::CapacityMisconfigured { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        LevelingError::Busy(_) => StatusCode::CONFLICT,
        LevelingError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        LevelingError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
        LevelingError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for LevelingError {
    fn into_response(self) -> Response {
        let status = error_status(&self);
        let mut error = json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        if let LevelingError::CycleDetected { task_ids } = &self {
            error["task_ids"] = json!(task_ids);
        }
        if status.is_server_error() {
            tracing::error!(code = self.code(), "request failed: {}", self);
        } else {
            tracing::debug!(code = self.code(), "request rejected: {}", self);
        }

        let mut resp = (status, Json(json!({ "success": false, "error": error }))).into_response();
        if matches!(status, StatusCode::CONFLICT | StatusCode::SERVICE_UNAVAILABLE) {
            resp.headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("3"));
        }
        resp
    }
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, LevelingError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| LevelingError::Unauthorized("missing bearer token".to_string()))?;
    let value = value
        .to_str()
        .map_err(|_| LevelingError::Unauthorized("malformed authorization header".to_string()))?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| LevelingError::Unauthorized("missing bearer token".to_string()))
}

async fn level_schedule(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<LevelRequest>, JsonRejection>,
) -> Result<Json<LevelResponse>, LevelingError> {
    let token = bearer_token(&headers)?;
    let Json(request) = body.map_err(|rejection| LevelingError::InvalidInput(rejection.body_text()))?;
    let response = state.service.level(token, request).await?;
    Ok(Json(response))
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
