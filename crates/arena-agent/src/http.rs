use std::collections::BTreeMap;

use arena_instance::{InstanceHealth, InstanceId, InstanceListing, InstanceReply};
use axum::{
    Json, Router,
    extract::{Path, Request, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::error::LifecycleError;
use crate::error_payload::ErrorPayload;
use crate::manager::{GameSettings, HealthSummary, LifecycleManager};

pub const REQUEST_ID_HEADER: &str = "x-request-id";
const MAX_INSTANCE_ID_LEN: usize = 64;
const MAX_REQUEST_ID_LEN: usize = 128;

#[derive(Clone)]
pub struct AppState {
    pub manager: LifecycleManager,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    payload: ErrorPayload,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.payload)).into_response()
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        let status = match &err {
            LifecycleError::Conflict(_) => StatusCode::CONFLICT,
            LifecycleError::NotFound(_) | LifecycleError::ContainerGone(_) => {
                StatusCode::NOT_FOUND
            }
            LifecycleError::ResourceExhausted(_) => StatusCode::TOO_MANY_REQUESTS,
            LifecycleError::RuntimeFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            payload: ErrorPayload::new(err.code(), err.to_string(), None, err.hint()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: rejection.status(),
            payload: ErrorPayload::new("invalid_request", rejection.body_text(), None, None),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LaunchRequest {
    pub instance_id: String,
    #[serde(flatten)]
    pub game: GameSettings,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub instances: Vec<InstanceListing>,
    pub count: usize,
}

fn validate_instance_id(raw: &str) -> Result<InstanceId, ApiError> {
    let problem = if raw.is_empty() {
        Some("must be non-empty".to_string())
    } else if raw.len() > MAX_INSTANCE_ID_LEN {
        Some(format!("must be at most {MAX_INSTANCE_ID_LEN} bytes"))
    } else if !raw
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        Some("may only contain ASCII letters, digits, '-', '_' and '.'".to_string())
    } else {
        None
    };

    match problem {
        None => Ok(InstanceId(raw.to_string())),
        Some(msg) => {
            let mut fields = BTreeMap::new();
            fields.insert("instance_id".to_string(), msg);
            Err(ApiError {
                status: StatusCode::BAD_REQUEST,
                payload: ErrorPayload::new("invalid_param", "invalid instance_id", Some(fields), None),
            })
        }
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthSummary> {
    Json(state.manager.health().await)
}

async fn launch(
    State(state): State<AppState>,
    body: Result<Json<LaunchRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<InstanceReply>), ApiError> {
    let Json(req) = body?;
    let id = validate_instance_id(&req.instance_id)?;
    let reply = state.manager.launch(&id, &req.game).await?;
    Ok((StatusCode::CREATED, Json(reply)))
}

async fn terminate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<InstanceReply>, ApiError> {
    Ok(Json(state.manager.terminate(&InstanceId(id)).await?))
}

async fn status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<InstanceHealth>, ApiError> {
    Ok(Json(state.manager.status(&InstanceId(id)).await?))
}

async fn list_instances(State(state): State<AppState>) -> Json<ListResponse> {
    let instances = state.manager.list().await;
    let count = instances.len();
    Json(ListResponse { instances, count })
}

async fn restart(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<InstanceReply>, ApiError> {
    Ok(Json(state.manager.restart(&InstanceId(id)).await?))
}

/// Reuses the client's `x-request-id` or generates one, runs the request in a
/// span carrying it and echoes it on the response.
pub async fn request_id(req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty() && v.len() <= MAX_REQUEST_ID_LEN)
        .map(|v| v.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let span = tracing::info_span!(
        "request",
        request_id = %id,
        method = %req.method(),
        path = %req.uri().path()
    );

    let mut resp = next.run(req).instrument(span).await;
    if let Ok(v) = HeaderValue::from_str(&id) {
        resp.headers_mut().insert(REQUEST_ID_HEADER, v);
    }
    resp
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/instances", get(list_instances))
        .route("/instances/launch", post(launch))
        .route("/instances/:id/terminate", post(terminate))
        .route("/instances/:id/status", get(status))
        .route("/instances/:id/restart", post(restart))
        .layer(middleware::from_fn(request_id))
        .with_state(state)
}
