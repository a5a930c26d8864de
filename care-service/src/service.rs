use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderName, HeaderValue, Request, StatusCode},
    middleware::{Next, from_fn},
    response::Json,
    routing::{get, post},
};
use care_flow::{CancellationToken, FlowError, IncomingRequest, SessionRunner, SessionStore};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;

use crate::{
    models::{ConsultRequest, ConsultResponse, ImageUpload, SessionResponse},
    safety::{SafetyFilter, Verdict},
    workflow::{create_session_runner, create_session_store, load_engine_config},
};

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;
type ApiError = (StatusCode, Json<Value>);

const CORRELATION_HEADER: HeaderName = HeaderName::from_static("x-correlation-id");

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn not_found_error(message: &str, id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": message,
            "session_id": id
        })),
    )
}

/// Internal failures are logged by the caller; the body only carries the fallback text
fn internal_error(fallback: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": fallback })),
    )
}

#[derive(Clone)]
pub struct AppState {
    pub runner: SessionRunner,
    pub safety: Arc<SafetyFilter>,
}

pub async fn create_app() -> anyhow::Result<Router> {
    let config = load_engine_config()?;
    info!(?config, "Engine configuration loaded");

    let store = create_session_store().await;
    let runner = create_session_runner(store, config)?;
    let safety = Arc::new(SafetyFilter::new()?);

    Ok(build_router(AppState { runner, safety }))
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/consult", post(consult))
        .route(
            "/session/{session_id}",
            get(get_session).delete(delete_session),
        )
        .layer(from_fn(correlation_id_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Tag every request with a correlation id, reusing the caller's when supplied
async fn correlation_id_middleware(
    mut request: Request<axum::body::Body>,
    next: Next,
) -> axum::response::Response {
    let correlation_id = request
        .headers()
        .get(&CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let header = HeaderValue::from_str(&correlation_id).ok();
    if let Some(value) = header.clone() {
        request.headers_mut().insert(CORRELATION_HEADER, value);
    }

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    let mut response = next.run(request).instrument(span).await;

    if let Some(value) = header {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "Care Flow Consultation Service",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Plan-driven routing of medical questions across symptom extraction, image analysis, diagnosis, investigations, recommendations and scheduling",
        "endpoints": {
            "POST /consult": "Send a message (and optional image) in a new or existing session",
            "GET /session/{session_id}": "Get the stored plan, history and execution log",
            "DELETE /session/{session_id}": "Delete a session",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn consult(
    State(state): State<AppState>,
    Json(request): Json<ConsultRequest>,
) -> ApiResult<ConsultResponse> {
    let session_id = match request.session_id {
        Some(id) => {
            Uuid::parse_str(&id).map_err(|_| bad_request_error("session_id must be a UUID"))?;
            id
        }
        None => Uuid::new_v4().to_string(),
    };

    if request.message.trim().is_empty() && request.image.is_none() {
        return Err(bad_request_error("message or image is required"));
    }
    let image = request
        .image
        .map(ImageUpload::into_payload)
        .transpose()
        .map_err(|e| bad_request_error(&e))?;

    info!(
        session_id = %session_id,
        message_length = request.message.len(),
        has_image = image.is_some(),
        "Processing consult request"
    );

    if let Verdict::Blocked { rule, message } = state.safety.check_input(&request.message) {
        warn!(session_id = %session_id, rule = %rule, "Input blocked by safety filter");
        return Ok(Json(ConsultResponse::blocked(session_id, message)));
    }

    let incoming = IncomingRequest {
        session_id: session_id.clone(),
        message: request.message,
        image,
    };

    // Dropping this handler (client went away) drops the guard and cancels the run
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let runner = state.runner.clone();
    let joined = tokio::spawn(async move { runner.handle(incoming, cancel).await }).await;
    guard.disarm();

    let mut outcome = match joined {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            error!(session_id = %session_id, error = %e, "Consult run failed");
            return Err(internal_error(state.runner.fallback_message()));
        }
        Err(e) => {
            error!(session_id = %session_id, error = %e, "Consult task panicked or was aborted");
            return Err(internal_error(state.runner.fallback_message()));
        }
    };

    if let Some(response) = outcome.context.final_response.as_deref() {
        if let Verdict::Blocked { rule, message } = state.safety.check_output(response) {
            warn!(session_id = %session_id, rule = %rule, "Response replaced by safety filter");
            outcome.context.final_response = Some(message);
            if let Err(e) = state
                .runner
                .store()
                .save(&session_id, &outcome.context)
                .await
            {
                error!(session_id = %session_id, error = %e, "Failed to persist screened response");
            }
        }
    }

    info!(
        session_id = %session_id,
        status = ?outcome.status,
        iterations = outcome.iterations,
        "Consult request finished"
    );
    Ok(Json(ConsultResponse::from_run(outcome.status, &outcome.context)))
}

async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<SessionResponse> {
    match state.runner.session(&session_id).await {
        Ok(context) => Ok(Json(SessionResponse::from(context))),
        Err(FlowError::SessionNotFound(_)) => {
            Err(not_found_error("Session not found", &session_id))
        }
        Err(e) => {
            error!("Failed to load session {}: {}", session_id, e);
            Err(internal_error(state.runner.fallback_message()))
        }
    }
}

async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let store = state.runner.store();
    match store.load(&session_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return Err(not_found_error("Session not found", &session_id)),
        Err(e) => {
            error!("Failed to load session {}: {}", session_id, e);
            return Err(internal_error(state.runner.fallback_message()));
        }
    }
    store.delete(&session_id).await.map_err(|e| {
        error!("Failed to delete session {}: {}", session_id, e);
        internal_error(state.runner.fallback_message())
    })?;
    info!(session_id = %session_id, "Session deleted");
    Ok(StatusCode::NO_CONTENT)
}
