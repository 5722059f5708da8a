use axum::{
    Router,
    extract::State,
    http::{HeaderValue, Request, StatusCode},
    middleware::{Next, from_fn},
    response::Json,
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Instrument, info};
use uuid::Uuid;

use crate::models::{AssessmentRequest, Report};
use crate::workflow::Assessor;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;
type ApiError = (StatusCode, Json<Value>);

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

#[derive(Clone)]
pub struct AppState {
    pub assessor: Assessor,
}

pub fn create_app(assessor: Assessor) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/assess", post(assess))
        .layer(from_fn(correlation_id_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { assessor })
}

/// Tags each request with an `x-correlation-id` and runs it inside a span carrying it
async fn correlation_id_middleware(mut request: Request<axum::body::Body>, next: Next) -> axum::response::Response {
    let correlation_id = Uuid::new_v4().to_string();
    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        request.headers_mut().insert("x-correlation-id", value);
    }

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    next.run(request).instrument(span).await
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "PDE Assessment Service",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Permitted daily exposure risk reports for a drug ingredient and route",
        "endpoints": {
            "POST /assess": "Run one assessment and return its report",
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

async fn assess(State(state): State<AppState>, Json(request): Json<AssessmentRequest>) -> ApiResult<Report> {
    validate_request(&request)?;
    info!(drug = %request.drug_name, route = %request.route, "assessment requested");

    Ok(Json(state.assessor.assess(&request).await))
}

fn validate_request(request: &AssessmentRequest) -> Result<(), ApiError> {
    if request.drug_name.trim().is_empty() {
        return Err(bad_request_error("drug_name is required"));
    }
    if request.route.trim().is_empty() {
        return Err(bad_request_error("route is required"));
    }
    Ok(())
}
