use std::time::Instant;

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Request, State},
    http::{Response, StatusCode, header::CONTENT_TYPE},
    middleware::{self, Next},
    response::IntoResponse,
    routing::{get, post},
};
use bulk::{
    BatchError, BatchRequest, DeploymentPolicy, FilterClause, OperationDescriptor, OperationKind,
    RunId, catalog,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    admin_client::AdminClient,
    logging::{category_access, category_control, method_label, phase_label, status_label},
    runs::{RunControlOutcome, RunController, RunSnapshot, StartRun},
};

#[derive(Clone)]
pub struct SharedState {
    pub runs: RunController<AdminClient>,
}

impl SharedState {
    pub fn new(client: AdminClient, default_batch_size: u32) -> Self {
        Self {
            runs: RunController::new(client, default_batch_size),
        }
    }

    pub fn with_finished_run_limit(
        client: AdminClient,
        default_batch_size: u32,
        finished_run_limit: usize,
    ) -> Self {
        Self {
            runs: RunController::with_finished_run_limit(
                client,
                default_batch_size,
                finished_run_limit,
            ),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Clone, Debug, Serialize)]
struct OperationListResponse {
    operations: Vec<&'static OperationDescriptor>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunListResponse {
    pub runs: Vec<RunSnapshot>,
}

/// Body of `POST /v1/runs`. Exactly one of `invocation_ids` or `filters` must be set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StartRunRequest {
    pub operation: OperationKind,
    #[serde(default)]
    pub invocation_ids: Option<Vec<String>>,
    #[serde(default)]
    pub filters: Option<Vec<FilterClause>>,
    #[serde(default)]
    pub deployment: Option<DeploymentPolicy>,
    #[serde(default)]
    pub batch_size: Option<u32>,
}

impl StartRunRequest {
    fn into_start_run(self) -> Result<StartRun, String> {
        let mut request = match (self.invocation_ids, self.filters) {
            (Some(ids), None) => BatchRequest::by_ids(ids),
            (None, Some(filters)) => BatchRequest::by_filters(filters),
            _ => {
                return Err("exactly one of invocation_ids or filters is required".to_string());
            }
        };
        request.deployment = self.deployment;
        Ok(StartRun {
            operation: self.operation,
            request,
            batch_size: self.batch_size,
        })
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn build_control_app(state: SharedState) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/v1/operations", get(list_operations_handler))
        .route("/v1/runs", get(list_runs_handler).post(start_run_handler))
        .route("/v1/runs/{run_id}", get(get_run_handler).delete(delete_run_handler))
        .route("/v1/runs/{run_id}/pause", post(pause_run_handler))
        .route("/v1/runs/{run_id}/resume", post(resume_run_handler))
        .route("/v1/runs/{run_id}/cancel", post(cancel_run_handler))
        .layer(middleware::from_fn(access_log_middleware))
        .with_state(state)
}

async fn health_handler() -> Json<StatusResponse> {
    Json(StatusResponse { status: "ok" })
}

async fn metrics_handler(State(state): State<SharedState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.runs.metrics_text(),
    )
}

async fn list_operations_handler() -> Json<OperationListResponse> {
    Json(OperationListResponse {
        operations: catalog(),
    })
}

async fn list_runs_handler(State(state): State<SharedState>) -> Json<RunListResponse> {
    Json(RunListResponse {
        runs: state.runs.list(),
    })
}

async fn start_run_handler(
    State(state): State<SharedState>,
    Json(request): Json<StartRunRequest>,
) -> Result<(StatusCode, Json<RunSnapshot>), ApiError> {
    let start = request.into_start_run().map_err(bad_request)?;
    match state.runs.start(start) {
        Ok(snapshot) => Ok((StatusCode::ACCEPTED, Json(snapshot))),
        Err(BatchError::InvalidRequest(message)) => {
            warn!("{} rejected run: {message}", category_control());
            Err(bad_request(message))
        }
        Err(err) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: err.to_string(),
            }),
        )),
    }
}

async fn get_run_handler(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunSnapshot>, ApiError> {
    state
        .runs
        .snapshot(&RunId::from(run_id))
        .map(Json)
        .ok_or_else(run_not_found)
}

async fn delete_run_handler(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunSnapshot>, ApiError> {
    match state.runs.remove(&RunId::from(run_id)) {
        Ok(Some(snapshot)) => Ok(Json(snapshot)),
        Ok(None) => Err(run_not_found()),
        Err(err) => {
            warn!("{} refused removal: {err}", category_control());
            Err((
                StatusCode::CONFLICT,
                Json(ErrorResponse {
                    error: err.to_string(),
                }),
            ))
        }
    }
}

async fn pause_run_handler(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunControlOutcome>, ApiError> {
    let outcome = state
        .runs
        .pause(&RunId::from(run_id))
        .ok_or_else(run_not_found)?;
    log_control("pause", &outcome);
    Ok(Json(outcome))
}

async fn resume_run_handler(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunControlOutcome>, ApiError> {
    let outcome = state
        .runs
        .resume(&RunId::from(run_id))
        .ok_or_else(run_not_found)?;
    log_control("resume", &outcome);
    Ok(Json(outcome))
}

async fn cancel_run_handler(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunControlOutcome>, ApiError> {
    let outcome = state
        .runs
        .cancel(&RunId::from(run_id))
        .ok_or_else(run_not_found)?;
    log_control("cancel", &outcome);
    Ok(Json(outcome))
}

fn log_control(action: &str, outcome: &RunControlOutcome) {
    info!(
        "{} {action} run_id={} accepted={} phase={}",
        category_control(),
        outcome.run_id,
        outcome.accepted,
        phase_label(outcome.phase)
    );
}

fn bad_request(message: String) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse { error: message }),
    )
}

fn run_not_found() -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: "run not found".to_string(),
        }),
    )
}

async fn access_log_middleware(request: Request, next: Next) -> Response<Body> {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let started = Instant::now();
    let response = next.run(request).await;
    let elapsed_ms = started.elapsed().as_millis();
    let status = response.status();

    info!(
        "{} {} {} {} {}ms",
        category_access(),
        method_label(method.as_str()),
        status_label(status.as_u16()),
        uri,
        elapsed_ms
    );

    response
}
