//! HTTP transport for the cppbox compile-and-execute service.
//!
//! Thin layer over [`CompileRunService`]: JSON bodies in, structured JSON
//! out, one status code per orchestration outcome. All filesystem and
//! process handling lives in the `cppbox` crate.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use cppbox::{
    CompileFailure, CompileOnly, CompileRequest, CompileRunService, Diagnostic, Error,
    ExecutionResult, RunOutcome,
};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    service: Arc<CompileRunService>,
}

pub fn create_app(service: CompileRunService) -> Router {
    let state = AppState {
        service: Arc::new(service),
    };

    Router::new()
        .route("/api/compile-and-run", post(compile_and_run))
        .route("/api/compile", post(compile))
        .route("/api/run", post(run))
        .route("/api/stop", post(stop))
        .route("/api/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_server(app: Router, addr: SocketAddr) -> std::io::Result<()> {
    info!("listening on {addr}");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

/// Error envelope: every failure becomes a structured JSON body with a
/// human-readable `error` field.
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::ToolchainUnavailable(_)
            | Error::Spawn(_)
            | Error::Internal(_)
            | Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        (
            status,
            Json(json!({ "success": false, "error": self.0.to_string() })),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunResponse {
    success: bool,
    exit_code: Option<i32>,
    output: String,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    markers: Option<Vec<Diagnostic>>,
}

async fn compile_and_run(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let request = CompileRequest::from_json(&body)?;
    match state.service.compile_and_run(request).await? {
        RunOutcome::Executed(result) => Ok(execution_response(result, true)),
        RunOutcome::CompileFailed(failure) => Ok(compile_failure_response(failure)),
    }
}

async fn compile(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let request = CompileRequest::from_json(&body)?;
    match state.service.compile_only(request).await? {
        CompileOnly::Compiled { executable } => Ok(Json(json!({
            "success": true,
            "executable": executable,
            "message": "Compilation successful",
        }))
        .into_response()),
        CompileOnly::CompileFailed(failure) => Ok(compile_failure_response(failure)),
    }
}

async fn run(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let executable = match body.get("executable") {
        Some(Value::String(name)) if !name.is_empty() => name.clone(),
        Some(Value::String(_)) | None | Some(Value::Null) => {
            return Err(Error::Validation("`executable` is required".into()).into())
        }
        Some(_) => return Err(Error::Validation("`executable` must be a string".into()).into()),
    };
    let input = match body.get("input") {
        None | Some(Value::Null) => None,
        Some(Value::String(input)) => Some(input.clone()),
        Some(_) => return Err(Error::Validation("`input` must be a string".into()).into()),
    };

    let result = state
        .service
        .run_artifact(&executable, input.as_deref())
        .await?;
    Ok(execution_response(result, false))
}

async fn stop(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let process_id = match body.get("processId") {
        Some(Value::String(id)) if !id.is_empty() => id.clone(),
        _ => return Err(Error::NotFound("process".into()).into()),
    };
    if state.service.stop(&process_id) {
        Ok(Json(json!({ "success": true })).into_response())
    } else {
        Err(Error::NotFound(format!("process {process_id}")).into())
    }
}

async fn health(State(state): State<AppState>) -> Response {
    let compiler = state
        .service
        .toolchain()
        .compiler_path()
        .display()
        .to_string();
    let body = match state.service.toolchain_health().await {
        Ok(version) => json!({
            "status": "ok",
            "compiler": compiler,
            "version": version,
            "platform": std::env::consts::OS,
        }),
        Err(e) => json!({
            "status": "unavailable",
            "compiler": compiler,
            "error": e.to_string(),
            "platform": std::env::consts::OS,
        }),
    };
    Json(body).into_response()
}

fn execution_response(result: ExecutionResult, with_markers: bool) -> Response {
    if result.timed_out {
        return (
            StatusCode::REQUEST_TIMEOUT,
            Json(json!({
                "success": false,
                "error": "Process timeout",
                "output": result.stdout,
            })),
        )
            .into_response();
    }

    Json(RunResponse {
        success: true,
        exit_code: result.exit_code,
        output: result.stdout,
        error: result.stderr,
        markers: with_markers.then(Vec::new),
    })
    .into_response()
}

fn compile_failure_response(failure: CompileFailure) -> Response {
    let status = if failure.timed_out {
        StatusCode::REQUEST_TIMEOUT
    } else {
        StatusCode::BAD_REQUEST
    };
    let error = if failure.timed_out {
        "Compilation timeout".to_string()
    } else if failure.stderr.is_empty() {
        "Compilation failed".to_string()
    } else {
        failure.stderr
    };
    (
        status,
        Json(json!({
            "success": false,
            "error": error,
            "markers": failure.diagnostics,
            "stdout": failure.stdout,
        })),
    )
        .into_response()
}
