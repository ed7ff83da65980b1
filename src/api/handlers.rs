//! API request handlers
//!
//! Every endpoint answers with an [`ApiResponse`] envelope. Workbooks are
//! sent inline as JSON; nothing is read from the server's filesystem.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::expression;
use crate::core::functions::{catalogue, FunctionInfo};
use crate::core::{
    validate_formula, BatchReport, CancellationToken, CycleCheck, DependencyEdge, Engine,
    MemoryStore, Value,
};
use crate::error::{EngineError, EngineResult};
use crate::parser::check_workbook;
use crate::types::{ColumnKind, ColumnType, Workbook};

use super::server::AppState;

/// Standard API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Error taxonomy name, e.g. `UnknownColumnError`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            request_id: Uuid::new_v4().to_string(),
            data: Some(data),
            error: None,
            error_kind: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            request_id: Uuid::new_v4().to_string(),
            data: None,
            error: Some(message.into()),
            error_kind: None,
        }
    }

    pub fn with_kind(mut self, kind: &str) -> Self {
        self.error_kind = Some(kind.to_string());
        self
    }
}

fn engine_error<T: Serialize>(e: &EngineError) -> (StatusCode, Json<ApiResponse<T>>) {
    let response = ApiResponse::err(e.to_string());
    let response = match e {
        EngineError::CyclicDependency { .. } => response.with_kind("CyclicDependencyError"),
        EngineError::Eval(eval) => response.with_kind(eval.kind()),
        _ => response,
    };
    (StatusCode::UNPROCESSABLE_ENTITY, Json(response))
}

/// Root endpoint response
#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub name: String,
    pub version: String,
    pub description: String,
    pub endpoints: Vec<EndpointInfo>,
}

#[derive(Debug, Serialize)]
pub struct EndpointInfo {
    pub path: String,
    pub method: String,
    pub description: String,
}

fn endpoint(method: &str, path: &str, description: &str) -> EndpointInfo {
    EndpointInfo {
        path: path.to_string(),
        method: method.to_string(),
        description: description.to_string(),
    }
}

/// GET / - Root info
pub async fn root(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = RootResponse {
        name: "dbcalc API Server".to_string(),
        version: state.version.clone(),
        description: "Formula, lookup and rollup evaluation for user-defined tables".to_string(),
        endpoints: vec![
            endpoint("GET", "/health", "Health check endpoint"),
            endpoint("GET", "/version", "Get server version"),
            endpoint("GET", "/api/v1/functions", "List the function catalogue"),
            endpoint("POST", "/api/v1/evaluate", "Evaluate an expression against a row"),
            endpoint("POST", "/api/v1/validate", "Validate a workbook"),
            endpoint("POST", "/api/v1/compute", "Recompute derived columns of a workbook"),
            endpoint(
                "POST",
                "/api/v1/would-create-cycle",
                "Check a new dependency edge for cycles",
            ),
        ],
    };
    Json(ApiResponse::ok(response))
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_message: String,
}

/// GET /health - Health check
pub async fn health() -> impl IntoResponse {
    Json(ApiResponse::ok(HealthResponse {
        status: "healthy".to_string(),
        uptime_message: "Server is running".to_string(),
    }))
}

/// Version response
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: String,
    pub features: Vec<String>,
}

/// GET /version - Server version
pub async fn version(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut features = vec![
        "evaluate".to_string(),
        "validate".to_string(),
        "compute".to_string(),
        "would-create-cycle".to_string(),
    ];
    if cfg!(feature = "parallel") {
        features.push("parallel".to_string());
    }
    Json(ApiResponse::ok(VersionResponse {
        version: state.version.clone(),
        features,
    }))
}

/// GET /api/v1/functions - Function catalogue
pub async fn functions() -> Json<ApiResponse<Vec<FunctionInfo>>> {
    Json(ApiResponse::ok(catalogue()))
}

/// Evaluate request
#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    pub expression: String,
    #[serde(default)]
    pub row_data: HashMap<String, Value>,
    #[serde(default)]
    pub return_type: Option<ColumnType>,
}

/// Evaluate response
#[derive(Debug, Serialize)]
pub struct EvaluateResponse {
    pub result: Value,
    pub expression: String,
    pub evaluated_at: DateTime<Utc>,
}

/// POST /api/v1/evaluate - Evaluate one expression
pub async fn evaluate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EvaluateRequest>,
) -> (StatusCode, Json<ApiResponse<EvaluateResponse>>) {
    debug!(expression = %req.expression, "Evaluate request");
    match expression::evaluate(
        &req.expression,
        &req.row_data,
        req.return_type,
        state.config.timeout_ms,
    ) {
        Ok(evaluation) => (
            StatusCode::OK,
            Json(ApiResponse::ok(EvaluateResponse {
                result: evaluation.result,
                expression: req.expression,
                evaluated_at: evaluation.evaluated_at,
            })),
        ),
        Err(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ApiResponse::err(e.to_string()).with_kind(e.kind())),
        ),
    }
}

/// Request carrying an inline workbook
#[derive(Debug, Deserialize)]
pub struct WorkbookRequest {
    pub workbook: Workbook,
}

/// Validate response
#[derive(Debug, Serialize, Default)]
pub struct ValidateResponse {
    pub valid: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle_path: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub formula_errors: Vec<String>,
}

fn validate_workbook(workbook: &Workbook) -> EngineResult<Vec<String>> {
    check_workbook(workbook)?;
    let engine = Engine::new(workbook.schema(), Default::default())?;
    let mut problems = Vec::new();
    for (table, column) in engine.schema().columns() {
        if let ColumnKind::Formula(cfg) = &column.kind {
            for error in validate_formula(cfg).errors {
                problems.push(format!("{}.{}: {}", table.id, column.id, error));
            }
        }
    }
    Ok(problems)
}

/// POST /api/v1/validate - Validate a workbook
pub async fn validate(Json(req): Json<WorkbookRequest>) -> Json<ApiResponse<ValidateResponse>> {
    let response = match validate_workbook(&req.workbook) {
        Ok(problems) if problems.is_empty() => ValidateResponse {
            valid: true,
            message: "Validation successful".to_string(),
            ..Default::default()
        },
        Ok(problems) => ValidateResponse {
            valid: false,
            message: format!("{} formula problem(s)", problems.len()),
            formula_errors: problems,
            ..Default::default()
        },
        Err(e) => ValidateResponse {
            valid: false,
            message: e.to_string(),
            cycle_path: e.cycle_path().map(<[String]>::to_vec),
            ..Default::default()
        },
    };
    Json(ApiResponse::ok(response))
}

/// Compute request
#[derive(Debug, Deserialize)]
pub struct ComputeRequest {
    pub workbook: Workbook,
    /// Only this table; every table when absent
    #[serde(default)]
    pub table: Option<String>,
}

/// Compute response
#[derive(Debug, Serialize, Default)]
pub struct ComputeResponse {
    pub columns: Vec<BatchReport>,
    pub cells: usize,
    pub errors: usize,
}

fn compute_workbook(
    workbook: &Workbook,
    table: Option<&str>,
    config: &crate::config::EngineConfig,
) -> EngineResult<ComputeResponse> {
    check_workbook(workbook)?;
    let engine = Engine::new(workbook.schema(), config.clone())?;
    let store = MemoryStore::from_workbook(workbook);
    let token = CancellationToken::new();

    let table_ids: Vec<String> = match table {
        Some(id) => vec![id.to_string()],
        None => engine.schema().tables.iter().map(|t| t.id.clone()).collect(),
    };

    let mut response = ComputeResponse::default();
    for table_id in &table_ids {
        for report in engine.recompute_table(&store, table_id, &token)? {
            response.cells += report.cells.len();
            response.errors += report.errors;
            response.columns.push(report);
        }
    }
    Ok(response)
}

/// POST /api/v1/compute - Recompute derived columns
pub async fn compute(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ComputeRequest>,
) -> (StatusCode, Json<ApiResponse<ComputeResponse>>) {
    let config = state.config.clone();
    let result = tokio::task::spawn_blocking(move || {
        compute_workbook(&req.workbook, req.table.as_deref(), &config)
    })
    .await;

    match result {
        Ok(Ok(response)) => (StatusCode::OK, Json(ApiResponse::ok(response))),
        Ok(Err(e)) => {
            debug!(error = %e, "Compute rejected");
            engine_error(&e)
        }
        Err(e) => {
            warn!(error = %e, "Compute task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::err(format!("Compute task failed: {}", e))),
            )
        }
    }
}

/// Cycle check request
#[derive(Debug, Deserialize)]
pub struct CycleRequest {
    pub workbook: Workbook,
    pub edge: DependencyEdge,
}

/// POST /api/v1/would-create-cycle - Check a prospective edge
pub async fn would_create_cycle(
    Json(req): Json<CycleRequest>,
) -> (StatusCode, Json<ApiResponse<CycleCheck>>) {
    match Engine::new(req.workbook.schema(), Default::default()) {
        Ok(engine) => (
            StatusCode::OK,
            Json(ApiResponse::ok(engine.would_create_cycle(&req.edge))),
        ),
        Err(e) => engine_error(&e),
    }
}
