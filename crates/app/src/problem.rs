use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use order_desk_core::validate::FieldViolation;
use order_desk_storage::{CatalogError, IntegrityError};

use crate::batch::BatchError;
use crate::ledger::LedgerError;

#[derive(Debug, Serialize)]
struct ProblemDetails {
    #[serde(rename = "type")]
    problem_type: &'static str,
    title: &'static str,
    detail: String,
}

pub struct ProblemResponse {
    status: StatusCode,
    body: ProblemDetails,
}

impl ProblemResponse {
    pub fn new<S: Into<String>>(status: StatusCode, problem_type: &'static str, detail: S) -> Self {
        Self {
            status,
            body: ProblemDetails {
                problem_type,
                title: status.canonical_reason().unwrap_or("error"),
                detail: detail.into(),
            },
        }
    }
}

impl IntoResponse for ProblemResponse {
    fn into_response(self) -> Response {
        let mut response = Json(self.body).into_response();
        *response.status_mut() = self.status;
        response.headers_mut().insert(
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

/// Maps a rejected request field to a 400 problem.
pub fn validation(violation: FieldViolation) -> ProblemResponse {
    ProblemResponse::new(
        StatusCode::BAD_REQUEST,
        "validation_failed",
        violation.to_string(),
    )
}

/// Maps a rejected bulk entry field to a 400 problem naming the entry.
pub fn batch_field(index: usize, violation: FieldViolation) -> ProblemResponse {
    ProblemResponse::new(
        StatusCode::BAD_REQUEST,
        "validation_failed",
        format!("items[{index}].{violation}"),
    )
}

/// Maps catalog store errors for the named entity kind.
pub fn catalog(err: CatalogError, entity: &'static str) -> ProblemResponse {
    match err {
        CatalogError::NotFound => ProblemResponse::new(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("{entity} does not exist"),
        ),
        CatalogError::Referenced => ProblemResponse::new(
            StatusCode::CONFLICT,
            "conflict",
            format!("{entity} is referenced by existing orders"),
        ),
        CatalogError::Database(err) => storage(err),
    }
}

/// Maps order ledger errors.
pub fn ledger(err: LedgerError) -> ProblemResponse {
    match err {
        LedgerError::NotFound => ProblemResponse::new(
            StatusCode::NOT_FOUND,
            "not_found",
            "order does not exist",
        ),
        LedgerError::MissingReference(err) => integrity(err),
        LedgerError::Database(err) => storage(err),
    }
}

/// Maps bulk coordinator errors; invalid entries carry their index.
pub fn batch(err: BatchError) -> ProblemResponse {
    match err {
        BatchError::InvalidEntry { .. } => ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "missing_reference",
            err.to_string(),
        ),
        BatchError::Database(err) => storage(err),
    }
}

fn integrity(err: IntegrityError) -> ProblemResponse {
    match err {
        IntegrityError::Database(err) => storage(err),
        missing => ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "missing_reference",
            missing.to_string(),
        ),
    }
}

/// Transaction or connection failures; logged, never retried here.
pub fn storage(err: sqlx::Error) -> ProblemResponse {
    error!(stage = "storage", error = %err, "storage operation failed");
    ProblemResponse::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "storage_failure",
        "storage operation failed",
    )
}
