//! Canonical failure taxonomy.
//!
//! Every failure that crosses the HTTP boundary is normalized into an
//! [`ErrorRecord`]: a closed error category, an HTTP status, the implicated
//! fields, and a message derived purely from category and fields so that
//! wording is identical at every raising site.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Serialize, Serializer};
use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::error;

/// Closed set of domain error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    BadRequest,
    NotFound,
    Validation,
    Unauthorized,
    Forbidden,
    Conflict,
    UniqueViolation,
    UnprocessableEntity,
    InternalServerError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "BAD_REQUEST",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::UniqueViolation => "UNIQUE_VIOLATION",
            ErrorKind::UnprocessableEntity => "UNPROCESSABLE_ENTITY",
            ErrorKind::InternalServerError => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Lowercase words used when deriving the human-readable message.
    fn words(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad request",
            ErrorKind::NotFound => "not found",
            ErrorKind::Validation => "validation",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Conflict => "conflict",
            ErrorKind::UniqueViolation => "unique violation",
            ErrorKind::UnprocessableEntity => "unprocessable entity",
            ErrorKind::InternalServerError => "internal server error",
        }
    }
}

/// The canonical shape every failure is normalized to.
///
/// Immutable once constructed. `message` and `code` are always derived, never
/// supplied by the raising site. Field order matches the wire shape.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub status: u16,
    pub message: String,
    pub code: String,
    pub target: Vec<String>,
    #[serde(serialize_with = "serialize_rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub detail: String,
}

impl ErrorRecord {
    pub fn new(
        status: StatusCode,
        kind: ErrorKind,
        target: impl IntoIterator<Item = String>,
        detail: impl Into<String>,
    ) -> Self {
        let target = normalize_target(target);
        let message = derive_message(kind, &target);
        Self {
            status: status.as_u16(),
            message,
            code: status_label(status),
            target,
            timestamp: OffsetDateTime::now_utc(),
            kind,
            detail: detail.into(),
        }
    }

    /// Wrap an arbitrary runtime error as an internal server error.
    pub fn from_error(error: &dyn std::error::Error) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::InternalServerError,
            [],
            error.to_string(),
        )
    }

    /// Fallback for failures that carry no usable diagnostic at all.
    pub fn unexpected() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::InternalServerError,
            [],
            "An unexpected error occurred",
        )
    }

    /// Attach this record to a response so the logging middleware can emit
    /// the masked `failed` event for the same request.
    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

impl IntoResponse for ErrorRecord {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, Json(self.clone())).into_response();
        self.attach(&mut response);
        response
    }
}

/// Duplicates and blank entries are dropped; first occurrence wins.
fn normalize_target(target: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for entry in target {
        let trimmed = entry.trim();
        if trimmed.is_empty() || seen.iter().any(|existing| existing == trimmed) {
            continue;
        }
        seen.push(trimmed.to_string());
    }
    seen
}

fn derive_message(kind: ErrorKind, target: &[String]) -> String {
    if target.is_empty() {
        format!("{} error(s)", kind.words())
    } else {
        format!("{} error(s) in {}", kind.words(), target.join(", "))
    }
}

fn serialize_rfc3339<S: Serializer>(
    timestamp: &OffsetDateTime,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let formatted = timestamp
        .format(&Rfc3339)
        .map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&formatted)
}

/// Symbolic label for a status code, e.g. 404 becomes `NOT_FOUND`.
fn status_label(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => reason.to_uppercase().replace([' ', '-'], "_"),
        None => status.as_u16().to_string(),
    }
}

/// Typed domain failure, each variant pre-bound to one `(status, kind)` pair.
///
/// Constructing any variant builds exactly one [`ErrorRecord`]; nothing below
/// the boundary formats a response and no variant carries a free-form message.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{}", .0.detail)]
    NotFound(ErrorRecord),
    #[error("{}", .0.detail)]
    Unauthorized(ErrorRecord),
    #[error("{}", .0.detail)]
    Forbidden(ErrorRecord),
    #[error("{}", .0.detail)]
    BadRequest(ErrorRecord),
    #[error("{}", .0.detail)]
    Database(ErrorRecord),
}

impl ServiceError {
    pub fn not_found(resource: &str, identifier: impl ToString) -> Self {
        let identifier = identifier.to_string();
        let detail = format!("{resource} with identifier {identifier} not found");
        Self::NotFound(ErrorRecord::new(
            StatusCode::NOT_FOUND,
            ErrorKind::NotFound,
            [identifier],
            detail,
        ))
    }

    pub fn unauthorized(detail: Option<&str>) -> Self {
        Self::Unauthorized(ErrorRecord::new(
            StatusCode::UNAUTHORIZED,
            ErrorKind::Unauthorized,
            [],
            detail.unwrap_or("Authentication required"),
        ))
    }

    pub fn forbidden(resource: &str) -> Self {
        Self::Forbidden(ErrorRecord::new(
            StatusCode::FORBIDDEN,
            ErrorKind::Forbidden,
            [resource.to_string()],
            format!("Access to {resource} is not allowed"),
        ))
    }

    /// 400 with a caller-chosen category (`Validation`, `UniqueViolation`, ...).
    pub fn bad_request(
        fields: impl IntoIterator<Item = String>,
        kind: ErrorKind,
        detail: impl Into<String>,
    ) -> Self {
        Self::BadRequest(ErrorRecord::new(
            StatusCode::BAD_REQUEST,
            kind,
            fields,
            detail,
        ))
    }

    /// Wrap an uncaught driver error. Logged eagerly at construction so the
    /// failure is recorded even if the caller discards the value.
    pub fn database(operation: &str, source: &dyn std::error::Error) -> Self {
        error!(
            target: "keel::db",
            operation = operation,
            error = %source,
            "database operation failed",
        );
        Self::Database(ErrorRecord::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::InternalServerError,
            [],
            format!("database operation `{operation}` failed: {source}"),
        ))
    }

    /// Map a sqlx error, preserving domain meaning for constraint violations.
    pub fn from_sqlx(operation: &str, error: sqlx::Error) -> Self {
        if let Some(db_error) = error.as_database_error()
            && matches!(db_error.kind(), sqlx::error::ErrorKind::UniqueViolation)
        {
            let field = db_error.constraint().unwrap_or(operation).to_string();
            return Self::bad_request([field], ErrorKind::UniqueViolation, db_error.to_string());
        }
        Self::database(operation, &error)
    }

    pub fn record(&self) -> &ErrorRecord {
        match self {
            ServiceError::NotFound(record)
            | ServiceError::Unauthorized(record)
            | ServiceError::Forbidden(record)
            | ServiceError::BadRequest(record)
            | ServiceError::Database(record) => record,
        }
    }

    pub fn into_record(self) -> ErrorRecord {
        match self {
            ServiceError::NotFound(record)
            | ServiceError::Unauthorized(record)
            | ServiceError::Forbidden(record)
            | ServiceError::BadRequest(record)
            | ServiceError::Database(record) => record,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        self.into_record().into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_without_target_names_only_the_kind() {
        let record = ErrorRecord::new(StatusCode::BAD_REQUEST, ErrorKind::Validation, [], "bad");
        assert_eq!(record.message, "validation error(s)");
    }

    #[test]
    fn message_with_target_joins_fields() {
        let record = ErrorRecord::new(
            StatusCode::BAD_REQUEST,
            ErrorKind::UniqueViolation,
            ["email".to_string(), "name".to_string()],
            "duplicate",
        );
        assert_eq!(record.message, "unique violation error(s) in email, name");
    }

    #[test]
    fn target_drops_blanks_and_duplicates_preserving_order() {
        let record = ErrorRecord::new(
            StatusCode::BAD_REQUEST,
            ErrorKind::Validation,
            [
                "b".to_string(),
                " ".to_string(),
                "a".to_string(),
                "b".to_string(),
                String::new(),
            ],
            "x",
        );
        assert_eq!(record.target, vec!["b", "a"]);
    }

    #[test]
    fn code_is_symbolic_status_name() {
        let record = ErrorRecord::new(StatusCode::NOT_FOUND, ErrorKind::NotFound, [], "x");
        assert_eq!(record.code, "NOT_FOUND");
        let record = ErrorRecord::new(StatusCode::BAD_REQUEST, ErrorKind::Validation, [], "x");
        assert_eq!(record.code, "BAD_REQUEST");
    }

    #[test]
    fn not_found_scenario_matches_canonical_wording() {
        let error = ServiceError::not_found("User", 42);
        let record = error.record();
        assert_eq!(record.status, 404);
        assert_eq!(record.kind, ErrorKind::NotFound);
        assert_eq!(record.target, vec!["42"]);
        assert_eq!(record.message, "not found error(s) in 42");
        assert_eq!(record.detail, "User with identifier 42 not found");
    }

    #[test]
    fn unauthorized_defaults_its_detail() {
        let record = ServiceError::unauthorized(None).into_record();
        assert_eq!(record.status, 401);
        assert_eq!(record.detail, "Authentication required");

        let record = ServiceError::unauthorized(Some("Token expired")).into_record();
        assert_eq!(record.detail, "Token expired");
    }

    #[test]
    fn generic_error_wraps_as_internal() {
        let source = std::io::Error::other("disk on fire");
        let record = ErrorRecord::from_error(&source);
        assert_eq!(record.status, 500);
        assert_eq!(record.kind, ErrorKind::InternalServerError);
        assert!(record.target.is_empty());
        assert_eq!(record.detail, "disk on fire");
    }

    #[test]
    fn unexpected_uses_fixed_detail() {
        let record = ErrorRecord::unexpected();
        assert_eq!(record.status, 500);
        assert_eq!(record.detail, "An unexpected error occurred");
    }

    #[test]
    fn wire_shape_has_exact_keys() {
        let record = ServiceError::not_found("User", 42).into_record();
        let value = serde_json::to_value(&record).expect("serializable record");
        let object = value.as_object().expect("object body");
        let mut keys: Vec<_> = object.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec!["code", "detail", "message", "status", "target", "timestamp", "type"]
        );
        assert_eq!(object["type"], ErrorKind::NotFound.as_str());
        assert!(object["timestamp"].as_str().is_some_and(|t| t.contains('T')));
    }

    #[test]
    fn uncaught_driver_errors_fall_through_to_the_database_wrapper() {
        let error = ServiceError::from_sqlx("insert_user", sqlx::Error::PoolTimedOut);
        let record = error.record();
        assert_eq!(record.status, 500);
        assert_eq!(record.kind, ErrorKind::InternalServerError);
        assert!(record.detail.contains("insert_user"));
    }
}
