use std::collections::BTreeMap;
use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Field-keyed validation messages, e.g. `github_handle: can't be blank`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<&'static str, Vec<String>>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.entry(field).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Messages recorded for `field`, empty when the field is valid.
    pub fn on(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `Ok(())` when nothing was recorded.
    pub fn into_result(self) -> Result<(), AppError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            for message in messages {
                if !first {
                    f.write_str(", ")?;
                }
                write!(f, "{field}: {message}")?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Errors surfaced by services and handlers.
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or malformed input.
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    /// The entity does not exist or is not visible to the caller.
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        let mut errors = ValidationErrors::new();
        errors.add(field, message);
        AppError::Validation(errors)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Validation(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "errors": errors })),
            )
                .into_response(),
            AppError::NotFound(entity) => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": format!("{entity} not found") })),
            )
                .into_response(),
            AppError::Unauthorized(reason) => {
                (StatusCode::UNAUTHORIZED, Json(json!({ "error": reason }))).into_response()
            }
            AppError::Database(e) => {
                error!(error = %e, "database error");
                internal_response()
            }
            AppError::Internal(e) => {
                error!(error = %e, "internal error");
                internal_response()
            }
        }
    }
}

fn internal_response() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal server error" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_display_field_and_message() {
        let err = AppError::validation("github_handle", "can't be blank");
        assert_eq!(err.to_string(), "validation failed: github_handle: can't be blank");
    }

    #[test]
    fn validation_errors_serialize_as_field_map() {
        let mut errors = ValidationErrors::new();
        errors.add("email", "is invalid");
        errors.add("github_handle", "can't be blank");
        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(json["github_handle"][0], "can't be blank");
        assert_eq!(json["email"][0], "is invalid");
    }

    #[test]
    fn status_codes_follow_error_kind() {
        assert_eq!(
            AppError::NotFound("metric").into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::validation("name", "can't be blank").into_response().status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::Internal(anyhow::anyhow!("boom")).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
