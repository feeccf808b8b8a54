use service_core::error::AppError;
use thiserror::Error;

use crate::models::SubjectFormatError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Access denied: {0}")]
    Authorization(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Email error: {0}")]
    Email(String),

    #[error("Identity provider error: {0}")]
    Provider(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Error categories callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Authentication,
    Authorization,
    Conflict,
    Infrastructure,
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Validation(_) => ErrorKind::Validation,
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::Authentication(_) => ErrorKind::Authentication,
            ServiceError::Authorization(_) => ErrorKind::Authorization,
            ServiceError::Conflict(_) => ErrorKind::Conflict,
            ServiceError::Database(_)
            | ServiceError::Email(_)
            | ServiceError::Provider(_)
            | ServiceError::Internal(_) => ErrorKind::Infrastructure,
        }
    }

    pub fn not_found(what: &str) -> Self {
        ServiceError::NotFound(format!("{} does not exist", what))
    }
}

impl From<SubjectFormatError> for ServiceError {
    fn from(err: SubjectFormatError) -> Self {
        ServiceError::Validation(err.to_string())
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(e) => AppError::BadRequest(anyhow::anyhow!(e)),
            ServiceError::NotFound(e) => AppError::NotFound(anyhow::anyhow!(e)),
            ServiceError::Authentication(e) => AppError::AuthError(anyhow::anyhow!(e)),
            ServiceError::Authorization(e) => AppError::Forbidden(anyhow::anyhow!(e)),
            ServiceError::Conflict(e) => AppError::Conflict(anyhow::anyhow!(e)),
            ServiceError::Database(e) => AppError::DatabaseError(anyhow::anyhow!(e)),
            ServiceError::Email(e) => AppError::EmailError(e),
            ServiceError::Provider(e) => AppError::InternalError(anyhow::anyhow!(e)),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_core::axum::http::StatusCode;

    #[test]
    fn test_status_codes_follow_kind() {
        let cases = [
            (ServiceError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (ServiceError::not_found("role"), StatusCode::NOT_FOUND),
            (ServiceError::Authentication("expired".into()), StatusCode::UNAUTHORIZED),
            (ServiceError::Authorization("no role".into()), StatusCode::FORBIDDEN),
            (ServiceError::Conflict("dup".into()), StatusCode::CONFLICT),
            (ServiceError::Email("smtp down".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
    }

    #[test]
    fn test_subject_format_error_is_validation() {
        let err = ServiceError::from(SubjectFormatError::FieldCount(1));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
