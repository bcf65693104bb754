//! Defines the [`Error`] type returned by `core`'s business logic and the
//! [`ApiError`] wrapper that HTTP handlers convert it into at the boundary.
//! Handler bodies work in `anyhow::Result` internally and only convert to
//! one of these richer types right before returning a response.
use axum::http::StatusCode;
use axum::response::IntoResponse;

/// Domain-level error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<sqlx::Error> for Error {
    fn from(error: sqlx::Error) -> Self {
        tracing::error!(?error, "database error");
        Error::Internal(anyhow::anyhow!(error))
    }
}

impl Error {
    fn status(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// `ApiError` is what admin-API handlers actually return; it serializes as
/// `{"error": "..."}`. Webhook and worker routes deliberately do *not* use
/// this type on most paths, since those responses must stay opaque to the
/// external provider.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl<E: Into<Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        ApiError(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.0.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = ?self.0, "internal error serving request");
        }
        (status, axum::Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}
