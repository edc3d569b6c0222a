//! Service error taxonomy and HTTP mapping.
//!
//! | Variant | HTTP | Raised for |
//! |---------|------|------------|
//! | [`IndexError::BadRequest`] | 400 | bad index name, bad extension, reserved filename, empty query |
//! | [`IndexError::NotFound`] | 404 | missing index, document, or tool |
//! | [`IndexError::Conflict`] | 409 | duplicate index name |
//! | [`IndexError::Internal`] | 500 | object store, status store, embedding, or network faults |
//!
//! Every error renders as `{"error": "<message>"}`. The source of an
//! internal error is logged, never sent to the client.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{message}")]
    Internal {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

pub type IndexResult<T> = std::result::Result<T, IndexError>;

impl IndexError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Wrap a storage or network fault with a client-facing message.
    pub fn internal(message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Internal {
            message: message.into(),
            source: source.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Adds a client-facing message to an `anyhow` result, turning it into
/// [`IndexError::Internal`].
pub trait InternalContext<T> {
    fn internal(self, message: impl Into<String>) -> IndexResult<T>;
}

impl<T> InternalContext<T> for anyhow::Result<T> {
    fn internal(self, message: impl Into<String>) -> IndexResult<T> {
        self.map_err(|e| IndexError::internal(message, e))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for IndexError {
    fn into_response(self) -> Response {
        if let Self::Internal { message, source } = &self {
            tracing::error!(error = ?source, "{}", message);
        }
        let status = self.status_code();
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            IndexError::bad_request("x").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(IndexError::not_found("x").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(IndexError::conflict("x").status_code(), StatusCode::CONFLICT);
        assert_eq!(
            IndexError::internal("x", anyhow::anyhow!("boom")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_message_hides_source() {
        let err: IndexResult<()> =
            Err::<(), _>(anyhow::anyhow!("connection refused")).internal("Failed to list indices");
        let err = err.unwrap_err();
        assert_eq!(err.to_string(), "Failed to list indices");
    }
}
