use std::sync::atomic::{AtomicBool, Ordering};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use ojas_shared::{IdError, SessionError};
use ojas_store::StoreError;

/// When false, 500 responses carry a generic message only.
static EXPOSE_INTERNAL: AtomicBool = AtomicBool::new(false);

/// Toggle internal error detail in responses (on in development mode).
pub fn set_expose_internal(expose: bool) {
    EXPOSE_INTERNAL.store(expose, Ordering::Relaxed);
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Auth(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Validation(_) => StatusCode::BAD_REQUEST,
            ServerError::Auth(_) => StatusCode::UNAUTHORIZED,
            ServerError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Conflict(_) => StatusCode::CONFLICT,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to the caller, over HTTP or as a relay `error` event.
    pub fn public_message(&self) -> String {
        match self {
            ServerError::Internal(detail) if EXPOSE_INTERNAL.load(Ordering::Relaxed) => {
                format!("Internal server error: {detail}")
            }
            ServerError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        if let ServerError::Internal(detail) = &self {
            tracing::error!(error = %detail, "Request failed");
        }

        let body = serde_json::json!({
            "error": self.public_message(),
        });

        (self.status(), axum::Json(body)).into_response()
    }
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ServerError::NotFound("Record"),
            StoreError::Conflict(what) => ServerError::Conflict(format!("Already exists: {what}")),
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl From<IdError> for ServerError {
    fn from(e: IdError) -> Self {
        ServerError::Validation(e.to_string())
    }
}

impl From<SessionError> for ServerError {
    fn from(e: SessionError) -> Self {
        ServerError::Auth(e.to_string())
    }
}

/// Replace a generic store `NotFound` with a specific subject.
pub trait NotFoundExt<T> {
    fn or_not_found(self, what: &'static str) -> Result<T, ServerError>;
}

impl<T> NotFoundExt<T> for Result<T, StoreError> {
    fn or_not_found(self, what: &'static str) -> Result<T, ServerError> {
        self.map_err(|e| match e {
            StoreError::NotFound => ServerError::NotFound(what),
            other => other.into(),
        })
    }
}
