//! Error types for llmpool.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::adapter::ChannelError;
use crate::pool::PoolType;

/// Result type alias for llmpool operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for llmpool.
///
/// Per-attempt failures ([`ChannelError`]) never surface on their own: the
/// router absorbs them and reports either success, [`Error::PoolEmpty`] or
/// [`Error::ExhaustedPool`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Unknown pool '{0}' (expected 'metadata' or 'analysis')")]
    UnknownPool(String),

    #[error("Pool '{pool}' is empty: configure at least one enabled provider with a key and a model")]
    PoolEmpty { pool: PoolType },

    #[error("All channels in pool '{pool}' exhausted after {attempts} attempts; last error: {source}")]
    ExhaustedPool {
        pool: PoolType,
        attempts: usize,
        #[source]
        source: ChannelError,
    },

    #[error("Provider {0} not found")]
    ProviderNotFound(i64),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::UnknownPool(_) | Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::ProviderNotFound(_) => StatusCode::NOT_FOUND,
            Error::PoolEmpty { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::ExhaustedPool { .. } => StatusCode::BAD_GATEWAY,
            Error::Config(_)
            | Error::Internal(_)
            | Error::Database(_)
            | Error::Migrate(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": {
                "message": self.to_string(),
                "type": "llmpool_error",
                "code": status.as_u16()
            }
        });

        (status, axum::Json(body)).into_response()
    }
}
