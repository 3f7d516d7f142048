use axum::{
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::{auth::views, schema::MigrationError};

/// Failures surfaced by request handlers and the startup path.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("credential store unavailable")]
    StoreUnavailable(#[source] sqlx::Error),
    #[error("schema migration failed")]
    SchemaMigrationFailed(#[from] MigrationError),
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("username already taken")]
    AlreadyExists,
    #[error("{0}")]
    Validation(String),
    #[error("asset not found")]
    AssetNotFound,
    #[error("asset path rejected")]
    AssetPathInvalid,
    #[error("instance metadata unavailable: {0}")]
    MetadataServiceUnavailable(String),
    #[error("session rejected: {0}")]
    Session(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::StoreUnavailable(e)
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::SchemaMigrationFailed(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::AlreadyExists => StatusCode::CONFLICT,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::AssetNotFound | AppError::AssetPathInvalid => StatusCode::NOT_FOUND,
            // Never returned to callers; the dashboard swallows it.
            AppError::MetadataServiceUnavailable(_) => StatusCode::OK,
            AppError::Session(_) => StatusCode::SEE_OTHER,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            AppError::InvalidCredentials => {
                (status, views::login_page(Some("Invalid credentials. Try again."))).into_response()
            }
            AppError::Session(_) => Redirect::to("/login").into_response(),
            AppError::AssetNotFound | AppError::AssetPathInvalid => {
                (status, Json(json!({ "error": "not found" }))).into_response()
            }
            AppError::StoreUnavailable(ref e) => {
                error!(error = %e, "store unavailable");
                (status, Json(json!({ "error": "service unavailable" }))).into_response()
            }
            AppError::SchemaMigrationFailed(ref e) => {
                error!(error = %e, "schema migration failed");
                (status, Json(json!({ "error": "internal error" }))).into_response()
            }
            AppError::Internal(ref e) => {
                error!(error = %e, "internal error");
                (status, Json(json!({ "error": "internal error" }))).into_response()
            }
            other => (status, Json(json!({ "error": other.to_string() }))).into_response(),
        }
    }
}
