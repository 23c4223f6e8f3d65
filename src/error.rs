use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::models::ErrorResponse;

/// failures while looking for a LAN-reachable address
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("no LAN IP address found")]
    NoLanAddress,

    #[error("failed to enumerate network interfaces: {0}")]
    Interfaces(#[source] std::io::Error),
}

/// lifecycle errors of the ingestion server
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("server is already running")]
    AlreadyRunning,

    #[error("server is not running")]
    NotRunning,

    #[error("server is starting or stopping, try again")]
    Busy,

    #[error("failed to get LAN IP: {0}")]
    Address(#[from] NetError),

    #[error("failed to bind listener: {0}")]
    Bind(#[source] std::io::Error),
}

/// image pipeline failures, always recovered by storing the original bytes
#[derive(Debug, thiserror::Error)]
pub enum CompressError {
    #[error("failed to decode {extension} image: {source}")]
    Decode {
        extension: String,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to encode {extension} image: {source}")]
    Encode {
        extension: String,
        #[source]
        source: image::ImageError,
    },
}

/// per-file persistence failures; the file is skipped, siblings continue
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("failed to read spooled upload: {0}")]
    Spool(#[source] std::io::Error),

    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// request-level failures of the upload endpoint
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Save directory not configured")]
    NotConfigured,

    #[error("Failed to create save directory")]
    SaveDir(#[source] std::io::Error),

    #[error("Failed to parse upload: {0}")]
    Parse(String),

    #[error("Failed to parse upload. File may be too large (max 2GB).")]
    TooLarge,

    #[error("No files uploaded")]
    NoFiles,

    #[error("Failed to buffer upload")]
    Spool(#[source] std::io::Error),
}

impl UploadError {
    pub fn status(&self) -> StatusCode {
        match self {
            UploadError::NotConfigured | UploadError::SaveDir(_) | UploadError::Spool(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            UploadError::Parse(_) | UploadError::TooLarge | UploadError::NoFiles => {
                StatusCode::BAD_REQUEST
            }
        }
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Upload rejected");
        } else {
            tracing::warn!(error = %self, "Upload rejected");
        }

        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
