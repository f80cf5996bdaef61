//! Error types for the engagement engine

use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngageError>;

#[derive(Error, Debug)]
pub enum EngageError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification handed to the transport layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Internal,
}

impl EngageError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EngageError::Validation(msg.into())
    }

    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        EngageError::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngageError::Validation(_) | EngageError::Pipeline(_) => ErrorKind::Validation,
            EngageError::NotFound { .. } => ErrorKind::NotFound,
            EngageError::Conflict(_) => ErrorKind::Conflict,
            EngageError::Internal(_)
            | EngageError::Storage(_)
            | EngageError::Json(_)
            | EngageError::Io(_) => ErrorKind::Internal,
        }
    }
}
