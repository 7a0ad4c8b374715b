use thiserror::Error;
use super::types::UploadState;

#[derive(Error, Debug)]
pub enum UploadError {
    /// 用户主动取消，不属于错误状态，调用方需要单独处理
    #[error("Upload was cancelled")]
    Cancelled,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Storage rejected upload: status code {status}, message: {message}")]
    StorageRejected {
        status: u16,
        message: String,
    },

    #[error("Storage response for part {part_number} has no ETag header")]
    MissingETag {
        part_number: u32,
    },

    #[error("Upload incomplete expected: {expected} parts, actual: {actual}")]
    IncompleteUpload {
        expected: usize,
        actual: usize,
    },

    #[error("Backend rejected {endpoint}: status code {status}, message: {message}")]
    Negotiation {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid state transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: UploadState,
        to: UploadState,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UploadError {
    pub fn storage_rejected(status: u16, message: impl Into<String>) -> Self {
        Self::StorageRejected {
            status,
            message: message.into(),
        }
    }

    pub fn negotiation(endpoint: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self::Negotiation {
            endpoint: endpoint.into(),
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, UploadError::Cancelled)
    }
}

/// Error alias
pub type Result<T, E = UploadError> = std::result::Result<T, E>;
