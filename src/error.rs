use thiserror::Error;

/// Failures of the persistent log
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Tracker error types
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Session already tracking")]
    AlreadyTracking,

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Log store is not initialized")]
    StoreUnavailable,

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type TrackerResult<T> = Result<T, TrackerError>;
