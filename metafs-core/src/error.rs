use thiserror::Error;

/// Error taxonomy for the projection engine (spec §7).
///
/// Only [`CoreError::Validation`] and [`CoreError::NotFound`] are meant to be
/// surfaced verbatim to an API caller; [`CoreError::Transport`] is logged and
/// retried by the store-facing callers rather than propagated to readers.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("store transport error: {0}")]
    Transport(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("rule validation failed: {0}")]
    Validation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
