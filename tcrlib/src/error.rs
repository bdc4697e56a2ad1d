//! Error definitions for TCRouter

use thiserror::Error;

/// TCRouter error types
#[derive(Error, Debug)]
pub enum TcrError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Read error: {0}")]
    Read(String),

    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("No route for command: {target} {packet}")]
    NoRoute { target: String, packet: String },

    #[error("Interface error: {0}")]
    Interface(String),

    #[error("Definition error: {0}")]
    Definition(String),

    #[error("Timeout")]
    Timeout,

    #[error("Interface thread {name} did not stop within {waited_ms} ms")]
    StopTimeout { name: String, waited_ms: u64 },

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Channel error: {0}")]
    Channel(String),
}

impl TcrError {
    pub fn connection(msg: impl Into<String>) -> Self {
        TcrError::Connection(msg.into())
    }

    pub fn read(msg: impl Into<String>) -> Self {
        TcrError::Read(msg.into())
    }

    pub fn dispatch(msg: impl Into<String>) -> Self {
        TcrError::Dispatch(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        TcrError::Config(msg.into())
    }
}

/// Result type alias for TCRouter operations
pub type TcrResult<T> = Result<T, TcrError>;
