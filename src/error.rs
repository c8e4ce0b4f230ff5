//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No stream URL found. Requested: '{requested}'. Available qualities: {available:?}")]
    StreamUnavailable {
        requested: String,
        available: Vec<String>,
    },

    #[error("Process error: {0}")]
    Process(String),
}

impl Error {
    pub fn process(msg: impl Into<String>) -> Self {
        Self::Process(msg.into())
    }
}
