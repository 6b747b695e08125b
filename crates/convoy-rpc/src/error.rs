use thiserror::Error;

use crate::envelope::ErrorObject;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    #[error("Discovery failed: {0}")]
    Discovery(String),

    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(ErrorObject),

    #[error("Client is closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Core error: {0}")]
    Core(#[from] convoy_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

impl Error {
    /// Wire error code for errors that came back over RPC.
    pub fn rpc_code(&self) -> Option<i64> {
        match self {
            Error::Rpc(err) => Some(err.code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
