use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid passport: {0}")]
    InvalidPassport(String),

    #[error("Signature verification failed")]
    InvalidSignature,

    #[error("Passport is expired")]
    Expired,

    #[error("Rotation mismatch: {0}")]
    RotationMismatch(String),

    #[error("Directory error: {0}")]
    Directory(String),

    #[error("Core error: {0}")]
    Core(#[from] convoy_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
