use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid capacity: ring buffer needs room for at least one event")]
    InvalidCapacity,
}

pub type Result<T> = std::result::Result<T, Error>;
