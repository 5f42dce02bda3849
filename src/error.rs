use thiserror::Error;

#[derive(Error, Debug)]
pub enum BalsaError {
    /// The caller violated a precondition of a library entry point.
    #[error("Invalid input: {0}")]
    Input(String),

    /// The bytes of a model or table file violate the container format.
    #[error("Format error: {0}")]
    Format(String),

    /// An I/O or allocation failure, or a worker thread died.
    #[error("Resource error: {0}")]
    Resource(String),

    /// A broken internal invariant. Always a bug.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for BalsaError {
    fn from(err: std::io::Error) -> Self {
        BalsaError::Resource(format!("IO error: {}", err))
    }
}

impl BalsaError {
    pub fn input(message: impl Into<String>) -> Self {
        BalsaError::Input(message.into())
    }

    pub fn format(message: impl Into<String>) -> Self {
        BalsaError::Format(message.into())
    }

    pub fn resource(message: impl Into<String>) -> Self {
        BalsaError::Resource(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        BalsaError::Internal(message.into())
    }
}

pub type Result<T> = std::result::Result<T, BalsaError>;
