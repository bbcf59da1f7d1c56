use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid graph structure: {0}")]
    InvalidGraph(String),

    #[error("Invalid operator: {0}")]
    InvalidOperator(String),

    #[error("Corrupt allocation trace: {0}")]
    CorruptTrace(String),

    #[error("Memory plan violation: {0}")]
    PlanViolation(String),

    #[error("Invalid planning strategy: {0}")]
    InvalidStrategy(String),

    #[error("Allocation failed: {0}")]
    AllocationFailed(String),

    #[error("Lock acquisition failed: {0}")]
    LockAcquisitionError(String),
}
