use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoltflowError {
    #[error(transparent)]
    Msr(#[from] voltflow_raw::msr::MsrError),

    #[error("Segmentation fault")]
    Fault,

    #[error("Values do not equal")]
    ValueMismatch,

    #[error("No method available")]
    NoMethod,

    #[error("Memory map failed: {0}")]
    MapFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, VoltflowError>;
