//! Error types shared by the engine, the backends and the runner.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LifeError {
    /// Requested sizing cannot produce a valid grid (zero cells, bad aspect
    /// ratio, columns not a multiple of 32, index overflow).
    #[error("invalid grid dimensions: {0}")]
    InvalidDimensions(String),

    /// A buffer could not be allocated. The previous grid is still valid.
    #[error("failed to allocate {bytes} bytes for {what}")]
    AllocationFailure { what: &'static str, bytes: u64 },

    /// The backend cannot run on this machine or was compiled out.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A device that was up failed during dispatch or readback.
    #[error("device error: {0}")]
    Device(String),

    #[error("invalid checkpoint: {0}")]
    Checkpoint(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, LifeError>;
