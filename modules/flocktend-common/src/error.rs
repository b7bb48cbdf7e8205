use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlocktendError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Circuit breaker tripped after {consecutive} consecutive fetch failures")]
    CircuitBreak { consecutive: u32 },

    #[error("Run lock conflict: another maintenance run is in progress")]
    RunLockConflict,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
