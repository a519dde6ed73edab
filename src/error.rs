use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("state lock poisoned")]
    StateLock,
    #[error("actuator error: {0}")]
    Actuator(String),
    #[error("gpio error: {0}")]
    Gpio(String),
    #[error("perception error: {0}")]
    Perception(String),
    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),
    #[error("timestamp format error: {0}")]
    Timestamp(#[from] time::error::Format),
    #[error("invalid ring: {0}")]
    InvalidRing(String),
}

/// Startup failures. Each class exits with its own status so operators can
/// tell configuration, connectivity and credential problems apart.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("configuration: {0}")]
    Config(#[from] crate::config::ConfigError),
    #[error("region map: {0}")]
    Regions(#[from] crate::region::RegionError),
    #[error("signal controller: {0}")]
    Controller(AppError),
    #[error("actuator channel: {0}")]
    Actuator(AppError),
    #[error("storage: {0}")]
    Storage(crate::storage::StorageError),
    #[error("server: {0}")]
    Server(std::io::Error),
}

impl InitError {
    pub fn exit_code(&self) -> u8 {
        match self {
            InitError::Config(_) | InitError::Regions(_) | InitError::Controller(_) => 4,
            InitError::Actuator(_) => 2,
            InitError::Storage(_) => 3,
            InitError::Server(_) => 5,
        }
    }
}
