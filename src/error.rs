//! Error types for GrihaDSG

use thiserror::Error;

/// GrihaDSG error type
#[derive(Error, Debug)]
pub enum GrihaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Graph error: {0}")]
    Graph(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<toml::de::Error> for GrihaError {
    fn from(e: toml::de::Error) -> Self {
        GrihaError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GrihaError>;
