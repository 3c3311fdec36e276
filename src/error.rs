//! Top-level application error for startup and serving.

use thiserror::Error;

use crate::{assembly::AssemblyError, config::LoadError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] LoadError),
    #[error(transparent)]
    Assembly(#[from] AssemblyError),
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
