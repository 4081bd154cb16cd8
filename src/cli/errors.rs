//! CLI errors and their process exit codes.

use thiserror::Error;

use crate::auth::AuthError;
use crate::config::ConfigError;
use crate::http_server::ServerError;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Server failed: {0}")]
    Server(#[from] ServerError),

    #[error("Failed to start runtime: {0}")]
    Runtime(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn error_code(&self) -> &'static str {
        match self {
            CliError::Config(_) => "CONFIG_ERROR",
            CliError::Auth(e) => e.error_code(),
            CliError::Server(_) => "SERVER_ERROR",
            CliError::Runtime(_) => "RUNTIME_ERROR",
            CliError::Io(_) => "IO_ERROR",
        }
    }

    /// 2 for bad configuration or input, 1 for everything else
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) | CliError::Auth(AuthError::ValidationError(_)) => 2,
            _ => 1,
        }
    }
}
