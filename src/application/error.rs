use thiserror::Error;
use tracing::error;

use crate::{application::repos::RepoError, domain::error::DomainError, infra::error::InfraError};

/// Coarse classification a transport maps onto its own status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Internal,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("resource not found")]
    NotFound,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Maps a repository failure, logging anything that is not the caller's fault.
    pub fn from_repo(source: &'static str, err: RepoError) -> Self {
        match err {
            RepoError::NotFound => AppError::NotFound,
            RepoError::InvalidInput { message } => AppError::Validation(message),
            RepoError::Duplicate { constraint } => {
                AppError::Validation(format!("duplicate value for `{constraint}`"))
            }
            other => {
                error!(source, error = %other, "Repository operation failed");
                AppError::Unexpected(other.to_string())
            }
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::NotFound => ErrorKind::NotFound,
            AppError::Domain(DomainError::Validation { .. })
            | AppError::Domain(DomainError::InvalidFilter { .. })
            | AppError::Validation(_) => ErrorKind::Validation,
            AppError::Domain(DomainError::Invariant { .. })
            | AppError::Infra(_)
            | AppError::Unexpected(_) => ErrorKind::Internal,
        }
    }

    /// Message safe to show to a client; internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::NotFound => self.to_string(),
            ErrorKind::Internal => "internal error".to_string(),
        }
    }
}
