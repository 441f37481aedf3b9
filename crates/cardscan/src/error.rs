use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable, caller-facing error category.
///
/// Every error that leaves the crate maps to one of these so a caller can
/// decide between retrying automatically and asking a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidInput,
    Timeout,
    UpstreamError,
    NoMatch,
    ConfigurationError,
    Conflict,
    NotFound,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "invalid_input",
            ErrorCode::Timeout => "timeout",
            ErrorCode::UpstreamError => "upstream_error",
            ErrorCode::NoMatch => "no_match",
            ErrorCode::ConfigurationError => "configuration_error",
            ErrorCode::Conflict => "conflict",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Internal => "internal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "invalid_input" => Some(ErrorCode::InvalidInput),
            "timeout" => Some(ErrorCode::Timeout),
            "upstream_error" => Some(ErrorCode::UpstreamError),
            "no_match" => Some(ErrorCode::NoMatch),
            "configuration_error" => Some(ErrorCode::ConfigurationError),
            "conflict" => Some(ErrorCode::Conflict),
            "not_found" => Some(ErrorCode::NotFound),
            "internal" => Some(ErrorCode::Internal),
            _ => None,
        }
    }

    /// Whether re-submitting the same work later may succeed without
    /// anyone changing anything.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::Timeout | ErrorCode::UpstreamError)
    }

    /// Whether the outcome should be presented to a person for manual
    /// resolution.
    pub fn needs_human(&self) -> bool {
        matches!(
            self,
            ErrorCode::NoMatch
                | ErrorCode::InvalidInput
                | ErrorCode::ConfigurationError
                | ErrorCode::Conflict
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum CardscanError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Identification error: {0}")]
    Identify(#[from] IdentifyError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Import job '{active_job_id}' is still active")]
    Conflict { active_job_id: String },

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl CardscanError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CardscanError::Config(_) => ErrorCode::ConfigurationError,
            CardscanError::Storage(e) => e.code(),
            CardscanError::Identify(e) => e.code(),
            CardscanError::Worker(_) | CardscanError::Database(_) => ErrorCode::Internal,
            CardscanError::Conflict { .. } => ErrorCode::Conflict,
            CardscanError::NotFound { .. } => ErrorCode::NotFound,
            CardscanError::InvalidInput(_) => ErrorCode::InvalidInput,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Secret for '{name}' could not be resolved: {source}")]
    Secret {
        name: String,
        #[source]
        source: crate::secrets::SecretError,
    },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete file '{path}': {source}")]
    DeleteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Path '{0}' is outside the image store")]
    OutsideStore(PathBuf),

    #[error("Unsupported image type '{0}'")]
    UnsupportedExtension(String),

    #[error("Image is empty")]
    EmptyImage,
}

impl StorageError {
    pub fn code(&self) -> ErrorCode {
        match self {
            StorageError::ReadFile { .. } | StorageError::EmptyImage => ErrorCode::InvalidInput,
            StorageError::OutsideStore(_) | StorageError::UnsupportedExtension(_) => {
                ErrorCode::InvalidInput
            }
            StorageError::CreateDirectory { .. }
            | StorageError::WriteFile { .. }
            | StorageError::DeleteFile { .. } => ErrorCode::Internal,
        }
    }
}

/// Errors from the identification chain and its external services.
#[derive(Error, Debug)]
pub enum IdentifyError {
    #[error("{service} request timed out")]
    Timeout { service: &'static str },

    #[error("{service} returned HTTP {status}: {body}")]
    Http {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} request failed: {message}")]
    Transport {
        service: &'static str,
        message: String,
    },

    #[error("{service} returned a malformed response: {message}")]
    MalformedResponse {
        service: &'static str,
        message: String,
    },

    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("Translation quota exhausted: {used} of {limit} characters used this month")]
    QuotaExhausted { used: u64, limit: u64 },

    #[error("No candidate matched: {0}")]
    NoMatch(String),

    #[error("Authentication with {service} failed: {message}")]
    Auth {
        service: &'static str,
        message: String,
    },

    #[error("Image could not be processed: {0}")]
    Image(String),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

impl IdentifyError {
    pub fn code(&self) -> ErrorCode {
        match self {
            IdentifyError::Timeout { .. } => ErrorCode::Timeout,
            IdentifyError::Http { .. }
            | IdentifyError::Transport { .. }
            | IdentifyError::MalformedResponse { .. } => ErrorCode::UpstreamError,
            IdentifyError::NotConfigured(_)
            | IdentifyError::QuotaExhausted { .. }
            | IdentifyError::Auth { .. } => ErrorCode::ConfigurationError,
            IdentifyError::NoMatch(_) => ErrorCode::NoMatch,
            IdentifyError::Image(_) => ErrorCode::InvalidInput,
            IdentifyError::Database(_) => ErrorCode::Internal,
        }
    }

    /// Maps a reqwest failure into the timeout / transport split.
    pub(crate) fn from_reqwest(service: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            IdentifyError::Timeout { service }
        } else {
            IdentifyError::Transport {
                service,
                message: err.to_string(),
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker task failed to join: {0}")]
    Join(String),

    #[error("Invalid item transition from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },

    #[error("Collection rejected confirmed cards: {0}")]
    Collection(String),
}

pub type Result<T> = std::result::Result<T, CardscanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_round_trip_strings() {
        for code in [
            ErrorCode::InvalidInput,
            ErrorCode::Timeout,
            ErrorCode::UpstreamError,
            ErrorCode::NoMatch,
            ErrorCode::ConfigurationError,
            ErrorCode::Conflict,
            ErrorCode::NotFound,
            ErrorCode::Internal,
        ] {
            assert_eq!(ErrorCode::parse(code.as_str()), Some(code));
        }
        assert_eq!(ErrorCode::parse("bogus"), None);
    }

    #[test]
    fn test_retry_versus_human() {
        assert!(ErrorCode::Timeout.is_retryable());
        assert!(ErrorCode::UpstreamError.is_retryable());
        assert!(!ErrorCode::NoMatch.is_retryable());
        assert!(ErrorCode::NoMatch.needs_human());
        assert!(!ErrorCode::Timeout.needs_human());
    }

    #[test]
    fn test_identify_error_codes() {
        assert_eq!(
            IdentifyError::Timeout { service: "gemini" }.code(),
            ErrorCode::Timeout
        );
        assert_eq!(
            IdentifyError::Http {
                service: "gemini",
                status: 429,
                body: String::new()
            }
            .code(),
            ErrorCode::UpstreamError
        );
        assert_eq!(
            IdentifyError::NotConfigured("translator").code(),
            ErrorCode::ConfigurationError
        );
        assert_eq!(
            IdentifyError::NoMatch("nothing".into()).code(),
            ErrorCode::NoMatch
        );
    }

    #[test]
    fn test_conflict_error_code() {
        let err = CardscanError::Conflict {
            active_job_id: "job-1".to_string(),
        };
        assert_eq!(err.code(), ErrorCode::Conflict);
        assert!(err.to_string().contains("job-1"));
    }
}
