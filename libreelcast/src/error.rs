//! Error types for Reelcast

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReelcastError>;

/// Run-level errors. Anything surfacing here aborts the whole run.
#[derive(Error, Debug)]
pub enum ReelcastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Staging store error: {0}")]
    Staging(#[from] StagingError),

    #[error("Credential unavailable: {0}")]
    Credential(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Run cancelled before completion")]
    Cancelled,
}

impl ReelcastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ReelcastError::InvalidInput(_) => 3,
            ReelcastError::Credential(_) => 2,
            ReelcastError::Staging(StagingError::Auth(_)) => 2,
            ReelcastError::Staging(StagingError::Cancelled) => 130,
            ReelcastError::Staging(_) => 1,
            ReelcastError::Config(_) => 1,
            ReelcastError::Cancelled => 130,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug, Clone)]
pub enum StagingError {
    #[error("Staging authentication failed: {0}")]
    Auth(String),

    #[error("Staging transport failed: {0}")]
    Transport(String),

    #[error("Staging API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Staging response missing field: {0}")]
    MissingField(String),

    #[error("Staging call cancelled")]
    Cancelled,
}

/// Caption schedule could not be read. Never fatal: the run falls back to
/// the default caption.
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Failed to read schedule file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse schedule: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// Failure of a single HTTP exchange.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("unparseable response body (status {status}): {reason}")]
    Body { status: u16, reason: String },
}

/// Destination-level failures.
///
/// These never escape the orchestrator: each one ends a single
/// destination's attempt in the `Failed` state with `to_string()` as detail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("credential unavailable: {0}")]
    CredentialUnavailable(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("destination rejected request: {0}")]
    DestinationRejected(String),

    #[error("processing did not finish after {polls} status polls")]
    ProcessingTimeout { polls: u32 },

    #[error("could not confirm {target} is live after {attempts} verification attempts")]
    VerificationUnconfirmed { target: String, attempts: u32 },

    #[error("invalid asset: {0}")]
    InvalidAsset(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl PublishError {
    /// True when the destination probably accepted the media but it was
    /// never observed as live.
    pub fn is_unconfirmed(&self) -> bool {
        matches!(self, PublishError::VerificationUnconfirmed { .. })
    }
}

impl From<TransportError> for PublishError {
    fn from(error: TransportError) -> Self {
        PublishError::Transport(error.to_string())
    }
}

impl From<TransportError> for StagingError {
    fn from(error: TransportError) -> Self {
        StagingError::Transport(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_invalid_input() {
        let error = ReelcastError::InvalidInput("bad deadline".to_string());
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_credential_errors() {
        assert_eq!(ReelcastError::Credential("token invalid".to_string()).exit_code(), 2);
        let staging_auth = ReelcastError::Staging(StagingError::Auth("refresh failed".to_string()));
        assert_eq!(staging_auth.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_staging_and_config() {
        let staging = ReelcastError::Staging(StagingError::Api {
            status: 409,
            message: "path/not_found".to_string(),
        });
        assert_eq!(staging.exit_code(), 1);

        let config = ReelcastError::Config(ConfigError::MissingField("instagram.account_id".to_string()));
        assert_eq!(config.exit_code(), 1);

        assert_eq!(ReelcastError::Staging(StagingError::Cancelled).exit_code(), 130);
    }

    #[test]
    fn test_error_message_formatting() {
        let error = ReelcastError::Config(ConfigError::MissingField("facebook.page_id".to_string()));
        assert_eq!(
            error.to_string(),
            "Configuration error: Missing required field: facebook.page_id"
        );

        let error = ReelcastError::Staging(StagingError::Api {
            status: 400,
            message: "bad path".to_string(),
        });
        assert_eq!(error.to_string(), "Staging store error: Staging API returned 400: bad path");
    }

    #[test]
    fn test_publish_error_details_are_distinct() {
        let unconfirmed = PublishError::VerificationUnconfirmed {
            target: "1789".to_string(),
            attempts: 3,
        };
        let rejected = PublishError::DestinationRejected("Invalid parameter (code 100)".to_string());

        assert!(unconfirmed.to_string().contains("could not confirm"));
        assert!(rejected.to_string().contains("Invalid parameter"));
        assert!(unconfirmed.is_unconfirmed());
        assert!(!rejected.is_unconfirmed());
    }

    #[test]
    fn test_transport_error_conversion() {
        let error = TransportError::Body {
            status: 502,
            reason: "expected value at line 1".to_string(),
        };
        let publish: PublishError = error.clone().into();
        assert!(matches!(publish, PublishError::Transport(ref m) if m.contains("502")));

        let staging: StagingError = error.into();
        assert!(matches!(staging, StagingError::Transport(_)));
    }

    #[test]
    fn test_publish_error_clone() {
        let timeout = PublishError::ProcessingTimeout { polls: 20 };
        assert_eq!(timeout.clone(), timeout);
    }
}
