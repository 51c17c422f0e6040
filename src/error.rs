//! Error types for the signup service.

use uuid::Uuid;

use crate::signup::validation::ValidationErrors;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Failures talking to the marketplace backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Request to {endpoint} failed: {reason}")]
    Transport { endpoint: String, reason: String },

    #[error("{endpoint} returned {status}: {message}")]
    Status {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("Invalid response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

impl BackendError {
    /// HTTP status reported by the backend, if the request got that far.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Message suitable for a user-visible notice.
    pub fn user_message(&self) -> String {
        match self {
            Self::Status { message, .. } if !message.is_empty() => message.clone(),
            Self::Status { .. } | Self::Decode { .. } => {
                "The service returned an unexpected response. Please try again.".to_string()
            }
            Self::Transport { .. } | Self::Client(_) => {
                "The service is unreachable right now. Please try again.".to_string()
            }
        }
    }
}

/// Outcome classification for a failed registration attempt.
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    /// The draft does not satisfy the account schema. Nothing was sent.
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    /// The backend rejected the payload; the user must fix fields.
    #[error("Registration rejected: {message}")]
    Rejected { message: String },

    /// The backend failed while handling a well-formed request.
    #[error("Registration failed on the server: {message}")]
    Server { message: String },

    #[error("Registration request failed: {0}")]
    Transport(String),

    #[error("A submission is already in progress")]
    InFlight,

    #[error("Cannot submit from step {step}")]
    NotReady { step: String },
}

impl SubmissionError {
    /// Whether resubmitting the same draft unchanged may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Server { .. } | Self::Transport(_) | Self::InFlight)
    }
}

impl From<BackendError> for SubmissionError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Status {
                status: 400 | 409 | 422,
                message,
                ..
            } => Self::Rejected {
                message: if message.is_empty() {
                    "The registration was rejected. Please check your details.".to_string()
                } else {
                    message
                },
            },
            BackendError::Status { .. } | BackendError::Decode { .. } => Self::Server {
                message: err.user_message(),
            },
            BackendError::Transport { .. } | BackendError::Client(_) => {
                Self::Transport(err.to_string())
            }
        }
    }
}

/// Wizard misuse and session lookup errors.
#[derive(Debug, thiserror::Error)]
pub enum WizardError {
    #[error("Signup session {0} not found")]
    SessionNotFound(Uuid),

    #[error("Operation requires step {expected}, wizard is at {actual}")]
    WrongStep { expected: String, actual: String },

    #[error("{level} cannot be chosen before {missing}")]
    UpstreamUnset { level: String, missing: String },

    #[error("{value:?} is not an available {level}")]
    NotAnOption { level: String, value: String },

    #[error("Wizard already submitted")]
    AlreadySubmitted,
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
