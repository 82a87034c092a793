//! Error classification shared by every gateway layer.
//!
//! The core produces these; transports map them to status codes via [`GatewayError::code`]
//! and their own status tables.

use crate::bridge::codec::CodecError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    /// No admission slot was free and the caller asked not to wait.
    #[error("Concurrent request limit reached")]
    LimitExceeded,

    #[error("Timed out waiting for an admission slot")]
    AcquireTimeout,

    #[error("Work queue is full")]
    QueueFull,

    #[error("Shutdown in progress")]
    ShutdownInProgress,

    #[error("Request was canceled")]
    Canceled,

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Backend timed out: {0}")]
    BackendTimeout(String),

    #[error("Backend error (status {status}): {message}")]
    BackendError { status: u16, message: String },

    #[error("Failed to encode backend request: {0}")]
    EncodingError(#[from] CodecError),

    /// Anything the core cannot classify more precisely (panicked jobs, bad construction).
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl GatewayError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Short machine-readable code for client-facing error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::LimitExceeded => "limit_exceeded",
            Self::AcquireTimeout => "acquire_timeout",
            Self::QueueFull => "queue_full",
            Self::ShutdownInProgress => "shutting_down",
            Self::Canceled => "canceled",
            Self::BackendUnavailable(_) => "backend_unavailable",
            Self::BackendTimeout(_) => "backend_timeout",
            Self::BackendError { .. } => "backend_error",
            Self::EncodingError(_) => "encoding_error",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Whether the failure originated on the backend side of the relay.
    pub fn is_backend(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable(_) | Self::BackendTimeout(_) | Self::BackendError { .. }
        )
    }
}
