use std::time::Duration;

use thiserror::Error;

/// Errors raised by a local fallback store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// A payload or draft failed boundary validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Failure to obtain a well-formed response from the remote store.
///
/// Anything in this class may be answered from the fallback store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request aborted: {0}")]
    Aborted(String),

    #[error("unexpected content type {content_type:?} (status {status})")]
    UnexpectedContentType { status: u16, content_type: String },

    #[error("malformed response body: {0}")]
    MalformedBody(String),

    #[error("remote store disabled")]
    Disabled,
}

/// Coarse grouping of application errors, used to pick user-facing wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationErrorKind {
    Validation,
    NotFound,
    Unauthorized,
    Server,
    Other,
}

/// A well-formed rejection returned by a reachable remote store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("remote store rejected the request ({status}): {message}")]
pub struct ApplicationError {
    pub status: u16,
    pub message: String,
}

impl ApplicationError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ApplicationErrorKind {
        match self.status {
            400 | 409 | 422 => ApplicationErrorKind::Validation,
            404 => ApplicationErrorKind::NotFound,
            401 | 403 => ApplicationErrorKind::Unauthorized,
            500..=599 => ApplicationErrorKind::Server,
            _ => ApplicationErrorKind::Other,
        }
    }

    /// Specific, actionable text for a failed mutation.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ApplicationErrorKind::Validation => {
                format!(
                    "The content was rejected: {}. Fix the highlighted fields and save again.",
                    self.message
                )
            }
            ApplicationErrorKind::NotFound => {
                "This item no longer exists. Reload the list to see the current content."
                    .to_string()
            }
            ApplicationErrorKind::Unauthorized => {
                "Your session is not allowed to make this change. Sign in again and retry."
                    .to_string()
            }
            ApplicationErrorKind::Server => {
                format!(
                    "The content server failed to save the change ({}). Try again shortly.",
                    self.message
                )
            }
            ApplicationErrorKind::Other => format!("The change was refused: {}", self.message),
        }
    }
}

/// Outcome classification of a failed remote call.
///
/// The fallback path may only run for `Transport`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Application(#[from] ApplicationError),
}

impl RemoteError {
    pub fn is_transport(&self) -> bool {
        matches!(self, RemoteError::Transport(_))
    }
}
