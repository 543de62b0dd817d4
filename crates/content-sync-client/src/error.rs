use content_sync_core::{RemoteError, ResourceType, StoreError, ValidationError};
use thiserror::Error;

/// Errors returned by the data access layer.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Invalid content: {0}")]
    Validation(#[from] ValidationError),

    #[error("Payload is a {found} but was submitted as a {expected}")]
    TypeMismatch {
        expected: ResourceType,
        found: ResourceType,
    },

    #[error("{resource} {id} not found in fallback store")]
    NotFound { resource: ResourceType, id: String },

    #[error("Fallback store error: {0}")]
    Fallback(#[from] StoreError),
}

impl SyncError {
    /// Whether the failure came from the remote being unreachable.
    pub fn is_transport(&self) -> bool {
        matches!(self, SyncError::Remote(e) if e.is_transport())
    }

    /// Message suitable for showing to an editor.
    pub fn user_message(&self) -> String {
        match self {
            SyncError::Remote(RemoteError::Application(e)) => e.user_message(),
            SyncError::Remote(RemoteError::Transport(e)) => {
                format!("The content service is unreachable ({}). Try again later.", e)
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use content_sync_core::{ApplicationError, TransportError};

    #[test]
    fn test_transport_detection() {
        let err = SyncError::from(RemoteError::from(TransportError::Disabled));
        assert!(err.is_transport());

        let err = SyncError::from(RemoteError::from(ApplicationError::new(404, "missing")));
        assert!(!err.is_transport());
    }

    #[test]
    fn test_type_mismatch_message() {
        let err = SyncError::TypeMismatch {
            expected: ResourceType::Event,
            found: ResourceType::Article,
        };
        assert_eq!(err.user_message(), "Payload is a article but was submitted as a event");
    }
}
