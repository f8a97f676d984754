use thiserror::Error;

use crate::{domain::session::ConversationId, flows::TurnTransitionError};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    TurnTransition(#[from] TurnTransitionError),
    #[error("session `{0}` was expected to exist but was not found")]
    SessionNotFound(ConversationId),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("model failure: {0}")]
    Model(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
    #[error("request rejected: {0}")]
    Rejected(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    /// Maps to the caller-facing class and tags it with the request's correlation id.
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        match self {
            Self::Rejected(message) => InterfaceError::BadRequest { message, correlation_id },
            Self::Persistence(message) | Self::Model(message) | Self::Unavailable(message) => {
                InterfaceError::ServiceUnavailable { message, correlation_id }
            }
            Self::Configuration(message) => InterfaceError::Internal { message, correlation_id },
            Self::Domain(error) => {
                InterfaceError::Internal { message: error.to_string(), correlation_id }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::session::ConversationId;
    use crate::errors::{ApplicationError, DomainError, InterfaceError};

    #[test]
    fn missing_session_maps_to_internal_interface_error() {
        let interface = ApplicationError::from(DomainError::SessionNotFound(ConversationId(
            "conv-9".to_owned(),
        )))
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::Internal {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }

    #[test]
    fn rejected_request_has_user_safe_message() {
        let interface =
            ApplicationError::Rejected("message must not be blank".to_owned()).into_interface("req-2");

        assert!(matches!(interface, InterfaceError::BadRequest { .. }));
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface = ApplicationError::Persistence("database lock timeout".to_owned())
            .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(interface.correlation_id(), "req-3");
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn model_error_maps_to_service_unavailable() {
        let interface =
            ApplicationError::Model("upstream returned 502".to_owned()).into_interface("req-4");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
    }
}
