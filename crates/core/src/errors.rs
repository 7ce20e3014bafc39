use thiserror::Error;

/// Local, pre-call rejection of step input. Never reaches the network.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self { field, message: message.into() }
    }
}

/// Failure reported by an external verification or payment provider.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ProviderError {
    pub code: Option<String>,
    pub message: String,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { code: None, message: message.into() }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: Some(code.into()), message: message.into() }
    }
}

/// Non-2xx response from the persistence backend, carrying its `{message}` body.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ServerError {
    pub status: u16,
    pub message: String,
}

impl ServerError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("could not reach server: {0}")]
pub struct NetworkError(pub String);

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error("request timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },
    #[error("{0}")]
    Precondition(String),
}

/// Anything that keeps a flow on its current step.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StepFailure {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

/// Misuse of a flow instance. Rejected before validation; never alters state.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum SequencerError {
    #[error("a step is already being processed for this flow")]
    Busy,
    #[error("flow is already complete")]
    Finished,
    #[error("flow has been closed")]
    Closed,
    #[error("flow was restarted or closed while the step was in flight")]
    Superseded,
    #[error("step outcome does not belong to the current step")]
    StepMismatch,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    Sequencer(#[from] SequencerError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("no active flow for session `{0}`")]
    UnknownSession(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "No active flow was found. Start the flow again.",
            Self::Conflict { .. } => {
                "The flow cannot accept this request right now. Wait for the current step to finish."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest { .. } => 400,
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::ServiceUnavailable { .. } => 503,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::NotFound { message, .. }
            | Self::Conflict { message, .. }
            | Self::ServiceUnavailable { message, .. } => message,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let unassigned = || "unassigned".to_owned();
        match value {
            ApplicationError::Domain(DomainError::Sequencer(error)) => {
                Self::Conflict { message: error.to_string(), correlation_id: unassigned() }
            }
            ApplicationError::Domain(DomainError::Validation(error)) => {
                Self::BadRequest { message: error.to_string(), correlation_id: unassigned() }
            }
            ApplicationError::UnknownSession(session) => Self::NotFound {
                message: format!("no active flow for session `{session}`"),
                correlation_id: unassigned(),
            },
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id: unassigned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{
        ApplicationError, DomainError, ExecutionError, InterfaceError, ProviderError,
        SequencerError, StepFailure, ValidationError,
    };

    #[test]
    fn busy_flow_maps_to_conflict() {
        let interface =
            ApplicationError::from(DomainError::from(SequencerError::Busy)).into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::Conflict {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert_eq!(interface.status_code(), 409);
    }

    #[test]
    fn unknown_session_maps_to_not_found() {
        let interface =
            ApplicationError::UnknownSession("sess-9".to_owned()).into_interface("req-2");

        assert!(matches!(interface, InterfaceError::NotFound { .. }));
        assert_eq!(interface.message(), "no active flow for session `sess-9`");
        assert_eq!(interface.user_message(), "No active flow was found. Start the flow again.");
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface = ApplicationError::Persistence("database lock timeout".to_owned())
            .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn integration_error_keeps_its_detail_and_correlation() {
        let interface = ApplicationError::Integration("snapshot store offline".to_owned())
            .into_interface("req-4");

        assert_eq!(
            interface,
            InterfaceError::ServiceUnavailable {
                message: "snapshot store offline".to_owned(),
                correlation_id: "req-4".to_owned(),
            }
        );
        assert_eq!(interface.status_code(), 503);
    }

    #[test]
    fn step_failures_surface_the_provider_message_verbatim() {
        let failure =
            StepFailure::from(ExecutionError::from(ProviderError::new("invalid code")));
        assert_eq!(failure.to_string(), "invalid code");

        let failure = StepFailure::from(ValidationError::new("code", "expected 6 digits"));
        assert_eq!(failure.to_string(), "expected 6 digits");
    }
}
