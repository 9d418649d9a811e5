use thiserror::Error;

use crate::domain::booking::BookingError;
use crate::flows::FlowError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    Booking(#[from] BookingError),
    #[error(transparent)]
    Flow(#[from] FlowError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("no tenant is registered for channel identity `{0}`")]
    UnknownTenant(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl From<BookingError> for ApplicationError {
    fn from(value: BookingError) -> Self {
        match value {
            BookingError::Storage(message) => Self::Persistence(message),
            other => Self::Domain(DomainError::Booking(other)),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { code: &'static str, message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
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
            Self::NotFound { .. } => "The requested resource does not exist.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
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
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

const UNASSIGNED: &str = "unassigned";

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::Domain(DomainError::Booking(BookingError::NotFound(id))) => {
                Self::NotFound { message: format!("booking {id}"), correlation_id: UNASSIGNED.to_owned() }
            }
            ApplicationError::Domain(DomainError::Booking(error)) => Self::BadRequest {
                code: error.code(),
                message: error.to_string(),
                correlation_id: UNASSIGNED.to_owned(),
            },
            ApplicationError::Domain(DomainError::Flow(error)) => Self::ServiceUnavailable {
                message: error.to_string(),
                correlation_id: UNASSIGNED.to_owned(),
            },
            ApplicationError::Domain(DomainError::InvariantViolation(_)) => Self::BadRequest {
                code: "VALIDATION_FAILED",
                message: "domain validation failed".to_owned(),
                correlation_id: UNASSIGNED.to_owned(),
            },
            ApplicationError::UnknownTenant(identity) => Self::NotFound {
                message: format!("tenant for channel identity {identity}"),
                correlation_id: UNASSIGNED.to_owned(),
            },
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id: UNASSIGNED.to_owned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: UNASSIGNED.to_owned() }
            }
        }
    }
}
