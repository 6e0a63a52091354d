use thiserror::Error;

use crate::journey::JourneyStatus;

/// Typed failures of journey definitions and repository operations.
///
/// Repository methods return `anyhow::Result`; callers that need to map a
/// failure to a user-facing message downcast to this type.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JourneyError {
    #[error("validation error on {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("journey status cannot change from {from} to {to}")]
    InvalidTransition {
        from: JourneyStatus,
        to: JourneyStatus,
    },

    #[error("journeys in {0} status cannot be toggled; activate them instead")]
    NotToggleable(JourneyStatus),

    #[error("invalid stored value for {column}: {value}")]
    InvalidStoredValue { column: &'static str, value: String },
}

impl JourneyError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }
}
