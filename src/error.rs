//! Error types for the ledger.
//!
//! All errors are strongly typed using thiserror so callers can match on the
//! exact failure and map it onto their transport.

use thiserror::Error;

use crate::id::{UserId, WorkoutId};
use crate::storage::StorageError;
use crate::workout::EntityLevel;

/// Validation errors raised before any planning or storage work.
///
/// Every variant names the offending field as a path into the submitted
/// tree, e.g. `exercises[1].sets[0].weight`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    FieldTooLong {
        field: String,
        max_length: usize,
    },

    #[error("Field '{field}' value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Field '{field}' value {value} is not a multiple of {step}")]
    InvalidStep {
        field: String,
        value: f64,
        step: f64,
    },

    #[error("Field '{field}' must be a finite number")]
    NotFinite {
        field: String,
    },

    #[error("Field '{field}' must reference exactly one of a catalog or user exercise (found {found})")]
    AmbiguousExerciseRef {
        field: String,
        found: usize,
    },

    #[error("Field '{field}' has {actual} entries, maximum is {max}")]
    TooManyEntries {
        field: String,
        max: usize,
        actual: usize,
    },

    #[error("Field '{field}' is invalid: {reason}")]
    InvalidField {
        field: String,
        reason: String,
    },
}

impl ValidationError {
    /// Path of the offending field.
    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Self::MissingField { field }
            | Self::FieldTooLong { field, .. }
            | Self::OutOfRange { field, .. }
            | Self::InvalidStep { field, .. }
            | Self::NotFinite { field }
            | Self::AmbiguousExerciseRef { field, .. }
            | Self::TooManyEntries { field, .. }
            | Self::InvalidField { field, .. } => field,
        }
    }

    /// Human-readable reason, without the field prefix.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::MissingField { .. } => "is required".to_string(),
            Self::FieldTooLong { max_length, .. } => format!("longer than {max_length} characters"),
            Self::OutOfRange { value, min, max, .. } => format!("{value} outside [{min}, {max}]"),
            Self::InvalidStep { value, step, .. } => format!("{value} is not a multiple of {step}"),
            Self::NotFinite { .. } => "not a finite number".to_string(),
            Self::AmbiguousExerciseRef { found, .. } => {
                format!("exactly one exercise reference required, found {found}")
            }
            Self::TooManyEntries { max, actual, .. } => format!("{actual} entries, maximum {max}"),
            Self::InvalidField { reason, .. } => reason.clone(),
        }
    }
}

/// Top-level error type for the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Unauthorized: user {requester} does not own {resource} {id}")]
    Unauthorized {
        requester: UserId,
        resource: &'static str,
        id: String,
    },

    #[error("Not found: {resource} {id}")]
    NotFound {
        resource: &'static str,
        id: String,
    },

    #[error("Reference error: {level} {id} is not a persisted child of {parent}")]
    Reference {
        level: EntityLevel,
        id: String,
        parent: String,
    },

    #[error("Conflict: workout {workout_id} was modified concurrently (loaded revision {expected:?}, current {actual:?})")]
    Conflict {
        workout_id: WorkoutId,
        expected: Option<u64>,
        actual: Option<u64>,
    },

    #[error("Persistence error{}: {message}", persistence_context(.level, .id))]
    Persistence {
        level: Option<EntityLevel>,
        id: Option<String>,
        message: String,
    },

    #[error("Request cancelled before commit")]
    Cancelled,

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

fn persistence_context(level: &Option<EntityLevel>, id: &Option<String>) -> String {
    match (level, id) {
        (Some(level), Some(id)) => format!(" ({level} {id})"),
        (Some(level), None) => format!(" ({level})"),
        (None, Some(id)) => format!(" ({id})"),
        (None, None) => String::new(),
    }
}

impl LedgerError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a persistence error not tied to a single row.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Persistence {
            level: None,
            id: None,
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// Creates an unauthorized error.
    #[must_use]
    pub fn unauthorized(requester: UserId, resource: &'static str, id: impl ToString) -> Self {
        Self::Unauthorized {
            requester,
            resource,
            id: id.to_string(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an ownership failure.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// Returns true if a workout or exercise was missing.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if an incoming identity was not a persisted child.
    #[must_use]
    pub const fn is_reference(&self) -> bool {
        matches!(self, Self::Reference { .. })
    }

    /// Returns true if a concurrent modification was detected.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns true if the storage layer failed.
    #[must_use]
    pub const fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence { .. })
    }

    /// Returns true if the caller may reload the workout and resubmit.
    ///
    /// The engine itself never retries.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// HTTP-equivalent status code for transport layers.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::Reference { .. } => 400,
            Self::Unauthorized { .. } => 403,
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::Cancelled => 499,
            Self::Persistence { .. } | Self::Internal { .. } => 500,
        }
    }
}

impl From<StorageError> for LedgerError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::RevisionMismatch {
                workout_id,
                expected,
                actual,
            } => Self::Conflict {
                workout_id,
                expected,
                actual,
            },
            StorageError::NotFound { level, id } => Self::Persistence {
                level: Some(level),
                id: Some(id),
                message: "row vanished before commit".to_string(),
            },
            StorageError::DuplicateKey { level, id } => Self::Persistence {
                level: Some(level),
                id: Some(id),
                message: "identity already issued".to_string(),
            },
            StorageError::ForeignParent { level, id, parent } => Self::Persistence {
                level: Some(level),
                message: format!("row does not belong to parent {parent}"),
                id: Some(id),
            },
            other => Self::Persistence {
                level: None,
                id: None,
                message: other.to_string(),
            },
        }
    }
}

/// Result type alias for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;
