use serde::Serialize;

use super::domain::UserId;
use super::repository::RepositoryError;

/// One offending payload field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// What the quota keeper refused, with the numbers the caller needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuotaBreach {
    #[error("candidate {candidate} has {remaining} application(s) left")]
    Candidate { candidate: UserId, remaining: u32 },
    #[error("tutor {tutor} already supervises {active} of {capacity} internships")]
    TutorCapacity {
        tutor: UserId,
        active: u32,
        capacity: u32,
    },
}

/// Failure taxonomy of every lifecycle transition.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("validation failed: {}", describe_fields(.0))]
    Validation(Vec<FieldError>),
    #[error("precondition failed: {message} (current state: {current})")]
    PreconditionFailed { message: String, current: String },
    /// The reason is logged, never shown to the caller.
    #[error("not authorized")]
    PermissionDenied { reason: String },
    #[error("quota exceeded: {0}")]
    QuotaExceeded(QuotaBreach),
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Storage(#[from] RepositoryError),
}

impl LifecycleError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError {
            field: field.into(),
            message: message.into(),
        }])
    }

    pub fn precondition(message: impl Into<String>, current: impl Into<String>) -> Self {
        Self::PreconditionFailed {
            message: message.into(),
            current: current.into(),
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self::PermissionDenied {
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Short machine-readable code used in logs and HTTP bodies.
    pub const fn code(&self) -> &'static str {
        match self {
            LifecycleError::Validation(_) => "validation_error",
            LifecycleError::PreconditionFailed { .. } => "precondition_failed",
            LifecycleError::PermissionDenied { .. } => "permission_denied",
            LifecycleError::QuotaExceeded(_) => "quota_exceeded",
            LifecycleError::NotFound { .. } => "not_found",
            LifecycleError::Conflict(_) => "conflict",
            LifecycleError::Storage(_) => "storage_error",
        }
    }
}

fn describe_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|field| format!("{}: {}", field.field, field.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Collects field errors so a payload reports every problem at once.
#[derive(Debug, Default)]
pub(crate) struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub(crate) fn require(&mut self, field: &str, ok: bool, message: &str) -> &mut Self {
        if !ok {
            self.errors.push(FieldError {
                field: field.to_string(),
                message: message.to_string(),
            });
        }
        self
    }

    pub(crate) fn present(&mut self, field: &str, value: &str) -> &mut Self {
        self.require(field, !value.trim().is_empty(), "is required")
    }

    pub(crate) fn finish(&mut self) -> Result<(), LifecycleError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(LifecycleError::Validation(std::mem::take(&mut self.errors)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_hides_the_reason() {
        let err = LifecycleError::denied("hr of another company");
        assert_eq!(err.to_string(), "not authorized");
    }

    #[test]
    fn validator_accumulates_fields() {
        let mut validator = Validator::default();
        validator
            .present("identity.email", " ")
            .present("identity.phone", "")
            .require("period", true, "start must precede end");
        match validator.finish() {
            Err(LifecycleError::Validation(fields)) => {
                assert_eq!(fields.len(), 2);
                assert_eq!(fields[0].field, "identity.email");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }
}
