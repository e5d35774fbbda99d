use thiserror::Error;

use crate::types::StatusStage;

/// Coarse failure category. Drives HTTP status mapping and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Unauthenticated,
    Authorization,
    NotFound,
    Conflict,
    Configuration,
    Transient,
    Internal,
}

#[derive(Debug, Error)]
pub enum TorError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {message}")]
    InvalidInput {
        message: String,
        field: Option<String>,
    },

    #[error("missing required fields: {}", .0.join(", "))]
    MissingRequiredFields(Vec<String>),

    #[error("a note is required for {0}")]
    MissingNote(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("document is in {0} and cannot be submitted")]
    NotSubmittable(StatusStage),

    #[error("document is in {0}, not an approval stage")]
    NotInApproval(StatusStage),

    #[error("document is already finally approved")]
    AlreadyFinalApproved,

    #[error("document is in {0} and cannot be edited")]
    NotEditable(StatusStage),

    #[error("document was modified concurrently, reload and retry")]
    ConcurrentModification,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("no workflow configured for unit {0}")]
    WorkflowNotConfigured(String),

    #[error("workflow step {0} not found")]
    StepNotFound(i32),

    #[error("invalid workflow definition: {0}")]
    InvalidWorkflow(String),

    #[error("temporarily unavailable: {0}")]
    Transient(String),

    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}

impl TorError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            field: None,
        }
    }

    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidInput { .. } | Self::MissingRequiredFields(_) | Self::MissingNote(_) => {
                ErrorCategory::Validation
            }
            Self::Unauthenticated(_) => ErrorCategory::Unauthenticated,
            Self::Forbidden(_) => ErrorCategory::Authorization,
            Self::NotFound(_) => ErrorCategory::NotFound,
            Self::NotSubmittable(_)
            | Self::NotInApproval(_)
            | Self::AlreadyFinalApproved
            | Self::NotEditable(_)
            | Self::ConcurrentModification
            | Self::Conflict(_) => ErrorCategory::Conflict,
            Self::WorkflowNotConfigured(_) | Self::StepNotFound(_) | Self::InvalidWorkflow(_) => {
                ErrorCategory::Configuration
            }
            Self::Transient(_) => ErrorCategory::Transient,
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    pub fn http_status(&self) -> u16 {
        match self.category() {
            ErrorCategory::Validation => 400,
            ErrorCategory::Unauthenticated => 401,
            ErrorCategory::Authorization => 403,
            ErrorCategory::NotFound => 404,
            ErrorCategory::Conflict => 409,
            ErrorCategory::Configuration | ErrorCategory::Internal => 500,
            ErrorCategory::Transient => 503,
        }
    }

    /// Stable machine-readable code for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::MissingRequiredFields(_) => "MISSING_REQUIRED_FIELDS",
            Self::MissingNote(_) => "MISSING_NOTE",
            Self::Unauthenticated(_) => "UNAUTHENTICATED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotSubmittable(_) => "NOT_SUBMITTABLE",
            Self::NotInApproval(_) => "NOT_IN_APPROVAL",
            Self::AlreadyFinalApproved => "ALREADY_FINAL_APPROVED",
            Self::NotEditable(_) => "NOT_EDITABLE",
            Self::ConcurrentModification => "CONCURRENT_MODIFICATION",
            Self::Conflict(_) => "CONFLICT",
            Self::WorkflowNotConfigured(_) => "WORKFLOW_NOT_CONFIGURED",
            Self::StepNotFound(_) => "STEP_NOT_FOUND",
            Self::InvalidWorkflow(_) => "INVALID_WORKFLOW",
            Self::Transient(_) => "TRY_AGAIN",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Field hint for validation failures.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::InvalidInput { field, .. } => field.as_deref(),
            Self::MissingNote(_) => Some("note"),
            Self::MissingRequiredFields(fields) => fields.first().map(String::as_str),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── http_status ───────────────────────────────────────────────

    #[test]
    fn http_status_per_category() {
        assert_eq!(TorError::invalid("x").http_status(), 400);
        assert_eq!(TorError::MissingNote("revise".into()).http_status(), 400);
        assert_eq!(TorError::Unauthenticated("x".into()).http_status(), 401);
        assert_eq!(TorError::Forbidden("x".into()).http_status(), 403);
        assert_eq!(TorError::NotFound("x".into()).http_status(), 404);
        assert_eq!(
            TorError::NotSubmittable(StatusStage::Approval1).http_status(),
            409
        );
        assert_eq!(TorError::AlreadyFinalApproved.http_status(), 409);
        assert_eq!(TorError::ConcurrentModification.http_status(), 409);
        assert_eq!(
            TorError::WorkflowNotConfigured("K3".into()).http_status(),
            500
        );
        assert_eq!(TorError::StepNotFound(4).http_status(), 500);
        assert_eq!(TorError::Transient("x".into()).http_status(), 503);
        assert_eq!(
            TorError::Internal(anyhow::anyhow!("boom")).http_status(),
            500
        );
    }

    #[test]
    fn only_transient_is_retryable() {
        assert!(TorError::Transient("deadlock".into()).is_retryable());
        assert!(!TorError::ConcurrentModification.is_retryable());
        assert!(!TorError::Forbidden("x".into()).is_retryable());
        assert!(!TorError::Internal(anyhow::anyhow!("x")).is_retryable());
    }

    // ── Display / code / field ───────────────────────────────────

    #[test]
    fn display_missing_fields() {
        let e = TorError::MissingRequiredFields(vec!["title".into(), "objective".into()]);
        assert_eq!(e.to_string(), "missing required fields: title, objective");
        assert_eq!(e.field(), Some("title"));
        assert_eq!(e.code(), "MISSING_REQUIRED_FIELDS");
    }

    #[test]
    fn display_stage_conflicts() {
        let e = TorError::NotInApproval(StatusStage::Revise);
        assert_eq!(e.to_string(), "document is in REVISE, not an approval stage");
        let e = TorError::NotSubmittable(StatusStage::Approval2);
        assert_eq!(
            e.to_string(),
            "document is in APPROVAL_2 and cannot be submitted"
        );
    }

    #[test]
    fn invalid_field_carries_hint() {
        let e = TorError::invalid_field("unit_id", "unknown unit");
        assert_eq!(e.field(), Some("unit_id"));
        assert_eq!(e.to_string(), "invalid input: unknown unit");
        assert_eq!(e.category(), ErrorCategory::Validation);
    }

    #[test]
    fn missing_note_points_at_note_field() {
        let e = TorError::MissingNote("reject".into());
        assert_eq!(e.field(), Some("note"));
        assert_eq!(e.code(), "MISSING_NOTE");
    }
}
