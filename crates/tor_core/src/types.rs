//! Identifiers and enumerations shared across the workflow core.
//! Pure value types, no storage dependencies.

use serde::{Deserialize, Serialize};

// ── Identifiers ────────────────────────────────────────────────

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Organizational unit ("bidang") id.
    UnitId
);
id_type!(PositionId);
id_type!(UserId);
id_type!(WorkflowId);
id_type!(
    /// TOR document id.
    TorId
);
id_type!(HistoryEntryId);

// ── Status stage ───────────────────────────────────────────────

/// Document status stage.
///
/// `Draft` → one of the approval stages (bound per workflow step) → `Revise`.
/// Final approval is a flag on the document, not a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusStage {
    #[serde(rename = "DRAFT")]
    Draft,
    #[serde(rename = "APPROVAL_1")]
    Approval1,
    #[serde(rename = "APPROVAL_2")]
    Approval2,
    #[serde(rename = "APPROVAL_3")]
    Approval3,
    #[serde(rename = "APPROVAL_4")]
    Approval4,
    #[serde(rename = "APPROVAL_4_1")]
    Approval4_1,
    #[serde(rename = "REVISE")]
    Revise,
}

impl StatusStage {
    pub const ALL: [StatusStage; 7] = [
        Self::Draft,
        Self::Approval1,
        Self::Approval2,
        Self::Approval3,
        Self::Approval4,
        Self::Approval4_1,
        Self::Revise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Approval1 => "APPROVAL_1",
            Self::Approval2 => "APPROVAL_2",
            Self::Approval3 => "APPROVAL_3",
            Self::Approval4 => "APPROVAL_4",
            Self::Approval4_1 => "APPROVAL_4_1",
            Self::Revise => "REVISE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.as_str() == s)
    }

    /// Whether a document in this stage sits inside the approval chain.
    pub fn is_approval(&self) -> bool {
        !matches!(self, Self::Draft | Self::Revise)
    }

    /// Stages the creator may submit from.
    pub fn is_submittable(&self) -> bool {
        matches!(self, Self::Draft | Self::Revise)
    }
}

impl std::fmt::Display for StatusStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── History action ─────────────────────────────────────────────

/// Action tag recorded on every history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryAction {
    Submit,
    Approve,
    Revise,
    Reject,
    Export,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submit => "SUBMIT",
            Self::Approve => "APPROVE",
            Self::Revise => "REVISE",
            Self::Reject => "REJECT",
            Self::Export => "EXPORT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SUBMIT" => Some(Self::Submit),
            "APPROVE" => Some(Self::Approve),
            "REVISE" => Some(Self::Revise),
            "REJECT" => Some(Self::Reject),
            "EXPORT" => Some(Self::Export),
            _ => None,
        }
    }
}

impl std::fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Capability tags ────────────────────────────────────────────

/// Capability tags held by a position. Tags grant create/edit/export rights;
/// they never grant the right to advance a workflow step.
pub mod capability {
    pub const CREATOR: &str = "CREATOR";
    pub const EDITOR: &str = "EDITOR";
    pub const APPROVER: &str = "APPROVER";
    pub const REVISE: &str = "REVISE";
    pub const EXPORT: &str = "EXPORT";
}
