//! TOR document model, required-field validation, and number generation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{StatusStage, TorId, UnitId, UserId};

/// The three state fields every transition reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentState {
    pub status_stage: StatusStage,
    pub current_step_number: i32,
    pub is_final_approved: bool,
}

impl DocumentState {
    pub const fn draft() -> Self {
        Self {
            status_stage: StatusStage::Draft,
            current_step_number: 0,
            is_final_approved: false,
        }
    }
}

/// Free-form content. Only title, background, and objective are required
/// for submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TorContent {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub introduction: Option<String>,
    #[serde(default)]
    pub background: Option<String>,
    #[serde(default)]
    pub objective: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl TorContent {
    /// Names of required fields that are absent or blank, in a fixed order.
    pub fn missing_required_fields(&self) -> Vec<String> {
        let blank = |v: Option<&str>| v.map_or(true, |s| s.trim().is_empty());
        let mut missing = Vec::new();
        if blank(Some(self.title.as_str())) {
            missing.push("title".to_string());
        }
        if blank(self.background.as_deref()) {
            missing.push("background".to_string());
        }
        if blank(self.objective.as_deref()) {
            missing.push("objective".to_string());
        }
        missing
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TorDocument {
    pub id: TorId,
    pub number: String,
    #[serde(flatten)]
    pub content: TorContent,
    pub unit_id: UnitId,
    pub creator_user_id: UserId,
    #[serde(flatten)]
    pub state: DocumentState,
    /// Bumped by every content edit and every transition.
    #[serde(default)]
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert shape. The store assigns the id.
#[derive(Debug, Clone)]
pub struct NewTorDocument {
    pub number: String,
    pub content: TorContent,
    pub unit_id: UnitId,
    pub creator_user_id: UserId,
    pub created_at: DateTime<Utc>,
}

/// What a writer last observed. Stores apply a write only while both the
/// workflow state and the revision still match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Precondition {
    pub state: DocumentState,
    pub revision: i64,
}

impl TorDocument {
    pub fn precondition(&self) -> Precondition {
        Precondition {
            state: self.state,
            revision: self.revision,
        }
    }

    /// True when `expected` still describes this row.
    pub fn satisfies(&self, expected: &Precondition) -> bool {
        self.state == expected.state && self.revision == expected.revision
    }
}

// ── Numbering ──────────────────────────────────────────────────

pub mod numbering {
    use chrono::{DateTime, Utc};

    const MAX_SLUG_LEN: usize = 30;

    /// Lowercase ASCII slug: runs of non-alphanumerics collapse into one `-`.
    pub fn slugify(title: &str) -> String {
        let mut out = String::with_capacity(title.len());
        let mut pending_dash = false;
        for c in title.chars() {
            if c.is_ascii_alphanumeric() {
                if pending_dash && !out.is_empty() {
                    out.push('-');
                }
                pending_dash = false;
                out.push(c.to_ascii_lowercase());
            } else {
                pending_dash = true;
            }
        }
        out
    }

    /// `{slug}-{ddmmyyyy}-{last six digits of epoch millis}`.
    pub fn generate_tor_number(title: &str, at: DateTime<Utc>) -> String {
        let mut slug = slugify(title);
        if slug.len() > MAX_SLUG_LEN {
            slug.truncate(MAX_SLUG_LEN);
            while slug.ends_with('-') {
                slug.pop();
            }
        }
        if slug.is_empty() {
            slug.push_str("draft");
        }
        let millis = at.timestamp_millis().rem_euclid(1_000_000);
        format!("{slug}-{}-{millis:06}", at.format("%d%m%Y"))
    }
}
