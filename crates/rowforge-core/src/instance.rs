//! Template instance lifecycle
//!
//! An instance moves through a small state machine:
//!
//! ```text
//! DRAFT ──▶ PROCESSING ──▶ COMPLETED ──▶ EXPORTED
//!               │              │
//!               └──▶ FAILED ───┘ (re-run via PROCESSING)
//! ```
//!
//! Transitions outside the allowed successor sets are rejected with an
//! error naming the disallowed transition and the allowed set. `EXPORTED`
//! is terminal: no further row mutation or matching.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Lifecycle status of a template instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    /// Initial status; fully editable
    Draft,
    /// A matching run is in progress
    Processing,
    /// The last matching run finished
    Completed,
    /// The last matching run aborted
    Failed,
    /// Rows were exported; terminal
    Exported,
}

impl InstanceStatus {
    /// Stored name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Exported => "EXPORTED",
        }
    }

    /// Statuses this one may transition to.
    pub fn allowed_successors(&self) -> &'static [InstanceStatus] {
        match self {
            Self::Draft => &[Self::Processing],
            Self::Processing => &[Self::Completed, Self::Failed],
            Self::Completed => &[Self::Processing, Self::Exported],
            Self::Failed => &[Self::Processing],
            Self::Exported => &[],
        }
    }

    /// Whether rows may be added, updated, or deleted in this status.
    pub fn is_editable(&self) -> bool {
        matches!(self, Self::Draft | Self::Completed | Self::Failed)
    }

    /// Whether a matching run may start from this status. A `Processing`
    /// instance rejects a second concurrent run.
    pub fn can_match(&self) -> bool {
        matches!(self, Self::Draft | Self::Completed | Self::Failed)
    }

    /// Check and perform a transition.
    pub fn transition(&self, to: InstanceStatus) -> Result<InstanceStatus> {
        if self.allowed_successors().contains(&to) {
            Ok(to)
        } else {
            Err(self.invalid_state(format!("transition to {}", to.as_str())))
        }
    }

    /// Build the InvalidState error for a rejected operation, naming the
    /// allowed successor set.
    pub fn invalid_state(&self, action: impl Into<String>) -> Error {
        Error::InvalidState {
            status: self.as_str().to_string(),
            action: action.into(),
            allowed: self
                .allowed_successors()
                .iter()
                .map(|s| s.as_str().to_string())
                .collect(),
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A template instance record with its aggregate counters.
///
/// Counters are recomputed from the persisted rows after each matching
/// run, never incremented, so they stay correct across partial failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateInstance {
    /// Instance identifier
    pub id: String,

    /// Template this instance materializes
    pub template_id: String,

    /// Display name
    pub name: String,

    /// Lifecycle status
    pub status: InstanceStatus,

    /// Total persisted rows
    #[serde(default)]
    pub row_count: u64,

    /// Rows with status VALID
    #[serde(default)]
    pub valid_row_count: u64,

    /// Rows with status INVALID
    #[serde(default)]
    pub error_row_count: u64,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

impl TemplateInstance {
    /// Create a fresh DRAFT instance.
    pub fn new(template_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            template_id: template_id.into(),
            name: name.into(),
            status: InstanceStatus::Draft,
            row_count: 0,
            valid_row_count: 0,
            error_row_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
