use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::chain::{GroupOp, ReviewerId};

/// Identifier wrapper for shared links (the public link token).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkToken(pub String);

impl fmt::Display for LinkToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The shared artifact gated by the approval workflow.
///
/// Created by the storage layer when a user shares a file; this engine only
/// updates expiry and the backup flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareLink {
    pub token: LinkToken,
    pub repo_id: String,
    pub path: String,
    pub owner: String,
    pub ctime: DateTime<Utc>,
    pub expire_at: Option<DateTime<Utc>>,
    pub receivers: Vec<String>,
    pub note: Option<String>,
    pub backup_done: bool,
}

impl ShareLink {
    /// File name component of the shared path.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(self.path.as_str())
    }
}

/// Serialized label of the reserved scanner identity.
pub const DLP_SUBJECT_LABEL: &str = "dlp-scanner";

/// Who a status row belongs to: the reserved scanner slot or a human reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowSubject {
    Dlp,
    Reviewer(ReviewerId),
}

impl RowSubject {
    pub fn label(&self) -> &str {
        match self {
            RowSubject::Dlp => DLP_SUBJECT_LABEL,
            RowSubject::Reviewer(id) => id.as_str(),
        }
    }

    pub fn is_dlp(&self) -> bool {
        matches!(self, RowSubject::Dlp)
    }
}

impl fmt::Display for RowSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Ephemeral verdict produced by the scanner, a reviewer, or the audit bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Pass,
    Veto,
    BlockHighRisk,
}

impl Decision {
    pub const fn label(self) -> &'static str {
        match self {
            Decision::Pass => "pass",
            Decision::Veto => "veto",
            Decision::BlockHighRisk => "block_high_risk",
        }
    }
}

/// Stored per-row status; `Pending` is the only non-terminal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Pass,
    Veto,
    BlockHighRisk,
}

impl ReviewStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Pass => "pass",
            ReviewStatus::Veto => "veto",
            ReviewStatus::BlockHighRisk => "block_high_risk",
        }
    }

    pub const fn is_terminal(self) -> bool {
        !matches!(self, ReviewStatus::Pending)
    }

    pub const fn decision(self) -> Option<Decision> {
        match self {
            ReviewStatus::Pending => None,
            ReviewStatus::Pass => Some(Decision::Pass),
            ReviewStatus::Veto => Some(Decision::Veto),
            ReviewStatus::BlockHighRisk => Some(Decision::BlockHighRisk),
        }
    }
}

impl From<Decision> for ReviewStatus {
    fn from(value: Decision) -> Self {
        match value {
            Decision::Pass => ReviewStatus::Pass,
            Decision::Veto => ReviewStatus::Veto,
            Decision::BlockHighRisk => ReviewStatus::BlockHighRisk,
        }
    }
}

/// One row of `link_approval_status`: the sub-status of a single subject for
/// a single link, snapshotting the chain position it was seeded from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRow {
    pub link: LinkToken,
    pub subject: RowSubject,
    pub status: ReviewStatus,
    /// Position of the subject's step at seed time; `None` for the DLP row.
    pub step_index: Option<usize>,
    /// Operator of the subject's step at seed time; `None` for bare steps
    /// and the DLP row.
    pub step_op: Option<GroupOp>,
    /// Verbatim verdict payload (scanner match details), kept unmodified for
    /// audit submission and admin reporting.
    pub verdict_payload: Option<Value>,
    pub verdict_time: Option<DateTime<Utc>>,
    /// Opaque correlation: the scan handle on the DLP row, the external
    /// audit token on human rows.
    pub correlation: Option<String>,
}

impl ApprovalRow {
    pub fn is_dlp(&self) -> bool {
        self.subject.is_dlp()
    }
}

/// Terminal rejection kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Veto,
    BlockHighRisk,
}

impl RejectReason {
    pub const fn label(self) -> &'static str {
        match self {
            RejectReason::Veto => "veto",
            RejectReason::BlockHighRisk => "block_high_risk",
        }
    }
}

/// Authoritative per-link outcome, always recomputed from stored rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkOutcome {
    Pending,
    Approved,
    Rejected {
        reason: RejectReason,
        by: RowSubject,
    },
}

impl LinkOutcome {
    pub const fn label(&self) -> &'static str {
        match self {
            LinkOutcome::Pending => "pending",
            LinkOutcome::Approved => "approved",
            LinkOutcome::Rejected { .. } => "rejected",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        !matches!(self, LinkOutcome::Pending)
    }
}

/// Typed view over a high-risk scanner payload for admin reporting. The
/// stored payload itself stays verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DlpReport {
    #[serde(default)]
    pub policy_categories: String,
    #[serde(default)]
    pub breach_content: String,
    #[serde(default)]
    pub total_matches: u64,
}

impl DlpReport {
    pub fn from_payload(payload: &Value) -> Self {
        serde_json::from_value(payload.clone()).unwrap_or_default()
    }
}

/// What the link owner is allowed to see: pending, approved, or rejected
/// with the rejecting party attributed. Internal error kinds never surface
/// here.
#[derive(Debug, Clone, Serialize)]
pub struct OwnerStatusView {
    pub token: String,
    pub status: &'static str,
    pub detail: String,
}

impl OwnerStatusView {
    pub fn from_outcome(token: &LinkToken, outcome: &LinkOutcome) -> Self {
        let detail = match outcome {
            LinkOutcome::Pending => "awaiting review".to_string(),
            LinkOutcome::Approved => "approved for download".to_string(),
            LinkOutcome::Rejected { by, .. } => format!("rejected by {}", by.label()),
        };

        Self {
            token: token.0.clone(),
            status: outcome.label(),
            detail,
        }
    }
}

/// Admin-facing approval info: the scanner sub-status with its typed report
/// plus the per-reviewer trail.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalInfoView {
    pub token: String,
    pub outcome: &'static str,
    pub dlp_status: &'static str,
    pub dlp_time: Option<DateTime<Utc>>,
    pub dlp_report: Option<DlpReport>,
    pub reviewers: Vec<ReviewerStatusView>,
}

/// One human row in the admin trail.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewerStatusView {
    pub reviewer: String,
    pub status: &'static str,
    pub step_index: usize,
    pub step_op: Option<GroupOp>,
    pub verdict_time: Option<DateTime<Utc>>,
}
