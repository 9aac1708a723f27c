//! Function-shaped dependencies on the remote services: the content
//! scanner, the external audit/ticketing system, email, and the backup
//! copy. The engine only sees these traits; transports live elsewhere.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::chain::{GroupOp, ReviewerId};
use super::domain::{Decision, LinkToken, RejectReason, ReviewStatus, ShareLink};
use super::state;

/// Remote call failure. Both variants are retryable by the next poll cycle;
/// `Malformed` means "no new information", never an implicit decision.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BridgeError {
    #[error("remote unavailable: {0}")]
    Unavailable(String),
    #[error("malformed remote response: {0}")]
    Malformed(String),
}

/// Opaque handle returned by a scan submission, used for polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanHandle(pub String);

/// What the scanner needs to locate the shared file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanTarget {
    pub token: LinkToken,
    pub repo_id: String,
    pub path: String,
    pub owner: String,
}

impl ScanTarget {
    pub fn for_link(link: &ShareLink) -> Self {
        Self {
            token: link.token.clone(),
            repo_id: link.repo_id.clone(),
            path: link.path.clone(),
            owner: link.owner.clone(),
        }
    }
}

/// Scanner poll result. `BlockHighRisk` carries the match details verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanVerdict {
    Pending,
    Pass,
    Veto,
    BlockHighRisk { details: Value },
}

/// The out-of-band content scanner.
pub trait ScanBridge: Send + Sync {
    fn submit(&self, target: &ScanTarget) -> Result<ScanHandle, BridgeError>;
    fn poll(&self, handle: &ScanHandle) -> Result<ScanVerdict, BridgeError>;
}

/// Opaque token correlating a link with its external audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationToken(pub String);

/// Step shape understood by the audit system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Single,
    AnyOf,
    AllOf,
}

/// One chain step as submitted to the audit system; `order` preserves the
/// chain position, `reviewers` the group membership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditStep {
    pub label: String,
    pub kind: StepKind,
    pub order: usize,
    pub reviewers: Vec<ReviewerId>,
}

/// Chain-of-custody record submitted once per link after the scanner
/// resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditSubmission {
    pub channel: String,
    pub token: LinkToken,
    pub file_name: String,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub receivers: Vec<String>,
    pub note: Option<String>,
    pub dlp_status: ReviewStatus,
    pub dlp_time: Option<DateTime<Utc>>,
    pub steps: Vec<AuditStep>,
}

/// One reviewer decision mirrored back from the audit system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditDecision {
    pub reviewer: ReviewerId,
    pub decision: Decision,
    pub decided_at: DateTime<Utc>,
}

/// Audit poll result.
#[derive(Debug, Clone, PartialEq)]
pub enum AuditPoll {
    Pending,
    Decisions(Vec<AuditDecision>),
}

/// The external audit/ticketing system.
pub trait AuditBridge: Send + Sync {
    fn submit(&self, submission: &AuditSubmission) -> Result<CorrelationToken, BridgeError>;
    fn poll(&self, token: &CorrelationToken) -> Result<AuditPoll, BridgeError>;
}

/// Owner-visible notices; wording stays free of internal error kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerNotice {
    /// A single verdict landed (scanner or one reviewer); the link may still
    /// be pending overall.
    VerdictRecorded { source: String, decision: Decision },
    Approved,
    Rejected { by: String, reason: RejectReason },
}

/// Outbound email hooks. Failures are logged and never block the state
/// machine.
pub trait NotificationGateway: Send + Sync {
    fn notify_reviewer(&self, link: &ShareLink, reviewer: &ReviewerId) -> Result<(), BridgeError>;
    fn notify_owner(&self, link: &ShareLink, notice: &OwnerNotice) -> Result<(), BridgeError>;
}

/// Storage-layer copy of the shared file into the backup library, fired
/// exactly once per approved link.
pub trait BackupGateway: Send + Sync {
    fn backup(&self, link: &ShareLink) -> Result<(), BridgeError>;
}

/// Encode the steps a link was seeded with into the audit wire shape,
/// preserving step order and group membership.
pub fn encode_audit_steps(rows: &[super::domain::ApprovalRow]) -> Vec<AuditStep> {
    state::seeded_steps(rows)
        .into_iter()
        .map(|(index, op, reviewers)| {
            let kind = match op {
                None => StepKind::Single,
                Some(GroupOp::AnyOf) => StepKind::AnyOf,
                Some(GroupOp::AllOf) => StepKind::AllOf,
            };
            AuditStep {
                label: format!("reviewer-step-{}", index + 1),
                kind,
                order: index,
                reviewers,
            }
        })
        .collect()
}
