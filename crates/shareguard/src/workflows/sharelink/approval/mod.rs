//! Share-link approval workflow engine.
//!
//! A newly created share link is gated by an approval chain (ordered steps
//! of single reviewers or AND/OR groups), an out-of-band content scan, and
//! an external audit system mirroring human decisions. The orchestrator is
//! the single writer of per-link state; the authoritative outcome is always
//! recomputed from stored rows.

pub mod bridges;
pub mod chain;
pub mod domain;
pub mod orchestrator;
pub mod policy;
pub mod repository;
pub mod router;
pub mod state;

#[cfg(test)]
mod tests;

pub use bridges::{
    AuditBridge, AuditDecision, AuditPoll, AuditStep, AuditSubmission, BackupGateway, BridgeError,
    CorrelationToken, NotificationGateway, OwnerNotice, ScanBridge, ScanHandle, ScanTarget,
    ScanVerdict, StepKind,
};
pub use chain::{
    ApprovalChain, ApprovalStep, ChainError, DirectoryUser, GroupOp, ReviewerId, UserDirectory,
};
pub use domain::{
    ApprovalInfoView, ApprovalRow, Decision, DlpReport, LinkOutcome, LinkToken, OwnerStatusView,
    RejectReason, ReviewStatus, ReviewerStatusView, RowSubject, ShareLink, DLP_SUBJECT_LABEL,
};
pub use orchestrator::{ApprovalError, ApprovalOrchestrator};
pub use policy::{ApprovalPolicy, PassthroughPolicy, StandardPolicy};
pub use repository::{ApprovalStatusStore, ChainStore, LinkStore, StoreError};
pub use router::approval_router;
pub use state::{
    apply_decision, current_outcome, downloadable, seed_rows, Applied, DecisionConflict,
};
