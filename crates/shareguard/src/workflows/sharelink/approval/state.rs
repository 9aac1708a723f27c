//! Seeding and evaluation of per-link approval state.
//!
//! The outcome is never stored: it is recomputed from the status rows on
//! every read so the stored rows stay the single source of truth.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::chain::{ApprovalChain, GroupOp, ReviewerId};
use super::domain::{
    ApprovalRow, Decision, LinkOutcome, LinkToken, RejectReason, ReviewStatus, RowSubject,
};

/// Conflicting decision replay: the original decision is kept.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("'{subject}' already decided '{}', conflicting '{}' rejected", .kept.label(), .attempted.label())]
pub struct DecisionConflict {
    pub subject: RowSubject,
    pub kept: Decision,
    pub attempted: Decision,
}

/// Result of applying a decision to a row.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Recorded(ApprovalRow),
    /// Same decision replayed onto a terminal row; nothing changed.
    NoOp,
}

/// Build the initial Pending rows for a link: one row per chain reviewer
/// (groups flattened, step position and operator snapshotted) plus the
/// reserved scanner row. With scanning disabled the scanner row is an
/// automatic pass.
///
/// A reviewer appearing in more than one step keeps only the first row; the
/// (link, subject) pair is unique.
pub fn seed_rows(
    link: &LinkToken,
    chain: &ApprovalChain,
    dlp_enabled: bool,
    at: DateTime<Utc>,
) -> Vec<ApprovalRow> {
    let mut rows = Vec::with_capacity(chain.reviewers().count() + 1);

    let (dlp_status, dlp_time) = if dlp_enabled {
        (ReviewStatus::Pending, None)
    } else {
        (ReviewStatus::Pass, Some(at))
    };
    rows.push(ApprovalRow {
        link: link.clone(),
        subject: RowSubject::Dlp,
        status: dlp_status,
        step_index: None,
        step_op: None,
        verdict_payload: None,
        verdict_time: dlp_time,
        correlation: None,
    });

    for (index, step) in chain.steps().iter().enumerate() {
        for member in step.reviewers() {
            let subject = RowSubject::Reviewer(member.clone());
            if rows.iter().any(|row| row.subject == subject) {
                continue;
            }
            rows.push(ApprovalRow {
                link: link.clone(),
                subject,
                status: ReviewStatus::Pending,
                step_index: Some(index),
                step_op: step.op(),
                verdict_payload: None,
                verdict_time: None,
                correlation: None,
            });
        }
    }

    rows
}

/// Apply a decision to one row with idempotent-upsert semantics: a replay of
/// the same decision is a no-op, a conflicting decision is rejected and the
/// original kept.
pub fn apply_decision(
    row: &ApprovalRow,
    decision: Decision,
    payload: Option<Value>,
    at: DateTime<Utc>,
) -> Result<Applied, DecisionConflict> {
    if let Some(kept) = row.status.decision() {
        if kept == decision {
            return Ok(Applied::NoOp);
        }
        return Err(DecisionConflict {
            subject: row.subject.clone(),
            kept,
            attempted: decision,
        });
    }

    let mut updated = row.clone();
    updated.status = decision.into();
    updated.verdict_time = Some(at);
    if payload.is_some() {
        updated.verdict_payload = payload;
    }
    Ok(Applied::Recorded(updated))
}

/// Recompute the authoritative outcome from stored rows.
///
/// A scanner veto/high-risk verdict rejects immediately, short-circuiting
/// the human chain. A human veto anywhere rejects the chain even while
/// earlier steps or the scanner are still pending (rejection is monotonic).
/// Approval requires the scanner pass plus every step cleared; there is no
/// short-circuit approve.
pub fn current_outcome(rows: &[ApprovalRow]) -> LinkOutcome {
    if rows.is_empty() {
        return LinkOutcome::Pending;
    }

    let dlp = rows.iter().find(|row| row.is_dlp());
    match dlp.map(|row| row.status) {
        Some(ReviewStatus::Veto) => {
            return LinkOutcome::Rejected {
                reason: RejectReason::Veto,
                by: RowSubject::Dlp,
            }
        }
        Some(ReviewStatus::BlockHighRisk) => {
            return LinkOutcome::Rejected {
                reason: RejectReason::BlockHighRisk,
                by: RowSubject::Dlp,
            }
        }
        _ => {}
    }

    if let Some(rejecting) = rows
        .iter()
        .filter(|row| !row.is_dlp())
        .filter(|row| {
            matches!(
                row.status,
                ReviewStatus::Veto | ReviewStatus::BlockHighRisk
            )
        })
        .min_by_key(|row| row.step_index)
    {
        let reason = match rejecting.status {
            ReviewStatus::BlockHighRisk => RejectReason::BlockHighRisk,
            _ => RejectReason::Veto,
        };
        return LinkOutcome::Rejected {
            reason,
            by: rejecting.subject.clone(),
        };
    }

    match dlp.map(|row| row.status) {
        Some(ReviewStatus::Pass) => {}
        // Scanner still pending (or the row is missing): human passes do not
        // count yet.
        _ => return LinkOutcome::Pending,
    }

    let mut steps: BTreeMap<usize, Vec<&ApprovalRow>> = BTreeMap::new();
    for row in rows.iter().filter(|row| !row.is_dlp()) {
        if let Some(index) = row.step_index {
            steps.entry(index).or_default().push(row);
        }
    }

    let all_cleared = steps.values().all(|members| step_cleared(members));
    if all_cleared {
        LinkOutcome::Approved
    } else {
        LinkOutcome::Pending
    }
}

/// Whether an approved outcome currently allows serving the download.
pub fn downloadable(outcome: &LinkOutcome) -> bool {
    matches!(outcome, LinkOutcome::Approved)
}

fn step_cleared(members: &[&ApprovalRow]) -> bool {
    let op = members.iter().find_map(|row| row.step_op);
    match op {
        // Bare reviewer: the single row must have passed.
        None => members.iter().all(|row| row.status == ReviewStatus::Pass),
        Some(GroupOp::AnyOf) => members.iter().any(|row| row.status == ReviewStatus::Pass),
        Some(GroupOp::AllOf) => members.iter().all(|row| row.status == ReviewStatus::Pass),
    }
}

/// Reconstruct the flattened reviewer steps a link was seeded with, in step
/// order: `(step index, operator, reviewers)`.
pub fn seeded_steps(rows: &[ApprovalRow]) -> Vec<(usize, Option<GroupOp>, Vec<ReviewerId>)> {
    let mut steps: BTreeMap<usize, (Option<GroupOp>, Vec<ReviewerId>)> = BTreeMap::new();
    for row in rows.iter().filter(|row| !row.is_dlp()) {
        if let (Some(index), RowSubject::Reviewer(id)) = (row.step_index, &row.subject) {
            let entry = steps.entry(index).or_insert((row.step_op, Vec::new()));
            entry.1.push(id.clone());
        }
    }

    steps
        .into_iter()
        .map(|(index, (op, reviewers))| (index, op, reviewers))
        .collect()
}
