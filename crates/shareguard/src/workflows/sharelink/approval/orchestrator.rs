use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::config::ApprovalSettings;

use super::bridges::{
    encode_audit_steps, AuditBridge, AuditDecision, AuditPoll, AuditSubmission, CorrelationToken,
    BackupGateway, NotificationGateway, OwnerNotice, ScanBridge, ScanHandle, ScanTarget,
    ScanVerdict,
};
use super::chain::{ApprovalChain, ChainError, ReviewerId, UserDirectory};
use super::domain::{
    ApprovalInfoView, ApprovalRow, Decision, DlpReport, LinkOutcome, LinkToken, OwnerStatusView,
    ReviewerStatusView, RowSubject, ShareLink,
};
use super::policy::ApprovalPolicy;
use super::repository::{ApprovalStatusStore, ChainStore, LinkStore, StoreError};
use super::state::{self, Applied, DecisionConflict};

/// Error raised by the approval orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("link '{0}' is already seeded")]
    DuplicateSeed(LinkToken),
    #[error("no approval state for link '{0}'")]
    UnknownLink(LinkToken),
    #[error("'{reviewer}' is not a reviewer for link '{link}'")]
    UnknownReviewer {
        link: LinkToken,
        reviewer: ReviewerId,
    },
    #[error(transparent)]
    Conflict(#[from] DecisionConflict),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Per-link critical sections: `record + recompute + transition detection`
/// run under one lock; remote calls never do.
#[derive(Default)]
struct LinkLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LinkLocks {
    fn acquire(&self, token: &LinkToken) -> Arc<Mutex<()>> {
        let mut registry = self.inner.lock().expect("link lock registry poisoned");
        registry.entry(token.0.clone()).or_default().clone()
    }
}

/// Drives every transition of a link's approval state and is its single
/// writer. Decisions arrive from the scan poll loop, the human decision
/// endpoint, and the audit poll loop; all three funnel through the same
/// record/recompute/finalize path.
pub struct ApprovalOrchestrator<C, S, L> {
    chains: Arc<C>,
    statuses: Arc<S>,
    links: Arc<L>,
    directory: Arc<dyn UserDirectory>,
    scanner: Arc<dyn ScanBridge>,
    audit: Arc<dyn AuditBridge>,
    notifier: Arc<dyn NotificationGateway>,
    backup: Arc<dyn BackupGateway>,
    policy: Arc<dyn ApprovalPolicy>,
    settings: ApprovalSettings,
    locks: LinkLocks,
}

impl<C, S, L> ApprovalOrchestrator<C, S, L>
where
    C: ChainStore + 'static,
    S: ApprovalStatusStore + 'static,
    L: LinkStore + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chains: Arc<C>,
        statuses: Arc<S>,
        links: Arc<L>,
        directory: Arc<dyn UserDirectory>,
        scanner: Arc<dyn ScanBridge>,
        audit: Arc<dyn AuditBridge>,
        notifier: Arc<dyn NotificationGateway>,
        backup: Arc<dyn BackupGateway>,
        policy: Arc<dyn ApprovalPolicy>,
        settings: ApprovalSettings,
    ) -> Self {
        Self {
            chains,
            statuses,
            links,
            directory,
            scanner,
            audit,
            notifier,
            backup,
            policy,
            settings,
            locks: LinkLocks::default(),
        }
    }

    pub fn settings(&self) -> &ApprovalSettings {
        &self.settings
    }

    pub fn directory(&self) -> &dyn UserDirectory {
        self.directory.as_ref()
    }

    /// Seed approval state for a freshly created link and kick off the scan
    /// and reviewer notifications.
    pub fn on_link_created(&self, link: &ShareLink) -> Result<LinkOutcome, ApprovalError> {
        let chain = self.resolve_chain(&link.owner)?;
        let chain = self.policy.amend_chain(link, chain);
        let chain = if self.policy.bypass_human_review(link) {
            info!(token = %link.token, "human review bypassed by policy");
            ApprovalChain::empty()
        } else {
            chain
        };

        let rows = state::seed_rows(&link.token, &chain, self.settings.dlp_enabled, Utc::now());
        match self.statuses.seed(&link.token, rows.clone()) {
            Ok(()) => {}
            Err(StoreError::Conflict) => {
                error!(token = %link.token, "refusing to reseed existing approval state");
                return Err(ApprovalError::DuplicateSeed(link.token.clone()));
            }
            Err(err) => return Err(err.into()),
        }

        let outcome = state::current_outcome(&rows);
        info!(token = %link.token, steps = chain.len(), outcome = outcome.label(), "approval state seeded");

        if outcome == LinkOutcome::Approved {
            self.finalize_transition(link, &outcome);
            return Ok(outcome);
        }

        if self.settings.dlp_enabled {
            self.submit_scan(link);
        }

        // All chain reviewers are notified at creation; evaluation stays
        // sequential regardless.
        for reviewer in chain.reviewers() {
            if let Err(err) = self.notifier.notify_reviewer(link, reviewer) {
                warn!(token = %link.token, %reviewer, stage = "notify_reviewer", %err, "notification failed");
            }
        }

        Ok(outcome)
    }

    /// Ingest a scanner verdict. Idempotent; a pending verdict is no new
    /// information.
    pub fn on_dlp_verdict(
        &self,
        token: &LinkToken,
        verdict: ScanVerdict,
    ) -> Result<LinkOutcome, ApprovalError> {
        let (decision, payload) = match verdict {
            ScanVerdict::Pending => return self.outcome(token),
            ScanVerdict::Pass => (Decision::Pass, None),
            ScanVerdict::Veto => (Decision::Veto, None),
            ScanVerdict::BlockHighRisk { details } => (Decision::BlockHighRisk, Some(details)),
        };

        let outcome =
            self.record_decision(token, &RowSubject::Dlp, decision, payload, Utc::now())?;

        // The chain of custody goes to the audit system once the scanner has
        // resolved, whatever the verdict.
        self.ensure_audit_submission(token)?;

        Ok(outcome)
    }

    /// Ingest a decision clicked by a human reviewer.
    pub fn on_reviewer_decision(
        &self,
        token: &LinkToken,
        reviewer: &ReviewerId,
        decision: Decision,
        at: DateTime<Utc>,
    ) -> Result<LinkOutcome, ApprovalError> {
        self.record_decision(
            token,
            &RowSubject::Reviewer(reviewer.clone()),
            decision,
            None,
            at,
        )
    }

    /// Ingest a batch of decisions mirrored back by the audit system.
    /// Conflicting replays keep the original decision and are downgraded to
    /// warnings so one anomaly never blocks the rest of the batch.
    pub fn on_audit_decisions(
        &self,
        token: &LinkToken,
        decisions: Vec<AuditDecision>,
    ) -> Result<LinkOutcome, ApprovalError> {
        for decision in decisions {
            let subject = RowSubject::Reviewer(decision.reviewer.clone());
            match self.record_decision(
                token,
                &subject,
                decision.decision,
                None,
                decision.decided_at,
            ) {
                Ok(_) => {}
                Err(ApprovalError::Conflict(conflict)) => {
                    warn!(%token, %conflict, "conflicting audit replay ignored");
                }
                Err(ApprovalError::UnknownReviewer { reviewer, .. }) => {
                    warn!(%token, %reviewer, "audit decision for untracked reviewer ignored");
                }
                Err(err) => return Err(err),
            }
        }

        self.outcome(token)
    }

    /// The authoritative outcome, recomputed from stored rows. This is the
    /// hook the download access check consults.
    pub fn outcome(&self, token: &LinkToken) -> Result<LinkOutcome, ApprovalError> {
        let rows = self.statuses.rows(token)?;
        if rows.is_empty() {
            return Err(ApprovalError::UnknownLink(token.clone()));
        }
        Ok(state::current_outcome(&rows))
    }

    /// Whether the link may currently be served for download.
    pub fn downloadable(&self, token: &LinkToken) -> Result<bool, ApprovalError> {
        Ok(state::downloadable(&self.outcome(token)?))
    }

    /// One pass of the scan poll loop: resubmit scans that never got a
    /// handle, poll the rest, and feed resolved verdicts in. Per-link
    /// failures are logged and skipped.
    pub fn poll_scan_results(&self) -> Result<usize, ApprovalError> {
        let pending = self.statuses.pending_scan_rows()?;
        let mut applied = 0;

        for row in pending {
            let token = row.link.clone();
            match &row.correlation {
                None => {
                    match self.links.fetch(&token) {
                        Ok(Some(link)) => self.submit_scan(&link),
                        Ok(None) => {
                            warn!(%token, stage = "scan_submit", "link record missing, skipping")
                        }
                        Err(err) => {
                            warn!(%token, stage = "scan_submit", %err, "link fetch failed")
                        }
                    }
                }
                Some(handle) => match self.scanner.poll(&ScanHandle(handle.clone())) {
                    Ok(ScanVerdict::Pending) => {}
                    Ok(verdict) => match self.on_dlp_verdict(&token, verdict) {
                        Ok(_) => applied += 1,
                        Err(err) => {
                            error!(%token, stage = "scan_ingest", %err, "failed to apply scan verdict")
                        }
                    },
                    Err(err) => {
                        warn!(%token, stage = "scan_poll", %err, "scan poll failed, will retry")
                    }
                },
            }
        }

        Ok(applied)
    }

    /// One pass of the audit poll loop: submit pending chains whose scanner
    /// has resolved, poll submitted ones, and feed mirrored decisions in.
    pub fn poll_audit_results(&self) -> Result<usize, ApprovalError> {
        let candidates = self.statuses.links_with_pending_reviews()?;
        let mut applied = 0;

        for token in candidates {
            let rows = match self.statuses.rows(&token) {
                Ok(rows) => rows,
                Err(err) => {
                    warn!(%token, stage = "audit_poll", %err, "row fetch failed");
                    continue;
                }
            };

            let dlp_resolved = rows
                .iter()
                .find(|row| row.is_dlp())
                .map(|row| row.status.is_terminal())
                .unwrap_or(false);
            if !dlp_resolved {
                continue;
            }

            let correlation = rows
                .iter()
                .filter(|row| !row.is_dlp())
                .find_map(|row| row.correlation.clone());

            match correlation {
                None => {
                    if let Err(err) = self.ensure_audit_submission(&token) {
                        warn!(%token, stage = "audit_submit", %err, "audit submission failed, will retry");
                    }
                }
                Some(correlation) => {
                    match self.audit.poll(&CorrelationToken(correlation)) {
                        Ok(AuditPoll::Pending) => {}
                        Ok(AuditPoll::Decisions(decisions)) => {
                            match self.on_audit_decisions(&token, decisions) {
                                Ok(_) => applied += 1,
                                Err(err) => {
                                    error!(%token, stage = "audit_ingest", %err, "failed to apply audit decisions")
                                }
                            }
                        }
                        Err(err) => {
                            warn!(%token, stage = "audit_poll", %err, "audit poll failed, will retry")
                        }
                    }
                }
            }
        }

        Ok(applied)
    }

    /// Retry the backup copy for approved links whose flag is still unset.
    /// A backup that failed during finalization is picked up here on the
    /// next poll cycle.
    pub fn retry_pending_backups(&self) -> Result<usize, ApprovalError> {
        let mut attempted = 0;
        for link in self.links.pending_backups()? {
            match self.outcome(&link.token) {
                Ok(LinkOutcome::Approved) => {
                    self.run_backup(&link);
                    attempted += 1;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(token = %link.token, stage = "backup", %err, "backup sweep skipped link");
                }
            }
        }
        Ok(attempted)
    }

    /// Whether the identity is a reviewer anywhere: in a stored chain or on
    /// an in-flight link.
    pub fn is_reviewer(&self, identity: &ReviewerId) -> Result<bool, ApprovalError> {
        if self
            .chains
            .all_reviewers()?
            .iter()
            .any(|reviewer| reviewer == identity)
        {
            return Ok(true);
        }
        Ok(self.statuses.has_rows_for_reviewer(identity)?)
    }

    // ----- admin chain management -------------------------------------------

    pub fn replace_department_chain(
        &self,
        department: &str,
        text: &str,
    ) -> Result<ApprovalChain, ApprovalError> {
        let chain = ApprovalChain::parse(text, self.directory.as_ref())?;
        self.chains
            .replace_department_chain(department, chain.clone())?;
        info!(department, steps = chain.len(), "department chain replaced");
        Ok(chain)
    }

    /// Replace a user chain; the configured security step is appended at
    /// write time so the stored chain is complete.
    pub fn replace_user_chain(
        &self,
        user: &str,
        text: &str,
    ) -> Result<ApprovalChain, ApprovalError> {
        let mut chain = ApprovalChain::parse(text, self.directory.as_ref())?;
        let security: Vec<ReviewerId> = self
            .settings
            .security_reviewers
            .iter()
            .map(ReviewerId::new)
            .collect();
        chain.append_security_step(&security);
        self.chains.replace_user_chain(user, chain.clone())?;
        info!(user, steps = chain.len(), "user chain replaced");
        Ok(chain)
    }

    pub fn user_chain(&self, user: &str) -> Result<Option<ApprovalChain>, ApprovalError> {
        Ok(self.chains.user_chain(user)?)
    }

    pub fn delete_user_chain(&self, user: &str) -> Result<bool, ApprovalError> {
        Ok(self.chains.delete_user_chain(user)?)
    }

    pub fn department_count(&self) -> Result<usize, ApprovalError> {
        Ok(self.chains.department_count()?)
    }

    pub fn user_count(&self) -> Result<usize, ApprovalError> {
        Ok(self.chains.user_count()?)
    }

    /// Swap the trailing security step on a stored user chain after the
    /// security group membership changed. Stored rows of in-flight links are
    /// untouched.
    pub fn refresh_security_step(
        &self,
        user: &str,
        previous_group: &[ReviewerId],
    ) -> Result<Option<ApprovalChain>, ApprovalError> {
        let Some(mut chain) = self.chains.user_chain(user)? else {
            return Ok(None);
        };

        chain.remove_security_step(previous_group);
        let security: Vec<ReviewerId> = self
            .settings
            .security_reviewers
            .iter()
            .map(ReviewerId::new)
            .collect();
        chain.append_security_step(&security);
        self.chains.replace_user_chain(user, chain.clone())?;
        Ok(Some(chain))
    }

    // ----- views ------------------------------------------------------------

    pub fn owner_view(&self, token: &LinkToken) -> Result<OwnerStatusView, ApprovalError> {
        let outcome = self.outcome(token)?;
        Ok(OwnerStatusView::from_outcome(token, &outcome))
    }

    pub fn approval_info(&self, token: &LinkToken) -> Result<ApprovalInfoView, ApprovalError> {
        let rows = self.statuses.rows(token)?;
        if rows.is_empty() {
            return Err(ApprovalError::UnknownLink(token.clone()));
        }

        let outcome = state::current_outcome(&rows);
        let dlp = rows.iter().find(|row| row.is_dlp());

        let mut reviewers: Vec<&ApprovalRow> = rows.iter().filter(|row| !row.is_dlp()).collect();
        reviewers.sort_by_key(|row| row.step_index);

        Ok(ApprovalInfoView {
            token: token.0.clone(),
            outcome: outcome.label(),
            dlp_status: dlp.map(|row| row.status.label()).unwrap_or("pending"),
            dlp_time: dlp.and_then(|row| row.verdict_time),
            dlp_report: dlp
                .and_then(|row| row.verdict_payload.as_ref())
                .map(DlpReport::from_payload),
            reviewers: reviewers
                .into_iter()
                .map(|row| ReviewerStatusView {
                    reviewer: row.subject.label().to_string(),
                    status: row.status.label(),
                    step_index: row.step_index.unwrap_or(0),
                    step_op: row.step_op,
                    verdict_time: row.verdict_time,
                })
                .collect(),
        })
    }

    // ----- internals --------------------------------------------------------

    fn resolve_chain(&self, owner: &str) -> Result<ApprovalChain, ApprovalError> {
        if let Some(chain) = self.chains.user_chain(owner)? {
            return Ok(chain);
        }

        let department = self
            .directory
            .lookup(owner)
            .and_then(|user| user.department);
        if let Some(department) = department {
            if let Some(chain) = self.chains.department_chain(&department)? {
                return Ok(chain);
            }
        }

        Ok(ApprovalChain::empty())
    }

    /// Record one decision and run transition side effects.
    ///
    /// The link record is fetched before the lock; the lock covers row read,
    /// conflict check, upsert, and outcome recomputation. Side effects fire
    /// after release, gated on the pending-to-terminal edge observed inside
    /// the critical section.
    fn record_decision(
        &self,
        token: &LinkToken,
        subject: &RowSubject,
        decision: Decision,
        payload: Option<Value>,
        at: DateTime<Utc>,
    ) -> Result<LinkOutcome, ApprovalError> {
        let link = match self.links.fetch(token) {
            Ok(Some(link)) => Some(link),
            Ok(None) => {
                warn!(%token, stage = "link_fetch", "link record missing, notices will be skipped");
                None
            }
            Err(err) => {
                warn!(%token, stage = "link_fetch", %err, "link fetch failed, notices will be skipped");
                None
            }
        };

        let lock = self.locks.acquire(token);
        let (before, after, recorded) = {
            let _guard = lock.lock().expect("link lock poisoned");

            let mut rows = self.statuses.rows(token)?;
            if rows.is_empty() {
                return Err(ApprovalError::UnknownLink(token.clone()));
            }

            let position = rows.iter().position(|row| &row.subject == subject);
            let Some(position) = position else {
                return match subject {
                    RowSubject::Reviewer(reviewer) => Err(ApprovalError::UnknownReviewer {
                        link: token.clone(),
                        reviewer: reviewer.clone(),
                    }),
                    RowSubject::Dlp => Err(ApprovalError::UnknownLink(token.clone())),
                };
            };

            let before = state::current_outcome(&rows);
            match state::apply_decision(&rows[position], decision, payload, at)? {
                Applied::NoOp => (before.clone(), before, false),
                Applied::Recorded(updated) => {
                    self.statuses.upsert(updated.clone())?;
                    rows[position] = updated;
                    let after = state::current_outcome(&rows);
                    (before, after, true)
                }
            }
        };

        if !recorded {
            return Ok(after);
        }

        info!(%token, subject = %subject, decision = decision.label(), outcome = after.label(), "decision recorded");

        if let Some(link) = link {
            let notice = OwnerNotice::VerdictRecorded {
                source: subject.label().to_string(),
                decision,
            };
            if let Err(err) = self.notifier.notify_owner(&link, &notice) {
                warn!(%token, stage = "notify_owner", %err, "verdict notice failed");
            }

            if !before.is_terminal() && after.is_terminal() {
                self.finalize_transition(&link, &after);
            }
        }

        Ok(after)
    }

    /// Side effects of a terminal transition. Each is individually guarded
    /// and logged so a failure never corrupts recorded state; the backup is
    /// additionally gated by the persisted flag because poll jobs rerun.
    fn finalize_transition(&self, link: &ShareLink, outcome: &LinkOutcome) {
        let token = &link.token;
        match outcome {
            LinkOutcome::Approved => {
                if let Some(expire_at) = link.expire_at {
                    let lifetime = expire_at - link.ctime;
                    let extended = Utc::now() + lifetime;
                    if let Err(err) = self.links.set_expiry(token, extended) {
                        warn!(%token, stage = "extend_expiry", %err, "expiry extension failed");
                    }
                }

                if let Err(err) = self.links.clear_downloads(token) {
                    warn!(%token, stage = "clear_downloads", %err, "download counter reset failed");
                }

                if let Err(err) = self.notifier.notify_owner(link, &OwnerNotice::Approved) {
                    warn!(%token, stage = "notify_owner", %err, "approval notice failed");
                }

                self.run_backup(link);
            }
            LinkOutcome::Rejected { reason, by } => {
                let notice = OwnerNotice::Rejected {
                    by: by.label().to_string(),
                    reason: *reason,
                };
                if let Err(err) = self.notifier.notify_owner(link, &notice) {
                    warn!(%token, stage = "notify_owner", %err, "rejection notice failed");
                }
            }
            LinkOutcome::Pending => {}
        }
    }

    fn run_backup(&self, link: &ShareLink) {
        let token = &link.token;

        // Re-read the flag: an earlier run (possibly another process) may
        // have completed the copy already.
        let fresh = match self.links.fetch(token) {
            Ok(Some(fresh)) => fresh,
            Ok(None) => {
                warn!(%token, stage = "backup", "link record missing, skipping backup");
                return;
            }
            Err(err) => {
                warn!(%token, stage = "backup", %err, "link fetch failed, skipping backup");
                return;
            }
        };
        if fresh.backup_done {
            return;
        }

        match self.backup.backup(&fresh) {
            Ok(()) => {
                if let Err(err) = self.links.mark_backup_done(token) {
                    warn!(%token, stage = "backup", %err, "backup done but flag write failed");
                } else {
                    info!(%token, "backup copy stored");
                }
            }
            Err(err) => {
                warn!(%token, stage = "backup", %err, "backup failed, will retry on next cycle");
            }
        }
    }

    fn submit_scan(&self, link: &ShareLink) {
        let token = &link.token;
        let target = ScanTarget::for_link(link);

        let handle = match self.scanner.submit(&target) {
            Ok(handle) => handle,
            Err(err) => {
                warn!(%token, stage = "scan_submit", %err, "scan submission failed, will retry");
                return;
            }
        };

        let lock = self.locks.acquire(token);
        let _guard = lock.lock().expect("link lock poisoned");
        let row = match self.statuses.find(token, &RowSubject::Dlp) {
            Ok(Some(row)) => row,
            Ok(None) => {
                warn!(%token, stage = "scan_submit", "scanner row missing, discarding handle");
                return;
            }
            Err(err) => {
                warn!(%token, stage = "scan_submit", %err, "scanner row fetch failed");
                return;
            }
        };
        if row.status.is_terminal() || row.correlation.is_some() {
            return;
        }

        let mut updated = row;
        updated.correlation = Some(handle.0);
        if let Err(err) = self.statuses.upsert(updated) {
            warn!(%token, stage = "scan_submit", %err, "failed to store scan handle");
        }
    }

    /// Submit the chain of custody to the audit system exactly once per
    /// link: skipped until the scanner resolves, skipped when any human row
    /// already carries a correlation token, and raced commits discard the
    /// duplicate token.
    fn ensure_audit_submission(&self, token: &LinkToken) -> Result<(), ApprovalError> {
        let link = match self.links.fetch(token)? {
            Some(link) => link,
            None => {
                warn!(%token, stage = "audit_submit", "link record missing, skipping submission");
                return Ok(());
            }
        };

        let submission = {
            let lock = self.locks.acquire(token);
            let _guard = lock.lock().expect("link lock poisoned");

            let rows = self.statuses.rows(token)?;
            let human_rows: Vec<&ApprovalRow> =
                rows.iter().filter(|row| !row.is_dlp()).collect();
            if human_rows.is_empty() {
                return Ok(());
            }
            if human_rows.iter().any(|row| row.correlation.is_some()) {
                return Ok(());
            }

            let Some(dlp) = rows.iter().find(|row| row.is_dlp()) else {
                return Ok(());
            };
            if !dlp.status.is_terminal() {
                return Ok(());
            }

            AuditSubmission {
                channel: self.settings.audit_channel.clone(),
                token: token.clone(),
                file_name: link.file_name().to_string(),
                owner: link.owner.clone(),
                created_at: link.ctime,
                receivers: link.receivers.clone(),
                note: link.note.clone(),
                dlp_status: dlp.status,
                dlp_time: dlp.verdict_time,
                steps: encode_audit_steps(&rows),
            }
        };

        let correlation = match self.audit.submit(&submission) {
            Ok(correlation) => correlation,
            Err(err) => {
                warn!(%token, stage = "audit_submit", %err, "audit submission failed, will retry");
                return Ok(());
            }
        };

        let lock = self.locks.acquire(token);
        let _guard = lock.lock().expect("link lock poisoned");
        let rows = self.statuses.rows(token)?;
        if rows
            .iter()
            .filter(|row| !row.is_dlp())
            .any(|row| row.correlation.is_some())
        {
            warn!(%token, stage = "audit_submit", "raced audit submission, discarding duplicate token");
            return Ok(());
        }

        self.statuses.set_correlation(token, &correlation.0)?;
        info!(%token, "audit submission correlated");
        Ok(())
    }
}
