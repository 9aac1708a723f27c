use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::info;

use shareguard::workflows::sharelink::approval::{
    ApprovalChain, ApprovalRow, ApprovalStatusStore, AuditBridge, AuditDecision, AuditPoll,
    AuditSubmission, BackupGateway, BridgeError, ChainStore, CorrelationToken, DirectoryUser,
    LinkStore, LinkToken, NotificationGateway, OwnerNotice, ReviewerId, RowSubject, ScanBridge,
    ScanHandle, ScanTarget, ScanVerdict, ShareLink, StoreError, UserDirectory,
};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Directory that accepts any well-formed address as an active user until a
/// real profile service is wired in.
#[derive(Default, Clone)]
pub(crate) struct OpenDirectory;

impl UserDirectory for OpenDirectory {
    fn lookup(&self, identity: &str) -> Option<DirectoryUser> {
        let email = identity.trim().to_ascii_lowercase();
        let (local, domain) = email.split_once('@')?;
        if local.is_empty() || !domain.contains('.') || email.contains(char::is_whitespace) {
            return None;
        }
        Some(DirectoryUser {
            display_name: local.to_string(),
            department: None,
            active: true,
            email,
        })
    }
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryChainStore {
    departments: Arc<Mutex<HashMap<String, ApprovalChain>>>,
    users: Arc<Mutex<HashMap<String, ApprovalChain>>>,
}

impl ChainStore for InMemoryChainStore {
    fn replace_department_chain(
        &self,
        department: &str,
        chain: ApprovalChain,
    ) -> Result<(), StoreError> {
        self.departments
            .lock()
            .expect("chain mutex poisoned")
            .insert(department.to_string(), chain);
        Ok(())
    }

    fn department_chain(&self, department: &str) -> Result<Option<ApprovalChain>, StoreError> {
        Ok(self
            .departments
            .lock()
            .expect("chain mutex poisoned")
            .get(department)
            .cloned())
    }

    fn department_count(&self) -> Result<usize, StoreError> {
        Ok(self.departments.lock().expect("chain mutex poisoned").len())
    }

    fn replace_user_chain(&self, user: &str, chain: ApprovalChain) -> Result<(), StoreError> {
        self.users
            .lock()
            .expect("chain mutex poisoned")
            .insert(user.to_string(), chain);
        Ok(())
    }

    fn user_chain(&self, user: &str) -> Result<Option<ApprovalChain>, StoreError> {
        Ok(self
            .users
            .lock()
            .expect("chain mutex poisoned")
            .get(user)
            .cloned())
    }

    fn delete_user_chain(&self, user: &str) -> Result<bool, StoreError> {
        Ok(self
            .users
            .lock()
            .expect("chain mutex poisoned")
            .remove(user)
            .is_some())
    }

    fn user_count(&self) -> Result<usize, StoreError> {
        Ok(self.users.lock().expect("chain mutex poisoned").len())
    }

    fn all_reviewers(&self) -> Result<Vec<ReviewerId>, StoreError> {
        let departments = self.departments.lock().expect("chain mutex poisoned");
        let users = self.users.lock().expect("chain mutex poisoned");
        let mut reviewers = Vec::new();
        for chain in departments.values().chain(users.values()) {
            reviewers.extend(chain.reviewers().cloned());
        }
        Ok(reviewers)
    }
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryStatusStore {
    rows: Arc<Mutex<HashMap<String, Vec<ApprovalRow>>>>,
}

impl ApprovalStatusStore for InMemoryStatusStore {
    fn seed(&self, link: &LinkToken, rows: Vec<ApprovalRow>) -> Result<(), StoreError> {
        let mut guard = self.rows.lock().expect("status mutex poisoned");
        if guard.contains_key(&link.0) {
            return Err(StoreError::Conflict);
        }
        guard.insert(link.0.clone(), rows);
        Ok(())
    }

    fn rows(&self, link: &LinkToken) -> Result<Vec<ApprovalRow>, StoreError> {
        Ok(self
            .rows
            .lock()
            .expect("status mutex poisoned")
            .get(&link.0)
            .cloned()
            .unwrap_or_default())
    }

    fn find(
        &self,
        link: &LinkToken,
        subject: &RowSubject,
    ) -> Result<Option<ApprovalRow>, StoreError> {
        Ok(self
            .rows
            .lock()
            .expect("status mutex poisoned")
            .get(&link.0)
            .and_then(|rows| rows.iter().find(|row| &row.subject == subject).cloned()))
    }

    fn upsert(&self, row: ApprovalRow) -> Result<(), StoreError> {
        let mut guard = self.rows.lock().expect("status mutex poisoned");
        let rows = guard.entry(row.link.0.clone()).or_default();
        match rows
            .iter_mut()
            .find(|existing| existing.subject == row.subject)
        {
            Some(existing) => *existing = row,
            None => rows.push(row),
        }
        Ok(())
    }

    fn set_correlation(&self, link: &LinkToken, token: &str) -> Result<(), StoreError> {
        let mut guard = self.rows.lock().expect("status mutex poisoned");
        let rows = guard.get_mut(&link.0).ok_or(StoreError::NotFound)?;
        for row in rows.iter_mut().filter(|row| !row.is_dlp()) {
            row.correlation = Some(token.to_string());
        }
        Ok(())
    }

    fn pending_scan_rows(&self) -> Result<Vec<ApprovalRow>, StoreError> {
        Ok(self
            .rows
            .lock()
            .expect("status mutex poisoned")
            .values()
            .flatten()
            .filter(|row| row.is_dlp() && !row.status.is_terminal())
            .cloned()
            .collect())
    }

    fn links_with_pending_reviews(&self) -> Result<Vec<LinkToken>, StoreError> {
        Ok(self
            .rows
            .lock()
            .expect("status mutex poisoned")
            .iter()
            .filter(|(_, rows)| {
                rows.iter()
                    .any(|row| !row.is_dlp() && !row.status.is_terminal())
            })
            .map(|(token, _)| LinkToken(token.clone()))
            .collect())
    }

    fn has_rows_for_reviewer(&self, reviewer: &ReviewerId) -> Result<bool, StoreError> {
        let subject = RowSubject::Reviewer(reviewer.clone());
        Ok(self
            .rows
            .lock()
            .expect("status mutex poisoned")
            .values()
            .flatten()
            .any(|row| row.subject == subject))
    }
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryLinkStore {
    links: Arc<Mutex<HashMap<String, ShareLink>>>,
}

impl LinkStore for InMemoryLinkStore {
    fn fetch(&self, token: &LinkToken) -> Result<Option<ShareLink>, StoreError> {
        Ok(self
            .links
            .lock()
            .expect("link mutex poisoned")
            .get(&token.0)
            .cloned())
    }

    fn insert(&self, link: ShareLink) -> Result<(), StoreError> {
        let mut guard = self.links.lock().expect("link mutex poisoned");
        if guard.contains_key(&link.token.0) {
            return Err(StoreError::Conflict);
        }
        guard.insert(link.token.0.clone(), link);
        Ok(())
    }

    fn set_expiry(&self, token: &LinkToken, expire_at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut guard = self.links.lock().expect("link mutex poisoned");
        let link = guard.get_mut(&token.0).ok_or(StoreError::NotFound)?;
        link.expire_at = Some(expire_at);
        Ok(())
    }

    fn mark_backup_done(&self, token: &LinkToken) -> Result<(), StoreError> {
        let mut guard = self.links.lock().expect("link mutex poisoned");
        let link = guard.get_mut(&token.0).ok_or(StoreError::NotFound)?;
        link.backup_done = true;
        Ok(())
    }

    fn clear_downloads(&self, token: &LinkToken) -> Result<(), StoreError> {
        info!(%token, "download counters cleared");
        Ok(())
    }

    fn pending_backups(&self) -> Result<Vec<ShareLink>, StoreError> {
        Ok(self
            .links
            .lock()
            .expect("link mutex poisoned")
            .values()
            .filter(|link| !link.backup_done)
            .cloned()
            .collect())
    }
}

/// In-process scanner stand-in: verdicts are injected by the demo and stay
/// pending otherwise, until a real DLP integration replaces this.
#[derive(Default, Clone)]
pub(crate) struct ScriptableScanBridge {
    verdicts: Arc<Mutex<HashMap<String, ScanVerdict>>>,
}

impl ScriptableScanBridge {
    pub(crate) fn resolve(&self, token: &LinkToken, verdict: ScanVerdict) {
        self.verdicts
            .lock()
            .expect("scan mutex poisoned")
            .insert(format!("scan-{}", token.0), verdict);
    }
}

impl ScanBridge for ScriptableScanBridge {
    fn submit(&self, target: &ScanTarget) -> Result<ScanHandle, BridgeError> {
        Ok(ScanHandle(format!("scan-{}", target.token.0)))
    }

    fn poll(&self, handle: &ScanHandle) -> Result<ScanVerdict, BridgeError> {
        Ok(self
            .verdicts
            .lock()
            .expect("scan mutex poisoned")
            .get(&handle.0)
            .cloned()
            .unwrap_or(ScanVerdict::Pending))
    }
}

/// In-process audit stand-in: accepts submissions and serves decisions the
/// demo records against the returned correlation token.
#[derive(Default, Clone)]
pub(crate) struct ScriptableAuditBridge {
    submissions: Arc<Mutex<Vec<AuditSubmission>>>,
    decisions: Arc<Mutex<HashMap<String, Vec<AuditDecision>>>>,
}

impl ScriptableAuditBridge {
    pub(crate) fn record_decision(&self, correlation: &str, decision: AuditDecision) {
        self.decisions
            .lock()
            .expect("audit mutex poisoned")
            .entry(correlation.to_string())
            .or_default()
            .push(decision);
    }

    pub(crate) fn submissions(&self) -> Vec<AuditSubmission> {
        self.submissions
            .lock()
            .expect("audit mutex poisoned")
            .clone()
    }
}

impl AuditBridge for ScriptableAuditBridge {
    fn submit(&self, submission: &AuditSubmission) -> Result<CorrelationToken, BridgeError> {
        let mut submissions = self.submissions.lock().expect("audit mutex poisoned");
        submissions.push(submission.clone());
        Ok(CorrelationToken(format!("audit-{}", submissions.len())))
    }

    fn poll(&self, token: &CorrelationToken) -> Result<AuditPoll, BridgeError> {
        match self
            .decisions
            .lock()
            .expect("audit mutex poisoned")
            .get(&token.0)
        {
            Some(decisions) if !decisions.is_empty() => Ok(AuditPoll::Decisions(decisions.clone())),
            _ => Ok(AuditPoll::Pending),
        }
    }
}

/// Notification gateway that logs instead of sending mail.
#[derive(Default, Clone)]
pub(crate) struct LogNotifier;

impl NotificationGateway for LogNotifier {
    fn notify_reviewer(&self, link: &ShareLink, reviewer: &ReviewerId) -> Result<(), BridgeError> {
        info!(token = %link.token, %reviewer, "review request notice");
        Ok(())
    }

    fn notify_owner(&self, link: &ShareLink, notice: &OwnerNotice) -> Result<(), BridgeError> {
        info!(token = %link.token, owner = %link.owner, ?notice, "owner notice");
        Ok(())
    }
}

/// Backup gateway that logs the copy it would perform.
#[derive(Default, Clone)]
pub(crate) struct LogBackup;

impl BackupGateway for LogBackup {
    fn backup(&self, link: &ShareLink) -> Result<(), BridgeError> {
        info!(token = %link.token, path = %link.path, "backup copy stored");
        Ok(())
    }
}
