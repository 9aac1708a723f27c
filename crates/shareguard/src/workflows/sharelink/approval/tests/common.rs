use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{Duration, Utc};
use serde_json::Value;

use crate::config::ApprovalSettings;
use crate::workflows::sharelink::approval::bridges::{
    AuditBridge, AuditPoll, AuditSubmission, BridgeError, CorrelationToken, BackupGateway,
    NotificationGateway, OwnerNotice, ScanBridge, ScanHandle, ScanTarget, ScanVerdict,
};
use crate::workflows::sharelink::approval::chain::{
    ApprovalChain, DirectoryUser, ReviewerId, UserDirectory,
};
use crate::workflows::sharelink::approval::domain::{
    ApprovalRow, LinkToken, RowSubject, ShareLink,
};
use crate::workflows::sharelink::approval::orchestrator::ApprovalOrchestrator;
use crate::workflows::sharelink::approval::policy::{ApprovalPolicy, PassthroughPolicy};
use crate::workflows::sharelink::approval::repository::{
    ApprovalStatusStore, ChainStore, LinkStore, StoreError,
};

pub(super) const OWNER: &str = "owner@corp.cn";

pub(super) fn reviewer(raw: &str) -> ReviewerId {
    ReviewerId::new(raw)
}

/// Directory with a fixed user population; everyone active unless listed.
pub(super) struct StaticDirectory {
    users: HashMap<String, DirectoryUser>,
}

impl StaticDirectory {
    pub(super) fn with_users(emails: &[&str]) -> Self {
        let mut users = HashMap::new();
        for email in emails {
            let email = email.to_ascii_lowercase();
            users.insert(
                email.clone(),
                DirectoryUser {
                    display_name: format!("User {}", email.split('@').next().unwrap_or("?")),
                    department: Some("engineering".to_string()),
                    active: true,
                    email,
                },
            );
        }
        Self { users }
    }

    pub(super) fn deactivate(&mut self, email: &str) {
        if let Some(user) = self.users.get_mut(&email.to_ascii_lowercase()) {
            user.active = false;
        }
    }
}

impl UserDirectory for StaticDirectory {
    fn lookup(&self, identity: &str) -> Option<DirectoryUser> {
        self.users.get(&identity.to_ascii_lowercase()).cloned()
    }
}

pub(super) fn directory() -> StaticDirectory {
    StaticDirectory::with_users(&[
        OWNER,
        "alice@corp.cn",
        "bob@corp.cn",
        "carol@corp.cn",
        "dave@corp.cn",
        "sec@corp.cn",
    ])
}

#[derive(Default)]
pub(super) struct MemoryChainStore {
    departments: Mutex<HashMap<String, ApprovalChain>>,
    users: Mutex<HashMap<String, ApprovalChain>>,
}

impl ChainStore for MemoryChainStore {
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
        let mut reviewers = Vec::new();
        for chain in self
            .departments
            .lock()
            .expect("chain mutex poisoned")
            .values()
            .chain(self.users.lock().expect("chain mutex poisoned").values())
        {
            reviewers.extend(chain.reviewers().cloned());
        }
        Ok(reviewers)
    }
}

#[derive(Default)]
pub(super) struct MemoryStatusStore {
    rows: Mutex<HashMap<String, Vec<ApprovalRow>>>,
}

impl MemoryStatusStore {
    pub(super) fn row(&self, link: &LinkToken, subject: &RowSubject) -> Option<ApprovalRow> {
        self.rows
            .lock()
            .expect("status mutex poisoned")
            .get(&link.0)
            .and_then(|rows| rows.iter().find(|row| &row.subject == subject).cloned())
    }
}

impl ApprovalStatusStore for MemoryStatusStore {
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
        Ok(self.row(link, subject))
    }

    fn upsert(&self, row: ApprovalRow) -> Result<(), StoreError> {
        let mut guard = self.rows.lock().expect("status mutex poisoned");
        let rows = guard.entry(row.link.0.clone()).or_default();
        match rows.iter_mut().find(|existing| existing.subject == row.subject) {
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

#[derive(Default)]
pub(super) struct MemoryLinkStore {
    links: Mutex<HashMap<String, ShareLink>>,
    downloads_cleared: Mutex<Vec<String>>,
}

impl MemoryLinkStore {
    pub(super) fn downloads_cleared(&self, token: &LinkToken) -> usize {
        self.downloads_cleared
            .lock()
            .expect("link mutex poisoned")
            .iter()
            .filter(|cleared| *cleared == &token.0)
            .count()
    }
}

impl LinkStore for MemoryLinkStore {
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

    fn set_expiry(
        &self,
        token: &LinkToken,
        expire_at: chrono::DateTime<Utc>,
    ) -> Result<(), StoreError> {
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
        self.downloads_cleared
            .lock()
            .expect("link mutex poisoned")
            .push(token.0.clone());
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

#[derive(Default)]
pub(super) struct ScriptedScanBridge {
    verdicts: Mutex<HashMap<String, ScanVerdict>>,
    submitted: Mutex<Vec<ScanTarget>>,
    fail_submit: AtomicBool,
}

impl ScriptedScanBridge {
    pub(super) fn handle_for(token: &LinkToken) -> String {
        format!("scan-{}", token.0)
    }

    pub(super) fn set_verdict(&self, token: &LinkToken, verdict: ScanVerdict) {
        self.verdicts
            .lock()
            .expect("scan mutex poisoned")
            .insert(Self::handle_for(token), verdict);
    }

    pub(super) fn fail_submissions(&self, fail: bool) {
        self.fail_submit.store(fail, Ordering::SeqCst);
    }

    pub(super) fn submissions(&self) -> Vec<ScanTarget> {
        self.submitted.lock().expect("scan mutex poisoned").clone()
    }
}

impl ScanBridge for ScriptedScanBridge {
    fn submit(&self, target: &ScanTarget) -> Result<ScanHandle, BridgeError> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(BridgeError::Unavailable("scanner offline".to_string()));
        }
        self.submitted
            .lock()
            .expect("scan mutex poisoned")
            .push(target.clone());
        Ok(ScanHandle(Self::handle_for(&target.token)))
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

#[derive(Default)]
pub(super) struct ScriptedAuditBridge {
    submissions: Mutex<Vec<AuditSubmission>>,
    results: Mutex<HashMap<String, AuditPoll>>,
    fail_submit: AtomicBool,
    sequence: AtomicUsize,
}

impl ScriptedAuditBridge {
    pub(super) fn submissions(&self) -> Vec<AuditSubmission> {
        self.submissions.lock().expect("audit mutex poisoned").clone()
    }

    pub(super) fn fail_submissions(&self, fail: bool) {
        self.fail_submit.store(fail, Ordering::SeqCst);
    }

    pub(super) fn push_result(&self, correlation: &str, poll: AuditPoll) {
        self.results
            .lock()
            .expect("audit mutex poisoned")
            .insert(correlation.to_string(), poll);
    }
}

impl AuditBridge for ScriptedAuditBridge {
    fn submit(&self, submission: &AuditSubmission) -> Result<CorrelationToken, BridgeError> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(BridgeError::Unavailable("audit offline".to_string()));
        }
        self.submissions
            .lock()
            .expect("audit mutex poisoned")
            .push(submission.clone());
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        Ok(CorrelationToken(format!("corr-{sequence}")))
    }

    fn poll(&self, token: &CorrelationToken) -> Result<AuditPoll, BridgeError> {
        Ok(self
            .results
            .lock()
            .expect("audit mutex poisoned")
            .get(&token.0)
            .cloned()
            .unwrap_or(AuditPoll::Pending))
    }
}

#[derive(Default)]
pub(super) struct RecordingNotifier {
    reviewer_notices: Mutex<Vec<(String, String)>>,
    owner_notices: Mutex<Vec<(String, OwnerNotice)>>,
}

impl RecordingNotifier {
    pub(super) fn reviewer_notices(&self) -> Vec<(String, String)> {
        self.reviewer_notices
            .lock()
            .expect("notifier mutex poisoned")
            .clone()
    }

    pub(super) fn owner_notices(&self) -> Vec<(String, OwnerNotice)> {
        self.owner_notices
            .lock()
            .expect("notifier mutex poisoned")
            .clone()
    }

    pub(super) fn terminal_notices(&self) -> Vec<OwnerNotice> {
        self.owner_notices()
            .into_iter()
            .map(|(_, notice)| notice)
            .filter(|notice| !matches!(notice, OwnerNotice::VerdictRecorded { .. }))
            .collect()
    }
}

impl NotificationGateway for RecordingNotifier {
    fn notify_reviewer(&self, link: &ShareLink, reviewer: &ReviewerId) -> Result<(), BridgeError> {
        self.reviewer_notices
            .lock()
            .expect("notifier mutex poisoned")
            .push((link.token.0.clone(), reviewer.as_str().to_string()));
        Ok(())
    }

    fn notify_owner(&self, link: &ShareLink, notice: &OwnerNotice) -> Result<(), BridgeError> {
        self.owner_notices
            .lock()
            .expect("notifier mutex poisoned")
            .push((link.token.0.clone(), notice.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub(super) struct RecordingBackup {
    copies: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl RecordingBackup {
    pub(super) fn copies(&self) -> Vec<String> {
        self.copies.lock().expect("backup mutex poisoned").clone()
    }

    pub(super) fn fail_backups(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl BackupGateway for RecordingBackup {
    fn backup(&self, link: &ShareLink) -> Result<(), BridgeError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BridgeError::Unavailable("backup library offline".to_string()));
        }
        self.copies
            .lock()
            .expect("backup mutex poisoned")
            .push(link.token.0.clone());
        Ok(())
    }
}

pub(super) type TestOrchestrator =
    ApprovalOrchestrator<MemoryChainStore, MemoryStatusStore, MemoryLinkStore>;

pub(super) struct Harness {
    pub(super) orchestrator: Arc<TestOrchestrator>,
    pub(super) chains: Arc<MemoryChainStore>,
    pub(super) statuses: Arc<MemoryStatusStore>,
    pub(super) links: Arc<MemoryLinkStore>,
    pub(super) scanner: Arc<ScriptedScanBridge>,
    pub(super) audit: Arc<ScriptedAuditBridge>,
    pub(super) notifier: Arc<RecordingNotifier>,
    pub(super) backup: Arc<RecordingBackup>,
}

pub(super) fn harness() -> Harness {
    harness_with(ApprovalSettings::default(), Arc::new(PassthroughPolicy))
}

pub(super) fn harness_with(
    settings: ApprovalSettings,
    policy: Arc<dyn ApprovalPolicy>,
) -> Harness {
    let chains = Arc::new(MemoryChainStore::default());
    let statuses = Arc::new(MemoryStatusStore::default());
    let links = Arc::new(MemoryLinkStore::default());
    let scanner = Arc::new(ScriptedScanBridge::default());
    let audit = Arc::new(ScriptedAuditBridge::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let backup = Arc::new(RecordingBackup::default());

    let orchestrator = Arc::new(ApprovalOrchestrator::new(
        chains.clone(),
        statuses.clone(),
        links.clone(),
        Arc::new(directory()),
        scanner.clone(),
        audit.clone(),
        notifier.clone(),
        backup.clone(),
        policy,
        settings,
    ));

    Harness {
        orchestrator,
        chains,
        statuses,
        links,
        scanner,
        audit,
        notifier,
        backup,
    }
}

pub(super) fn share_link(token: &str) -> ShareLink {
    let ctime = Utc::now();
    ShareLink {
        token: LinkToken(token.to_string()),
        repo_id: "repo-1".to_string(),
        path: "/reports/q3-summary.xlsx".to_string(),
        owner: OWNER.to_string(),
        ctime,
        expire_at: Some(ctime + Duration::days(7)),
        receivers: vec!["partner@example.com".to_string()],
        note: Some("quarterly numbers for the partner review".to_string()),
        backup_done: false,
    }
}

/// Insert the link record and seed its approval state.
pub(super) fn create_link(harness: &Harness, token: &str) -> ShareLink {
    let link = share_link(token);
    harness.links.insert(link.clone()).expect("link inserts");
    harness
        .orchestrator
        .on_link_created(&link)
        .expect("seeding succeeds");
    link
}

/// Store a user chain for the link owner, parsed against the fixture
/// directory.
pub(super) fn set_owner_chain(harness: &Harness, text: &str) {
    let chain =
        ApprovalChain::parse(text, &directory()).expect("fixture chain parses");
    harness
        .chains
        .replace_user_chain(OWNER, chain)
        .expect("chain stores");
}

pub(super) fn dlp_pass(harness: &Harness, token: &LinkToken) {
    harness
        .orchestrator
        .on_dlp_verdict(token, ScanVerdict::Pass)
        .expect("dlp verdict applies");
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
