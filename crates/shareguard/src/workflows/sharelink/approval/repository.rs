use chrono::{DateTime, Utc};

use super::chain::{ApprovalChain, ReviewerId};
use super::domain::{ApprovalRow, LinkToken, RowSubject, ShareLink};

/// Error enumeration for storage failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence of department and per-user approval chains.
///
/// Chains are replaced wholesale: a write deletes the subject's previous
/// rows and inserts the new ones in a single operation.
pub trait ChainStore: Send + Sync {
    fn replace_department_chain(
        &self,
        department: &str,
        chain: ApprovalChain,
    ) -> Result<(), StoreError>;
    fn department_chain(&self, department: &str) -> Result<Option<ApprovalChain>, StoreError>;
    fn department_count(&self) -> Result<usize, StoreError>;

    fn replace_user_chain(&self, user: &str, chain: ApprovalChain) -> Result<(), StoreError>;
    fn user_chain(&self, user: &str) -> Result<Option<ApprovalChain>, StoreError>;
    fn delete_user_chain(&self, user: &str) -> Result<bool, StoreError>;
    fn user_count(&self) -> Result<usize, StoreError>;

    /// Every reviewer appearing in any stored chain.
    fn all_reviewers(&self) -> Result<Vec<ReviewerId>, StoreError>;
}

/// Persistence of per-link status rows; the orchestrator is the only writer.
pub trait ApprovalStatusStore: Send + Sync {
    /// Insert the initial rows for a link. Fails with `StoreError::Conflict`
    /// when any row already exists; seeding is exactly-once.
    fn seed(&self, link: &LinkToken, rows: Vec<ApprovalRow>) -> Result<(), StoreError>;

    fn rows(&self, link: &LinkToken) -> Result<Vec<ApprovalRow>, StoreError>;
    fn find(
        &self,
        link: &LinkToken,
        subject: &RowSubject,
    ) -> Result<Option<ApprovalRow>, StoreError>;
    fn upsert(&self, row: ApprovalRow) -> Result<(), StoreError>;

    /// Stamp the audit correlation token onto every human row of the link.
    fn set_correlation(&self, link: &LinkToken, token: &str) -> Result<(), StoreError>;

    /// Scanner rows still pending, across all links.
    fn pending_scan_rows(&self) -> Result<Vec<ApprovalRow>, StoreError>;

    /// Links with at least one pending human row, for the audit poll loop.
    fn links_with_pending_reviews(&self) -> Result<Vec<LinkToken>, StoreError>;

    /// Whether the identity has any in-flight status row.
    fn has_rows_for_reviewer(&self, reviewer: &ReviewerId) -> Result<bool, StoreError>;
}

/// The slice of the storage layer's link table this engine is allowed to
/// touch: expiry, the backup flag, and download counters.
pub trait LinkStore: Send + Sync {
    fn fetch(&self, token: &LinkToken) -> Result<Option<ShareLink>, StoreError>;
    fn insert(&self, link: ShareLink) -> Result<(), StoreError>;
    fn set_expiry(&self, token: &LinkToken, expire_at: DateTime<Utc>) -> Result<(), StoreError>;
    fn mark_backup_done(&self, token: &LinkToken) -> Result<(), StoreError>;
    fn clear_downloads(&self, token: &LinkToken) -> Result<(), StoreError>;

    /// Links whose backup flag is still unset, for the backup retry sweep.
    fn pending_backups(&self) -> Result<Vec<ShareLink>, StoreError>;
}
