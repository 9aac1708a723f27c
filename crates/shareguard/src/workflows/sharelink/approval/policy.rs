use crate::config::ApprovalSettings;

use super::chain::{ApprovalChain, ReviewerId};
use super::domain::ShareLink;

/// Deployment-specific hooks applied around chain resolution, replacing the
/// per-client conditionals of older deployments with an injected strategy.
pub trait ApprovalPolicy: Send + Sync {
    /// Adjust the resolved chain before seeding (e.g. append the company
    /// security step).
    fn amend_chain(&self, _link: &ShareLink, chain: ApprovalChain) -> ApprovalChain {
        chain
    }

    /// Skip the human chain entirely; the link then follows the scanner
    /// verdict alone.
    fn bypass_human_review(&self, _link: &ShareLink) -> bool {
        false
    }
}

/// No amendments, no bypass.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughPolicy;

impl ApprovalPolicy for PassthroughPolicy {}

/// The configured behavior: append the security reviewer step to non-empty
/// chains and honor the DMZ flag.
#[derive(Debug, Clone)]
pub struct StandardPolicy {
    security_reviewers: Vec<ReviewerId>,
    dmz_mode: bool,
}

impl StandardPolicy {
    pub fn new(security_reviewers: Vec<ReviewerId>, dmz_mode: bool) -> Self {
        Self {
            security_reviewers,
            dmz_mode,
        }
    }

    pub fn from_settings(settings: &ApprovalSettings) -> Self {
        Self::new(
            settings
                .security_reviewers
                .iter()
                .map(ReviewerId::new)
                .collect(),
            settings.dmz_mode,
        )
    }

    pub fn security_reviewers(&self) -> &[ReviewerId] {
        &self.security_reviewers
    }
}

impl ApprovalPolicy for StandardPolicy {
    fn amend_chain(&self, _link: &ShareLink, mut chain: ApprovalChain) -> ApprovalChain {
        if !chain.is_empty() {
            chain.append_security_step(&self.security_reviewers);
        }
        chain
    }

    fn bypass_human_review(&self, _link: &ShareLink) -> bool {
        self.dmz_mode
    }
}
