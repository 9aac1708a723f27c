use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque email-like reviewer identity, normalized to lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReviewerId(String);

impl ReviewerId {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReviewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Operator joining the members of a group step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupOp {
    AnyOf,
    AllOf,
}

impl GroupOp {
    /// Wire label kept compatible with the legacy chain encoding.
    pub const fn legacy_label(self) -> &'static str {
        match self {
            GroupOp::AnyOf => "op_or",
            GroupOp::AllOf => "op_and",
        }
    }

    const fn separator(self) -> char {
        match self {
            GroupOp::AnyOf => '|',
            GroupOp::AllOf => '&',
        }
    }
}

/// One step of an approval chain: a bare reviewer or an operator-joined group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStep {
    Single(ReviewerId),
    Group {
        op: GroupOp,
        members: Vec<ReviewerId>,
    },
}

impl ApprovalStep {
    pub fn reviewers(&self) -> &[ReviewerId] {
        match self {
            ApprovalStep::Single(id) => std::slice::from_ref(id),
            ApprovalStep::Group { members, .. } => members,
        }
    }

    pub fn op(&self) -> Option<GroupOp> {
        match self {
            ApprovalStep::Single(_) => None,
            ApprovalStep::Group { op, .. } => Some(*op),
        }
    }

    pub fn contains(&self, identity: &ReviewerId) -> bool {
        self.reviewers().iter().any(|member| member == identity)
    }

    fn member_set(&self) -> BTreeSet<&ReviewerId> {
        self.reviewers().iter().collect()
    }
}

/// Directory record for a resolvable identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryUser {
    pub email: String,
    pub display_name: String,
    pub department: Option<String>,
    pub active: bool,
}

/// External user/profile lookup; the engine only needs resolution, never listing.
pub trait UserDirectory: Send + Sync {
    fn lookup(&self, identity: &str) -> Option<DirectoryUser>;
}

/// Malformed or unresolvable chain input, rejected at write time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("chain contains an empty step")]
    EmptyStep,
    #[error("'{0}' is not a valid reviewer identity")]
    InvalidIdentity(String),
    #[error("step '{0}' mixes group operators")]
    MixedOperators(String),
    #[error("'{0}' does not resolve to an active user")]
    UnresolvedUser(String),
}

/// Ordered sequence of approval steps governing a shared link.
///
/// An empty chain is valid and means "no approval required". Chains are
/// replaced wholesale by admin writes, never partially mutated, and are
/// snapshotted into per-link status rows at seed time.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApprovalChain {
    steps: Vec<ApprovalStep>,
}

impl ApprovalChain {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_steps(steps: Vec<ApprovalStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[ApprovalStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Every reviewer in step order, groups flattened.
    pub fn reviewers(&self) -> impl Iterator<Item = &ReviewerId> {
        self.steps.iter().flat_map(|step| step.reviewers().iter())
    }

    /// Parse the `a@x->b@x|c@x->d@x&e@x` text form.
    ///
    /// Steps are joined by `->`; group members by `|` (any-of) or `&`
    /// (all-of). Every identity must look like an email and resolve to an
    /// active directory user.
    pub fn parse(text: &str, directory: &dyn UserDirectory) -> Result<Self, ChainError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Self::empty());
        }

        let mut steps = Vec::new();
        for raw_step in trimmed.split("->") {
            let raw_step = raw_step.trim();
            if raw_step.is_empty() {
                return Err(ChainError::EmptyStep);
            }

            let op = match (raw_step.contains('|'), raw_step.contains('&')) {
                (true, true) => return Err(ChainError::MixedOperators(raw_step.to_string())),
                (true, false) => Some(GroupOp::AnyOf),
                (false, true) => Some(GroupOp::AllOf),
                (false, false) => None,
            };

            let members = match op {
                Some(op) => raw_step
                    .split(op.separator())
                    .map(|member| resolve_identity(member, directory))
                    .collect::<Result<Vec<_>, _>>()?,
                None => vec![resolve_identity(raw_step, directory)?],
            };

            steps.push(match op {
                Some(op) => ApprovalStep::Group { op, members },
                None => ApprovalStep::Single(
                    members.into_iter().next().ok_or(ChainError::EmptyStep)?,
                ),
            });
        }

        Ok(Self { steps })
    }

    /// Render the chain back to text.
    ///
    /// With `with_display_name = false` the output round-trips through
    /// [`ApprovalChain::parse`]. The display-name form substitutes directory
    /// names where available and is for human consumption only, never
    /// persistence.
    pub fn serialize(&self, with_display_name: bool, directory: &dyn UserDirectory) -> String {
        let render = |id: &ReviewerId| -> String {
            if with_display_name {
                match directory.lookup(id.as_str()) {
                    Some(user) if !user.display_name.is_empty() => user.display_name,
                    _ => id.as_str().to_string(),
                }
            } else {
                id.as_str().to_string()
            }
        };

        self.steps
            .iter()
            .map(|step| match step {
                ApprovalStep::Single(id) => render(id),
                ApprovalStep::Group { op, members } => members
                    .iter()
                    .map(|member| render(member))
                    .collect::<Vec<_>>()
                    .join(&op.separator().to_string()),
            })
            .collect::<Vec<_>>()
            .join("->")
    }

    /// Whether the identity appears as a bare step or inside any group step.
    pub fn contains(&self, identity: &ReviewerId) -> bool {
        self.steps.iter().any(|step| step.contains(identity))
    }

    /// Append a trailing any-of group of security reviewers.
    ///
    /// Idempotent: when the last step already carries exactly this member
    /// set (order ignored), the chain is left unchanged.
    pub fn append_security_step(&mut self, security_group: &[ReviewerId]) {
        if security_group.is_empty() {
            return;
        }

        let incoming: BTreeSet<&ReviewerId> = security_group.iter().collect();
        if let Some(last) = self.steps.last() {
            if last.member_set() == incoming {
                return;
            }
        }

        self.steps.push(ApprovalStep::Group {
            op: GroupOp::AnyOf,
            members: security_group.to_vec(),
        });
    }

    /// Drop the last step iff it is exactly this member set. Returns whether
    /// a step was removed.
    pub fn remove_security_step(&mut self, security_group: &[ReviewerId]) -> bool {
        if security_group.is_empty() {
            return false;
        }

        let incoming: BTreeSet<&ReviewerId> = security_group.iter().collect();
        match self.steps.last() {
            Some(last) if last.member_set() == incoming => {
                self.steps.pop();
                true
            }
            _ => false,
        }
    }
}

fn resolve_identity(raw: &str, directory: &dyn UserDirectory) -> Result<ReviewerId, ChainError> {
    let candidate = raw.trim();
    if candidate.is_empty() {
        return Err(ChainError::EmptyStep);
    }
    if !is_valid_identity(candidate) {
        return Err(ChainError::InvalidIdentity(candidate.to_string()));
    }

    let id = ReviewerId::new(candidate);
    match directory.lookup(id.as_str()) {
        Some(user) if user.active => Ok(id),
        _ => Err(ChainError::UnresolvedUser(id.as_str().to_string())),
    }
}

fn is_valid_identity(candidate: &str) -> bool {
    let mut parts = candidate.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty()
                && !domain.is_empty()
                && domain.contains('.')
                && !candidate.chars().any(char::is_whitespace)
        }
        _ => false,
    }
}
