//! Point-in-time repository topology.
//!
//! A snapshot is produced once per analysis and never mutated; changes are
//! found by comparing two snapshots.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A fact that was either observed or could not be obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Observed<T> {
    Known { value: T },
    Unknown { reason: String },
}

impl<T> Observed<T> {
    pub fn known(value: T) -> Self {
        Observed::Known { value }
    }

    pub fn unknown(reason: impl Into<String>) -> Self {
        Observed::Unknown {
            reason: reason.into(),
        }
    }

    /// Fold a sub-query result, keeping the error text as the reason.
    pub fn from_result(result: anyhow::Result<T>) -> Self {
        match result {
            Ok(value) => Observed::known(value),
            Err(err) => Observed::unknown(format!("{err:#}")),
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Observed::Known { value } => Some(value),
            Observed::Unknown { .. } => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Observed::Unknown { .. })
    }
}

/// How the caller asked for the base branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseSelector {
    Auto,
    Named(String),
}

impl BaseSelector {
    /// `auto` (any case) or blank selects automatic detection.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("auto") {
            BaseSelector::Auto
        } else {
            BaseSelector::Named(trimmed.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            BaseSelector::Auto => "auto",
            BaseSelector::Named(name) => name,
        }
    }
}

/// The resolved base the branches are compared against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BaseRef {
    /// Selector as given (`auto` or a name).
    pub requested: String,
    /// Ref used for comparisons, e.g. `main` or `origin/main`.
    pub reference: String,
    /// Branch name without the remote prefix.
    pub branch: String,
    /// Strategy that produced the ref (`explicit`, `remote-default`, ...).
    pub strategy: String,
}

/// Commit counts of a branch relative to the base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Divergence {
    /// Commits on the branch missing from the base.
    pub ahead: u32,
    /// Commits on the base missing from the branch.
    pub behind: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BranchCategory {
    InSync,
    AheadOnly,
    BehindOnly,
    Diverged,
}

impl Divergence {
    pub fn category(self) -> BranchCategory {
        match (self.ahead > 0, self.behind > 0) {
            (false, false) => BranchCategory::InSync,
            (true, false) => BranchCategory::AheadOnly,
            (false, true) => BranchCategory::BehindOnly,
            (true, true) => BranchCategory::Diverged,
        }
    }
}

impl std::fmt::Display for Divergence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "+{}/-{}", self.ahead, self.behind)
    }
}

impl BranchCategory {
    /// Operator-facing hint shown in the topology table.
    pub fn describe(self) -> &'static str {
        match self {
            BranchCategory::InSync => "in sync with base",
            BranchCategory::AheadOnly => "ahead only: candidate to merge",
            BranchCategory::BehindOnly => "stale: rebase before new work",
            BranchCategory::Diverged => "diverged: rebase before merge",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchDelta {
    pub branch: String,
    pub divergence: Observed<Divergence>,
}

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Working-tree cleanliness of the repository root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorktreeStatus {
    pub dirty: bool,
    pub changes: Vec<StatusEntry>,
}

impl WorktreeStatus {
    pub fn from_entries(changes: Vec<StatusEntry>) -> Self {
        Self {
            dirty: !changes.is_empty(),
            changes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorktreeState {
    Clean,
    Dirty,
    /// Clean, but its branch has nothing of its own and lags the base.
    Stale,
    /// Git reports the administrative entry as prunable.
    Prunable,
    /// The directory is gone but git still lists it.
    Missing,
}

impl WorktreeState {
    pub fn as_str(self) -> &'static str {
        match self {
            WorktreeState::Clean => "clean",
            WorktreeState::Dirty => "dirty",
            WorktreeState::Stale => "stale",
            WorktreeState::Prunable => "prunable",
            WorktreeState::Missing => "missing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    /// Checked-out branch; `None` when detached or bare.
    pub branch: Option<String>,
    pub detached: bool,
    /// True for the worktree at the analyzed repository root.
    pub is_root: bool,
    pub state: Observed<WorktreeState>,
    pub changes: Vec<StatusEntry>,
}

impl WorktreeInfo {
    pub fn is_dirty(&self) -> bool {
        self.state.value() == Some(&WorktreeState::Dirty)
    }

    /// `branch@path`, or `(detached)@path`.
    pub fn label(&self) -> String {
        format!(
            "{}@{}",
            self.branch.as_deref().unwrap_or("(detached)"),
            self.path.display()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopologySnapshot {
    pub repo_root: PathBuf,
    pub captured_at: DateTime<Utc>,
    pub base: BaseRef,
    /// `None` inside the observation means a detached HEAD.
    pub current_branch: Observed<Option<String>>,
    /// First line of `git status -sb` (branch and upstream tracking).
    pub status_header: Observed<String>,
    pub root_status: Observed<WorktreeStatus>,
    /// Every local branch except the base, sorted by name.
    pub branches: Observed<Vec<BranchDelta>>,
    pub worktrees: Observed<Vec<WorktreeInfo>>,
}

impl TopologySnapshot {
    pub fn branch(&self, name: &str) -> Option<&BranchDelta> {
        self.branches
            .value()
            .and_then(|branches| branches.iter().find(|b| b.branch == name))
    }

    pub fn worktrees(&self) -> &[WorktreeInfo] {
        self.worktrees.value().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Worktree that has `branch` checked out, if any.
    pub fn checkout_of(&self, branch: &str) -> Option<&WorktreeInfo> {
        self.worktrees()
            .iter()
            .find(|wt| wt.branch.as_deref() == Some(branch))
    }

    /// Root dirtiness, from the worktree list when available, else from status.
    pub fn root_dirty(&self) -> Option<bool> {
        if let Some(root) = self.worktrees().iter().find(|wt| wt.is_root)
            && let Some(state) = root.state.value()
        {
            return Some(*state == WorktreeState::Dirty);
        }
        self.root_status.value().map(|status| status.dirty)
    }

    /// Branches with local-only commits that also lag the base.
    pub fn diverged_branches(&self) -> Vec<&str> {
        self.branches
            .value()
            .map(|branches| {
                branches
                    .iter()
                    .filter(|b| {
                        b.divergence.value().map(|d| d.category())
                            == Some(BranchCategory::Diverged)
                    })
                    .map(|b| b.branch.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }
}
