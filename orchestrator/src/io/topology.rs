//! Builds a [`TopologySnapshot`] from read-only git queries.
//!
//! Only base resolution can fail the whole analysis. Every other sub-query is
//! folded into an [`Observed`] so one broken worktree still leaves a report.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use crate::core::base_branch::{auto_strategies, resolve_base};
use crate::core::topology::{
    BaseRef, BaseSelector, BranchCategory, BranchDelta, Observed, StatusEntry, TopologySnapshot,
    WorktreeInfo, WorktreeState, WorktreeStatus,
};
use crate::error::OrchestratorError;
use crate::io::config::GitConfig;
use crate::io::git::{Git, WorktreeEntry};

#[derive(Debug, Clone)]
pub struct TopologyAnalyzer {
    git: Git,
    root: PathBuf,
    remote: String,
    base_candidates: Vec<String>,
}

impl TopologyAnalyzer {
    /// Fails with [`OrchestratorError::MissingRoot`] unless `repo_root` is a git work tree.
    pub fn new(repo_root: &Path, config: &GitConfig) -> Result<Self> {
        let missing = || OrchestratorError::MissingRoot {
            component: "topology",
            what: "git repository",
            path: repo_root.to_path_buf(),
        };
        let root = fs::canonicalize(repo_root)
            .ok()
            .filter(|p| p.is_dir())
            .ok_or_else(missing)?;
        let git = Git::new(&root, config);
        if !git.is_work_tree() {
            return Err(missing().into());
        }
        Ok(Self {
            git,
            root,
            remote: config.remote.clone(),
            base_candidates: config.base_candidates.clone(),
        })
    }

    pub fn repo_root(&self) -> &Path {
        &self.root
    }

    #[instrument(skip_all, fields(repo = %self.root.display(), base = selector.as_str()))]
    pub fn analyze(
        &self,
        selector: &BaseSelector,
        captured_at: DateTime<Utc>,
    ) -> Result<TopologySnapshot> {
        let strategies = auto_strategies(&self.remote, &self.base_candidates);
        let base = resolve_base(&self.git, selector, &self.remote, &strategies, &self.root)?;

        let root_status =
            Observed::from_result(self.git.status_porcelain().map(WorktreeStatus::from_entries));
        let branches = Observed::from_result(self.branch_deltas(&base));
        let worktrees = match self.git.worktrees() {
            Ok(entries) => Observed::known(self.inspect_worktrees(entries, &base, &branches, &root_status)),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "worktree listing failed");
                Observed::unknown(format!("{err:#}"))
            }
        };

        let snapshot = TopologySnapshot {
            repo_root: self.root.clone(),
            captured_at,
            current_branch: Observed::from_result(self.git.current_branch()),
            status_header: Observed::from_result(self.git.status_header()),
            base,
            root_status,
            branches,
            worktrees,
        };
        debug!(
            branches = snapshot.branches.value().map_or(0, Vec::len),
            worktrees = snapshot.worktrees().len(),
            "topology captured"
        );
        Ok(snapshot)
    }

    fn branch_deltas(&self, base: &BaseRef) -> Result<Vec<BranchDelta>> {
        let branches = self.git.local_branches()?;
        Ok(branches
            .into_iter()
            .filter(|name| *name != base.branch)
            .map(|branch| {
                let divergence = self.git.divergence(&branch, &base.reference);
                if let Err(err) = &divergence {
                    warn!(%branch, err = %format!("{err:#}"), "divergence unknown");
                }
                BranchDelta {
                    divergence: Observed::from_result(divergence),
                    branch,
                }
            })
            .collect())
    }

    fn inspect_worktrees(
        &self,
        entries: Vec<WorktreeEntry>,
        base: &BaseRef,
        branches: &Observed<Vec<BranchDelta>>,
        root_status: &Observed<WorktreeStatus>,
    ) -> Vec<WorktreeInfo> {
        entries
            .into_iter()
            .filter(|entry| !entry.bare)
            .map(|entry| {
                let is_root = fs::canonicalize(&entry.path).is_ok_and(|p| p == self.root);
                let status = if is_root {
                    root_status.clone()
                } else {
                    Observed::from_result(
                        self.git
                            .for_path(&entry.path)
                            .status_porcelain()
                            .map(WorktreeStatus::from_entries),
                    )
                };
                let (state, changes) = classify(&entry, status, base, branches);
                WorktreeInfo {
                    path: entry.path,
                    branch: entry.branch,
                    detached: entry.detached,
                    is_root,
                    state,
                    changes,
                }
            })
            .collect()
    }
}

/// Worktree state from git's listing, the directory, and its status.
///
/// Stale means clean, on a branch with no commits of its own, lagging the base.
fn classify(
    entry: &WorktreeEntry,
    status: Observed<WorktreeStatus>,
    base: &BaseRef,
    branches: &Observed<Vec<BranchDelta>>,
) -> (Observed<WorktreeState>, Vec<StatusEntry>) {
    if entry.prunable {
        return (Observed::known(WorktreeState::Prunable), Vec::new());
    }
    if !entry.path.is_dir() {
        return (Observed::known(WorktreeState::Missing), Vec::new());
    }
    let status = match status {
        Observed::Known { value } => value,
        Observed::Unknown { reason } => return (Observed::Unknown { reason }, Vec::new()),
    };
    if status.dirty {
        return (Observed::known(WorktreeState::Dirty), status.changes);
    }

    let behind_only = entry
        .branch
        .as_deref()
        .filter(|branch| *branch != base.branch)
        .and_then(|branch| branches.value()?.iter().find(|b| b.branch == branch))
        .and_then(|delta| delta.divergence.value())
        .is_some_and(|d| d.category() == BranchCategory::BehindOnly);
    let state = if behind_only {
        WorktreeState::Stale
    } else {
        WorktreeState::Clean
    };
    (Observed::known(state), Vec::new())
}
