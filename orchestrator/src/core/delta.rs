//! Differences between two consecutive heartbeat samples.
//!
//! Samples are compared, never mutated. Every function here is pure so the
//! heartbeat loop can be exercised without a filesystem or git.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::rules::{ActionKind, Recommendation};
use crate::core::topology::{Observed, TopologySnapshot, WorktreeState};
use crate::core::types::SessionKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeltaKind {
    SessionAppeared,
    SessionWentInactive,
    LineageChanged,
    BranchDiverged,
    WorktreeBecameDirty,
    WorktreeBecameStale,
    RecommendationChanged,
}

impl DeltaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DeltaKind::SessionAppeared => "session-appeared",
            DeltaKind::SessionWentInactive => "session-went-inactive",
            DeltaKind::LineageChanged => "lineage-changed",
            DeltaKind::BranchDiverged => "branch-diverged",
            DeltaKind::WorktreeBecameDirty => "worktree-became-dirty",
            DeltaKind::WorktreeBecameStale => "worktree-became-stale",
            DeltaKind::RecommendationChanged => "recommendation-changed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeltaEvent {
    pub kind: DeltaKind,
    /// Session id, branch name, worktree path, or `recommendations`.
    pub subject: String,
    pub before: Option<String>,
    pub after: Option<String>,
    pub at: DateTime<Utc>,
}

/// Per-session facts the heartbeat compares between cycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub kind: SessionKind,
    pub parent_id: Option<String>,
    pub orphan: bool,
    pub active: bool,
    pub git_branch: Option<String>,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSample {
    pub at: DateTime<Utc>,
    pub sessions: BTreeMap<String, SessionState>,
}

impl SessionSample {
    pub fn active(&self) -> impl Iterator<Item = (&String, &SessionState)> {
        self.sessions.iter().filter(|(_, state)| state.active)
    }

    pub fn count_active(&self, kind: SessionKind) -> usize {
        self.active().filter(|(_, state)| state.kind == kind).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopologySample {
    pub snapshot: TopologySnapshot,
    pub recommendations: Vec<Recommendation>,
}

/// Session changes from `prev` to `next`.
///
/// A session that newly exists, or that was inactive and is active again,
/// appears. Sessions that vanish from the corpus are not reported; logs are
/// append-only, so that only happens when files are removed out of band.
pub fn diff_sessions(
    prev: &SessionSample,
    next: &SessionSample,
    at: DateTime<Utc>,
) -> Vec<DeltaEvent> {
    let mut events = Vec::new();
    for (id, after) in &next.sessions {
        let Some(before) = prev.sessions.get(id) else {
            events.push(event(
                DeltaKind::SessionAppeared,
                id,
                None,
                Some(describe_session(after)),
                at,
            ));
            continue;
        };

        match (before.active, after.active) {
            (true, false) => events.push(event(
                DeltaKind::SessionWentInactive,
                id,
                Some("active".to_string()),
                Some("inactive".to_string()),
                at,
            )),
            (false, true) => events.push(event(
                DeltaKind::SessionAppeared,
                id,
                Some("inactive".to_string()),
                Some(describe_session(after)),
                at,
            )),
            _ => {}
        }

        if before.parent_id != after.parent_id || before.orphan != after.orphan {
            events.push(event(
                DeltaKind::LineageChanged,
                id,
                Some(describe_parent(before)),
                Some(describe_parent(after)),
                at,
            ));
        }
    }
    events
}

/// Topology changes from `prev` to `next`.
///
/// Worktree events fire only on the transition into the state. The
/// recommendation set collapses into a single event when its fingerprint
/// (kind, subject, commands) changes; evidence churn alone is not a change.
pub fn diff_topology(
    prev: &TopologySample,
    next: &TopologySample,
    at: DateTime<Utc>,
) -> Vec<DeltaEvent> {
    let mut events = diff_branches(&prev.snapshot, &next.snapshot, at);
    events.extend(diff_worktrees(&prev.snapshot, &next.snapshot, at));

    if fingerprints(&prev.recommendations) != fingerprints(&next.recommendations) {
        events.push(event(
            DeltaKind::RecommendationChanged,
            "recommendations",
            Some(summarize_recommendations(&prev.recommendations)),
            Some(summarize_recommendations(&next.recommendations)),
            at,
        ));
    }
    events
}

fn diff_branches(
    prev: &TopologySnapshot,
    next: &TopologySnapshot,
    at: DateTime<Utc>,
) -> Vec<DeltaEvent> {
    // An unreadable branch list on either side carries no comparable facts.
    let (Some(before), Some(after)) = (prev.branches.value(), next.branches.value()) else {
        return Vec::new();
    };
    let before: BTreeMap<&str, String> = before
        .iter()
        .map(|b| (b.branch.as_str(), describe_divergence(&b.divergence)))
        .collect();
    let after: BTreeMap<&str, String> = after
        .iter()
        .map(|b| (b.branch.as_str(), describe_divergence(&b.divergence)))
        .collect();

    let mut names: Vec<&str> = before.keys().chain(after.keys()).copied().collect();
    names.sort_unstable();
    names.dedup();

    names
        .into_iter()
        .filter_map(|name| {
            let old = before.get(name);
            let new = after.get(name);
            (old != new).then(|| {
                event(
                    DeltaKind::BranchDiverged,
                    name,
                    old.cloned(),
                    new.cloned(),
                    at,
                )
            })
        })
        .collect()
}

fn diff_worktrees(
    prev: &TopologySnapshot,
    next: &TopologySnapshot,
    at: DateTime<Utc>,
) -> Vec<DeltaEvent> {
    let before: BTreeMap<_, _> = prev
        .worktrees()
        .iter()
        .map(|wt| (wt.path.as_path(), wt.state.value().copied()))
        .collect();

    let mut events = Vec::new();
    for wt in next.worktrees() {
        let old = before.get(wt.path.as_path()).copied().flatten();
        let new = wt.state.value().copied();
        if old == new {
            continue;
        }
        let kind = match new {
            Some(WorktreeState::Dirty) => DeltaKind::WorktreeBecameDirty,
            Some(WorktreeState::Stale) => DeltaKind::WorktreeBecameStale,
            _ => continue,
        };
        events.push(event(
            kind,
            &wt.path.display().to_string(),
            old.map(|s| s.as_str().to_string()),
            new.map(|s| s.as_str().to_string()),
            at,
        ));
    }
    events
}

fn fingerprints(recs: &[Recommendation]) -> Vec<(ActionKind, &str, &[String])> {
    recs.iter().map(Recommendation::fingerprint).collect()
}

fn summarize_recommendations(recs: &[Recommendation]) -> String {
    recs.iter()
        .map(|r| format!("{} {}", r.kind.as_str(), r.subject))
        .collect::<Vec<_>>()
        .join("; ")
}

fn describe_session(state: &SessionState) -> String {
    let mut out = state.kind.as_str().to_string();
    if state.active {
        out.push_str(" active");
    }
    if let Some(branch) = &state.git_branch {
        out.push_str(&format!(" on {branch}"));
    }
    out
}

fn describe_parent(state: &SessionState) -> String {
    match (&state.parent_id, state.orphan) {
        (None, _) => "root".to_string(),
        (Some(parent), false) => format!("parent {parent}"),
        (Some(parent), true) => format!("orphan of {parent}"),
    }
}

fn describe_divergence<T: std::fmt::Display>(observed: &Observed<T>) -> String {
    match observed {
        Observed::Known { value } => value.to_string(),
        Observed::Unknown { .. } => "unknown".to_string(),
    }
}

fn event(
    kind: DeltaKind,
    subject: &str,
    before: Option<String>,
    after: Option<String>,
    at: DateTime<Utc>,
) -> DeltaEvent {
    DeltaEvent {
        kind,
        subject: subject.to_string(),
        before,
        after,
        at,
    }
}
