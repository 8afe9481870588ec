//! Decision matrix from topology facts to recommended git actions.
//!
//! Pure and deterministic: the same snapshot and policy always produce the same
//! list. Nothing here runs git; commands are strings for the operator.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::topology::{
    BranchCategory, BranchDelta, Divergence, Observed, StatusEntry, TopologySnapshot,
    WorktreeInfo, WorktreeState,
};

/// Command fragments that discard work or history.
const DESTRUCTIVE_FRAGMENTS: &[&str] = &[
    "worktree remove",
    "reset --hard",
    "branch -D",
    "clean -f",
    "stash drop",
    "push --force",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    Rebase,
    Merge,
    CherryPick,
    Stash,
    WorktreeAdd,
    NoAction,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Rebase => "rebase",
            ActionKind::Merge => "merge",
            ActionKind::CherryPick => "cherry-pick",
            ActionKind::Stash => "stash",
            ActionKind::WorktreeAdd => "worktree-add",
            ActionKind::NoAction => "no-action",
        }
    }
}

/// Caller-supplied knobs, passed on every evaluation.
///
/// `allow_destructive` is scoped to the call it is passed to; it is never
/// remembered between evaluations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulePolicy {
    pub allow_destructive: bool,
    /// A diverged branch at least this far behind is a cherry-pick candidate.
    /// Unset means every diverged branch is rebased.
    pub cherry_pick_behind: Option<u32>,
    /// ...provided it carries at most this many commits of its own.
    pub cherry_pick_max_ahead: u32,
    /// More worktrees than this triggers reuse guidance on its own.
    pub worktree_crowding: usize,
}

impl Default for RulePolicy {
    fn default() -> Self {
        Self {
            allow_destructive: false,
            cherry_pick_behind: None,
            cherry_pick_max_ahead: 3,
            worktree_crowding: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recommendation {
    pub kind: ActionKind,
    /// Branch, worktree label, or `worktrees`/`repository` for global advice.
    pub subject: String,
    pub summary: String,
    pub commands: Vec<String>,
    /// Topology facts that triggered this outcome.
    pub evidence: BTreeMap<String, String>,
    /// Lower sorts first.
    pub priority: u32,
    /// Must be resolved before merge/rebase advice applies.
    pub blocker: bool,
}

impl Recommendation {
    fn new(kind: ActionKind, subject: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            kind,
            subject: subject.into(),
            summary: summary.into(),
            commands: Vec::new(),
            evidence: BTreeMap::new(),
            priority: priority_of(kind),
            blocker: false,
        }
    }

    fn command(mut self, command: String) -> Self {
        self.commands.push(command);
        self
    }

    fn fact(mut self, name: &str, value: impl ToString) -> Self {
        self.evidence.insert(name.to_string(), value.to_string());
        self
    }

    /// Identity used to detect a changed recommendation set (evidence excluded).
    pub fn fingerprint(&self) -> (ActionKind, &str, &[String]) {
        (self.kind, &self.subject, &self.commands)
    }

    pub fn is_destructive(&self) -> bool {
        self.commands.iter().any(|cmd| is_destructive(cmd))
    }
}

pub fn is_destructive(command: &str) -> bool {
    DESTRUCTIVE_FRAGMENTS
        .iter()
        .any(|fragment| command.contains(fragment))
}

fn priority_of(kind: ActionKind) -> u32 {
    match kind {
        ActionKind::Stash => 0,
        ActionKind::Rebase => 10,
        ActionKind::CherryPick => 15,
        ActionKind::Merge => 30,
        ActionKind::WorktreeAdd => 40,
        ActionKind::NoAction => 100,
    }
}

/// Map a snapshot through the decision matrix.
///
/// Blockers (dirty worktrees) come first, then the rest by priority with the
/// subject as tie-break.
pub fn evaluate(snapshot: &TopologySnapshot, policy: &RulePolicy) -> Vec<Recommendation> {
    let ctx = Context::new(snapshot);

    let mut blockers = dirty_worktree_blockers(&ctx);
    blockers.sort_by(|a, b| a.subject.cmp(&b.subject));

    let mut recs = Vec::new();
    match &snapshot.branches {
        Observed::Unknown { reason } => recs.push(
            Recommendation::new(
                ActionKind::NoAction,
                "branches",
                "branch divergence unknown; needs operator decision",
            )
            .fact("branches", reason),
        ),
        Observed::Known { value } => {
            for delta in value {
                if let Some(rec) = branch_recommendation(&ctx, delta, policy) {
                    recs.push(rec);
                }
            }
        }
    }
    if let Some(rec) = worktree_reuse(&ctx, policy) {
        recs.push(rec);
    }

    let mut recs: Vec<Recommendation> = recs
        .into_iter()
        .map(|rec| enforce_policy(rec, policy))
        .collect();
    recs.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.subject.cmp(&b.subject))
    });

    if blockers.is_empty() && recs.is_empty() {
        recs.push(
            Recommendation::new(
                ActionKind::NoAction,
                snapshot.base.branch.clone(),
                format!(
                    "topology looks clean; continue normal validation against {}",
                    snapshot.base.reference
                ),
            )
            .fact("base", &snapshot.base.reference),
        );
    }

    blockers.extend(recs);
    blockers
}

struct Context<'a> {
    snapshot: &'a TopologySnapshot,
    root: String,
    /// Root dirtiness when the worktree list could not be read.
    fallback_root_dirty: bool,
}

impl<'a> Context<'a> {
    fn new(snapshot: &'a TopologySnapshot) -> Self {
        let fallback_root_dirty = snapshot.worktrees.is_unknown()
            && snapshot.root_status.value().is_some_and(|s| s.dirty);
        Self {
            snapshot,
            root: display(&snapshot.repo_root),
            fallback_root_dirty,
        }
    }

    /// Directory a command touching `branch` runs in, and whether it is dirty.
    fn workdir_for(&self, branch: &str) -> (String, bool) {
        match self.snapshot.checkout_of(branch) {
            Some(wt) => (display(&wt.path), wt.is_dirty()),
            None => (self.root.clone(), self.root_is_dirty()),
        }
    }

    fn root_is_dirty(&self) -> bool {
        self.fallback_root_dirty || self.snapshot.root_dirty() == Some(true)
    }

    fn root_branch(&self) -> Option<&str> {
        self.snapshot
            .current_branch
            .value()
            .and_then(|b| b.as_deref())
    }
}

/// Rule 1: every dirty worktree gets a stash blocker.
fn dirty_worktree_blockers(ctx: &Context<'_>) -> Vec<Recommendation> {
    let mut out: Vec<Recommendation> = ctx
        .snapshot
        .worktrees()
        .iter()
        .filter(|wt| wt.is_dirty())
        .map(|wt| stash_for(wt))
        .collect();

    if ctx.fallback_root_dirty {
        let subject = ctx.root_branch().unwrap_or("(detached)").to_string();
        let changes = ctx
            .snapshot
            .root_status
            .value()
            .map(|s| s.changes.as_slice())
            .unwrap_or(&[]);
        out.push(stash_recommendation(subject, &ctx.root, changes));
    }
    out
}

fn stash_for(wt: &WorktreeInfo) -> Recommendation {
    let subject = wt.branch.clone().unwrap_or_else(|| wt.label());
    stash_recommendation(subject, &display(&wt.path), &wt.changes)
}

fn stash_recommendation(subject: String, path: &str, changes: &[StatusEntry]) -> Recommendation {
    let sample: Vec<&str> = changes.iter().take(5).map(|c| c.path.as_str()).collect();
    let mut rec = Recommendation::new(
        ActionKind::Stash,
        subject,
        "resolve the dirty worktree (commit or stash) before any merge or rebase",
    )
    .command(format!(
        "git -C {} stash push --include-untracked -m \"wip before sync\"",
        shell_quote(path)
    ))
    .fact("worktree", path)
    .fact("dirty", true)
    .fact("changed_paths", changes.len());
    if !sample.is_empty() {
        rec = rec.fact("sample_paths", sample.join(", "));
    }
    rec.blocker = true;
    rec
}

/// Rules 2-4 (and 6 for unknown divergence) for one branch.
fn branch_recommendation(
    ctx: &Context<'_>,
    delta: &BranchDelta,
    policy: &RulePolicy,
) -> Option<Recommendation> {
    let base = &ctx.snapshot.base;
    let divergence = match &delta.divergence {
        Observed::Known { value } => *value,
        Observed::Unknown { reason } => {
            return Some(
                Recommendation::new(
                    ActionKind::NoAction,
                    delta.branch.clone(),
                    "divergence from base unknown; needs operator decision",
                )
                .fact("divergence", reason),
            );
        }
    };

    let category = divergence.category();
    let (branch_dir, branch_dirty) = ctx.workdir_for(&delta.branch);
    let facts = |rec: Recommendation| with_divergence(rec, &delta.branch, base_name(ctx), divergence);

    match category {
        BranchCategory::InSync => None,
        _ if branch_dirty => None,
        BranchCategory::Diverged
            if policy
                .cherry_pick_behind
                .is_some_and(|min| divergence.behind >= min)
                && divergence.ahead <= policy.cherry_pick_max_ahead =>
        {
            let (base_dir, base_dirty) = ctx.workdir_for(&base.branch);
            if base_dirty {
                return None;
            }
            let rec = Recommendation::new(
                ActionKind::CherryPick,
                delta.branch.clone(),
                format!(
                    "branch is far behind {}; transplant its {} commit(s) instead of rebasing",
                    base.reference, divergence.ahead
                ),
            );
            let rec = switch_to_base(rec, ctx, &base_dir).command(format!(
                "git -C {} cherry-pick {}..{}",
                shell_quote(&base_dir),
                base.reference,
                delta.branch
            ));
            Some(facts(rec))
        }
        BranchCategory::Diverged => Some(facts(rebase(
            &delta.branch,
            &branch_dir,
            &base.reference,
            format!("diverged from {}: rebase before merge", base.reference),
        ))),
        BranchCategory::BehindOnly => {
            let mut rec = rebase(
                &delta.branch,
                &branch_dir,
                &base.reference,
                format!(
                    "behind {} with no local commits: fast-forward by rebasing",
                    base.reference
                ),
            );
            rec.priority = 20;
            Some(facts(rec))
        }
        BranchCategory::AheadOnly => {
            let (base_dir, base_dirty) = ctx.workdir_for(&base.branch);
            if base_dirty {
                return None;
            }
            let rec = Recommendation::new(
                ActionKind::Merge,
                delta.branch.clone(),
                format!(
                    "up to date with {} and not integrated: validate, then merge",
                    base.reference
                ),
            );
            let rec = switch_to_base(rec, ctx, &base_dir).command(format!(
                "git -C {} merge --no-ff {}",
                shell_quote(&base_dir),
                delta.branch
            ));
            Some(facts(rec))
        }
    }
}

fn rebase(branch: &str, dir: &str, base: &str, summary: String) -> Recommendation {
    Recommendation::new(ActionKind::Rebase, branch, summary)
        .command(format!("git -C {} rebase {base} {branch}", shell_quote(dir)))
}

/// Prefix a `switch` when the base is not already checked out where the command runs.
fn switch_to_base(rec: Recommendation, ctx: &Context<'_>, base_dir: &str) -> Recommendation {
    let base = &ctx.snapshot.base.branch;
    if ctx.snapshot.checkout_of(base).is_some() || ctx.root_branch() == Some(base.as_str()) {
        rec
    } else {
        rec.command(format!("git -C {} switch {base}", shell_quote(base_dir)))
    }
}

fn with_divergence(rec: Recommendation, branch: &str, base: &str, d: Divergence) -> Recommendation {
    rec.fact("branch", branch)
        .fact("base", base)
        .fact("ahead", d.ahead)
        .fact("behind", d.behind)
        .fact("category", d.category().describe())
}

fn base_name<'a>(ctx: &'a Context<'_>) -> &'a str {
    &ctx.snapshot.base.reference
}

/// Rule 5: prefer pruning/reusing worktrees over adding more.
fn worktree_reuse(ctx: &Context<'_>, policy: &RulePolicy) -> Option<Recommendation> {
    let worktrees = ctx.snapshot.worktrees();
    let prunable: Vec<&WorktreeInfo> = worktrees
        .iter()
        .filter(|wt| {
            matches!(
                wt.state.value(),
                Some(WorktreeState::Prunable | WorktreeState::Missing)
            )
        })
        .collect();
    let stale: Vec<&WorktreeInfo> = worktrees
        .iter()
        .filter(|wt| wt.state.value() == Some(&WorktreeState::Stale) && !wt.is_root)
        .collect();
    let crowded = worktrees.len() > policy.worktree_crowding;
    if prunable.is_empty() && stale.is_empty() && !crowded {
        return None;
    }

    let base = &ctx.snapshot.base.reference;
    let mut rec = Recommendation::new(
        ActionKind::WorktreeAdd,
        "worktrees",
        "reuse or prune existing worktrees before running `git worktree add`",
    )
    .fact("worktrees", worktrees.len())
    .fact("prunable", prunable.len())
    .fact("stale", stale.len());

    if !prunable.is_empty() {
        rec = rec.command(format!("git -C {} worktree prune", shell_quote(&ctx.root)));
        let paths: BTreeSet<String> = prunable.iter().map(|wt| display(&wt.path)).collect();
        rec = rec.fact("prunable_paths", paths.into_iter().collect::<Vec<_>>().join(", "));
    }
    for wt in &stale {
        let path = display(&wt.path);
        if policy.allow_destructive {
            rec = rec.command(format!(
                "git -C {} worktree remove {}",
                shell_quote(&ctx.root),
                shell_quote(&path)
            ));
        } else {
            rec = rec.command(format!(
                "git -C {} switch -c <new-branch> {base}",
                shell_quote(&path)
            ));
        }
    }
    if !stale.is_empty() {
        let labels: Vec<String> = stale.iter().map(|wt| wt.label()).collect();
        rec = rec.fact("stale_worktrees", labels.join(", "));
    }
    if rec.commands.is_empty() {
        rec = rec.command(format!("git -C {} worktree list", shell_quote(&ctx.root)));
    }
    Some(rec)
}

/// Downgrade anything destructive unless the caller opted in for this call.
fn enforce_policy(rec: Recommendation, policy: &RulePolicy) -> Recommendation {
    if policy.allow_destructive || !rec.is_destructive() {
        return rec;
    }
    let mut downgraded = Recommendation::new(
        ActionKind::NoAction,
        rec.subject.clone(),
        format!("{} (destructive step withheld; needs operator decision)", rec.summary),
    );
    downgraded.evidence = rec.evidence;
    downgraded
        .evidence
        .insert("withheld_kind".to_string(), rec.kind.as_str().to_string());
    downgraded
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

/// Single-quote `arg` for a POSIX shell unless it is made of plain path characters.
fn shell_quote(arg: &str) -> Cow<'_, str> {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+:@,=~%".contains(c));
    if plain {
        Cow::Borrowed(arg)
    } else {
        Cow::Owned(format!("'{}'", arg.replace('\'', "'\\''")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{SnapshotBuilder, status_entry};

    fn kinds(recs: &[Recommendation]) -> Vec<(ActionKind, &str)> {
        recs.iter().map(|r| (r.kind, r.subject.as_str())).collect()
    }

    #[test]
    fn diverged_clean_branch_gets_a_single_rebase_onto_main() {
        let snapshot = SnapshotBuilder::new("main")
            .branch("feature/x", 2, 3)
            .build();

        let recs = evaluate(&snapshot, &RulePolicy::default());

        assert_eq!(kinds(&recs), vec![(ActionKind::Rebase, "feature/x")]);
        let rec = &recs[0];
        assert_eq!(rec.commands, vec!["git -C /repo rebase main feature/x"]);
        assert_eq!(rec.evidence["base"], "main");
        assert_eq!(rec.evidence["ahead"], "2");
        assert_eq!(rec.evidence["behind"], "3");
    }

    #[test]
    fn dirty_branch_worktree_blocks_rebase_and_merge() {
        let snapshot = SnapshotBuilder::new("main")
            .branch("feature/x", 2, 3)
            .branch("feature/y", 1, 0)
            .worktree("/wt/x", Some("feature/x"), WorktreeState::Dirty)
            .worktree("/wt/y", Some("feature/y"), WorktreeState::Dirty)
            .build();

        let recs = evaluate(&snapshot, &RulePolicy::default());

        assert_eq!(
            kinds(&recs),
            vec![
                (ActionKind::Stash, "feature/x"),
                (ActionKind::Stash, "feature/y"),
            ]
        );
        assert!(recs.iter().all(|r| r.blocker));
    }

    #[test]
    fn dirty_root_on_base_blocks_merges_into_base() {
        let snapshot = SnapshotBuilder::new("main")
            .root_state(WorktreeState::Dirty)
            .root_changes(vec![status_entry("??", "notes.txt")])
            .branch("feature/y", 1, 0)
            .build();

        let recs = evaluate(&snapshot, &RulePolicy::default());

        assert_eq!(kinds(&recs), vec![(ActionKind::Stash, "main")]);
        assert_eq!(recs[0].evidence["sample_paths"], "notes.txt");
    }

    #[test]
    fn blockers_precede_other_recommendations() {
        let snapshot = SnapshotBuilder::new("main")
            .branch("feature/x", 2, 3)
            .branch("feature/z", 0, 4)
            .worktree("/wt/x", Some("feature/x"), WorktreeState::Clean)
            .worktree("/wt/z", Some("feature/z"), WorktreeState::Dirty)
            .build();

        let recs = evaluate(&snapshot, &RulePolicy::default());

        assert_eq!(
            kinds(&recs),
            vec![
                (ActionKind::Stash, "feature/z"),
                (ActionKind::Rebase, "feature/x"),
            ]
        );
        assert_eq!(recs[1].commands, vec!["git -C /wt/x rebase main feature/x"]);
    }

    #[test]
    fn behind_only_rebases_and_ahead_only_merges() {
        let snapshot = SnapshotBuilder::new("main")
            .branch("docs", 0, 2)
            .branch("feature/y", 3, 0)
            .build();

        let recs = evaluate(&snapshot, &RulePolicy::default());

        assert_eq!(
            kinds(&recs),
            vec![
                (ActionKind::Rebase, "docs"),
                (ActionKind::Merge, "feature/y"),
            ]
        );
        assert_eq!(recs[1].commands, vec!["git -C /repo merge --no-ff feature/y"]);
    }

    #[test]
    fn merge_switches_to_base_when_root_is_elsewhere() {
        let snapshot = SnapshotBuilder::new("main")
            .root_branch("feature/y")
            .branch("feature/y", 1, 0)
            .build();

        let recs = evaluate(&snapshot, &RulePolicy::default());

        assert_eq!(
            recs[0].commands,
            vec![
                "git -C /repo switch main",
                "git -C /repo merge --no-ff feature/y"
            ]
        );
    }

    #[test]
    fn far_behind_diverged_branch_is_rebased_by_default() {
        let snapshot = SnapshotBuilder::new("main")
            .branch("feature/x", 2, 60)
            .build();

        let recs = evaluate(&snapshot, &RulePolicy::default());

        assert_eq!(kinds(&recs), vec![(ActionKind::Rebase, "feature/x")]);
        assert_eq!(recs[0].commands, vec!["git -C /repo rebase main feature/x"]);
    }

    #[test]
    fn far_behind_small_branch_is_cherry_picked_when_enabled() {
        let snapshot = SnapshotBuilder::new("main")
            .branch("hotfix", 1, 80)
            .branch("wide", 5, 80)
            .build();
        let policy = RulePolicy {
            cherry_pick_behind: Some(50),
            ..RulePolicy::default()
        };

        let recs = evaluate(&snapshot, &policy);

        assert_eq!(
            kinds(&recs),
            vec![(ActionKind::Rebase, "wide"), (ActionKind::CherryPick, "hotfix")]
        );
        assert_eq!(
            recs[1].commands,
            vec!["git -C /repo cherry-pick main..hotfix"]
        );
    }

    #[test]
    fn in_sync_topology_yields_single_no_action() {
        let snapshot = SnapshotBuilder::new("main").branch("done", 0, 0).build();
        let recs = evaluate(&snapshot, &RulePolicy::default());
        assert_eq!(kinds(&recs), vec![(ActionKind::NoAction, "main")]);
    }

    #[test]
    fn unknown_divergence_needs_operator_decision() {
        let snapshot = SnapshotBuilder::new("main")
            .unknown_branch("broken", "git rev-list failed")
            .build();
        let recs = evaluate(&snapshot, &RulePolicy::default());
        assert_eq!(kinds(&recs), vec![(ActionKind::NoAction, "broken")]);
        assert_eq!(recs[0].evidence["divergence"], "git rev-list failed");
    }

    #[test]
    fn stale_worktrees_are_reused_not_removed_by_default() {
        let snapshot = SnapshotBuilder::new("main")
            .branch("old", 0, 5)
            .worktree("/wt/old", Some("old"), WorktreeState::Stale)
            .worktree("/wt/gone", Some("gone"), WorktreeState::Prunable)
            .build();

        let recs = evaluate(&snapshot, &RulePolicy::default());
        let reuse = recs
            .iter()
            .find(|r| r.kind == ActionKind::WorktreeAdd)
            .expect("worktree guidance");
        assert_eq!(
            reuse.commands,
            vec![
                "git -C /repo worktree prune",
                "git -C /wt/old switch -c <new-branch> main",
            ]
        );
        assert!(recs.iter().all(|r| !r.is_destructive()));
    }

    #[test]
    fn crowded_worktrees_get_listing_guidance() {
        let recs = evaluate(&crowded(11), &RulePolicy::default());

        let guidance = recs
            .iter()
            .find(|r| r.kind == ActionKind::WorktreeAdd)
            .expect("worktree guidance");
        assert_eq!(guidance.commands, vec!["git -C /repo worktree list"]);

        let relaxed = RulePolicy {
            worktree_crowding: 20,
            ..RulePolicy::default()
        };
        let recs = evaluate(&crowded(11), &relaxed);
        assert!(recs.iter().all(|r| r.kind != ActionKind::WorktreeAdd));
    }

    fn crowded(count: usize) -> TopologySnapshot {
        (0..count)
            .fold(SnapshotBuilder::new("main"), |b, n| {
                b.worktree(&format!("/wt/w{n}"), None, WorktreeState::Clean)
            })
            .build()
    }

    #[test]
    fn paths_with_spaces_are_quoted_in_commands() {
        let snapshot = SnapshotBuilder::new("main")
            .branch("feat", 1, 2)
            .branch("old", 0, 5)
            .worktree("/wt/my feat", Some("feat"), WorktreeState::Dirty)
            .worktree("/wt/it's old", Some("old"), WorktreeState::Stale)
            .build();
        let policy = RulePolicy {
            allow_destructive: true,
            ..RulePolicy::default()
        };

        let recs = evaluate(&snapshot, &policy);
        let commands: Vec<&str> = recs
            .iter()
            .flat_map(|r| r.commands.iter().map(String::as_str))
            .collect();
        assert!(commands.contains(
            &"git -C '/wt/my feat' stash push --include-untracked -m \"wip before sync\""
        ));
        assert!(commands.contains(&"git -C /repo worktree remove '/wt/it'\\''s old'"));
        assert_eq!(shell_quote("/repo"), "/repo");
    }

    #[test]
    fn destructive_removal_requires_explicit_override() {
        let snapshot = SnapshotBuilder::new("main")
            .branch("old", 0, 5)
            .worktree("/wt/old", Some("old"), WorktreeState::Stale)
            .build();
        let policy = RulePolicy {
            allow_destructive: true,
            ..RulePolicy::default()
        };

        let recs = evaluate(&snapshot, &policy);
        let reuse = recs
            .iter()
            .find(|r| r.kind == ActionKind::WorktreeAdd)
            .expect("worktree guidance");
        assert_eq!(reuse.commands, vec!["git -C /repo worktree remove /wt/old"]);
    }

    #[test]
    fn destructive_commands_are_downgraded_without_override() {
        let rec = Recommendation::new(ActionKind::WorktreeAdd, "worktrees", "clean up")
            .command("git worktree remove /wt/old".to_string());
        let downgraded = enforce_policy(rec, &RulePolicy::default());
        assert_eq!(downgraded.kind, ActionKind::NoAction);
        assert!(downgraded.commands.is_empty());
        assert_eq!(downgraded.evidence["withheld_kind"], "worktree-add");
    }

    #[test]
    fn evaluation_is_deterministic() {
        let snapshot = SnapshotBuilder::new("main")
            .branch("b", 1, 1)
            .branch("a", 1, 1)
            .branch("c", 4, 0)
            .worktree("/wt/c", Some("c"), WorktreeState::Dirty)
            .build();
        let first = evaluate(&snapshot, &RulePolicy::default());
        for _ in 0..5 {
            assert_eq!(evaluate(&snapshot, &RulePolicy::default()), first);
        }
        assert_eq!(
            kinds(&first),
            vec![
                (ActionKind::Stash, "c"),
                (ActionKind::Rebase, "a"),
                (ActionKind::Rebase, "b"),
            ]
        );
    }
}
