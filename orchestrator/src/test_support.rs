//! Test-only fixtures: log records and corpora, topology snapshots, scripted
//! samplers, a controllable clock, and throwaway git repositories.

use std::cell::Cell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Result, anyhow};
use chrono::{DateTime, SecondsFormat, TimeDelta, TimeZone, Utc};
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::clock::Clock;
use crate::core::delta::{SessionSample, SessionState, TopologySample};
use crate::core::rules::{RulePolicy, evaluate};
use crate::core::topology::{
    BaseRef, BranchDelta, Divergence, Observed, StatusEntry, TopologySnapshot, WorktreeInfo,
    WorktreeState, WorktreeStatus,
};
use crate::core::types::{ActivityEntry, LogEntry, SessionKind, SessionMeta};
use crate::heartbeat::{CycleReport, EventSink, SessionSampler, TopologySampler};

/// `2026-01-01T00:00:00Z` plus `minutes`.
pub fn at_minutes(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
        .single()
        .expect("valid fixture date")
        + TimeDelta::minutes(minutes)
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Header entry of a session log, as the reader would produce it.
pub fn meta_entry(id: &str, parent: Option<&str>, log_path: &str, minute: i64) -> LogEntry {
    LogEntry {
        session_id: id.to_string(),
        parent_id: parent.map(str::to_string),
        log_path: PathBuf::from(log_path),
        seq: 0,
        at: at_minutes(minute),
        meta: Some(SessionMeta {
            created_at: at_minutes(minute),
            cwd: "/work".to_string(),
            git_branch: Some("main".to_string()),
            depth: parent.map(|_| 1),
        }),
        activity: None,
    }
}

pub fn activity_entry(id: &str, log_path: &str, seq: usize, label: &str, minute: i64) -> LogEntry {
    LogEntry {
        session_id: id.to_string(),
        parent_id: None,
        log_path: PathBuf::from(log_path),
        seq,
        at: at_minutes(minute),
        meta: None,
        activity: Some(ActivityEntry {
            label: label.to_string(),
            at: at_minutes(minute),
            target: None,
        }),
    }
}

/// A session on `main`, last active at minute 0.
pub fn session_state(parent: Option<&str>, active: bool) -> SessionState {
    SessionState {
        kind: SessionKind::from_parent(parent),
        parent_id: parent.map(str::to_string),
        orphan: false,
        active,
        git_branch: Some("main".to_string()),
        last_activity: at_minutes(0),
    }
}

/// Sample from `(id, parent, active)` triples.
pub fn session_sample(sessions: &[(&str, Option<&str>, bool)]) -> SessionSample {
    SessionSample {
        at: at_minutes(0),
        sessions: sessions
            .iter()
            .map(|(id, parent, active)| (id.to_string(), session_state(*parent, *active)))
            .collect(),
    }
}

/// Snapshot plus its recommendations under the default policy.
pub fn topology_sample(snapshot: TopologySnapshot) -> TopologySample {
    let recommendations = evaluate(&snapshot, &RulePolicy::default());
    TopologySample {
        snapshot,
        recommendations,
    }
}

pub fn status_entry(code: &str, path: &str) -> StatusEntry {
    StatusEntry {
        code: code.to_string(),
        path: path.to_string(),
    }
}

/// Snapshot of a repository at `/repo` whose root worktree sits on the base.
pub struct SnapshotBuilder {
    base: String,
    root_branch: Option<String>,
    root_state: WorktreeState,
    root_changes: Vec<StatusEntry>,
    branches: Vec<BranchDelta>,
    worktrees: Vec<WorktreeInfo>,
}

impl SnapshotBuilder {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.to_string(),
            root_branch: None,
            root_state: WorktreeState::Clean,
            root_changes: Vec::new(),
            branches: Vec::new(),
            worktrees: Vec::new(),
        }
    }

    pub fn branch(mut self, name: &str, ahead: u32, behind: u32) -> Self {
        self.branches.push(BranchDelta {
            branch: name.to_string(),
            divergence: Observed::known(Divergence { ahead, behind }),
        });
        self
    }

    pub fn unknown_branch(mut self, name: &str, reason: &str) -> Self {
        self.branches.push(BranchDelta {
            branch: name.to_string(),
            divergence: Observed::unknown(reason),
        });
        self
    }

    pub fn worktree(mut self, path: &str, branch: Option<&str>, state: WorktreeState) -> Self {
        let changes = if state == WorktreeState::Dirty {
            vec![status_entry(" M", "src/lib.rs")]
        } else {
            Vec::new()
        };
        self.worktrees.push(WorktreeInfo {
            path: PathBuf::from(path),
            branch: branch.map(str::to_string),
            detached: branch.is_none(),
            is_root: false,
            state: Observed::known(state),
            changes,
        });
        self
    }

    pub fn root_state(mut self, state: WorktreeState) -> Self {
        self.root_state = state;
        self
    }

    pub fn root_changes(mut self, changes: Vec<StatusEntry>) -> Self {
        self.root_changes = changes;
        self
    }

    pub fn root_branch(mut self, branch: &str) -> Self {
        self.root_branch = Some(branch.to_string());
        self
    }

    pub fn build(mut self) -> TopologySnapshot {
        let root_branch = self.root_branch.unwrap_or_else(|| self.base.clone());
        let root_status = WorktreeStatus {
            dirty: self.root_state == WorktreeState::Dirty,
            changes: self.root_changes.clone(),
        };
        let mut worktrees = vec![WorktreeInfo {
            path: PathBuf::from("/repo"),
            branch: Some(root_branch.clone()),
            detached: false,
            is_root: true,
            state: Observed::known(self.root_state),
            changes: self.root_changes,
        }];
        worktrees.extend(self.worktrees);
        self.branches.sort_by(|a, b| a.branch.cmp(&b.branch));

        TopologySnapshot {
            repo_root: PathBuf::from("/repo"),
            captured_at: at_minutes(0),
            base: BaseRef {
                requested: "auto".to_string(),
                reference: self.base.clone(),
                branch: self.base,
                strategy: "local-candidate".to_string(),
            },
            current_branch: Observed::known(Some(root_branch.clone())),
            status_header: Observed::known(root_branch),
            root_status: Observed::known(root_status),
            branches: Observed::known(self.branches),
            worktrees: Observed::known(worktrees),
        }
    }
}

/// One JSONL record line.
pub fn record_line(timestamp: &str, kind: &str, payload: Value) -> String {
    json!({"timestamp": timestamp, "type": kind, "payload": payload}).to_string()
}

/// A `session_meta` record on branch `main`; subagents get spawn depth 1.
pub fn meta_line(id: &str, parent: Option<&str>, cwd: &str, timestamp: &str) -> String {
    let mut payload = json!({
        "id": id,
        "timestamp": timestamp,
        "cwd": cwd,
        "git": {"branch": "main"},
    });
    if let Some(parent) = parent {
        payload["source"] = json!({
            "subagent": {"thread_spawn": {"parent_thread_id": parent, "depth": 1}}
        });
    }
    record_line(timestamp, "session_meta", payload)
}

/// A fake `<codex-home>` directory.
pub struct LogCorpus {
    home: PathBuf,
}

impl LogCorpus {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// A live session log under `sessions/2026/01/01/`.
    pub fn session(&self, id: &str, parent: Option<&str>, cwd: &Path, minute: i64) -> LogFixture {
        let dir = self.home.join("sessions/2026/01/01");
        LogFixture::new(dir.join(format!("rollout-{id}.jsonl")), id, parent, cwd, minute)
    }

    pub fn archived(&self, id: &str, parent: Option<&str>, cwd: &Path, minute: i64) -> LogFixture {
        let dir = self.home.join("archived_sessions");
        LogFixture::new(dir.join(format!("rollout-{id}.jsonl")), id, parent, cwd, minute)
    }

    /// Move a written log into `archived_sessions/`, as the agent does when a
    /// session is archived. Returns the new path.
    pub fn archive(&self, log: &LogFixture) -> PathBuf {
        let dir = self.home.join("archived_sessions");
        fs::create_dir_all(&dir).expect("create archive dir");
        let name = log.path().file_name().expect("log file name");
        let target = dir.join(name);
        fs::rename(log.path(), &target).expect("archive log");
        target
    }
}

/// Lines of one session log; nothing touches disk until [`LogFixture::write`].
#[derive(Debug, Clone)]
pub struct LogFixture {
    path: PathBuf,
    lines: Vec<String>,
}

impl LogFixture {
    fn new(path: PathBuf, id: &str, parent: Option<&str>, cwd: &Path, minute: i64) -> Self {
        let header = meta_line(
            id,
            parent,
            &cwd.display().to_string(),
            &rfc3339(at_minutes(minute)),
        );
        Self {
            path,
            lines: vec![header],
        }
    }

    /// Append a record the reader summarizes as `label`.
    pub fn activity(mut self, label: &str, minute: i64) -> Self {
        let ts = rfc3339(at_minutes(minute));
        let line = if let Some(name) = label.strip_prefix("tool call ") {
            record_line(
                &ts,
                "response_item",
                json!({"type": "function_call", "name": name, "arguments": "{}"}),
            )
        } else {
            match label {
                "tool output" => record_line(
                    &ts,
                    "response_item",
                    json!({"type": "function_call_output", "output": "ok"}),
                ),
                "reasoning item" => {
                    record_line(&ts, "response_item", json!({"type": "reasoning"}))
                }
                other => record_line(&ts, other, json!({})),
            }
        };
        self.lines.push(line);
        self
    }

    pub fn line(mut self, raw: impl Into<String>) -> Self {
        self.lines.push(raw.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the file with every line so far.
    pub fn write(&self) {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).expect("create log dir");
        }
        let mut contents = self.lines.join("\n");
        contents.push('\n');
        fs::write(&self.path, contents).expect("write log");
    }
}

/// Clock that returns a set instant, optionally advancing by `step` per read.
#[derive(Debug)]
pub struct FixedClock {
    now: Cell<DateTime<Utc>>,
    step: TimeDelta,
}

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self::stepping(at, TimeDelta::zero())
    }

    pub fn stepping(start: DateTime<Utc>, step: TimeDelta) -> Self {
        Self {
            now: Cell::new(start),
            step,
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.now.set(at);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        let now = self.now.get();
        self.now.set(now + self.step);
        now
    }
}

/// Sampler that replays a script, then repeats a fallback sample if one is set.
pub struct Scripted<T> {
    script: VecDeque<Result<T>>,
    fallback: Option<T>,
}

pub type ScriptedSessions = Scripted<SessionSample>;
pub type ScriptedTopology = Scripted<TopologySample>;

impl<T: Clone> Scripted<T> {
    pub fn new(script: Vec<Result<T>>) -> Self {
        Self {
            script: script.into(),
            fallback: None,
        }
    }

    pub fn repeat(sample: T) -> Self {
        Self {
            script: VecDeque::new(),
            fallback: Some(sample),
        }
    }

    fn next(&mut self) -> Result<T> {
        if let Some(step) = self.script.pop_front() {
            return step;
        }
        self.fallback
            .clone()
            .ok_or_else(|| anyhow!("sampler script exhausted"))
    }
}

impl SessionSampler for Scripted<SessionSample> {
    fn sample_sessions(&mut self, now: DateTime<Utc>) -> Result<SessionSample> {
        self.next().map(|mut sample| {
            sample.at = now;
            sample
        })
    }
}

impl TopologySampler for Scripted<TopologySample> {
    fn sample_topology(&mut self, now: DateTime<Utc>) -> Result<TopologySample> {
        self.next().map(|mut sample| {
            sample.snapshot.captured_at = now;
            sample
        })
    }
}

#[derive(Debug, Default)]
pub struct CollectSink {
    pub reports: Vec<CycleReport>,
}

impl EventSink for CollectSink {
    fn emit(&mut self, report: &CycleReport) -> Result<()> {
        self.reports.push(report.clone());
        Ok(())
    }
}

/// Throwaway git repository with one commit on `initial_branch`.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Self {
        Self::init("main")
    }

    pub fn init(initial_branch: &str) -> Self {
        let repo = Self {
            dir: tempfile::tempdir().expect("tempdir"),
        };
        repo.git(&["init", "--quiet"]);
        repo.git(&[
            "symbolic-ref",
            "HEAD",
            &format!("refs/heads/{initial_branch}"),
        ]);
        repo.git(&["config", "user.email", "test@example.com"]);
        repo.git(&["config", "user.name", "test"]);
        repo.git(&["config", "commit.gpgsign", "false"]);
        repo.commit("README.md", "chore: init");
        repo
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Run git in the repository, asserting success; returns trimmed stdout.
    pub fn git(&self, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .output()
            .expect("spawn git");
        assert!(
            output.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    /// Append a line to `file` and commit it on the current branch.
    pub fn commit(&self, file: &str, message: &str) {
        let path = self.path().join(file);
        let mut contents = fs::read_to_string(&path).unwrap_or_default();
        contents.push_str(message);
        contents.push('\n');
        fs::write(&path, contents).expect("write file");
        self.git(&["add", file]);
        self.git(&["commit", "--quiet", "-m", message]);
    }

    pub fn branch(&self, name: &str) {
        self.git(&["branch", name]);
    }

    /// Commit on `branch` and return to the branch checked out before.
    pub fn commit_on(&self, branch: &str, file: &str, message: &str) {
        let previous = self.git(&["rev-parse", "--abbrev-ref", "HEAD"]);
        self.git(&["switch", "--quiet", branch]);
        self.commit(file, message);
        self.git(&["switch", "--quiet", &previous]);
    }

    pub fn add_worktree(&self, path: &Path, branch: &str) {
        let path = path.display().to_string();
        self.git(&["worktree", "add", "--quiet", &path, branch]);
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}
