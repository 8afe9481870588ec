//! Session inventory, activity, and live follow over the log corpus.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::cancel::StopSignal;
use crate::clock::Clock;
use crate::core::delta::{SessionSample, SessionState};
use crate::core::lineage::LineageTree;
use crate::core::resolver::{SessionTable, is_active, recency_order};
use crate::core::types::{ActivityEntry, SessionKind, SessionRecord};
use crate::io::log_store::LogStore;

/// Counters from one pass over the corpus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshStats {
    pub logs: usize,
    pub new_entries: usize,
    /// Malformed or unattributable records, plus unreadable files.
    pub anomalies: usize,
    /// Logs with no `session_meta` record yet.
    pub pending: usize,
}

/// One session as shown by `inventory` and `follow`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionView {
    pub id: String,
    pub kind: SessionKind,
    pub parent_id: Option<String>,
    pub orphan: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub cwd: String,
    pub git_branch: Option<String>,
    pub depth: Option<u32>,
    pub log_path: PathBuf,
}

impl SessionView {
    fn new(record: &SessionRecord, orphan: bool, active: bool) -> Self {
        Self {
            id: record.id.clone(),
            kind: record.kind,
            parent_id: record.parent_id.clone(),
            orphan,
            active,
            created_at: record.created_at,
            last_activity: record.last_activity,
            cwd: record.cwd.clone(),
            git_branch: record.git_branch.clone(),
            depth: record.depth,
            log_path: record.log_path.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Inventory {
    pub project_root: PathBuf,
    pub total: usize,
    pub anomalies: usize,
    /// The `recent_n` most recently active sessions, newest first.
    pub recent: Vec<SessionView>,
    /// Every active session, newest first.
    pub active: Vec<SessionView>,
    pub lineage: LineageTree,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivitySummary {
    pub id: String,
    pub kind: SessionKind,
    pub last_activity: DateTime<Utc>,
    /// Latest labelled action; `None` if the log holds only bookkeeping so far.
    pub latest: Option<ActivityEntry>,
    pub log_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct FollowOptions {
    pub active_minutes: u32,
    pub interval: Duration,
    /// Also stream newly appended activity of active sessions.
    pub tail: bool,
    /// Stream a newly active session from its first entry instead of from
    /// the entries appended after it was seen. Implies `tail`.
    pub from_start: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "change", rename_all = "kebab-case")]
pub enum FollowUpdate {
    Added(SessionView),
    Removed { id: String },
    Activity {
        id: String,
        kind: SessionKind,
        entry: ActivityEntry,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FollowTick {
    pub iteration: u64,
    pub at: DateTime<Utc>,
    pub updates: Vec<FollowUpdate>,
}

/// Session table kept current against one project's slice of the corpus.
#[derive(Debug)]
pub struct SessionMonitor {
    store: LogStore,
    table: SessionTable,
    last_refresh: RefreshStats,
}

impl SessionMonitor {
    pub fn open(project_root: &Path, codex_home: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            store: LogStore::new(codex_home, project_root)?,
            table: SessionTable::new(),
            last_refresh: RefreshStats::default(),
        })
    }

    pub fn project_root(&self) -> &Path {
        self.store.project_root()
    }

    pub fn codex_home(&self) -> &Path {
        self.store.home()
    }

    pub fn table(&self) -> &SessionTable {
        &self.table
    }

    /// Re-read the corpus and apply entries not seen by earlier passes.
    #[instrument(skip_all)]
    pub fn refresh(&mut self) -> RefreshStats {
        let mut stats = RefreshStats::default();
        self.table.start_pass();
        for log in self.store.scan() {
            let log = match log {
                Ok(log) => log,
                Err(err) => {
                    warn!(err = %format!("{err:#}"), "skipping unreadable session log");
                    stats.anomalies += 1;
                    continue;
                }
            };
            stats.logs += 1;
            stats.anomalies += log.anomalies;
            if log.header.is_none() {
                stats.pending += 1;
                continue;
            }
            stats.new_entries += self.table.ingest(&log.entries);
        }
        debug!(
            logs = stats.logs,
            new_entries = stats.new_entries,
            anomalies = stats.anomalies,
            sessions = self.table.len(),
            "corpus refreshed"
        );
        self.last_refresh = stats;
        stats
    }

    pub fn inventory(
        &self,
        now: DateTime<Utc>,
        recent_n: usize,
        active_minutes: u32,
    ) -> Result<Inventory> {
        let lineage = LineageTree::build(&self.table)?;
        let view = |record: &SessionRecord| {
            SessionView::new(
                record,
                lineage.is_orphan(&record.id),
                is_active(now, record.last_activity, active_minutes),
            )
        };
        let recent = self.table.most_recent(recent_n).into_iter().map(view).collect();
        let active = self
            .table
            .most_recent(self.table.len())
            .into_iter()
            .filter(|r| is_active(now, r.last_activity, active_minutes))
            .map(view)
            .collect();
        Ok(Inventory {
            project_root: self.project_root().to_path_buf(),
            total: self.table.len(),
            anomalies: self.last_refresh.anomalies,
            recent,
            active,
            lineage,
        })
    }

    pub fn activity(&self, recent_n: usize) -> Vec<ActivitySummary> {
        self.table
            .most_recent(recent_n)
            .into_iter()
            .map(|record| ActivitySummary {
                id: record.id.clone(),
                kind: record.kind,
                last_activity: record.last_activity,
                latest: record.latest_activity().cloned(),
                log_path: record.log_path.clone(),
            })
            .collect()
    }

    /// Current sessions as the heartbeat compares them.
    pub fn sample(&self, now: DateTime<Utc>, active_minutes: u32) -> Result<SessionSample> {
        let lineage = LineageTree::build(&self.table)?;
        let sessions = self
            .table
            .records()
            .map(|record| {
                let state = SessionState {
                    kind: record.kind,
                    parent_id: record.parent_id.clone(),
                    orphan: lineage.is_orphan(&record.id),
                    active: is_active(now, record.last_activity, active_minutes),
                    git_branch: record.git_branch.clone(),
                    last_activity: record.last_activity,
                };
                (record.id.clone(), state)
            })
            .collect();
        Ok(SessionSample { at: now, sessions })
    }

    /// Poll until `stop` fires, reporting active-set changes each interval.
    ///
    /// The first tick reports the initial active set as additions. With
    /// `tail`, activity appended after a session was first seen is reported
    /// as well; `from_start` also replays what it logged before that.
    /// Returns the number of ticks delivered.
    pub fn follow<C, F>(
        &mut self,
        opts: &FollowOptions,
        stop: &StopSignal,
        clock: &C,
        mut on_tick: F,
    ) -> Result<u64>
    where
        C: Clock,
        F: FnMut(&FollowTick) -> Result<()>,
    {
        let mut previous: BTreeSet<String> = BTreeSet::new();
        let mut cursors: BTreeMap<String, usize> = BTreeMap::new();
        let mut iteration = 0u64;

        while !stop.is_stopped() {
            self.refresh();
            let now = clock.now();
            let mut active: Vec<&SessionRecord> = self
                .table
                .records()
                .filter(|r| is_active(now, r.last_activity, opts.active_minutes))
                .collect();
            active.sort_by(|a, b| recency_order(a, b));

            let mut updates = Vec::new();
            let current: BTreeSet<String> = active.iter().map(|r| r.id.clone()).collect();
            for record in &active {
                if !previous.contains(&record.id) {
                    let orphan = record
                        .parent_id
                        .as_deref()
                        .is_some_and(|p| !self.table.contains(p));
                    updates.push(FollowUpdate::Added(SessionView::new(record, orphan, true)));
                }
            }
            for id in previous.difference(&current) {
                updates.push(FollowUpdate::Removed { id: id.clone() });
                cursors.remove(id);
            }

            if opts.tail || opts.from_start {
                for record in &active {
                    let start = if opts.from_start { 0 } else { record.activity.len() };
                    let seen = cursors.entry(record.id.clone()).or_insert(start);
                    for entry in record.activity.iter().skip(*seen) {
                        updates.push(FollowUpdate::Activity {
                            id: record.id.clone(),
                            kind: record.kind,
                            entry: entry.clone(),
                        });
                    }
                    *seen = record.activity.len();
                }
            }

            iteration += 1;
            on_tick(&FollowTick {
                iteration,
                at: now,
                updates,
            })?;
            previous = current;

            if stop.wait(opts.interval) {
                break;
            }
        }
        debug!(iteration, "follow stopped");
        Ok(iteration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::stop_pair;
    use crate::test_support::{FixedClock, LogCorpus, at_minutes};

    fn corpus_with_two_sessions(project: &Path, corpus: &LogCorpus) {
        corpus
            .session("S1", None, project, 0)
            .activity("tool call exec_command", 55)
            .write();
        corpus
            .session("S2", Some("S1"), project, 0)
            .activity("reasoning item", 15)
            .write();
    }

    #[test]
    fn inventory_marks_liveness_and_nests_subagents() {
        let temp = tempfile::tempdir().expect("tempdir");
        let project = temp.path().join("project");
        std::fs::create_dir_all(&project).expect("mkdir");
        let corpus = LogCorpus::new(temp.path().join("codex"));
        corpus_with_two_sessions(&project, &corpus);

        let mut monitor = SessionMonitor::open(&project, corpus.home()).expect("open");
        monitor.refresh();
        let inv = monitor.inventory(at_minutes(60), 10, 30).expect("inventory");

        assert_eq!(inv.total, 2);
        let ids: Vec<(&str, bool)> = inv
            .recent
            .iter()
            .map(|s| (s.id.as_str(), s.active))
            .collect();
        assert_eq!(ids, vec![("S1", true), ("S2", false)]);
        assert_eq!(inv.active.len(), 1);
        assert_eq!(inv.lineage.children_of("S1"), ["S2".to_string()]);
    }

    #[test]
    fn activity_reports_latest_label() {
        let temp = tempfile::tempdir().expect("tempdir");
        let project = temp.path().join("project");
        std::fs::create_dir_all(&project).expect("mkdir");
        let corpus = LogCorpus::new(temp.path().join("codex"));
        corpus_with_two_sessions(&project, &corpus);

        let mut monitor = SessionMonitor::open(&project, corpus.home()).expect("open");
        monitor.refresh();
        let summaries = monitor.activity(1);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].id, "S1");
        assert_eq!(
            summaries[0].latest.as_ref().map(|a| a.label.as_str()),
            Some("tool call exec_command")
        );
    }

    #[test]
    fn refresh_only_applies_appended_entries() {
        let temp = tempfile::tempdir().expect("tempdir");
        let project = temp.path().join("project");
        std::fs::create_dir_all(&project).expect("mkdir");
        let corpus = LogCorpus::new(temp.path().join("codex"));
        let log = corpus.session("S1", None, &project, 0).activity("tool output", 1);
        log.write();

        let mut monitor = SessionMonitor::open(&project, corpus.home()).expect("open");
        assert_eq!(monitor.refresh().new_entries, 2);
        assert_eq!(monitor.refresh().new_entries, 0);

        log.activity("reasoning item", 2).write();
        assert_eq!(monitor.refresh().new_entries, 1);
        assert_eq!(
            monitor.table().get("S1").expect("S1").activity.len(),
            3
        );
    }

    #[test]
    fn archived_log_keeps_inventory_working() {
        let temp = tempfile::tempdir().expect("tempdir");
        let project = temp.path().join("project");
        std::fs::create_dir_all(&project).expect("mkdir");
        let corpus = LogCorpus::new(temp.path().join("codex"));
        let s1 = corpus.session("S1", None, &project, 0).activity("tool output", 5);
        s1.write();

        let mut monitor = SessionMonitor::open(&project, corpus.home()).expect("open");
        monitor.refresh();
        monitor.inventory(at_minutes(10), 10, 30).expect("before archive");

        let archived = corpus.archive(&s1);
        monitor.refresh();
        let inv = monitor.inventory(at_minutes(10), 10, 30).expect("after archive");

        assert_eq!(inv.total, 1);
        assert_eq!(inv.recent[0].log_path, archived);
        assert_eq!(monitor.table().get("S1").expect("S1").activity.len(), 2);
    }

    #[test]
    fn second_copy_in_one_pass_is_still_a_duplicate() {
        let temp = tempfile::tempdir().expect("tempdir");
        let project = temp.path().join("project");
        std::fs::create_dir_all(&project).expect("mkdir");
        let corpus = LogCorpus::new(temp.path().join("codex"));
        corpus.session("S1", None, &project, 0).write();

        let mut monitor = SessionMonitor::open(&project, corpus.home()).expect("open");
        monitor.refresh();
        monitor.inventory(at_minutes(1), 10, 30).expect("single copy");

        corpus.archived("S1", None, &project, 0).write();
        monitor.refresh();
        assert!(monitor.inventory(at_minutes(1), 10, 30).is_err());
    }

    #[test]
    fn follow_reports_initial_active_set_then_stops() {
        let temp = tempfile::tempdir().expect("tempdir");
        let project = temp.path().join("project");
        std::fs::create_dir_all(&project).expect("mkdir");
        let corpus = LogCorpus::new(temp.path().join("codex"));
        corpus_with_two_sessions(&project, &corpus);

        let mut monitor = SessionMonitor::open(&project, corpus.home()).expect("open");
        let (handle, signal) = stop_pair();
        let clock = FixedClock::new(at_minutes(60));
        let opts = FollowOptions {
            active_minutes: 30,
            interval: Duration::from_millis(10),
            tail: true,
            from_start: false,
        };

        let mut ticks = Vec::new();
        let delivered = monitor
            .follow(&opts, &signal, &clock, |tick| {
                ticks.push(tick.clone());
                handle.stop();
                Ok(())
            })
            .expect("follow");

        assert_eq!(delivered, 1);
        assert_eq!(ticks[0].updates.len(), 1);
        assert!(matches!(&ticks[0].updates[0], FollowUpdate::Added(view) if view.id == "S1"));
    }

    #[test]
    fn follow_tails_new_activity_and_reports_removals() {
        let temp = tempfile::tempdir().expect("tempdir");
        let project = temp.path().join("project");
        std::fs::create_dir_all(&project).expect("mkdir");
        let corpus = LogCorpus::new(temp.path().join("codex"));
        let s1 = corpus.session("S1", None, &project, 0).activity("tool output", 50);
        s1.write();

        let mut monitor = SessionMonitor::open(&project, corpus.home()).expect("open");
        let (handle, signal) = stop_pair();
        let clock = FixedClock::new(at_minutes(60));
        let opts = FollowOptions {
            active_minutes: 30,
            interval: Duration::from_millis(1),
            tail: true,
            from_start: false,
        };

        let mut ticks: Vec<FollowTick> = Vec::new();
        monitor
            .follow(&opts, &signal, &clock, |tick| {
                ticks.push(tick.clone());
                match tick.iteration {
                    1 => s1.clone().activity("reasoning item", 58).write(),
                    2 => clock.set(at_minutes(200)),
                    _ => handle.stop(),
                }
                Ok(())
            })
            .expect("follow");

        assert_eq!(ticks.len(), 3);
        assert!(matches!(
            &ticks[1].updates[..],
            [FollowUpdate::Activity { id, entry, .. }] if id == "S1" && entry.label == "reasoning item"
        ));
        assert_eq!(
            ticks[2].updates,
            vec![FollowUpdate::Removed {
                id: "S1".to_string()
            }]
        );
    }

    #[test]
    fn follow_from_start_replays_existing_entries() {
        let temp = tempfile::tempdir().expect("tempdir");
        let project = temp.path().join("project");
        std::fs::create_dir_all(&project).expect("mkdir");
        let corpus = LogCorpus::new(temp.path().join("codex"));
        corpus
            .session("S1", None, &project, 0)
            .activity("tool call exec_command", 50)
            .activity("tool output", 51)
            .write();

        let mut monitor = SessionMonitor::open(&project, corpus.home()).expect("open");
        let (handle, signal) = stop_pair();
        let clock = FixedClock::new(at_minutes(60));
        let opts = FollowOptions {
            active_minutes: 30,
            interval: Duration::from_millis(1),
            tail: false,
            from_start: true,
        };

        let mut ticks: Vec<FollowTick> = Vec::new();
        monitor
            .follow(&opts, &signal, &clock, |tick| {
                ticks.push(tick.clone());
                if tick.iteration == 2 {
                    handle.stop();
                }
                Ok(())
            })
            .expect("follow");

        let labels: Vec<&str> = ticks[0]
            .updates
            .iter()
            .filter_map(|u| match u {
                FollowUpdate::Activity { entry, .. } => Some(entry.label.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(labels.len(), 3);
        assert!(labels[0].starts_with("session start cwd="));
        assert_eq!(labels[1..], ["tool call exec_command", "tool output"]);
        assert!(ticks[1].updates.is_empty());
    }

    #[test]
    fn missing_project_root_fails_to_open() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(SessionMonitor::open(&temp.path().join("nope"), temp.path()).is_err());
    }
}
