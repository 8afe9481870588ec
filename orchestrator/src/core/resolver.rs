//! Session table built from parsed log entries, plus liveness.
//!
//! The table is the only stored state: lineage and liveness are recomputed
//! from it on every query.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use crate::core::types::{LogEntry, SessionKind, SessionRecord};

/// Same session id seen in two different log files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateId {
    pub id: String,
    pub first: PathBuf,
    pub second: PathBuf,
}

/// Id-keyed session records, mutated in place as logs grow.
///
/// Duplicates are judged per pass over the corpus: two files claiming one id
/// in the same pass are a duplicate, while an id that shows up under a new
/// path in a later pass (an archived log) is a relocation.
#[derive(Debug, Clone, Default)]
pub struct SessionTable {
    records: BTreeMap<String, SessionRecord>,
    /// Next unseen `seq` per session id.
    applied: BTreeMap<String, usize>,
    /// Log path each id was read from during the current pass.
    pass_paths: BTreeMap<String, PathBuf>,
    duplicates: Vec<DuplicateId>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget which paths the previous pass saw, and its duplicates.
    pub fn start_pass(&mut self) {
        self.pass_paths.clear();
        self.duplicates.clear();
    }

    /// Apply one entry, creating the record on first sight.
    ///
    /// Returns `false` when the entry was already applied by an earlier poll or
    /// belongs to a duplicate log of an already known session.
    pub fn apply(&mut self, entry: &LogEntry) -> bool {
        match self.pass_paths.get(&entry.session_id) {
            Some(first) if *first != entry.log_path => {
                let first = first.clone();
                self.record_duplicate(&entry.session_id, first, &entry.log_path);
                return false;
            }
            Some(_) => {}
            None => {
                self.pass_paths
                    .insert(entry.session_id.clone(), entry.log_path.clone());
            }
        }

        if let Some(existing) = self.records.get_mut(&entry.session_id)
            && existing.log_path != entry.log_path
        {
            debug!(
                id = %entry.session_id,
                from = %existing.log_path.display(),
                to = %entry.log_path.display(),
                "session log relocated"
            );
            existing.log_path = entry.log_path.clone();
            existing.activity.clear();
            self.applied.remove(&entry.session_id);
        }

        let next_seq = self.applied.get(&entry.session_id).copied().unwrap_or(0);
        if entry.seq < next_seq {
            return false;
        }

        let record = self
            .records
            .entry(entry.session_id.clone())
            .or_insert_with(|| new_record(entry));

        record.parent_id = entry.parent_id.clone();
        record.kind = SessionKind::from_parent(entry.parent_id.as_deref());
        if entry.at > record.last_activity {
            record.last_activity = entry.at;
        }
        if let Some(meta) = &entry.meta {
            record.created_at = meta.created_at;
            record.cwd = meta.cwd.clone();
            record.git_branch = meta.git_branch.clone();
            record.depth = meta.depth;
        }
        if let Some(activity) = &entry.activity {
            record.activity.push(activity.clone());
        }

        self.applied.insert(entry.session_id.clone(), entry.seq + 1);
        true
    }

    /// Apply a batch of entries; returns how many were new.
    pub fn ingest<'a, I>(&mut self, entries: I) -> usize
    where
        I: IntoIterator<Item = &'a LogEntry>,
    {
        entries
            .into_iter()
            .filter(|entry| self.apply(entry))
            .count()
    }

    pub fn get(&self, id: &str) -> Option<&SessionRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Records in id order.
    pub fn records(&self) -> impl Iterator<Item = &SessionRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn duplicates(&self) -> &[DuplicateId] {
        &self.duplicates
    }

    /// The `n` most recently active sessions, newest first.
    pub fn most_recent(&self, n: usize) -> Vec<&SessionRecord> {
        let mut ordered: Vec<&SessionRecord> = self.records.values().collect();
        ordered.sort_by(|a, b| recency_order(a, b));
        ordered.truncate(n);
        ordered
    }

    fn record_duplicate(&mut self, id: &str, first: PathBuf, second: &Path) {
        let known = self
            .duplicates
            .iter()
            .any(|dup| dup.id == id && dup.second == second);
        if !known {
            self.duplicates.push(DuplicateId {
                id: id.to_string(),
                first,
                second: second.to_path_buf(),
            });
        }
    }
}

/// Newest `last_activity` first; ties broken by id ascending.
pub fn recency_order(a: &SessionRecord, b: &SessionRecord) -> std::cmp::Ordering {
    b.last_activity
        .cmp(&a.last_activity)
        .then_with(|| a.id.cmp(&b.id))
}

/// A session is active iff `now - last_activity <= active_minutes`.
///
/// Activity stamped in the future (clock skew between writers) counts as active.
pub fn is_active(now: DateTime<Utc>, last_activity: DateTime<Utc>, active_minutes: u32) -> bool {
    now.signed_duration_since(last_activity) <= TimeDelta::minutes(i64::from(active_minutes))
}

fn new_record(entry: &LogEntry) -> SessionRecord {
    SessionRecord {
        id: entry.session_id.clone(),
        kind: SessionKind::from_parent(entry.parent_id.as_deref()),
        parent_id: entry.parent_id.clone(),
        log_path: entry.log_path.clone(),
        created_at: entry.at,
        last_activity: entry.at,
        cwd: String::new(),
        git_branch: None,
        depth: None,
        activity: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{activity_entry, at_minutes, meta_entry};

    #[test]
    fn first_entry_creates_primary_or_subagent_record() {
        let mut table = SessionTable::new();
        table.apply(&meta_entry("S1", None, "/logs/s1.jsonl", 0));
        table.apply(&meta_entry("S2", Some("S1"), "/logs/s2.jsonl", 0));

        assert_eq!(table.get("S1").expect("S1").kind, SessionKind::Primary);
        let s2 = table.get("S2").expect("S2");
        assert_eq!(s2.kind, SessionKind::Subagent);
        assert_eq!(s2.parent_id.as_deref(), Some("S1"));
    }

    #[test]
    fn parent_is_recorded_verbatim_even_when_unknown() {
        let mut table = SessionTable::new();
        table.apply(&meta_entry("child", Some("ghost"), "/logs/c.jsonl", 0));
        assert_eq!(
            table.get("child").expect("child").parent_id.as_deref(),
            Some("ghost")
        );
        assert!(!table.contains("ghost"));
    }

    #[test]
    fn reapplying_a_grown_log_appends_only_new_entries() {
        let mut table = SessionTable::new();
        let first_poll = vec![
            meta_entry("S1", None, "/logs/s1.jsonl", 0),
            activity_entry("S1", "/logs/s1.jsonl", 1, "tool call shell", 0),
        ];
        assert_eq!(table.ingest(&first_poll), 2);

        let mut second_poll = first_poll.clone();
        second_poll.push(activity_entry(
            "S1",
            "/logs/s1.jsonl",
            2,
            "tool output",
            3,
        ));
        assert_eq!(table.ingest(&second_poll), 1);

        let record = table.get("S1").expect("S1");
        let labels: Vec<&str> = record.activity.iter().map(|a| a.label.as_str()).collect();
        assert_eq!(labels, vec!["tool call shell", "tool output"]);
        assert_eq!(record.last_activity, at_minutes(3));
    }

    #[test]
    fn last_activity_never_moves_backwards() {
        let mut table = SessionTable::new();
        table.apply(&activity_entry("S1", "/logs/s1.jsonl", 0, "late", 10));
        table.apply(&activity_entry("S1", "/logs/s1.jsonl", 1, "early", 2));
        assert_eq!(table.get("S1").expect("S1").last_activity, at_minutes(10));
    }

    #[test]
    fn same_id_in_two_logs_is_recorded_as_duplicate() {
        let mut table = SessionTable::new();
        table.apply(&meta_entry("S1", None, "/logs/a.jsonl", 0));
        assert!(!table.apply(&meta_entry("S1", None, "/logs/b.jsonl", 0)));
        assert!(!table.apply(&meta_entry("S1", None, "/logs/b.jsonl", 0)));
        assert_eq!(
            table.duplicates(),
            &[DuplicateId {
                id: "S1".to_string(),
                first: PathBuf::from("/logs/a.jsonl"),
                second: PathBuf::from("/logs/b.jsonl"),
            }]
        );
    }

    #[test]
    fn relocated_log_is_reread_not_flagged() {
        let mut table = SessionTable::new();
        let live = vec![
            meta_entry("S1", None, "/codex/sessions/s1.jsonl", 0),
            activity_entry("S1", "/codex/sessions/s1.jsonl", 1, "tool output", 4),
        ];
        table.start_pass();
        table.ingest(&live);

        let archived: Vec<LogEntry> = live
            .iter()
            .cloned()
            .map(|mut e| {
                e.log_path = PathBuf::from("/codex/archived_sessions/s1.jsonl");
                e
            })
            .collect();
        table.start_pass();
        table.ingest(&archived);

        assert!(table.duplicates().is_empty());
        let record = table.get("S1").expect("S1");
        assert_eq!(record.log_path, PathBuf::from("/codex/archived_sessions/s1.jsonl"));
        assert_eq!(record.activity.len(), 1);
        assert_eq!(record.last_activity, at_minutes(4));
    }

    #[test]
    fn duplicates_are_judged_per_pass() {
        let mut table = SessionTable::new();
        table.start_pass();
        table.apply(&meta_entry("S1", None, "/logs/a.jsonl", 0));
        table.apply(&meta_entry("S1", None, "/logs/b.jsonl", 0));
        assert_eq!(table.duplicates().len(), 1);

        table.start_pass();
        table.apply(&meta_entry("S1", None, "/logs/a.jsonl", 0));
        assert!(table.duplicates().is_empty());
    }

    #[test]
    fn most_recent_orders_by_activity_then_id() {
        let mut table = SessionTable::new();
        table.apply(&activity_entry("b", "/logs/b.jsonl", 0, "x", 5));
        table.apply(&activity_entry("a", "/logs/a.jsonl", 0, "x", 5));
        table.apply(&activity_entry("c", "/logs/c.jsonl", 0, "x", 9));

        let ids: Vec<&str> = table
            .most_recent(10)
            .iter()
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(table.most_recent(1).len(), 1);
    }

    #[test]
    fn liveness_is_a_threshold_on_elapsed_minutes() {
        let now = at_minutes(60);
        assert!(is_active(now, at_minutes(30), 30));
        assert!(!is_active(now, at_minutes(29), 30));
        assert!(is_active(now, at_minutes(15), 45));
        assert!(is_active(now, at_minutes(61), 0));
    }
}
