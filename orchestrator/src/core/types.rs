//! Session types shared by the log reader, the resolver, and the monitor.
//!
//! These types carry no I/O; everything here is produced from already-parsed
//! log records and must stay deterministic for a given input.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Whether a session was started by the operator or spawned by another session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Primary,
    Subagent,
}

impl SessionKind {
    /// Kind implied by the presence of a parent reference.
    pub fn from_parent(parent_id: Option<&str>) -> Self {
        match parent_id {
            Some(_) => SessionKind::Subagent,
            None => SessionKind::Primary,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionKind::Primary => "primary",
            SessionKind::Subagent => "subagent",
        }
    }

    /// One-letter marker used in compact heartbeat lines.
    pub fn marker(self) -> char {
        match self {
            SessionKind::Primary => 'p',
            SessionKind::Subagent => 's',
        }
    }
}

/// One summarized action from a session log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityEntry {
    /// Short label, e.g. `tool call exec_command` or `message assistant: ...`.
    pub label: String,
    pub at: DateTime<Utc>,
    /// What the action touched (a command, a path, a working directory), when known.
    pub target: Option<String>,
}

/// Header fields carried by the `session_meta` record of a log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMeta {
    pub created_at: DateTime<Utc>,
    pub cwd: String,
    pub git_branch: Option<String>,
    pub depth: Option<u32>,
}

/// A parsed log record attributed to a session.
///
/// The reader stamps the session id and parent id from the log header onto
/// every record, so each entry identifies exactly one session on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub session_id: String,
    pub parent_id: Option<String>,
    pub log_path: PathBuf,
    /// Position among the accepted records of the log (0-based). Stable across
    /// re-reads because logs are append-only.
    pub seq: usize,
    pub at: DateTime<Utc>,
    /// Present on the `session_meta` record only.
    pub meta: Option<SessionMeta>,
    /// `None` for bookkeeping records that still prove liveness (token counts).
    pub activity: Option<ActivityEntry>,
}

/// Everything known about one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRecord {
    pub id: String,
    pub kind: SessionKind,
    /// Recorded verbatim; resolved (or flagged orphan) by the lineage pass.
    pub parent_id: Option<String>,
    pub log_path: PathBuf,
    pub created_at: DateTime<Utc>,
    /// Never moves backwards across polls.
    pub last_activity: DateTime<Utc>,
    pub cwd: String,
    pub git_branch: Option<String>,
    pub depth: Option<u32>,
    /// Append-only, in log order.
    pub activity: Vec<ActivityEntry>,
}

impl SessionRecord {
    /// Most recent summarized action, if the session has logged any.
    pub fn latest_activity(&self) -> Option<&ActivityEntry> {
        self.activity.last()
    }

    /// First eight characters of the id, for compact output.
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }
}

pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}
