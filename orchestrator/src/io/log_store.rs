//! Reader for the append-only session log corpus.
//!
//! Layout: `<home>/sessions/**/*.jsonl` and `<home>/archived_sessions/*.jsonl`.
//! Each line is `{"timestamp", "type", "payload"}`; the first `session_meta`
//! record names the session. Nothing here writes to the corpus.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use walkdir::WalkDir;

use crate::core::types::{ActivityEntry, LogEntry, SessionMeta};
use crate::error::OrchestratorError;

/// Longest label or target kept from a record.
const SNIPPET_LIMIT: usize = 100;

/// `--codex-home` fallback: `$CODEX_HOME`, else `~/.codex`.
pub fn default_codex_home() -> Result<PathBuf> {
    if let Some(home) = env::var_os("CODEX_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(home));
    }
    dirs::home_dir()
        .map(|home| home.join(".codex"))
        .ok_or_else(|| anyhow!("log store: cannot locate a home directory; pass --codex-home"))
}

/// Identity fields from the first usable `session_meta` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHeader {
    pub id: String,
    pub parent_id: Option<String>,
    pub meta: SessionMeta,
}

/// One parsed log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLog {
    pub path: PathBuf,
    /// `None` when no `session_meta` record has been written yet.
    pub header: Option<SessionHeader>,
    pub entries: Vec<LogEntry>,
    /// Records that were malformed or could not be attributed.
    pub anomalies: usize,
    /// The file ended mid-record and the fragment was skipped.
    pub truncated_tail: bool,
}

/// The log corpus seen from one project root.
#[derive(Debug, Clone)]
pub struct LogStore {
    home: PathBuf,
    project_root: PathBuf,
}

impl LogStore {
    /// `project_root` must be an existing directory; `home` may be missing.
    pub fn new(home: impl Into<PathBuf>, project_root: &Path) -> Result<Self> {
        let project_root = fs::canonicalize(project_root)
            .ok()
            .filter(|p| p.is_dir())
            .ok_or_else(|| OrchestratorError::MissingRoot {
                component: "session monitor",
                what: "project root",
                path: project_root.to_path_buf(),
            })?;
        Ok(Self {
            home: home.into(),
            project_root,
        })
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Candidate log files in a stable order. Missing directories yield nothing.
    pub fn log_paths(&self) -> impl Iterator<Item = PathBuf> + use<> {
        let live = WalkDir::new(self.home.join("sessions")).sort_by_file_name();
        let archived = WalkDir::new(self.home.join("archived_sessions"))
            .max_depth(1)
            .sort_by_file_name();
        live.into_iter()
            .chain(archived)
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    debug!(err = %err, "skipping unreadable corpus entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(walkdir::DirEntry::into_path)
            .filter(|path| path.extension().is_some_and(|ext| ext == "jsonl"))
    }

    /// Lazily parse every log whose session cwd lies within the project root.
    ///
    /// Logs with no header yet are passed through so callers can count them;
    /// logs from other projects are dropped. Each call starts a fresh scan.
    pub fn scan(&self) -> impl Iterator<Item = Result<SessionLog>> + '_ {
        self.log_paths().filter_map(move |path| match read_session_log(&path) {
            Ok(log) => {
                let foreign = log
                    .header
                    .as_ref()
                    .is_some_and(|h| !is_within(&self.project_root, &h.meta.cwd));
                (!foreign).then_some(Ok(log))
            }
            Err(err) => Some(Err(err)),
        })
    }
}

/// True if `cwd` is `root` or below it, comparing canonical paths when possible.
pub fn is_within(root: &Path, cwd: &str) -> bool {
    if cwd.is_empty() {
        return false;
    }
    let cwd = Path::new(cwd);
    let resolved = fs::canonicalize(cwd).unwrap_or_else(|_| cwd.to_path_buf());
    resolved.starts_with(root)
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    payload: Value,
}

/// Parse one log file.
///
/// Unparsable lines and records before the header are counted, not fatal. A
/// final line without a newline that fails to parse is a write in progress and
/// is skipped without counting.
pub fn read_session_log(path: &Path) -> Result<SessionLog> {
    let bytes = fs::read(path).with_context(|| format!("log store: read {}", path.display()))?;
    let text = String::from_utf8_lossy(&bytes);
    let complete = text.ends_with('\n');

    let mut log = SessionLog {
        path: path.to_path_buf(),
        header: None,
        entries: Vec::new(),
        anomalies: 0,
        truncated_tail: false,
    };

    let lines: Vec<&str> = text.split('\n').collect();
    let last_idx = lines.len().saturating_sub(1);
    for (idx, line) in lines.iter().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let is_tail_fragment = idx == last_idx && !complete;
        let record = match serde_json::from_str::<RawRecord>(line) {
            Ok(record) => record,
            Err(err) if is_tail_fragment => {
                debug!(path = %path.display(), err = %err, "skipping partial trailing record");
                log.truncated_tail = true;
                continue;
            }
            Err(err) => {
                debug!(path = %path.display(), line = idx + 1, err = %err, "malformed record");
                log.anomalies += 1;
                continue;
            }
        };
        if !accept_record(&mut log, record) {
            log.anomalies += 1;
        }
    }

    if log.anomalies > 0 {
        debug!(path = %path.display(), anomalies = log.anomalies, "log contains unusable records");
    }
    Ok(log)
}

/// Fold one record into `log`; `false` if it had to be dropped.
fn accept_record(log: &mut SessionLog, record: RawRecord) -> bool {
    let Some(kind) = record.kind.as_deref().filter(|k| !k.is_empty()) else {
        return false;
    };
    let payload_ts = record.payload.get("timestamp").and_then(Value::as_str);
    let Some(at) = record
        .timestamp
        .as_deref()
        .or(if kind == "session_meta" { payload_ts } else { None })
        .and_then(parse_timestamp)
    else {
        return false;
    };

    let mut meta = None;
    if log.header.is_none() {
        if kind != "session_meta" {
            return false;
        }
        let Some(header) = parse_header(&record.payload, at) else {
            return false;
        };
        meta = Some(header.meta.clone());
        log.header = Some(header);
    }
    let Some(header) = &log.header else {
        return false;
    };

    let activity = summarize(kind, &record.payload).map(|(label, target)| ActivityEntry {
        label,
        at,
        target,
    });
    log.entries.push(LogEntry {
        session_id: header.id.clone(),
        parent_id: header.parent_id.clone(),
        log_path: log.path.clone(),
        seq: log.entries.len(),
        at,
        meta,
        activity,
    });
    true
}

fn parse_header(payload: &Value, record_at: DateTime<Utc>) -> Option<SessionHeader> {
    let id = payload.get("id")?.as_str()?.trim();
    let cwd = payload.get("cwd")?.as_str()?;
    if id.is_empty() || cwd.is_empty() {
        return None;
    }
    let created_at = payload
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .unwrap_or(record_at);

    let spawn = payload.pointer("/source/subagent/thread_spawn");
    let parent_id = spawn
        .and_then(|s| s.get("parent_thread_id"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string);
    let depth = spawn
        .and_then(|s| s.get("depth"))
        .and_then(Value::as_u64)
        .and_then(|d| u32::try_from(d).ok());
    let git_branch = payload
        .pointer("/git/branch")
        .and_then(Value::as_str)
        .filter(|b| !b.is_empty())
        .map(str::to_string);

    Some(SessionHeader {
        id: id.to_string(),
        parent_id,
        meta: SessionMeta {
            created_at,
            cwd: cwd.to_string(),
            git_branch,
            depth,
        },
    })
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Activity label and target for a record; `None` for bookkeeping records.
fn summarize(kind: &str, payload: &Value) -> Option<(String, Option<String>)> {
    let field = |name: &str| payload.get(name).and_then(Value::as_str);
    let label = match kind {
        "session_meta" => {
            let cwd = field("cwd").unwrap_or_default();
            return Some((format!("session start cwd={cwd}"), Some(cwd.to_string())));
        }
        "turn_context" => {
            let cwd = field("cwd").unwrap_or_default();
            return Some((format!("turn cwd={cwd}"), Some(cwd.to_string())));
        }
        "response_item" => match field("type") {
            Some("function_call" | "custom_tool_call") => {
                let name = field("name").unwrap_or("unknown");
                return Some((format!("tool call {name}"), tool_target(payload)));
            }
            Some("function_call_output" | "custom_tool_call_output") => "tool output".to_string(),
            Some("reasoning") => "reasoning item".to_string(),
            Some("message") => {
                let role = field("role").unwrap_or("unknown");
                match message_text(payload) {
                    Some(text) => format!("message {role}: {}", truncate(&text, SNIPPET_LIMIT)),
                    None => format!("message {role}"),
                }
            }
            Some(other) => format!("response item {other}"),
            None => "response item".to_string(),
        },
        "event_msg" => match field("type") {
            Some("token_count") => return None,
            Some(other) if !other.is_empty() => format!("event {other}"),
            _ => "event message".to_string(),
        },
        other => other.to_string(),
    };
    Some((label, None))
}

/// Command or path a tool call operated on, from its JSON-encoded arguments.
fn tool_target(payload: &Value) -> Option<String> {
    let args: Value = match payload.get("arguments") {
        Some(Value::String(raw)) => serde_json::from_str(raw).ok()?,
        Some(other) => other.clone(),
        None => return None,
    };
    let target = ["cmd", "command", "path", "file_path"]
        .iter()
        .find_map(|key| match args.get(*key)? {
            Value::String(s) => Some(s.clone()),
            Value::Array(parts) => Some(
                parts
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            _ => None,
        })?;
    Some(truncate(&normalize_whitespace(&target), SNIPPET_LIMIT))
}

fn message_text(payload: &Value) -> Option<String> {
    payload
        .get("content")?
        .as_array()?
        .iter()
        .filter_map(|item| item.get("text").and_then(Value::as_str))
        .find(|text| !text.trim().is_empty())
        .map(normalize_whitespace)
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cut to `limit` characters, marking the cut with `...`.
pub fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let kept: String = text.chars().take(limit.saturating_sub(3)).collect();
    format!("{kept}...")
}
