//! Operator-facing output: plain-text tables and lines, or JSON.
//!
//! Everything here writes to stdout through the caller's writer; diagnostics
//! go through `tracing` instead.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::core::rules::Recommendation;
use crate::core::topology::{Observed, TopologySnapshot};
use crate::heartbeat::{CycleReport, EventSink, HeartbeatSummary};
use crate::io::log_store::truncate;
use crate::monitor::{ActivitySummary, FollowTick, FollowUpdate, Inventory, SessionView};

/// Width limit for free-text cells.
const CELL_LIMIT: usize = 90;

pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Left-aligned columns separated by ` | `, with a `-+-` rule under the header.
pub fn table(headers: &[&str], rows: &[Vec<String>]) -> String {
    if rows.is_empty() {
        return "(no rows)\n".to_string();
    }
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (idx, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(idx) {
                *width = (*width).max(cell.chars().count());
            }
        }
    }

    let line = |cells: Vec<&str>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{cell:<width$}", width = *width))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut out = line(headers.to_vec());
    out.push('\n');
    out.push_str(
        &widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    out.push('\n');
    for row in rows {
        out.push_str(&line(row.iter().map(String::as_str).collect()));
        out.push('\n');
    }
    out
}

pub fn inventory(inv: &Inventory) -> String {
    let mut out = format!(
        "Project: {}\nMatched sessions: {} (anomalies: {})\n\n",
        inv.project_root.display(),
        inv.total,
        inv.anomalies
    );
    out.push_str("Recent sessions\n");
    out.push_str(&session_table(&inv.recent));
    out.push_str(&format!("\nActive sessions: {}\n", inv.active.len()));
    out.push_str(&session_table(&inv.active));

    out.push_str("\nLineage\n");
    let walk = inv.lineage.walk();
    if walk.is_empty() {
        out.push_str("(no sessions)\n");
    }
    for (depth, id) in walk {
        let marker = if inv.lineage.is_orphan(id) {
            " (orphan)"
        } else {
            ""
        };
        out.push_str(&format!("{}{id}{marker}\n", "  ".repeat(depth)));
    }
    out
}

fn session_table(sessions: &[SessionView]) -> String {
    let rows: Vec<Vec<String>> = sessions
        .iter()
        .map(|s| {
            let parent = match (&s.parent_id, s.orphan) {
                (None, _) => "-".to_string(),
                (Some(p), false) => p.clone(),
                (Some(p), true) => format!("{p} (orphan)"),
            };
            vec![
                s.id.clone(),
                s.kind.as_str().to_string(),
                parent,
                s.git_branch.clone().unwrap_or_else(|| "-".to_string()),
                if s.active { "yes" } else { "no" }.to_string(),
                timestamp(s.last_activity),
                s.log_path.display().to_string(),
            ]
        })
        .collect();
    table(
        &[
            "session_id",
            "kind",
            "parent",
            "branch",
            "active",
            "last_activity",
            "log_path",
        ],
        &rows,
    )
}

pub fn activity(summaries: &[ActivitySummary]) -> String {
    let rows: Vec<Vec<String>> = summaries
        .iter()
        .map(|s| {
            let action = s.latest.as_ref().map_or_else(
                || "-".to_string(),
                |entry| match &entry.target {
                    Some(target) => format!("{} {target}", entry.label),
                    None => entry.label.clone(),
                },
            );
            vec![
                s.id.clone(),
                s.kind.as_str().to_string(),
                timestamp(s.last_activity),
                truncate(&action, CELL_LIMIT),
                s.log_path.display().to_string(),
            ]
        })
        .collect();
    table(
        &["session_id", "kind", "last_timestamp", "activity", "log_path"],
        &rows,
    )
}

pub fn follow_tick(tick: &FollowTick) -> String {
    let ts = timestamp(tick.at);
    let mut out = String::new();
    for update in &tick.updates {
        let line = match update {
            FollowUpdate::Added(view) => format!(
                "{ts} | added | {} | {} | branch={} | cwd={}",
                view.id,
                view.kind.as_str(),
                view.git_branch.as_deref().unwrap_or("-"),
                view.cwd
            ),
            FollowUpdate::Removed { id } => format!("{ts} | inactive | {id}"),
            FollowUpdate::Activity { id, kind, entry } => {
                let mut line = format!(
                    "{} | {} | {} | {}",
                    timestamp(entry.at),
                    id,
                    kind.as_str(),
                    truncate(&entry.label, CELL_LIMIT)
                );
                if let Some(target) = &entry.target {
                    line.push_str(&format!(" | {}", truncate(target, CELL_LIMIT)));
                }
                line
            }
        };
        out.push_str(&line);
        out.push('\n');
    }
    out
}

fn observed<T>(value: &Observed<T>, show: impl Fn(&T) -> String) -> String {
    match value {
        Observed::Known { value } => show(value),
        Observed::Unknown { reason } => format!("unknown ({reason})"),
    }
}

pub fn topology(snapshot: &TopologySnapshot, recommendations: &[Recommendation]) -> String {
    let mut out = format!(
        "Repository: {}\nBase: {} (requested {}, via {})\nCurrent branch: {}\nStatus: {}\nRoot dirty: {}\n",
        snapshot.repo_root.display(),
        snapshot.base.reference,
        snapshot.base.requested,
        snapshot.base.strategy,
        observed(&snapshot.current_branch, |b| b
            .clone()
            .unwrap_or_else(|| "(detached)".to_string())),
        observed(&snapshot.status_header, Clone::clone),
        snapshot
            .root_dirty()
            .map_or_else(|| "unknown".to_string(), |d| d.to_string()),
    );

    out.push_str("\nBranches\n");
    match &snapshot.branches {
        Observed::Known { value } => {
            let rows: Vec<Vec<String>> = value
                .iter()
                .map(|b| match &b.divergence {
                    Observed::Known { value: d } => vec![
                        b.branch.clone(),
                        d.ahead.to_string(),
                        d.behind.to_string(),
                        d.category().describe().to_string(),
                    ],
                    Observed::Unknown { reason } => vec![
                        b.branch.clone(),
                        "?".to_string(),
                        "?".to_string(),
                        format!("unknown ({})", truncate(reason, CELL_LIMIT)),
                    ],
                })
                .collect();
            out.push_str(&table(&["branch", "ahead", "behind", "state"], &rows));
        }
        Observed::Unknown { reason } => out.push_str(&format!("unknown ({reason})\n")),
    }

    out.push_str("\nWorktrees\n");
    match &snapshot.worktrees {
        Observed::Known { value } => {
            let rows: Vec<Vec<String>> = value
                .iter()
                .map(|wt| {
                    let mut path = wt.path.display().to_string();
                    if wt.is_root {
                        path.push_str(" (root)");
                    }
                    vec![
                        path,
                        wt.branch.clone().unwrap_or_else(|| "(detached)".to_string()),
                        observed(&wt.state, |s| s.as_str().to_string()),
                        wt.changes.len().to_string(),
                    ]
                })
                .collect();
            out.push_str(&table(&["path", "branch", "state", "changes"], &rows));
        }
        Observed::Unknown { reason } => out.push_str(&format!("unknown ({reason})\n")),
    }

    out.push_str("\nRecommendations\n");
    out.push_str(&recommendation_list(recommendations));
    out
}

fn recommendation_list(recommendations: &[Recommendation]) -> String {
    let mut out = String::new();
    for (idx, rec) in recommendations.iter().enumerate() {
        let blocker = if rec.blocker { " [blocker]" } else { "" };
        out.push_str(&format!(
            "{}. [{}] {}{blocker}: {}\n",
            idx + 1,
            rec.kind.as_str(),
            rec.subject,
            rec.summary
        ));
        for command in &rec.commands {
            out.push_str(&format!("     $ {command}\n"));
        }
        if !rec.evidence.is_empty() {
            let facts: Vec<String> = rec
                .evidence
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            out.push_str(&format!("     evidence: {}\n", facts.join(", ")));
        }
    }
    out
}

pub fn heartbeat_summary(at: DateTime<Utc>, summary: &HeartbeatSummary) -> String {
    let ts = timestamp(at);
    let root_dirty = summary
        .root_dirty
        .map_or_else(|| "unknown".to_string(), |d| d.to_string());
    let hot = if summary.hot.is_empty() {
        "none".to_string()
    } else {
        summary
            .hot
            .iter()
            .map(|s| s.compact())
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!(
        "{ts} | heartbeat | active={} | primary={} | subagent={} | base={} | root_dirty={root_dirty} | dirty_worktrees={} | diverged={}\n{ts} | heartbeat.sessions | {hot}\n",
        summary.active,
        summary.primary,
        summary.subagent,
        summary.base.as_deref().unwrap_or("unknown"),
        summary.dirty_worktrees,
        summary.diverged,
    )
}

/// Plain-text lines for one heartbeat cycle.
pub fn cycle_report(report: &CycleReport) -> String {
    let ts = timestamp(report.at);
    let mut out = String::new();
    for degraded in &report.degraded {
        out.push_str(&format!(
            "{ts} | degraded | {} | {}\n",
            degraded.side.as_str(),
            degraded.error
        ));
    }
    for event in &report.events {
        out.push_str(&format!(
            "{ts} | delta.{} | {} | {} -> {}\n",
            event.kind.as_str(),
            event.subject,
            event.before.as_deref().unwrap_or("-"),
            event.after.as_deref().unwrap_or("-"),
        ));
    }
    if let Some(summary) = &report.heartbeat {
        out.push_str(&heartbeat_summary(report.at, summary));
    }
    out
}

/// One JSON document per line.
pub fn json_line<W: Write, T: Serialize>(out: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer(&mut *out, value).context("serialize json")?;
    writeln!(out).context("write output")?;
    out.flush().context("flush output")
}

/// Pretty JSON with a trailing newline.
pub fn json_pretty<W: Write, T: Serialize>(out: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value).context("serialize json")?;
    writeln!(out).context("write output")
}

pub struct TextSink<W> {
    out: W,
}

impl<W: Write> TextSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> EventSink for TextSink<W> {
    fn emit(&mut self, report: &CycleReport) -> Result<()> {
        let text = cycle_report(report);
        if text.is_empty() {
            return Ok(());
        }
        self.out.write_all(text.as_bytes()).context("write output")?;
        self.out.flush().context("flush output")
    }
}

pub struct JsonSink<W> {
    out: W,
}

impl<W: Write> JsonSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> EventSink for JsonSink<W> {
    fn emit(&mut self, report: &CycleReport) -> Result<()> {
        json_line(&mut self.out, report)
    }
}
