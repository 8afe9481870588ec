//! Read-only git adapter for topology queries.
//!
//! Every subprocess goes through [`Git::run`], which only accepts a [`Query`].
//! `Query` has no variant for a mutating subcommand, so nothing in this crate
//! can change repository state through this module.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

use crate::core::base_branch::RefSource;
use crate::core::topology::{Divergence, StatusEntry};
use crate::io::config::GitConfig;
use crate::io::process::{CommandOutput, run_command_with_timeout};

/// The complete set of git invocations this crate can make.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Query {
    VerifyRef(String),
    SymbolicRef(String),
    AbbrevHead,
    IsWorkTree,
    LocalBranches,
    LeftRightCount { branch: String, base: String },
    StatusPorcelain,
    StatusShort,
    WorktreeList,
}

impl Query {
    fn args(&self) -> Vec<String> {
        let fixed = |args: &[&str]| -> Vec<String> { args.iter().map(|a| a.to_string()).collect() };
        match self {
            Query::VerifyRef(reference) => vec![
                "rev-parse".to_string(),
                "--verify".to_string(),
                "--quiet".to_string(),
                format!("{reference}^{{commit}}"),
            ],
            Query::SymbolicRef(remote) => vec![
                "symbolic-ref".to_string(),
                "--quiet".to_string(),
                format!("refs/remotes/{remote}/HEAD"),
            ],
            Query::AbbrevHead => fixed(&["rev-parse", "--abbrev-ref", "HEAD"]),
            Query::IsWorkTree => fixed(&["rev-parse", "--is-inside-work-tree"]),
            Query::LocalBranches => fixed(&["for-each-ref", "--format=%(refname:short)", "refs/heads"]),
            Query::LeftRightCount { branch, base } => vec![
                "rev-list".to_string(),
                "--left-right".to_string(),
                "--count".to_string(),
                format!("{branch}...{base}"),
            ],
            Query::StatusPorcelain => fixed(&["status", "--porcelain=v1", "-uall"]),
            Query::StatusShort => fixed(&["status", "-sb"]),
            Query::WorktreeList => fixed(&["worktree", "list", "--porcelain"]),
        }
    }
}

/// One record of `git worktree list --porcelain`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    pub head: Option<String>,
    /// Short branch name (`refs/heads/` stripped).
    pub branch: Option<String>,
    pub detached: bool,
    pub bare: bool,
    pub locked: bool,
    pub prunable: bool,
}

/// Wrapper for executing read-only git queries in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>, config: &GitConfig) -> Self {
        Self {
            workdir: workdir.into(),
            timeout: Duration::from_secs(config.timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Same limits, different working directory (used per worktree).
    pub fn for_path(&self, workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            ..self.clone()
        }
    }

    pub fn is_work_tree(&self) -> bool {
        self.run_capture(&Query::IsWorkTree)
            .map(|out| out.trim() == "true")
            .unwrap_or(false)
    }

    /// True if `reference` resolves to a commit.
    pub fn ref_exists(&self, reference: &str) -> Result<bool> {
        let query = Query::VerifyRef(reference.to_string());
        let out = self.run(&query)?;
        if out.status.success() {
            return Ok(true);
        }
        // `--quiet` keeps a missing ref silent; anything on stderr is a real failure.
        if !out.timed_out && out.stderr_text().is_empty() {
            return Ok(false);
        }
        Err(failure(&query, &self.workdir, &out))
    }

    /// Short name the remote `HEAD` points at, e.g. `origin/main`.
    pub fn remote_head(&self, remote: &str) -> Result<Option<String>> {
        let query = Query::SymbolicRef(remote.to_string());
        let out = self.run(&query)?;
        if !out.status.success() {
            if !out.timed_out && out.stderr_text().is_empty() {
                return Ok(None);
            }
            return Err(failure(&query, &self.workdir, &out));
        }
        let text = out.stdout_text();
        let full = text.trim();
        Ok(Some(
            full.strip_prefix("refs/remotes/").unwrap_or(full).to_string(),
        ))
    }

    /// Checked-out branch, or `None` on a detached HEAD.
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<Option<String>> {
        let out = self.run_capture(&Query::AbbrevHead)?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            debug!("detached HEAD");
            return Ok(None);
        }
        Ok(Some(name))
    }

    /// Local branch names, sorted.
    pub fn local_branches(&self) -> Result<Vec<String>> {
        let out = self.run_capture(&Query::LocalBranches)?;
        let mut branches: Vec<String> = out
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        branches.sort();
        Ok(branches)
    }

    /// Commits unique to `branch` (ahead) and to `base` (behind).
    pub fn divergence(&self, branch: &str, base: &str) -> Result<Divergence> {
        let out = self.run_capture(&Query::LeftRightCount {
            branch: branch.to_string(),
            base: base.to_string(),
        })?;
        parse_left_right(&out).with_context(|| format!("count {branch}...{base}"))
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&Query::StatusPorcelain)?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// Branch/upstream line from `git status -sb`, without the `## ` marker.
    pub fn status_header(&self) -> Result<String> {
        let out = self.run_capture(&Query::StatusShort)?;
        let first = out
            .lines()
            .next()
            .ok_or_else(|| anyhow!("git status -sb printed nothing"))?;
        Ok(first.trim_start_matches("## ").trim().to_string())
    }

    pub fn worktrees(&self) -> Result<Vec<WorktreeEntry>> {
        let out = self.run_capture(&Query::WorktreeList)?;
        parse_worktree_list(&out)
    }

    fn run_capture(&self, query: &Query) -> Result<String> {
        let out = self.run(query)?;
        if !out.status.success() || out.timed_out {
            return Err(failure(query, &self.workdir, &out));
        }
        Ok(out.stdout_text())
    }

    fn run(&self, query: &Query) -> Result<CommandOutput> {
        let args = query.args();
        debug!(workdir = %self.workdir.display(), args = %args.join(" "), "git query");
        let mut cmd = Command::new("git");
        cmd.args(&args)
            .current_dir(&self.workdir)
            .env("GIT_OPTIONAL_LOCKS", "0")
            .env("GIT_TERMINAL_PROMPT", "0");
        run_command_with_timeout(cmd, self.timeout, self.output_limit_bytes)
            .with_context(|| format!("spawn git {} in {}", args.join(" "), self.workdir.display()))
    }
}

impl RefSource for Git {
    fn ref_exists(&self, reference: &str) -> Result<bool> {
        Git::ref_exists(self, reference)
    }

    fn remote_head(&self, remote: &str) -> Result<Option<String>> {
        Git::remote_head(self, remote)
    }
}

fn failure(query: &Query, workdir: &Path, out: &CommandOutput) -> anyhow::Error {
    let args = query.args().join(" ");
    if out.timed_out {
        return anyhow!("git {args} timed out in {}", workdir.display());
    }
    anyhow!(
        "git {args} failed in {} ({}): {}",
        workdir.display(),
        out.status,
        out.stderr_text()
    )
}

fn parse_left_right(out: &str) -> Result<Divergence> {
    let mut parts = out.split_whitespace();
    let (Some(ahead), Some(behind), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(anyhow!("unexpected rev-list output: '{}'", out.trim()));
    };
    Ok(Divergence {
        ahead: ahead.parse().with_context(|| format!("ahead count '{ahead}'"))?,
        behind: behind
            .parse()
            .with_context(|| format!("behind count '{behind}'"))?,
    })
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}

fn parse_worktree_list(out: &str) -> Result<Vec<WorktreeEntry>> {
    let mut entries = Vec::new();
    let mut current: Option<WorktreeEntry> = None;
    for line in out.lines() {
        if line.trim().is_empty() {
            entries.extend(current.take());
            continue;
        }
        let (key, value) = line.split_once(' ').unwrap_or((line, ""));
        if key == "worktree" {
            entries.extend(current.take());
            current = Some(WorktreeEntry {
                path: PathBuf::from(value),
                ..WorktreeEntry::default()
            });
            continue;
        }
        let entry = current
            .as_mut()
            .ok_or_else(|| anyhow!("worktree attribute before path: '{line}'"))?;
        match key {
            "HEAD" => entry.head = Some(value.to_string()),
            "branch" => {
                entry.branch = Some(value.strip_prefix("refs/heads/").unwrap_or(value).to_string());
            }
            "detached" => entry.detached = true,
            "bare" => entry.bare = true,
            "locked" => entry.locked = true,
            "prunable" => entry.prunable = true,
            _ => debug!(line, "ignoring unknown worktree attribute"),
        }
    }
    entries.extend(current);
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_untracked_line() {
        let e = parse_status_line("?? foo.txt").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: "??".to_string(),
                path: "foo.txt".to_string()
            }
        );
    }

    #[test]
    fn parses_modified_line() {
        let e = parse_status_line(" M src/main.rs").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: " M".to_string(),
                path: "src/main.rs".to_string()
            }
        );
    }

    #[test]
    fn parses_rename_line_uses_new_path() {
        let e = parse_status_line("R  old.txt -> new.txt").expect("parse");
        assert_eq!(e.path, "new.txt");
    }

    #[test]
    fn left_right_count_maps_to_ahead_behind() {
        assert_eq!(
            parse_left_right("2\t3\n").expect("parse"),
            Divergence {
                ahead: 2,
                behind: 3
            }
        );
        assert!(parse_left_right("garbage").is_err());
        assert!(parse_left_right("1 2 3").is_err());
    }

    #[test]
    fn parses_porcelain_worktree_list() {
        let out = "\
worktree /repo
HEAD 1111111111111111111111111111111111111111
branch refs/heads/main

worktree /wt/feature
HEAD 2222222222222222222222222222222222222222
branch refs/heads/feature/x
locked

worktree /wt/gone
HEAD 3333333333333333333333333333333333333333
detached
prunable gitdir file points to non-existent location
";
        let entries = parse_worktree_list(out).expect("parse");
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].branch.as_deref(), Some("main"));
        assert_eq!(entries[1].branch.as_deref(), Some("feature/x"));
        assert!(entries[1].locked);
        assert!(entries[2].detached);
        assert!(entries[2].prunable);
        assert_eq!(entries[2].path, PathBuf::from("/wt/gone"));
    }

    #[test]
    fn every_query_is_a_read_only_subcommand() {
        let queries = [
            Query::VerifyRef("main".to_string()),
            Query::SymbolicRef("origin".to_string()),
            Query::AbbrevHead,
            Query::IsWorkTree,
            Query::LocalBranches,
            Query::LeftRightCount {
                branch: "a".to_string(),
                base: "main".to_string(),
            },
            Query::StatusPorcelain,
            Query::StatusShort,
            Query::WorktreeList,
        ];
        let read_only = ["rev-parse", "symbolic-ref", "for-each-ref", "rev-list", "status"];
        for query in &queries {
            let args = query.args();
            let allowed = read_only.contains(&args[0].as_str())
                || (args[0] == "worktree" && args[1] == "list");
            assert!(allowed, "mutating query: {args:?}");
            // symbolic-ref with a second ref argument would write.
            if args[0] == "symbolic-ref" {
                assert_eq!(args.len(), 3, "{args:?}");
            }
        }
    }
}
