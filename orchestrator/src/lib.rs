//! Read-only supervision of parallel coding-agent sessions working in one git
//! repository.
//!
//! The crate reconstructs which sessions are active and how they relate from
//! the agents' JSONL logs, analyzes branch and worktree topology with
//! read-only git queries, and turns that topology into recommended git
//! commands. It never writes to the repository or the logs. The architecture
//! keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (session table, lineage, base
//!   resolution, rules, deltas). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (log files, git subprocesses,
//!   config). Isolated behind small seams so tests can substitute fakes.
//!
//! Orchestration modules ([`monitor`], [`heartbeat`], [`render`]) combine the
//! two to implement the `session-monitor`, `git-topology`, and
//! `heartbeat-monitor` binaries.

pub mod cancel;
pub mod cli;
pub mod clock;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod heartbeat;
pub mod io;
pub mod logging;
pub mod monitor;
pub mod render;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
