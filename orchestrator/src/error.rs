//! Classified failures.
//!
//! Everything else travels as `anyhow::Error` with context; these variants are
//! the ones callers match on (via `downcast_ref`) to report a component and the
//! offending input.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A project or repository root cannot be used.
    #[error("{component}: {} is not a usable {what}", path.display())]
    MissingRoot {
        component: &'static str,
        what: &'static str,
        path: PathBuf,
    },

    /// Neither the explicit selector nor any `auto` strategy produced a base ref.
    #[error(
        "topology: no base branch resolvable in {} (requested '{requested}'); pass --main-branch explicitly",
        repo.display()
    )]
    NoBaseBranch { repo: PathBuf, requested: String },

    /// A session is its own ancestor.
    #[error("lineage: cycle detected through sessions {}", ids.join(" -> "))]
    LineageCycle { ids: Vec<String> },

    /// The same session id was observed in two log files.
    #[error(
        "lineage: duplicate session id '{id}' in {} and {}",
        first.display(),
        second.display()
    )]
    DuplicateSession {
        id: String,
        first: PathBuf,
        second: PathBuf,
    },

    /// The heartbeat loop gave up after consecutive degraded cycles.
    #[error(
        "heartbeat: {failures} consecutive degraded cycles (threshold {threshold}); last error: {last}"
    )]
    SamplingFailed {
        failures: u32,
        threshold: u32,
        last: String,
    },
}
