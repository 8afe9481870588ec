//! Stable exit codes shared by the three orchestrator binaries.

/// Command succeeded.
pub const OK: i32 = 0;
/// Unrecoverable error: missing roots, unresolvable base branch, lineage
/// errors, or repeated sampling failures in the heartbeat loop.
pub const FAILURE: i32 = 1;
/// Invalid arguments (clap reports these with this code on its own).
pub const USAGE: i32 = 2;
