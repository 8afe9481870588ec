//! Side effects: the log corpus, git subprocesses, and configuration files.

pub mod config;
pub mod git;
pub mod log_store;
pub mod process;
pub mod topology;
