//! Deterministic, pure logic shared by the monitor, the topology analyzer and
//! the heartbeat loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod base_branch;
pub mod delta;
pub mod lineage;
pub mod resolver;
pub mod rules;
pub mod topology;
pub mod types;
