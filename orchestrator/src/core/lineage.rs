//! Parent/child forest derived from the session table.
//!
//! The forest is rebuilt from scratch on every resolution pass and holds only
//! ids, never references into the table, so a malformed corpus cannot make a
//! traversal loop forever.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;

use crate::core::resolver::SessionTable;
use crate::error::OrchestratorError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LineageTree {
    /// Primary sessions and orphaned subagents, sorted by id.
    pub roots: Vec<String>,
    /// Parent id to child ids, each list sorted by id.
    pub children: BTreeMap<String, Vec<String>>,
    /// Subagents whose parent id matches no known session.
    pub orphans: BTreeSet<String>,
}

impl LineageTree {
    /// Build the forest, rejecting duplicate ids and ancestry cycles.
    pub fn build(table: &SessionTable) -> Result<Self, OrchestratorError> {
        if let Some(dup) = table.duplicates().first() {
            return Err(OrchestratorError::DuplicateSession {
                id: dup.id.clone(),
                first: dup.first.clone(),
                second: dup.second.clone(),
            });
        }
        check_acyclic(table)?;

        let mut tree = LineageTree::default();
        for record in table.records() {
            match record.parent_id.as_deref() {
                None => tree.roots.push(record.id.clone()),
                Some(parent) if table.contains(parent) => tree
                    .children
                    .entry(parent.to_string())
                    .or_default()
                    .push(record.id.clone()),
                Some(_) => {
                    tree.orphans.insert(record.id.clone());
                    tree.roots.push(record.id.clone());
                }
            }
        }
        // Records iterate in id order, so every list is already sorted.
        Ok(tree)
    }

    pub fn children_of(&self, id: &str) -> &[String] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_orphan(&self, id: &str) -> bool {
        self.orphans.contains(id)
    }

    /// Pre-order walk of the forest as `(depth, id)` pairs.
    pub fn walk(&self) -> Vec<(usize, &str)> {
        let mut out = Vec::new();
        let mut stack: Vec<(usize, &str)> = self
            .roots
            .iter()
            .rev()
            .map(|id| (0, id.as_str()))
            .collect();
        while let Some((depth, id)) = stack.pop() {
            out.push((depth, id));
            for child in self.children_of(id).iter().rev() {
                stack.push((depth + 1, child.as_str()));
            }
        }
        out
    }
}

/// Follow each record's parent chain; a chain that revisits an id is a cycle.
fn check_acyclic(table: &SessionTable) -> Result<(), OrchestratorError> {
    let mut cleared: HashSet<&str> = HashSet::new();
    for record in table.records() {
        let mut chain: Vec<&str> = Vec::new();
        let mut current = Some(record.id.as_str());
        while let Some(id) = current {
            if cleared.contains(id) {
                break;
            }
            if let Some(pos) = chain.iter().position(|seen| *seen == id) {
                let mut ids: Vec<String> = chain[pos..].iter().map(|s| s.to_string()).collect();
                ids.push(id.to_string());
                return Err(OrchestratorError::LineageCycle { ids });
            }
            chain.push(id);
            current = table.get(id).and_then(|r| r.parent_id.as_deref());
        }
        cleared.extend(chain);
    }
    Ok(())
}
