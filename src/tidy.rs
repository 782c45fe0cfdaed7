//! Reconcile the metadata store with the repository.
//!
//! Records whose branch is gone from git, or whose PR has merged, are
//! removed; their children are re-pointed at the nearest surviving tracked
//! ancestor with a freshly computed branching point. A child whose whole
//! ancestor chain disappeared is re-pointed at the trunk (it becomes a stack
//! root) and reported as orphaned. All changes land in one transaction, and
//! running tidy twice in a row is a no-op.

use anyhow::Result;
use std::collections::BTreeSet;

use crate::git_gateway::GitGateway;
use crate::store::{BranchState, MetadataDb, PrState};

/// What a tidy pass changed.
#[derive(Debug, Clone, Default)]
pub struct TidyReport {
    /// Records removed (branch gone from git, or PR merged)
    pub deleted: Vec<String>,
    /// Children whose surviving ancestor chain broke; now stack roots
    pub orphaned: Vec<String>,
}

impl TidyReport {
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.orphaned.is_empty()
    }
}

/// Scan all records and reconcile them with git.
pub fn tidy(gateway: &GitGateway, db: &mut MetadataDb) -> Result<TidyReport> {
    let trunk = gateway.default_branch()?;

    // Decide the removal set first so re-parenting can see the whole picture
    let mut to_delete: BTreeSet<String> = BTreeSet::new();
    {
        let tx = db.read_tx();
        for record in tx.all_branches() {
            let merged = record.merge_commit.is_some()
                || record
                    .pull_request
                    .as_ref()
                    .is_some_and(|pr| pr.state == PrState::Merged);

            if merged || !gateway.does_branch_exist(&record.name)? {
                to_delete.insert(record.name.clone());
            }
        }
    }

    if to_delete.is_empty() {
        return Ok(TidyReport::default());
    }

    let mut report = TidyReport {
        deleted: to_delete.iter().cloned().collect(),
        orphaned: Vec::new(),
    };

    let mut tx = db.write_tx();

    // Re-point children of removed records at their nearest survivor
    let survivors: Vec<String> = tx
        .all_branches()
        .map(|r| r.name.clone())
        .filter(|name| !to_delete.contains(name))
        .collect();

    // Resolution of a removed parent chain: a survivor takes the children,
    // a removed stack root hands them to its trunk, and a chain that leaves
    // the store entirely orphans them.
    enum NewParent {
        Survivor(String),
        Trunk(String),
        Orphaned,
    }

    for child in &survivors {
        let (record, _) = tx.branch(child);
        let record = record.expect("survivor is tracked").clone();
        if record.parent.trunk || !to_delete.contains(&record.parent.name) {
            continue;
        }

        let mut ancestor = record.parent.name.clone();
        let mut steps = 0;
        let new_parent = loop {
            steps += 1;
            if steps > survivors.len() + to_delete.len() {
                break NewParent::Orphaned;
            }
            match tx.branch(&ancestor).0 {
                Some(rec) if to_delete.contains(&rec.name) => {
                    if rec.parent.trunk {
                        break NewParent::Trunk(rec.parent.name.clone());
                    }
                    ancestor = rec.parent.name.clone();
                }
                Some(rec) => break NewParent::Survivor(rec.name.clone()),
                None => break NewParent::Orphaned,
            }
        };

        let mut updated = record.clone();
        match new_parent {
            NewParent::Survivor(parent) => {
                let base = gateway
                    .merge_base(&parent, child)
                    .map(|oid| oid.as_str().to_string())
                    .unwrap_or_default();
                updated.parent = BranchState::branch_parent(&parent, &base);
            }
            NewParent::Trunk(trunk_name) => {
                updated.parent = BranchState::trunk_parent(&trunk_name);
            }
            NewParent::Orphaned => {
                updated.parent = BranchState::trunk_parent(&trunk);
                report.orphaned.push(child.clone());
            }
        }
        tx.set_branch(updated);
    }

    for name in &to_delete {
        tx.delete_branch(name);
    }

    tx.commit()?;
    Ok(report)
}
