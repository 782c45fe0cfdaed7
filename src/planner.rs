//! Stack planner.
//!
//! Turns a request (restack, sync, reparent, amend) into an ordered list of
//! `RestackOp`s for the sequencer. Ordering rule: a parent is always planned
//! before its children; siblings come in name order. The planner is pure
//! over a metadata snapshot plus ref reads — it never mutates anything.
//!
//! An empty plan means every branch in scope is already based on its
//! recorded parent; callers treat that as nothing-to-restack.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::errors::AvError;
use crate::git_gateway::GitGateway;
use crate::store::{BranchState, Document};

/// One sequencer step: rebase `name` onto the tip of `new_parent`.
///
/// `new_trunk` records whether the new parent is a trunk so the sequencer
/// needs no re-derivation at execution time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestackOp {
    pub name: String,
    pub new_parent: String,
    pub new_trunk: bool,
}

/// Which part of the tree a restack or sync covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestackScope {
    /// Only the current branch
    Current,
    /// The current branch and everything stacked on it
    CurrentAndDescendants,
    /// Every tracked stack
    All,
}

fn require_tracked<'a>(doc: &'a Document, branch: &str) -> Result<&'a crate::store::BranchRecord> {
    match doc.branches.get(branch) {
        Some(record) => Ok(record),
        None => bail!(
            "branch '{}' is not adopted. Run '{} adopt {}' first.",
            branch,
            crate::program_name::program_name(),
            branch
        ),
    }
}

/// Collect the branches a scope covers, parents before children.
///
/// `skip_excluded` honors `exclude_from_sync_all` (and excluded ancestors)
/// and only applies to the All scope.
fn branches_in_scope(
    doc: &Document,
    gateway: &GitGateway,
    current: &str,
    scope: RestackScope,
    skip_excluded: bool,
) -> Result<Vec<String>> {
    match scope {
        RestackScope::Current => {
            if gateway.is_trunk(current)? {
                bail!("cannot restack trunk branch '{}'", current);
            }
            require_tracked(doc, current)?;
            Ok(vec![current.to_string()])
        }
        RestackScope::CurrentAndDescendants => {
            if gateway.is_trunk(current)? {
                bail!("cannot restack trunk branch '{}'", current);
            }
            require_tracked(doc, current)?;
            let mut branches = vec![current.to_string()];
            branches.extend(doc.subsequent_branches(current));
            Ok(branches)
        }
        RestackScope::All => {
            let mut branches = Vec::new();
            for root in doc.stack_roots() {
                branches.push(root.clone());
                branches.extend(doc.subsequent_branches(&root));
            }
            if skip_excluded {
                branches.retain(|b| !doc.has_excluded_ancestor(b));
            }
            Ok(branches)
        }
    }
}

/// Whether a branch sits somewhere other than its recorded parent's tip.
fn needs_restack(doc: &Document, gateway: &GitGateway, branch: &str) -> Result<bool> {
    let record = match doc.branches.get(branch) {
        Some(r) => r,
        None => return Ok(false),
    };

    if !gateway.does_branch_exist(&record.parent.name)? {
        // Parent ref is gone; tidy has to run before a meaningful answer
        return Ok(true);
    }

    if record.parent.trunk {
        return Ok(!gateway.is_ancestor(&record.parent.name, branch)?);
    }

    // A recorded branching point equal to the parent's current tip means the
    // parent has not moved since this branch was last restacked
    let parent_tip = gateway.rev_parse(&record.parent.name)?;
    Ok(record.parent.head != parent_tip.as_str())
}

/// Build ops for the given branches: a branch is included when it needs a
/// restack itself or when any in-scope ancestor was included (its base is
/// about to move).
fn ops_for_branches(
    doc: &Document,
    gateway: &GitGateway,
    branches: &[String],
    force_all: bool,
) -> Result<Vec<RestackOp>> {
    let mut ops = Vec::new();
    let mut moved: HashSet<String> = HashSet::new();

    for branch in branches {
        let record = require_tracked(doc, branch)?;

        let parent_moved = moved.contains(&record.parent.name);
        if force_all || parent_moved || needs_restack(doc, gateway, branch)? {
            ops.push(RestackOp {
                name: branch.clone(),
                new_parent: record.parent.name.clone(),
                new_trunk: record.parent.trunk,
            });
            moved.insert(branch.clone());
        }
    }

    Ok(ops)
}

/// Plan a restack of the given scope.
pub fn plan_restack(
    doc: &Document,
    gateway: &GitGateway,
    current: &str,
    scope: RestackScope,
) -> Result<Vec<RestackOp>> {
    let branches = branches_in_scope(doc, gateway, current, scope, false)?;
    ops_for_branches(doc, gateway, &branches, false)
}

/// Plan a sync. Identical to a restack plan except that `--all` skips
/// branches excluded from sync; when `rebase_to_trunk` is set the sequencer
/// additionally pulls the trunk's remote tip as the upstream for stack
/// roots.
pub fn plan_sync(
    doc: &Document,
    gateway: &GitGateway,
    current: &str,
    scope: RestackScope,
    rebase_to_trunk: bool,
) -> Result<Vec<RestackOp>> {
    let branches = branches_in_scope(doc, gateway, current, scope, scope == RestackScope::All)?;

    if rebase_to_trunk {
        // Roots must re-anchor on the updated trunk even when their recorded
        // base still matches the local trunk tip
        let mut ops = Vec::new();
        let mut moved: HashSet<String> = HashSet::new();
        for branch in &branches {
            let record = require_tracked(doc, branch)?;
            let parent_moved = moved.contains(&record.parent.name);
            let needed = record.parent.trunk || parent_moved || needs_restack(doc, gateway, branch)?;
            if needed {
                ops.push(RestackOp {
                    name: branch.clone(),
                    new_parent: record.parent.name.clone(),
                    new_trunk: record.parent.trunk,
                });
                moved.insert(branch.clone());
            }
        }
        return Ok(ops);
    }

    ops_for_branches(doc, gateway, &branches, false)
}

/// Plan a reparent: one op re-pointing `branch` onto `new_parent`, then ops
/// restacking every descendant onto the moved branch.
pub fn plan_reparent(
    doc: &Document,
    gateway: &GitGateway,
    branch: &str,
    new_parent: &str,
) -> Result<Vec<RestackOp>> {
    require_tracked(doc, branch)?;

    if branch == new_parent {
        return Err(AvError::CycleDetected {
            branch: branch.to_string(),
            parent: new_parent.to_string(),
        }
        .into());
    }

    let new_trunk = gateway.is_trunk(new_parent)?;
    if !new_trunk && !doc.branches.contains_key(new_parent) {
        return Err(AvError::ParentNotAdopted {
            branch: branch.to_string(),
            parent: new_parent.to_string(),
        }
        .into());
    }

    let proposed = if new_trunk {
        BranchState::trunk_parent(new_parent)
    } else {
        BranchState::branch_parent(new_parent, "")
    };
    if !doc.validate_no_cycle(branch, &proposed) {
        return Err(AvError::CycleDetected {
            branch: branch.to_string(),
            parent: new_parent.to_string(),
        }
        .into());
    }

    let mut ops = vec![RestackOp {
        name: branch.to_string(),
        new_parent: new_parent.to_string(),
        new_trunk,
    }];

    // Descendants follow the moved branch; their recorded parents stand
    for descendant in doc.subsequent_branches(branch) {
        let record = require_tracked(doc, &descendant)?;
        ops.push(RestackOp {
            name: descendant,
            new_parent: record.parent.name.clone(),
            new_trunk: record.parent.trunk,
        });
    }

    Ok(ops)
}

/// Plan the descendant restacks after `branch` was amended (its tip moved,
/// so every descendant's base is stale).
pub fn plan_amend(doc: &Document, gateway: &GitGateway, branch: &str) -> Result<Vec<RestackOp>> {
    require_tracked(doc, branch)?;
    if !gateway.does_branch_exist(branch)? {
        return Err(AvError::BranchMissing(branch.to_string()).into());
    }

    let mut ops = Vec::new();
    for descendant in doc.subsequent_branches(branch) {
        let record = require_tracked(doc, &descendant)?;
        ops.push(RestackOp {
            name: descendant,
            new_parent: record.parent.name.clone(),
            new_trunk: record.parent.trunk,
        });
    }

    Ok(ops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git_gateway::GitGateway;
    use crate::store::{BranchRecord, BranchState};
    use crate::test_context::{commit_file, create_and_checkout_branch, init_test_repo, TestRepoContext};
    use tempfile::tempdir;

    struct Fixture {
        _dir: tempfile::TempDir,
        repo: git2::Repository,
        gateway: GitGateway,
        doc: Document,
    }

    /// Build trunk -> a -> b in git and metadata, with recorded branching
    /// points matching the actual tips (nothing needs restacking).
    fn linear_fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let repo = init_test_repo(dir.path()).unwrap();
        let _ctx = TestRepoContext::new(dir.path());
        let gateway = GitGateway::new().unwrap();

        create_and_checkout_branch(&repo, "a").unwrap();
        commit_file(&repo, "a.txt", "a", "a work").unwrap();
        let a_tip = gateway.rev_parse("a").unwrap();

        create_and_checkout_branch(&repo, "b").unwrap();
        commit_file(&repo, "b.txt", "b", "b work").unwrap();

        let mut doc = Document::default();
        doc.branches
            .insert("a".into(), BranchRecord::new("a", BranchState::trunk_parent("main")));
        doc.branches.insert(
            "b".into(),
            BranchRecord::new("b", BranchState::branch_parent("a", a_tip.as_str())),
        );

        Fixture {
            _dir: dir,
            repo,
            gateway,
            doc,
        }
    }

    #[test]
    fn test_restack_returns_empty_when_nothing_moved() {
        let f = linear_fixture();
        let ops = plan_restack(&f.doc, &f.gateway, "b", RestackScope::Current).unwrap();
        assert!(ops.is_empty());

        let ops = plan_restack(&f.doc, &f.gateway, "a", RestackScope::CurrentAndDescendants).unwrap();
        assert!(ops.is_empty());
    }

    #[test]
    fn test_restack_detects_moved_parent() {
        let f = linear_fixture();
        // Amend a: its tip moves past b's recorded branching point
        f.gateway.checkout("a").unwrap();
        commit_file(&f.repo, "a2.txt", "a2", "a amended").unwrap();

        let ops = plan_restack(&f.doc, &f.gateway, "b", RestackScope::Current).unwrap();
        assert_eq!(
            ops,
            vec![RestackOp {
                name: "b".into(),
                new_parent: "a".into(),
                new_trunk: false,
            }]
        );
    }

    #[test]
    fn test_restack_all_orders_parent_before_child() {
        let f = linear_fixture();
        // Move the trunk so the whole stack is stale
        f.gateway.checkout("main").unwrap();
        commit_file(&f.repo, "trunk.txt", "t", "trunk moved").unwrap();

        let ops = plan_restack(&f.doc, &f.gateway, "main", RestackScope::All).unwrap();
        let names: Vec<_> = ops.iter().map(|op| op.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(ops[0].new_trunk);
        assert!(!ops[1].new_trunk);
    }

    #[test]
    fn test_amend_plans_descendants_only() {
        let f = linear_fixture();
        let ops = plan_amend(&f.doc, &f.gateway, "a").unwrap();
        let names: Vec<_> = ops.iter().map(|op| op.name.as_str()).collect();
        assert_eq!(names, vec!["b"]);

        let ops = plan_amend(&f.doc, &f.gateway, "b").unwrap();
        assert!(ops.is_empty());
    }

    #[test]
    fn test_reparent_plans_branch_then_descendants() {
        let f = linear_fixture();
        let ops = plan_reparent(&f.doc, &f.gateway, "a", "main").unwrap();
        let names: Vec<_> = ops.iter().map(|op| op.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(ops[0].new_parent, "main");
        assert!(ops[0].new_trunk);
        assert_eq!(ops[1].new_parent, "a");
    }

    #[test]
    fn test_reparent_rejects_cycle() {
        let f = linear_fixture();
        // b is a descendant of a
        let result = plan_reparent(&f.doc, &f.gateway, "a", "b");
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AvError>(),
            Some(AvError::CycleDetected { .. })
        ));
    }

    #[test]
    fn test_reparent_rejects_unadopted_parent() {
        let f = linear_fixture();
        let result = plan_reparent(&f.doc, &f.gateway, "b", "unknown");
        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err().downcast_ref::<AvError>(),
            Some(AvError::ParentNotAdopted { .. })
        ));
    }

    #[test]
    fn test_restack_refuses_trunk() {
        let f = linear_fixture();
        let result = plan_restack(&f.doc, &f.gateway, "main", RestackScope::Current);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("trunk"));
    }

    #[test]
    fn test_sync_all_skips_excluded_stacks() {
        let mut f = linear_fixture();
        // Everything is stale
        f.gateway.checkout("main").unwrap();
        commit_file(&f.repo, "trunk.txt", "t", "trunk moved").unwrap();

        f.doc.branches.get_mut("a").unwrap().exclude_from_sync_all = true;

        let ops = plan_sync(&f.doc, &f.gateway, "main", RestackScope::All, false).unwrap();
        assert!(ops.is_empty(), "excluded stack must be skipped, got {:?}", ops);
    }

    #[test]
    fn test_sync_rebase_to_trunk_always_includes_roots() {
        let f = linear_fixture();
        // Nothing stale locally, but rebase_to_trunk forces the roots
        let ops = plan_sync(&f.doc, &f.gateway, "main", RestackScope::All, true).unwrap();
        let names: Vec<_> = ops.iter().map(|op| op.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
