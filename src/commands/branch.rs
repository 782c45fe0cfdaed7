use anyhow::Result;
use colored::Colorize;

use crate::errors::AvError;
use crate::git_gateway::GitGateway;
use crate::store::{acquire_operation_lock, BranchState, MetadataDb, PrState};
use crate::ui;

fn has_open_pr(db: &MetadataDb, branch: &str) -> bool {
    db.read_tx()
        .branch(branch)
        .0
        .and_then(|r| r.pull_request.as_ref())
        .is_some_and(|pr| pr.state == PrState::Open)
}

/// Delete a branch: the git ref and the record, with children re-parented
/// to the deleted branch's parent in the same transaction.
pub fn delete(name: String, force: bool) -> Result<i32> {
    let gateway = GitGateway::new()?;
    let _lock = acquire_operation_lock(&gateway)?;
    let mut db = MetadataDb::open(&gateway.metadata_dir())?;

    if has_open_pr(&db, &name) && !force {
        return Err(AvError::Policy(format!(
            "branch '{}' has an open PR; deleting it would orphan the review. Use --force to delete anyway.",
            name
        ))
        .into());
    }

    let mut tx = db.write_tx();
    let (record, exists) = tx.branch(&name);
    if !exists {
        anyhow::bail!("branch '{}' is not adopted; delete it with git directly", name);
    }
    let former_parent = record.expect("checked above").parent.clone();

    for child in tx.doc().children(&name) {
        let (child_record, _) = tx.branch(&child);
        let mut child_record = child_record.expect("child is tracked").clone();
        child_record.parent = if former_parent.trunk {
            BranchState::trunk_parent(&former_parent.name)
        } else {
            let base = gateway
                .merge_base(&former_parent.name, &child)
                .map(|oid| oid.as_str().to_string())
                .unwrap_or_default();
            BranchState::branch_parent(&former_parent.name, &base)
        };
        tx.set_branch(child_record);
    }
    tx.delete_branch(&name);
    tx.commit()?;

    if gateway.does_branch_exist(&name)? {
        // Move off the branch before deleting its ref
        if gateway.current_branch_opt()?.as_deref() == Some(name.as_str()) {
            gateway.checkout(&former_parent.name)?;
        }
        gateway.branch_delete(&name)?;
    }

    ui::success(&format!("Deleted {} (children moved to {})", name.yellow(), former_parent.name.blue()));
    Ok(0)
}

/// Rename a branch in git and in the store, re-pointing children in the
/// same transaction.
pub fn rename(old_name: String, new_name: String, force: bool) -> Result<i32> {
    let gateway = GitGateway::new()?;
    let _lock = acquire_operation_lock(&gateway)?;
    let mut db = MetadataDb::open(&gateway.metadata_dir())?;

    if has_open_pr(&db, &old_name) && !force {
        return Err(AvError::Policy(format!(
            "branch '{}' has an open PR tracking its name; renaming would detach it. Use --force to rename anyway.",
            old_name
        ))
        .into());
    }

    if !gateway.does_branch_exist(&old_name)? {
        return Err(AvError::BranchMissing(old_name).into());
    }
    if gateway.does_branch_exist(&new_name)? {
        anyhow::bail!("branch '{}' already exists", new_name);
    }

    let mut tx = db.write_tx();
    let (record, exists) = tx.branch(&old_name);
    if !exists {
        anyhow::bail!("branch '{}' is not adopted; rename it with git directly", old_name);
    }

    let mut record = record.expect("checked above").clone();
    record.name = new_name.clone();

    for child in tx.doc().children(&old_name) {
        let (child_record, _) = tx.branch(&child);
        let mut child_record = child_record.expect("child is tracked").clone();
        child_record.parent.name = new_name.clone();
        tx.set_branch(child_record);
    }

    tx.delete_branch(&old_name);
    tx.set_branch(record);
    tx.commit()?;

    gateway.branch_rename(&old_name, &new_name)?;

    ui::success(&format!("Renamed {} to {}", old_name.yellow(), new_name.green()));
    Ok(0)
}
