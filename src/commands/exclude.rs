use anyhow::Result;

use crate::git_gateway::GitGateway;
use crate::store::MetadataDb;
use crate::ui;

/// Toggle a branch's exclusion from `sync --all`. Descendants inherit the
/// exclusion through the ancestor walk.
pub fn run(branch: Option<String>, clear: bool) -> Result<i32> {
    let gateway = GitGateway::new()?;
    let mut db = MetadataDb::open(&gateway.metadata_dir())?;

    let target = match branch {
        Some(branch) => branch,
        None => gateway.current_branch()?,
    };

    let mut tx = db.write_tx();
    let (record, exists) = tx.branch(&target);
    if !exists {
        anyhow::bail!(
            "branch '{}' is not adopted. Run '{} adopt {}' first.",
            target,
            crate::program_name::program_name(),
            target
        );
    }

    let mut record = record.expect("checked above").clone();
    record.exclude_from_sync_all = !clear;
    tx.set_branch(record);
    tx.commit()?;

    if clear {
        ui::success(&format!("'{}' participates in sync --all again", target));
    } else {
        ui::success(&format!("'{}' (and its descendants) excluded from sync --all", target));
    }

    Ok(0)
}
