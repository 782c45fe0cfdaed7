use anyhow::Result;
use colored::Colorize;

use super::{report_outcome, CliEvents};
use crate::context::ExecutionContext;
use crate::git_gateway::{GitGateway, StateFileKind};
use crate::planner::{plan_sync, RestackScope};
use crate::sequencer::{Control, Sequencer};
use crate::store::{acquire_operation_lock, MetadataDb};
use crate::ui;

/// Restack against the updated trunk.
///
/// Like restack, but stack roots re-anchor on the trunk's remote tip when
/// `--rebase-to-trunk` is given (the caller is expected to have fetched).
pub fn run(all: bool, rebase_to_trunk: bool) -> Result<i32> {
    let gateway = GitGateway::new()?;
    let mut db = MetadataDb::open(&gateway.metadata_dir())?;

    let current = gateway.current_branch()?;

    // Syncing from the trunk itself only makes sense for the whole tree;
    // offer the switch rather than erroring (suppressed by AV_NO_PROMPT)
    let mut scope = if all { RestackScope::All } else { RestackScope::CurrentAndDescendants };
    if scope != RestackScope::All && gateway.is_trunk(&current)? {
        if ui::confirm_optional(
            &format!("You are on trunk '{}'. Sync all stacks instead?", current),
            true,
        )? {
            scope = RestackScope::All;
        } else {
            anyhow::bail!("cannot sync the trunk itself; checkout a stack branch or pass --all");
        }
    }

    if rebase_to_trunk {
        let trunk = gateway.default_branch()?;
        if !gateway.does_remote_branch_exist(&trunk)? {
            ui::warning(&format!(
                "no remote-tracking ref for '{}' on '{}'; fetch first, roots will re-anchor on the local trunk",
                trunk,
                gateway.remote()
            ));
        }
    }

    let plan = plan_sync(db.read_tx().doc(), &gateway, &current, scope, rebase_to_trunk)?;

    if ExecutionContext::is_dry_run() {
        if plan.is_empty() {
            ui::success("Nothing to sync");
        } else {
            println!("{} Dry run - would sync {} branches:", "→".blue(), plan.len());
            for op in &plan {
                println!("  • {} onto {}", op.name.green(), op.new_parent.blue());
            }
        }
        return Ok(0);
    }

    let _lock = acquire_operation_lock(&gateway)?;
    gateway.require_clean_for_rebase()?;

    let restacking_all = scope == RestackScope::All;
    let mut sequencer = Sequencer::new(&gateway, &mut db, StateFileKind::Sync);
    let outcome = sequencer.run(plan, Control::Start, restacking_all, rebase_to_trunk, &mut CliEvents::new())?;

    Ok(report_outcome(&outcome, "Sync"))
}
