use anyhow::Result;
use colored::Colorize;

use super::{report_outcome, CliEvents};
use crate::context::ExecutionContext;
use crate::git_gateway::{GitGateway, StateFileKind};
use crate::planner::plan_reparent;
use crate::sequencer::{Control, Sequencer};
use crate::store::{acquire_operation_lock, MetadataDb};
use crate::ui;

/// Move a branch (and its descendants) onto a new parent.
pub fn run(new_parent: String, branch: Option<String>) -> Result<i32> {
    let gateway = GitGateway::new()?;
    let mut db = MetadataDb::open(&gateway.metadata_dir())?;

    let target = match branch {
        Some(branch) => branch,
        None => gateway.current_branch()?,
    };

    let plan = plan_reparent(db.read_tx().doc(), &gateway, &target, &new_parent)?;

    if ExecutionContext::is_dry_run() {
        println!(
            "{} Dry run - would move {} onto {} ({} descendant(s) follow)",
            "→".blue(),
            target.green(),
            new_parent.blue(),
            plan.len().saturating_sub(1)
        );
        return Ok(0);
    }

    let _lock = acquire_operation_lock(&gateway)?;
    gateway.require_clean_for_rebase()?;

    let mut sequencer = Sequencer::new(&gateway, &mut db, StateFileKind::Restack);
    let outcome = sequencer.run(plan, Control::Start, false, false, &mut CliEvents::new())?;

    Ok(report_outcome(&outcome, "Reparent"))
}
