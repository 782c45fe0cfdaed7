use anyhow::Result;
use colored::Colorize;

use super::{report_outcome, CliEvents};
use crate::context::ExecutionContext;
use crate::git_gateway::{GitGateway, StateFileKind};
use crate::planner::{plan_restack, RestackScope};
use crate::sequencer::{Control, Sequencer};
use crate::store::{acquire_operation_lock, MetadataDb};
use crate::ui;

/// Rebase branches onto their recorded parents.
///
/// Default scope is the current branch plus everything stacked on it;
/// `--only` narrows to the current branch, `--all` covers every stack.
pub fn run(branch: Option<String>, only: bool, all: bool) -> Result<i32> {
    let gateway = GitGateway::new()?;
    let mut db = MetadataDb::open(&gateway.metadata_dir())?;

    let scope = if only {
        RestackScope::Current
    } else if all {
        RestackScope::All
    } else {
        RestackScope::CurrentAndDescendants
    };

    let current = match branch {
        Some(branch) => branch,
        None => gateway.current_branch()?,
    };

    let plan = plan_restack(db.read_tx().doc(), &gateway, &current, scope)?;

    if ExecutionContext::is_dry_run() {
        if plan.is_empty() {
            ui::success("Nothing to restack");
        } else {
            println!("{} Dry run - would restack {} branches:", "→".blue(), plan.len());
            for op in &plan {
                println!("  • {} onto {}", op.name.green(), op.new_parent.blue());
            }
        }
        return Ok(0);
    }

    let _lock = acquire_operation_lock(&gateway)?;
    gateway.require_clean_for_rebase()?;

    let restacking_all = scope == RestackScope::All;
    let mut sequencer = Sequencer::new(&gateway, &mut db, StateFileKind::Restack);
    let outcome = sequencer.run(plan, Control::Start, restacking_all, false, &mut CliEvents::new())?;

    Ok(report_outcome(&outcome, "Restack"))
}
