use anyhow::Result;

use super::{report_outcome, CliEvents};
use crate::git_gateway::{GitGateway, StateFileKind};
use crate::planner::plan_amend;
use crate::sequencer::{Control, Sequencer};
use crate::store::{acquire_operation_lock, MetadataDb};
use crate::ui;

/// Restack the descendants of a branch whose head moved (after a commit
/// amend or a manual rewrite).
pub fn run(branch: Option<String>) -> Result<i32> {
    let gateway = GitGateway::new()?;
    let mut db = MetadataDb::open(&gateway.metadata_dir())?;

    let target = match branch {
        Some(branch) => branch,
        None => gateway.current_branch()?,
    };

    let plan = plan_amend(db.read_tx().doc(), &gateway, &target)?;
    if plan.is_empty() {
        ui::success(&format!("'{}' has no descendants to restack", target));
        return Ok(0);
    }

    let _lock = acquire_operation_lock(&gateway)?;
    gateway.require_clean_for_rebase()?;

    let mut sequencer = Sequencer::new(&gateway, &mut db, StateFileKind::Restack);
    let outcome = sequencer.run(plan, Control::Start, false, false, &mut CliEvents::new())?;

    Ok(report_outcome(&outcome, "Restack"))
}
