use anyhow::Result;
use colored::Colorize;

use crate::git_gateway::GitGateway;
use crate::store::{acquire_operation_lock, MetadataDb};
use crate::tidy;
use crate::ui;

/// Reconcile metadata with git: drop records for branches that are gone or
/// merged, re-parent their children.
pub fn run() -> Result<i32> {
    let gateway = GitGateway::new()?;
    let _lock = acquire_operation_lock(&gateway)?;
    let mut db = MetadataDb::open(&gateway.metadata_dir())?;

    let report = tidy::tidy(&gateway, &mut db)?;

    if report.is_empty() {
        ui::success("Metadata is already tidy");
        return Ok(0);
    }

    for name in &report.deleted {
        println!("  {} forgot {}", "✓".green(), name.yellow());
    }
    for name in &report.orphaned {
        println!(
            "  {} {} lost its ancestors; it is now a stack root",
            "⚠".yellow(),
            name.yellow()
        );
    }
    ui::success_bold(&format!(
        "Tidied {} record(s)",
        report.deleted.len()
    ));

    Ok(0)
}
