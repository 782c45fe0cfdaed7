use anyhow::Result;

use super::{report_outcome, CliEvents};
use crate::errors::AvError;
use crate::git_gateway::{GitGateway, StateFileKind};
use crate::reorder::ReorderEngine;
use crate::sequencer::{Control, Sequencer};
use crate::store::{MetadataDb, OperationLock};

/// Find the single in-flight operation, or explain why there is none.
pub(crate) fn in_flight_kind(gateway: &GitGateway) -> Result<StateFileKind> {
    let present = gateway.state_files_present();
    match present.as_slice() {
        [] => anyhow::bail!("no operation in progress"),
        [kind] => Ok(*kind),
        many => Err(AvError::Internal(format!(
            "multiple state files present ({}); remove the stale ones under .git/av/ manually",
            many.iter().map(|k| k.file_name()).collect::<Vec<_>>().join(", ")
        ))
        .into()),
    }
}

/// Dispatch a resume control to whichever component left a state file.
pub(crate) fn dispatch(control: Control, verb: &str) -> Result<i32> {
    let gateway = GitGateway::new()?;
    let _lock = OperationLock::acquire(&gateway.metadata_dir())?;

    let kind = in_flight_kind(&gateway)?;
    let mut db = MetadataDb::open(&gateway.metadata_dir())?;
    let outcome = match kind {
        StateFileKind::Restack | StateFileKind::Sync => {
            let mut sequencer = Sequencer::new(&gateway, &mut db, kind);
            sequencer.run(Vec::new(), control, false, false, &mut CliEvents::new())?
        }
        StateFileKind::Reorder => {
            let mut engine = ReorderEngine::new(&gateway, &mut db);
            let outcome = engine.resume(control)?;
            if let crate::sequencer::SequencerOutcome::Paused(info) = &outcome {
                crate::ui::display_conflict(info, &[]);
            }
            outcome
        }
    };

    Ok(report_outcome(&outcome, verb))
}

/// Resume the in-flight operation after the user resolved conflicts.
pub fn run() -> Result<i32> {
    dispatch(Control::Continue, "Resume")
}
