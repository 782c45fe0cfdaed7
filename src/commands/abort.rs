use anyhow::Result;

use crate::sequencer::Control;

/// Abort the in-flight operation and roll back git's in-flight state.
pub fn run() -> Result<i32> {
    super::continue_op::dispatch(Control::Abort, "Abort")
}
