use anyhow::Result;

use crate::sequencer::Control;

/// Resume the in-flight operation, dropping the conflicting commit.
pub fn run() -> Result<i32> {
    super::continue_op::dispatch(Control::Skip, "Resume")
}
