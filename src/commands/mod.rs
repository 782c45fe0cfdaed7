//! Thin CLI commands.
//!
//! Each command wires the core components together: acquire the lock where
//! needed, open the gateway and the store, call the planner/sequencer/
//! engine, and render outcomes. No command contains stack logic of its own.

pub mod abort;
pub mod adopt;
pub mod amend;
pub mod branch;
pub mod continue_op;
pub mod exclude;
pub mod info;
pub mod init;
pub mod reorder;
pub mod reparent;
pub mod restack;
pub mod skip;
pub mod sync;
pub mod tidy;

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use crate::planner::RestackOp;
use crate::sequencer::{ConflictInfo, SequencerEvents, SequencerOutcome};
use crate::ui;

/// Sequencer event sink that renders progress on the terminal.
pub struct CliEvents {
    bar: Option<ProgressBar>,
}

impl CliEvents {
    pub fn new() -> Self {
        Self { bar: None }
    }

    fn clear_bar(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

impl Default for CliEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl SequencerEvents for CliEvents {
    fn on_progress(&mut self, op: &RestackOp, index: usize, total: usize) {
        if self.bar.is_none() && total > 1 {
            let bar = ProgressBar::new(total as u64);
            bar.set_style(
                ProgressStyle::with_template("{prefix} [{pos}/{len}] {msg}")
                    .expect("progress template is valid")
                    .progress_chars("=> "),
            );
            bar.set_prefix("Restacking");
            self.bar = Some(bar);
        }

        if let Some(bar) = &self.bar {
            bar.set_position(index as u64);
            bar.set_message(format!("{} onto {}", op.name, op.new_parent));
        } else {
            ui::step(&format!(
                "Restacking {} onto {}...",
                op.name.green(),
                op.new_parent.blue()
            ));
        }
    }

    fn on_conflict(&mut self, info: &ConflictInfo, remaining: &[String]) {
        self.clear_bar();
        ui::display_conflict(info, remaining);
    }

    fn on_abort(&mut self) {
        self.clear_bar();
        ui::success("Operation aborted; branches restored to their previous state");
    }

    fn on_done(&mut self) {
        self.clear_bar();
    }
}

/// Render a sequencer outcome and return the desired process exit code.
pub fn report_outcome(outcome: &SequencerOutcome, verb: &str) -> i32 {
    match outcome {
        SequencerOutcome::Done => {
            ui::success_bold(&format!("{} complete!", verb));
            0
        }
        SequencerOutcome::NothingToDo => {
            ui::success(&format!("Nothing to {}; every branch is in place", verb.to_lowercase()));
            0
        }
        // The conflict details were already rendered via on_conflict
        SequencerOutcome::Paused(_) => 1,
        SequencerOutcome::Aborted => 0,
    }
}
