//! Plan sequencer.
//!
//! Executes a list of `RestackOp`s against git, one rebase at a time, with a
//! checkpoint written to a state file before anything that can pause. A
//! conflict stops the run; a later invocation resumes it with `continue`
//! (after the user resolves), `skip` (drop the conflicting commit) or
//! `abort` (roll back git's in-flight rebase and forget the plan).
//!
//! Progress contract: each completed step commits the branch's new parent
//! state to the metadata store *before* the cursor advances, so a crash at
//! any point leaves the store consistent with what was actually rebased. The
//! persisted cursor names the next op to run; repeating a completed op is a
//! no-op because the branch is already based on its target.
//!
//! Cancellation (Ctrl-C) is observed between ops only. The state file stays
//! behind so the run can be continued.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::cancel;
use crate::errors::AvError;
use crate::git_gateway::{GitGateway, RebaseStatus, Resume, StateFileKind};
use crate::planner::RestackOp;
use crate::store::{BranchState, MetadataDb};

/// How the sequencer is entered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Start,
    Continue,
    Skip,
    Abort,
}

/// Details of a conflict that paused the run. Headline and hint carry git's
/// wording verbatim.
#[derive(Debug, Clone)]
pub struct ConflictInfo {
    pub branch: String,
    pub onto: String,
    pub headline: String,
    pub hint: String,
}

/// Terminal outcome of a sequencer invocation
#[derive(Debug, Clone)]
pub enum SequencerOutcome {
    /// Plan ran to completion; state cleared, initial branch restored
    Done,
    /// The plan was empty; nothing was touched
    NothingToDo,
    /// A rebase stopped on conflicts (or Ctrl-C parked the run); state
    /// persisted for continue/skip/abort
    Paused(ConflictInfo),
    /// In-flight operation rolled back; state cleared, no metadata written
    Aborted,
}

/// Checkpointed sequencer state, serialized to
/// `.git/av/<kind>-state.json` while a run is in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequencerState {
    /// Branch to return to on completion or abort
    pub initial_branch: String,
    /// Branches in scope, for reporting
    pub related_branches: Vec<String>,
    /// Whether the run covers every tracked stack
    pub restacking_all: bool,
    /// Sync mode: pull the trunk's remote tip as upstream for stack roots
    #[serde(default)]
    pub rebase_to_trunk: bool,
    /// The plan
    pub operations: Vec<RestackOp>,
    /// Index of the next operation to execute
    pub cursor: usize,
    /// Branch currently mid-rebase, set while an op is in flight
    pub current_sync_ref: Option<String>,
}

/// Callbacks surfaced to the CLI while a plan runs
pub trait SequencerEvents {
    fn on_progress(&mut self, _op: &RestackOp, _index: usize, _total: usize) {}
    fn on_conflict(&mut self, _info: &ConflictInfo, _remaining: &[String]) {}
    fn on_abort(&mut self) {}
    fn on_done(&mut self) {}
}

/// No-op event sink
pub struct NullEvents;

impl SequencerEvents for NullEvents {}

/// Executes restack plans against a repository.
pub struct Sequencer<'a> {
    gateway: &'a GitGateway,
    db: &'a mut MetadataDb,
    kind: StateFileKind,
}

impl<'a> Sequencer<'a> {
    pub fn new(gateway: &'a GitGateway, db: &'a mut MetadataDb, kind: StateFileKind) -> Self {
        Self { gateway, db, kind }
    }

    /// Run a plan, or resume a paused one.
    ///
    /// `plan` and the scope flags are only consulted for `Control::Start`;
    /// resume controls load the persisted state instead.
    pub fn run(
        &mut self,
        plan: Vec<RestackOp>,
        control: Control,
        restacking_all: bool,
        rebase_to_trunk: bool,
        events: &mut dyn SequencerEvents,
    ) -> Result<SequencerOutcome> {
        match control {
            Control::Start => self.start(plan, restacking_all, rebase_to_trunk, events),
            Control::Continue => self.resume(Resume::Continue, events),
            Control::Skip => self.resume(Resume::Skip, events),
            Control::Abort => self.abort(events),
        }
    }

    fn start(
        &mut self,
        plan: Vec<RestackOp>,
        restacking_all: bool,
        rebase_to_trunk: bool,
        events: &mut dyn SequencerEvents,
    ) -> Result<SequencerOutcome> {
        if plan.is_empty() {
            return Ok(SequencerOutcome::NothingToDo);
        }

        // Every planned branch must exist before the first rebase starts
        for op in &plan {
            if !self.gateway.does_branch_exist(&op.name)? {
                return Err(AvError::BranchMissing(op.name.clone()).into());
            }
        }

        let initial_branch = self.gateway.current_branch()?;
        let related_branches = plan.iter().map(|op| op.name.clone()).collect();

        let mut state = SequencerState {
            initial_branch,
            related_branches,
            restacking_all,
            rebase_to_trunk,
            operations: plan,
            cursor: 0,
            current_sync_ref: None,
        };

        // Checkpoint before the first rebase so a crash is recoverable
        self.persist(&state)?;
        self.advance(&mut state, events)
    }

    fn resume(&mut self, resume: Resume, events: &mut dyn SequencerEvents) -> Result<SequencerOutcome> {
        let mut state = self.load_state()?;
        self.verify_state(&state)?;

        if self.gateway.rebase_in_progress()? {
            let result = self.gateway.rebase("", "", None, resume)?;
            match result.status {
                RebaseStatus::Conflict => {
                    let info = self.conflict_info(&state, result.error_headline, result.hint);
                    events.on_conflict(&info, &self.remaining(&state));
                    return Ok(SequencerOutcome::Paused(info));
                }
                RebaseStatus::Ok => {
                    // The op at the cursor just finished inside git
                    self.complete_op(&mut state)?;
                }
                RebaseStatus::Aborted => {
                    return Err(AvError::Internal("unexpected abort status while resuming".into()).into())
                }
            }
        }
        // No rebase in progress: either the user finished it manually or the
        // pause happened at an op boundary; both fall through to the loop

        self.advance(&mut state, events)
    }

    fn abort(&mut self, events: &mut dyn SequencerEvents) -> Result<SequencerOutcome> {
        let state = self.load_state()?;

        if self.gateway.rebase_in_progress()? {
            self.gateway.rebase("", "", None, Resume::Abort)?;
        }

        self.gateway.write_state_file::<SequencerState>(self.kind, None)?;
        if self.gateway.does_branch_exist(&state.initial_branch)? {
            self.gateway.checkout(&state.initial_branch)?;
        }

        events.on_abort();
        Ok(SequencerOutcome::Aborted)
    }

    /// Execute ops from the cursor until done, paused, or cancelled.
    fn advance(&mut self, state: &mut SequencerState, events: &mut dyn SequencerEvents) -> Result<SequencerOutcome> {
        let total = state.operations.len();

        while state.cursor < state.operations.len() {
            if cancel::requested() {
                // Park the run; the state file is already on disk
                let info = ConflictInfo {
                    branch: state.current_sync_ref.clone().unwrap_or_default(),
                    onto: String::new(),
                    headline: "operation interrupted".to_string(),
                    hint: format!("run '{} continue' to resume", crate::program_name::program_name()),
                };
                return Ok(SequencerOutcome::Paused(info));
            }

            let op = state.operations[state.cursor].clone();
            events.on_progress(&op, state.cursor, total);

            if !self.gateway.does_branch_exist(&op.name)? {
                return Err(AvError::BranchMissing(op.name.clone()).into());
            }

            // Mark the op in flight before touching git
            state.current_sync_ref = Some(op.name.clone());
            self.persist(state)?;

            let onto_tip = self.gateway.rev_parse(&op.new_parent)?;
            let upstream = self.upstream_for(state, &op)?;

            // Crash recovery / no-op detection: already sitting on the target
            if self.gateway.is_branch_based_on(&op.name, &op.new_parent)? && upstream == onto_tip.as_str() {
                self.complete_op(state)?;
                continue;
            }

            let result = self
                .gateway
                .rebase(&upstream, &op.new_parent, Some(&op.name), Resume::None)
                .with_context(|| format!("failed to rebase '{}' onto '{}'", op.name, op.new_parent))?;

            match result.status {
                RebaseStatus::Ok => {
                    self.complete_op(state)?;
                }
                RebaseStatus::Conflict => {
                    let info = self.conflict_info(state, result.error_headline, result.hint);
                    events.on_conflict(&info, &self.remaining(state));
                    return Ok(SequencerOutcome::Paused(info));
                }
                RebaseStatus::Aborted => {
                    return Err(AvError::Internal("unexpected abort status during rebase".into()).into())
                }
            }
        }

        // Whole plan done
        self.gateway.write_state_file::<SequencerState>(self.kind, None)?;
        if self.gateway.does_branch_exist(&state.initial_branch)? {
            self.gateway.checkout(&state.initial_branch)?;
        }

        events.on_done();
        Ok(SequencerOutcome::Done)
    }

    /// The upstream for an op: the recorded branching point for non-trunk
    /// parents, the remote trunk tip under sync --rebase-to-trunk, and the
    /// merge base otherwise.
    fn upstream_for(&self, state: &SequencerState, op: &RestackOp) -> Result<String> {
        if op.new_trunk {
            if state.rebase_to_trunk {
                if let Some(remote_tip) = self.gateway.remote_trunk_tip(&op.new_parent)? {
                    return Ok(remote_tip.as_str().to_string());
                }
            }
            return Ok(self.gateway.merge_base(&op.new_parent, &op.name)?.as_str().to_string());
        }

        let tx = self.db.read_tx();
        let (record, exists) = tx.branch(&op.name);
        if !exists {
            return Err(AvError::Internal(format!(
                "state file references branch '{}' which is not in the store",
                op.name
            ))
            .into());
        }

        let head = &record.expect("checked above").parent.head;
        if head.is_empty() {
            return Ok(self.gateway.merge_base(&op.new_parent, &op.name)?.as_str().to_string());
        }
        Ok(head.clone())
    }

    /// Record a finished op: update the branch's parent state in the store,
    /// then advance the cursor and re-checkpoint.
    fn complete_op(&mut self, state: &mut SequencerState) -> Result<()> {
        let op = state.operations[state.cursor].clone();

        let parent = if op.new_trunk {
            // Trunk parents keep an empty branching point
            BranchState::trunk_parent(&op.new_parent)
        } else {
            let base = self.gateway.merge_base(&op.new_parent, &op.name)?;
            BranchState::branch_parent(&op.new_parent, base.as_str())
        };

        let mut tx = self.db.write_tx();
        let (record, exists) = tx.branch(&op.name);
        if !exists {
            return Err(AvError::Internal(format!(
                "branch '{}' disappeared from the store mid-run",
                op.name
            ))
            .into());
        }
        let mut record = record.expect("checked above").clone();
        record.parent = parent;
        tx.set_branch(record);
        tx.commit()?;

        state.cursor += 1;
        state.current_sync_ref = None;
        self.persist(state)?;
        Ok(())
    }

    fn conflict_info(&self, state: &SequencerState, headline: String, hint: String) -> ConflictInfo {
        let op = state.operations.get(state.cursor);
        ConflictInfo {
            branch: op.map(|op| op.name.clone()).unwrap_or_default(),
            onto: op.map(|op| op.new_parent.clone()).unwrap_or_default(),
            headline,
            hint,
        }
    }

    fn remaining(&self, state: &SequencerState) -> Vec<String> {
        state
            .operations
            .iter()
            .skip(state.cursor + 1)
            .map(|op| op.name.clone())
            .collect()
    }

    fn persist(&self, state: &SequencerState) -> Result<()> {
        self.gateway.write_state_file(self.kind, Some(state))
    }

    fn load_state(&self) -> Result<SequencerState> {
        match self.gateway.read_state_file::<SequencerState>(self.kind)? {
            Some(state) => Ok(state),
            None => bail!("no {} operation in progress", self.kind),
        }
    }

    /// Sanity checks before resuming from a state file
    fn verify_state(&self, state: &SequencerState) -> Result<()> {
        if state.cursor > state.operations.len() {
            return Err(AvError::Internal(format!(
                "state file cursor {} is out of range ({} operations)",
                state.cursor,
                state.operations.len()
            ))
            .into());
        }

        for op in state.operations.iter().skip(state.cursor) {
            if !self.gateway.does_branch_exist(&op.name)? {
                return Err(AvError::Internal(format!(
                    "state file references branch '{}' which no longer exists in git",
                    op.name
                ))
                .into());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{plan_amend, plan_reparent, plan_restack, RestackScope};
    use crate::store::{BranchRecord, MetadataDb, Repository};
    use crate::test_context::{commit_file, create_and_checkout_branch, init_test_repo, TestRepoContext};
    use serde_json::Map;
    use tempfile::tempdir;

    fn test_repository() -> Repository {
        Repository {
            id: "R_1".into(),
            owner: "acme".into(),
            name: "widgets".into(),
            extra: Map::new(),
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        repo: git2::Repository,
        gateway: GitGateway,
        db: MetadataDb,
    }

    /// trunk -> a -> b -> c with recorded branching points matching reality
    fn stack_fixture() -> Fixture {
        cancel::reset();
        let dir = tempdir().unwrap();
        let repo = init_test_repo(dir.path()).unwrap();
        let _ctx = TestRepoContext::new(dir.path());
        let gateway = GitGateway::new().unwrap();

        create_and_checkout_branch(&repo, "a").unwrap();
        commit_file(&repo, "a.txt", "a", "a work").unwrap();
        let a_tip = gateway.rev_parse("a").unwrap();

        create_and_checkout_branch(&repo, "b").unwrap();
        commit_file(&repo, "b.txt", "b", "b work").unwrap();
        let b_tip = gateway.rev_parse("b").unwrap();

        create_and_checkout_branch(&repo, "c").unwrap();
        commit_file(&repo, "c.txt", "c", "c work").unwrap();

        let mut db = MetadataDb::init(&gateway.metadata_dir(), test_repository()).unwrap();
        let mut tx = db.write_tx();
        tx.set_branch(BranchRecord::new("a", BranchState::trunk_parent("main")));
        tx.set_branch(BranchRecord::new(
            "b",
            BranchState::branch_parent("a", a_tip.as_str()),
        ));
        tx.set_branch(BranchRecord::new(
            "c",
            BranchState::branch_parent("b", b_tip.as_str()),
        ));
        tx.commit().unwrap();

        Fixture {
            _dir: dir,
            repo,
            gateway,
            db,
        }
    }

    #[test]
    fn test_empty_plan_is_nothing_to_do() {
        let mut f = stack_fixture();

        let mut sequencer = Sequencer::new(&f.gateway, &mut f.db, StateFileKind::Restack);
        let outcome = sequencer
            .run(Vec::new(), Control::Start, false, false, &mut NullEvents)
            .unwrap();

        assert!(matches!(outcome, SequencerOutcome::NothingToDo));
        assert!(!f.gateway.state_file_present(StateFileKind::Restack));
    }

    #[test]
    fn test_continue_without_state_fails() {
        let mut f = stack_fixture();

        let mut sequencer = Sequencer::new(&f.gateway, &mut f.db, StateFileKind::Restack);
        let result = sequencer.run(Vec::new(), Control::Continue, false, false, &mut NullEvents);

        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("no restack operation in progress"));
    }

    #[test]
    fn test_restack_after_amend_updates_heads_and_clears_state() {
        let mut f = stack_fixture();

        // Amend a: b and c are now stale
        f.gateway.checkout("a").unwrap();
        commit_file(&f.repo, "a2.txt", "a2", "a amended").unwrap();
        let a_tip = f.gateway.rev_parse("a").unwrap();

        let plan = plan_amend(f.db.read_tx().doc(), &f.gateway, "a").unwrap();
        let names: Vec<_> = plan.iter().map(|op| op.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);

        let mut sequencer = Sequencer::new(&f.gateway, &mut f.db, StateFileKind::Restack);
        let outcome = sequencer
            .run(plan, Control::Start, false, false, &mut NullEvents)
            .unwrap();
        assert!(matches!(outcome, SequencerOutcome::Done));

        // Metadata heads track the new tips
        let tx = f.db.read_tx();
        let (b, _) = tx.branch("b");
        assert_eq!(b.unwrap().parent.head, a_tip.as_str());
        let b_tip = f.gateway.rev_parse("b").unwrap();
        let (c, _) = tx.branch("c");
        assert_eq!(c.unwrap().parent.head, b_tip.as_str());

        // c is reachable from the amended a
        assert!(f.gateway.is_ancestor(a_tip.as_str(), "c").unwrap());

        // State cleared, initial branch restored
        assert!(!f.gateway.state_file_present(StateFileKind::Restack));
        assert_eq!(f.gateway.current_branch().unwrap(), "a");

        // Planner fixpoint: a fresh plan is empty
        let plan = plan_restack(f.db.read_tx().doc(), &f.gateway, "b", RestackScope::CurrentAndDescendants).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_conflict_pauses_then_continue_completes() {
        let mut f = stack_fixture();

        // Amend a with a change that conflicts with b's edit of b.txt
        f.gateway.checkout("a").unwrap();
        commit_file(&f.repo, "b.txt", "conflicting contents", "a edits b.txt").unwrap();

        let plan = plan_amend(f.db.read_tx().doc(), &f.gateway, "a").unwrap();
        assert_eq!(plan.len(), 2);

        let mut sequencer = Sequencer::new(&f.gateway, &mut f.db, StateFileKind::Restack);
        let outcome = sequencer
            .run(plan, Control::Start, false, false, &mut NullEvents)
            .unwrap();

        let info = match outcome {
            SequencerOutcome::Paused(info) => info,
            other => panic!("expected Paused, got {:?}", other),
        };
        assert_eq!(info.branch, "b");
        assert!(!info.headline.is_empty());

        // State persisted with cursor on the conflicting op
        let state: SequencerState = f
            .gateway
            .read_state_file(StateFileKind::Restack)
            .unwrap()
            .unwrap();
        assert_eq!(state.cursor, 0);
        assert_eq!(state.current_sync_ref.as_deref(), Some("b"));

        // Resolve in b's favor and continue
        std::fs::write(f.repo.workdir().unwrap().join("b.txt"), "resolved").unwrap();
        std::process::Command::new("git")
            .args(["add", "b.txt"])
            .current_dir(f.repo.workdir().unwrap())
            .output()
            .unwrap();

        let mut sequencer = Sequencer::new(&f.gateway, &mut f.db, StateFileKind::Restack);
        let outcome = sequencer
            .run(Vec::new(), Control::Continue, false, false, &mut NullEvents)
            .unwrap();
        assert!(matches!(outcome, SequencerOutcome::Done), "got {:?}", outcome);

        // Both branches restacked, state cleared
        let a_tip = f.gateway.rev_parse("a").unwrap();
        assert!(f.gateway.is_ancestor(a_tip.as_str(), "c").unwrap());
        assert!(!f.gateway.state_file_present(StateFileKind::Restack));
    }

    #[test]
    fn test_conflict_then_abort_rolls_back() {
        let mut f = stack_fixture();

        f.gateway.checkout("a").unwrap();
        commit_file(&f.repo, "b.txt", "conflicting contents", "a edits b.txt").unwrap();

        let b_tip_before = f.gateway.rev_parse("b").unwrap();
        let plan = plan_amend(f.db.read_tx().doc(), &f.gateway, "a").unwrap();

        let mut sequencer = Sequencer::new(&f.gateway, &mut f.db, StateFileKind::Restack);
        let outcome = sequencer
            .run(plan, Control::Start, false, false, &mut NullEvents)
            .unwrap();
        assert!(matches!(outcome, SequencerOutcome::Paused(_)));

        let mut sequencer = Sequencer::new(&f.gateway, &mut f.db, StateFileKind::Restack);
        let outcome = sequencer
            .run(Vec::new(), Control::Abort, false, false, &mut NullEvents)
            .unwrap();
        assert!(matches!(outcome, SequencerOutcome::Aborted));

        // b untouched, state cleared, metadata still points at the old base
        assert_eq!(f.gateway.rev_parse("b").unwrap(), b_tip_before);
        assert!(!f.gateway.state_file_present(StateFileKind::Restack));
        assert!(!f.gateway.rebase_in_progress().unwrap());
        assert_eq!(f.gateway.current_branch().unwrap(), "a");
    }

    #[test]
    fn test_conflict_then_skip_drops_commit() {
        let mut f = stack_fixture();

        f.gateway.checkout("a").unwrap();
        commit_file(&f.repo, "b.txt", "conflicting contents", "a edits b.txt").unwrap();

        let plan = plan_amend(f.db.read_tx().doc(), &f.gateway, "a").unwrap();
        let mut sequencer = Sequencer::new(&f.gateway, &mut f.db, StateFileKind::Restack);
        let outcome = sequencer
            .run(plan, Control::Start, false, false, &mut NullEvents)
            .unwrap();
        assert!(matches!(outcome, SequencerOutcome::Paused(_)));

        let mut sequencer = Sequencer::new(&f.gateway, &mut f.db, StateFileKind::Restack);
        let outcome = sequencer
            .run(Vec::new(), Control::Skip, false, false, &mut NullEvents)
            .unwrap();
        assert!(matches!(outcome, SequencerOutcome::Done), "got {:?}", outcome);

        // b's conflicting commit was dropped; b now sits at a's tip
        let a_tip = f.gateway.rev_parse("a").unwrap();
        assert_eq!(f.gateway.rev_parse("b").unwrap(), a_tip);
        assert!(!f.gateway.state_file_present(StateFileKind::Restack));
    }

    #[test]
    fn test_reparent_single_branch() {
        let mut f = stack_fixture();

        // Independent stack root x
        f.gateway.checkout("main").unwrap();
        create_and_checkout_branch(&f.repo, "x").unwrap();
        commit_file(&f.repo, "x.txt", "x", "x work").unwrap();
        let mut tx = f.db.write_tx();
        tx.set_branch(BranchRecord::new("x", BranchState::trunk_parent("main")));
        tx.commit().unwrap();

        // Move c (leaf) onto x
        let plan = plan_reparent(f.db.read_tx().doc(), &f.gateway, "c", "x").unwrap();
        assert_eq!(plan.len(), 1);

        let mut sequencer = Sequencer::new(&f.gateway, &mut f.db, StateFileKind::Restack);
        let outcome = sequencer
            .run(plan, Control::Start, false, false, &mut NullEvents)
            .unwrap();
        assert!(matches!(outcome, SequencerOutcome::Done), "got {:?}", outcome);

        let tx = f.db.read_tx();
        let (c, _) = tx.branch("c");
        let c = c.unwrap();
        assert_eq!(c.parent.name, "x");
        assert!(!c.parent.trunk);
        let expected_base = f.gateway.merge_base("x", "c").unwrap();
        assert_eq!(c.parent.head, expected_base.as_str());
        assert!(f.gateway.is_ancestor("x", "c").unwrap());
    }

    #[test]
    fn test_start_refused_while_plan_references_missing_branch() {
        let mut f = stack_fixture();

        let plan = vec![RestackOp {
            name: "ghost".into(),
            new_parent: "main".into(),
            new_trunk: true,
        }];

        let mut sequencer = Sequencer::new(&f.gateway, &mut f.db, StateFileKind::Restack);
        let result = sequencer.run(plan, Control::Start, false, false, &mut NullEvents);

        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err().downcast_ref::<AvError>(),
            Some(AvError::BranchMissing(_))
        ));
        assert!(!f.gateway.state_file_present(StateFileKind::Restack));
    }
}
