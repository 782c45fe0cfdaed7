//! Reorder plan execution.
//!
//! Replays an edited plan as git primitives, one branch block at a time:
//! start detached at the parent's tip, cherry-pick each commit (folding
//! squash/fixup into their predecessor), then move the branch ref to the
//! rebuilt tip and record its new parent state in one metadata transaction.
//!
//! The whole run checkpoints to `reorder-state.json` before the first
//! command, so a conflicting cherry-pick can be resumed with the same
//! continue/skip/abort controls as the sequencer. Branch refs only move
//! when their block completes; an abort mid-block leaves that branch
//! untouched (blocks finished earlier keep their new shape).

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use super::plan::Cmd;
use crate::cancel;
use crate::errors::AvError;
use crate::git_gateway::{GitGateway, RebaseStatus, Resume, StateFileKind};
use crate::program_name::program_name;
use crate::sequencer::{ConflictInfo, Control, SequencerOutcome};
use crate::store::{BranchState, MetadataDb};

/// Checkpointed reorder state, serialized to `.git/av/reorder-state.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderState {
    /// Branch to return to on completion or abort
    pub initial_branch: String,
    /// Trunk the first block hangs off
    pub trunk: String,
    /// The executed plan (edited commands plus resolved branch deletions)
    pub plan: Vec<Cmd>,
    /// Index of the next command to execute; on a conflict it names the
    /// command still in flight
    pub cursor: usize,
    /// Branch block currently being rebuilt
    pub current_branch: Option<String>,
    /// Parent of the current block
    pub block_parent: Option<String>,
    /// Parent tip the current block was started from (its branching point)
    pub block_base: Option<String>,
    /// Name of the previously finalized block
    pub last_block: Option<String>,
}

/// Drives a reorder plan to completion.
pub struct ReorderEngine<'a> {
    gateway: &'a GitGateway,
    db: &'a mut MetadataDb,
}

impl<'a> ReorderEngine<'a> {
    pub fn new(gateway: &'a GitGateway, db: &'a mut MetadataDb) -> Self {
        Self { gateway, db }
    }

    /// Start executing an edited plan.
    pub fn start(&mut self, plan: Vec<Cmd>, trunk: String) -> Result<SequencerOutcome> {
        if plan.is_empty() {
            return Ok(SequencerOutcome::NothingToDo);
        }

        let initial_branch = self.gateway.current_branch()?;
        let mut state = ReorderState {
            initial_branch,
            trunk,
            plan,
            cursor: 0,
            current_branch: None,
            block_parent: None,
            block_base: None,
            last_block: None,
        };

        self.persist(&state)?;
        self.advance(&mut state)
    }

    /// Resume a paused reorder.
    pub fn resume(&mut self, control: Control) -> Result<SequencerOutcome> {
        let mut state = self.load_state()?;

        match control {
            Control::Start => {
                return Err(AvError::Internal("resume called with Start control".into()).into())
            }
            Control::Abort => return self.abort(state),
            Control::Continue | Control::Skip => {}
        }

        if self.gateway.cherry_pick_in_progress()? {
            let resume = if control == Control::Skip { Resume::Skip } else { Resume::Continue };
            let result = self.gateway.cherry_pick("", resume)?;
            match result.status {
                RebaseStatus::Conflict => {
                    return Ok(SequencerOutcome::Paused(self.conflict_info(&state, result.error_headline, result.hint)));
                }
                RebaseStatus::Ok => {
                    // The command at the cursor finished inside git. A skip
                    // dropped the commit, so only a completed pick folds.
                    if control == Control::Continue {
                        if let Some(cmd) = state.plan.get(state.cursor).cloned() {
                            self.fold_if_needed(&cmd)?;
                        }
                    }
                    state.cursor += 1;
                    self.persist(&state)?;
                }
                RebaseStatus::Aborted => {
                    return Err(AvError::Internal("unexpected abort status while resuming".into()).into())
                }
            }
        }

        self.advance(&mut state)
    }

    fn abort(&mut self, state: ReorderState) -> Result<SequencerOutcome> {
        if self.gateway.cherry_pick_in_progress()? {
            self.gateway.cherry_pick("", Resume::Abort)?;
        }

        self.gateway.write_state_file::<ReorderState>(StateFileKind::Reorder, None)?;
        if self.gateway.does_branch_exist(&state.initial_branch)? {
            self.gateway.checkout(&state.initial_branch)?;
        }

        Ok(SequencerOutcome::Aborted)
    }

    fn advance(&mut self, state: &mut ReorderState) -> Result<SequencerOutcome> {
        while state.cursor < state.plan.len() {
            if cancel::requested() {
                let info = ConflictInfo {
                    branch: state.current_branch.clone().unwrap_or_default(),
                    onto: String::new(),
                    headline: "reorder interrupted".to_string(),
                    hint: format!("run '{} continue' to resume", program_name()),
                };
                return Ok(SequencerOutcome::Paused(info));
            }

            let cmd = state.plan[state.cursor].clone();
            match cmd {
                Cmd::StackBranch { ref name } => {
                    self.finalize_block(state)?;
                    self.start_block(state, name)?;
                }
                Cmd::Pick { ref commit, .. } | Cmd::Squash { ref commit, .. } | Cmd::Fixup { ref commit, .. } => {
                    // Checkpoint before the pick so a crash resumes here
                    self.persist(state)?;

                    let result = self
                        .gateway
                        .cherry_pick(commit, Resume::None)
                        .with_context(|| format!("failed to cherry-pick {}", commit))?;

                    match result.status {
                        RebaseStatus::Ok => self.fold_if_needed(&cmd)?,
                        RebaseStatus::Conflict => {
                            return Ok(SequencerOutcome::Paused(self.conflict_info(
                                state,
                                result.error_headline,
                                result.hint,
                            )));
                        }
                        RebaseStatus::Aborted => {
                            return Err(AvError::Internal("unexpected abort status during cherry-pick".into()).into())
                        }
                    }
                }
                Cmd::Drop { .. } | Cmd::Annotate { .. } => {}
                Cmd::DeleteBranch { ref name, delete_git_ref } => {
                    // Deletions come after the last block
                    self.finalize_block(state)?;
                    self.delete_branch(name, delete_git_ref)?;
                }
            }

            state.cursor += 1;
            self.persist(state)?;
        }

        self.finalize_block(state)?;
        self.gateway.write_state_file::<ReorderState>(StateFileKind::Reorder, None)?;

        // Back to where the user was, or the top of the rebuilt stack if
        // that branch is gone
        if self.gateway.does_branch_exist(&state.initial_branch)? {
            self.gateway.checkout(&state.initial_branch)?;
        } else if let Some(last) = &state.last_block {
            self.gateway.checkout(last)?;
        }

        Ok(SequencerOutcome::Done)
    }

    /// Begin rebuilding `name` on top of the previous block (or the trunk).
    fn start_block(&mut self, state: &mut ReorderState, name: &str) -> Result<()> {
        if !self.gateway.does_branch_exist(name)? {
            return Err(AvError::BranchMissing(name.to_string()).into());
        }

        let parent = state.last_block.clone().unwrap_or_else(|| state.trunk.clone());
        let parent_tip = self.gateway.rev_parse(&parent)?;

        self.gateway.checkout_detached(parent_tip.as_str())?;

        state.current_branch = Some(name.to_string());
        state.block_parent = Some(parent);
        state.block_base = Some(parent_tip.as_str().to_string());
        Ok(())
    }

    /// Move the finished block's ref to HEAD and record its new parent.
    fn finalize_block(&mut self, state: &mut ReorderState) -> Result<()> {
        let Some(branch) = state.current_branch.take() else {
            return Ok(());
        };
        let parent = state
            .block_parent
            .take()
            .ok_or_else(|| AvError::Internal(format!("block '{}' has no recorded parent", branch)))?;
        let base = state
            .block_base
            .take()
            .ok_or_else(|| AvError::Internal(format!("block '{}' has no recorded base", branch)))?;

        let tip = self.gateway.rev_parse("HEAD")?;
        self.gateway
            .update_ref(&format!("refs/heads/{}", branch), &tip, None, "av reorder")?;

        let parent_state = if parent == state.trunk {
            BranchState::trunk_parent(&parent)
        } else {
            BranchState::branch_parent(&parent, &base)
        };

        let mut tx = self.db.write_tx();
        let (record, exists) = tx.branch(&branch);
        if !exists {
            return Err(AvError::Internal(format!(
                "reorder block '{}' is not in the store",
                branch
            ))
            .into());
        }
        let mut record = record.expect("checked above").clone();
        record.parent = parent_state;
        tx.set_branch(record);
        tx.commit()?;

        state.last_block = Some(branch);
        Ok(())
    }

    /// Fold a squash/fixup into its predecessor after the cherry-pick
    /// committed it: soft-reset both commits and re-commit with the merged
    /// message.
    fn fold_if_needed(&self, cmd: &Cmd) -> Result<()> {
        let squash = match cmd {
            Cmd::Squash { .. } => true,
            Cmd::Fixup { .. } => false,
            _ => return Ok(()),
        };

        let previous = self.gateway.commit_message("HEAD~1")?;
        let picked = self.gateway.commit_message("HEAD")?;

        let message = if squash {
            format!("{}\n\n{}", previous.trim_end(), picked.trim_end())
        } else {
            previous.trim_end().to_string()
        };

        self.gateway.soft_reset(2)?;
        self.gateway.commit_staged(&message)?;
        Ok(())
    }

    /// Apply a resolved branch removal: re-parent remaining children to the
    /// removed branch's former parent, drop the record, and optionally the
    /// git ref.
    fn delete_branch(&mut self, name: &str, delete_git_ref: bool) -> Result<()> {
        let mut tx = self.db.write_tx();
        let (record, exists) = tx.branch(name);
        if !exists {
            return Err(AvError::Internal(format!(
                "reorder plan deletes '{}' which is not in the store",
                name
            ))
            .into());
        }
        let former_parent = record.expect("checked above").parent.clone();

        for child in tx.doc().children(name) {
            let (child_record, _) = tx.branch(&child);
            let mut child_record = child_record.expect("child is tracked").clone();
            child_record.parent = if former_parent.trunk {
                BranchState::trunk_parent(&former_parent.name)
            } else {
                let base = self
                    .gateway
                    .merge_base(&former_parent.name, &child)
                    .map(|oid| oid.as_str().to_string())
                    .unwrap_or_default();
                BranchState::branch_parent(&former_parent.name, &base)
            };
            tx.set_branch(child_record);
        }

        tx.delete_branch(name);
        tx.commit()?;

        if delete_git_ref && self.gateway.does_branch_exist(name)? {
            self.gateway.branch_delete(name)?;
        }

        Ok(())
    }

    fn conflict_info(&self, state: &ReorderState, headline: String, hint: String) -> ConflictInfo {
        let commit = state
            .plan
            .get(state.cursor)
            .and_then(|cmd| cmd.commit())
            .unwrap_or_default()
            .to_string();

        ConflictInfo {
            branch: state.current_branch.clone().unwrap_or_default(),
            onto: commit,
            headline,
            hint,
        }
    }

    fn persist(&self, state: &ReorderState) -> Result<()> {
        self.gateway.write_state_file(StateFileKind::Reorder, Some(state))
    }

    fn load_state(&self) -> Result<ReorderState> {
        match self.gateway.read_state_file::<ReorderState>(StateFileKind::Reorder)? {
            Some(state) => Ok(state),
            None => bail!("no reorder operation in progress"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reorder::{render_plan, validate_edited};
    use crate::store::{BranchRecord, Repository};
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

    /// trunk -> auth (add login form, add logout) -> api (wire endpoint)
    fn fixture() -> Fixture {
        cancel::reset();
        let dir = tempdir().unwrap();
        let repo = init_test_repo(dir.path()).unwrap();
        let _ctx = TestRepoContext::new(dir.path());
        let gateway = GitGateway::new().unwrap();

        create_and_checkout_branch(&repo, "auth").unwrap();
        commit_file(&repo, "login.txt", "l", "add login form").unwrap();
        commit_file(&repo, "logout.txt", "o", "add logout").unwrap();
        let auth_tip = gateway.rev_parse("auth").unwrap();

        create_and_checkout_branch(&repo, "api").unwrap();
        commit_file(&repo, "api.txt", "a", "wire endpoint").unwrap();

        let mut db = MetadataDb::init(&gateway.metadata_dir(), test_repository()).unwrap();
        let mut tx = db.write_tx();
        tx.set_branch(BranchRecord::new("auth", BranchState::trunk_parent("main")));
        tx.set_branch(BranchRecord::new(
            "api",
            BranchState::branch_parent("auth", auth_tip.as_str()),
        ));
        tx.commit().unwrap();

        Fixture {
            _dir: dir,
            repo,
            gateway,
            db,
        }
    }

    fn run_plan(f: &mut Fixture, plan: Vec<Cmd>) -> SequencerOutcome {
        let mut engine = ReorderEngine::new(&f.gateway, &mut f.db);
        engine.start(plan, "main".into()).unwrap()
    }

    /// From `[SB auth, pick login-form, pick logout, pick tweak]` build a
    /// plan whose first pick conflicts (the tweak edits login.txt before it
    /// exists) while the rest applies cleanly after resolution:
    /// `[SB auth, pick tweak, pick logout, drop login-form]`.
    fn conflicting_reorder(original: &[Cmd]) -> Vec<Cmd> {
        let picks: Vec<Cmd> = original.iter().filter(|c| c.commit().is_some()).cloned().collect();
        let (login_form, logout, tweak) = (picks[0].clone(), picks[1].clone(), picks[2].clone());

        let dropped = match login_form {
            Cmd::Pick { commit, subject } => Cmd::Drop { commit, subject },
            other => panic!("expected pick, got {:?}", other),
        };

        vec![
            Cmd::StackBranch { name: "auth".into() },
            tweak,
            logout,
            dropped,
        ]
    }

    #[test]
    fn test_unchanged_plan_reproduces_stack() {
        let mut f = fixture();

        let plan = render_plan(&f.gateway, f.db.read_tx().doc(), "api").unwrap();
        let outcome = run_plan(&mut f, plan);
        assert!(matches!(outcome, SequencerOutcome::Done), "got {:?}", outcome);

        // Same shape: api on auth on main, three subjects intact
        assert!(f.gateway.is_ancestor("auth", "api").unwrap());
        assert!(f.gateway.is_ancestor("main", "auth").unwrap());
        assert_eq!(f.gateway.commit_subject("api").unwrap(), "wire endpoint");
        assert_eq!(f.gateway.commit_subject("auth").unwrap(), "add logout");
        assert!(!f.gateway.state_file_present(StateFileKind::Reorder));
        assert_eq!(f.gateway.current_branch().unwrap(), "api");
    }

    #[test]
    fn test_drop_removes_commit() {
        let mut f = fixture();

        let mut plan = render_plan(&f.gateway, f.db.read_tx().doc(), "api").unwrap();
        // Drop "add logout" (second pick of the auth block)
        let logout_idx = plan
            .iter()
            .position(|c| matches!(c, Cmd::Pick { subject, .. } if subject == "add logout"))
            .unwrap();
        if let Cmd::Pick { commit, subject } = plan[logout_idx].clone() {
            plan[logout_idx] = Cmd::Drop { commit, subject };
        }

        let outcome = run_plan(&mut f, plan);
        assert!(matches!(outcome, SequencerOutcome::Done), "got {:?}", outcome);

        assert_eq!(f.gateway.commit_subject("auth").unwrap(), "add login form");
        // api still holds its commit, rebuilt on the shortened auth
        assert_eq!(f.gateway.commit_subject("api").unwrap(), "wire endpoint");
        assert!(f.gateway.is_ancestor("auth", "api").unwrap());
    }

    #[test]
    fn test_squash_folds_messages() {
        let mut f = fixture();

        let mut plan = render_plan(&f.gateway, f.db.read_tx().doc(), "api").unwrap();
        let logout_idx = plan
            .iter()
            .position(|c| matches!(c, Cmd::Pick { subject, .. } if subject == "add logout"))
            .unwrap();
        if let Cmd::Pick { commit, subject } = plan[logout_idx].clone() {
            plan[logout_idx] = Cmd::Squash { commit, subject };
        }

        let outcome = run_plan(&mut f, plan);
        assert!(matches!(outcome, SequencerOutcome::Done), "got {:?}", outcome);

        // One commit on auth with both messages
        let commits = f.gateway.rev_list("main", "auth", true).unwrap();
        assert_eq!(commits.len(), 1);
        let message = f.gateway.commit_message("auth").unwrap();
        assert!(message.contains("add login form"), "message was: {}", message);
        assert!(message.contains("add logout"), "message was: {}", message);
    }

    #[test]
    fn test_fixup_keeps_previous_message() {
        let mut f = fixture();

        let mut plan = render_plan(&f.gateway, f.db.read_tx().doc(), "api").unwrap();
        let logout_idx = plan
            .iter()
            .position(|c| matches!(c, Cmd::Pick { subject, .. } if subject == "add logout"))
            .unwrap();
        if let Cmd::Pick { commit, subject } = plan[logout_idx].clone() {
            plan[logout_idx] = Cmd::Fixup { commit, subject };
        }

        let outcome = run_plan(&mut f, plan);
        assert!(matches!(outcome, SequencerOutcome::Done), "got {:?}", outcome);

        let commits = f.gateway.rev_list("main", "auth", true).unwrap();
        assert_eq!(commits.len(), 1);
        let message = f.gateway.commit_message("auth").unwrap();
        assert!(message.contains("add login form"));
        assert!(!message.contains("add logout"), "message was: {}", message);
        // The folded tree still contains both files
        assert!(f
            .repo
            .revparse_single("auth")
            .unwrap()
            .peel_to_commit()
            .unwrap()
            .tree()
            .unwrap()
            .get_name("logout.txt")
            .is_some());
    }

    #[test]
    fn test_commit_migration_between_blocks() {
        let mut f = fixture();

        let original = render_plan(&f.gateway, f.db.read_tx().doc(), "api").unwrap();
        // Move "add logout" from auth into api
        let logout = original
            .iter()
            .find(|c| matches!(c, Cmd::Pick { subject, .. } if subject == "add logout"))
            .unwrap()
            .clone();
        let mut edited: Vec<Cmd> = original
            .iter()
            .filter(|c| **c != logout)
            .cloned()
            .collect();
        edited.push(logout);

        validate_edited(&f.gateway, &original, &edited).unwrap();
        let outcome = run_plan(&mut f, edited);
        assert!(matches!(outcome, SequencerOutcome::Done), "got {:?}", outcome);

        // auth has one commit, api two (endpoint then logout)
        assert_eq!(f.gateway.rev_list("main", "auth", true).unwrap().len(), 1);
        let api_commits = f.gateway.rev_list("auth", "api", true).unwrap();
        assert_eq!(api_commits.len(), 2);
        assert_eq!(f.gateway.commit_subject("api").unwrap(), "add logout");
    }

    #[test]
    fn test_orphan_keeps_git_ref_and_reparents_children() {
        let mut f = fixture();

        let original = render_plan(&f.gateway, f.db.read_tx().doc(), "api").unwrap();
        // Remove the auth block; keep its git ref (orphan)
        let blocks = crate::reorder::branch_blocks(&original);
        let mut edited = vec![Cmd::StackBranch { name: "api".into() }];
        edited.extend(blocks[1].1.clone());
        edited.push(Cmd::DeleteBranch {
            name: "auth".into(),
            delete_git_ref: false,
        });

        let outcome = run_plan(&mut f, edited);
        assert!(matches!(outcome, SequencerOutcome::Done), "got {:?}", outcome);

        // Record gone, ref kept
        assert!(!f.db.read_tx().is_tracked("auth"));
        assert!(f.gateway.does_branch_exist("auth").unwrap());

        // api became a stack root directly on main
        let tx = f.db.read_tx();
        let (api, _) = tx.branch("api");
        let api = api.unwrap();
        assert_eq!(api.parent.name, "main");
        assert!(api.parent.trunk);
        assert!(f.gateway.is_ancestor("main", "api").unwrap());
    }

    #[test]
    fn test_delete_branch_removes_git_ref_too() {
        let mut f = fixture();

        let original = render_plan(&f.gateway, f.db.read_tx().doc(), "api").unwrap();
        let blocks = crate::reorder::branch_blocks(&original);
        let mut edited = vec![Cmd::StackBranch { name: "api".into() }];
        edited.extend(blocks[1].1.clone());
        edited.push(Cmd::DeleteBranch {
            name: "auth".into(),
            delete_git_ref: true,
        });

        let outcome = run_plan(&mut f, edited);
        assert!(matches!(outcome, SequencerOutcome::Done), "got {:?}", outcome);

        assert!(!f.db.read_tx().is_tracked("auth"));
        assert!(!f.gateway.does_branch_exist("auth").unwrap());
    }

    #[test]
    fn test_conflict_pauses_and_continue_finishes() {
        let mut f = fixture();

        // Reorder auth's two commits so the second edit of login.txt applies
        // first; make them actually conflict by touching the same file
        f.gateway.checkout("auth").unwrap();
        commit_file(&f.repo, "login.txt", "l2", "tweak login copy").unwrap();

        let original = render_plan(&f.gateway, f.db.read_tx().doc(), "auth").unwrap();
        let edited = conflicting_reorder(&original);
        validate_edited(&f.gateway, &original, &edited).unwrap();

        let outcome = {
            let mut engine = ReorderEngine::new(&f.gateway, &mut f.db);
            engine.start(edited, "main".into()).unwrap()
        };
        let info = match outcome {
            SequencerOutcome::Paused(info) => info,
            other => panic!("expected Paused, got {:?}", other),
        };
        assert_eq!(info.branch, "auth");
        assert!(f.gateway.state_file_present(StateFileKind::Reorder));

        // Resolve and continue
        std::fs::write(f.repo.workdir().unwrap().join("login.txt"), "resolved").unwrap();
        std::process::Command::new("git")
            .args(["add", "login.txt"])
            .current_dir(f.repo.workdir().unwrap())
            .output()
            .unwrap();

        let outcome = {
            let mut engine = ReorderEngine::new(&f.gateway, &mut f.db);
            engine.resume(Control::Continue).unwrap()
        };
        assert!(matches!(outcome, SequencerOutcome::Done), "got {:?}", outcome);
        assert!(!f.gateway.state_file_present(StateFileKind::Reorder));
    }

    #[test]
    fn test_conflict_then_abort_restores_refs() {
        let mut f = fixture();

        f.gateway.checkout("auth").unwrap();
        commit_file(&f.repo, "login.txt", "l2", "tweak login copy").unwrap();
        let auth_tip_before = f.gateway.rev_parse("auth").unwrap();

        let original = render_plan(&f.gateway, f.db.read_tx().doc(), "auth").unwrap();
        let edited = conflicting_reorder(&original);

        let outcome = {
            let mut engine = ReorderEngine::new(&f.gateway, &mut f.db);
            engine.start(edited, "main".into()).unwrap()
        };
        assert!(matches!(outcome, SequencerOutcome::Paused(_)));

        let outcome = {
            let mut engine = ReorderEngine::new(&f.gateway, &mut f.db);
            engine.resume(Control::Abort).unwrap()
        };
        assert!(matches!(outcome, SequencerOutcome::Aborted));

        // The conflicting block never finalized: auth is untouched
        assert_eq!(f.gateway.rev_parse("auth").unwrap(), auth_tip_before);
        assert!(!f.gateway.state_file_present(StateFileKind::Reorder));
        assert_eq!(f.gateway.current_branch().unwrap(), "auth");
    }

    #[test]
    fn test_resume_without_state_fails() {
        let mut f = fixture();

        let mut engine = ReorderEngine::new(&f.gateway, &mut f.db);
        let result = engine.resume(Control::Continue);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("no reorder operation in progress"));
    }
}
