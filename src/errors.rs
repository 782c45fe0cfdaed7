//! Typed error kinds for the stacked-branch core.
//!
//! Commands use `anyhow` for propagation and context, but failures the CLI
//! must react to by kind (remediation hints, exit codes) are raised as
//! `AvError` and recovered with `downcast_ref` at the top level.

use thiserror::Error;

use crate::program_name::program_name;

/// Error kinds surfaced by the core.
///
/// Dispositions follow a simple rule: `Policy` exits 127, everything else
/// exits 1. Rebase conflicts are not errors; the sequencer reports them as a
/// `Paused` outcome instead.
#[derive(Debug, Error)]
pub enum AvError {
    /// Metadata document absent.
    #[error("repository is not initialized. Run '{prog} init' first.", prog = program_name())]
    NotInitialized,

    /// An operation needs a parent branch that is not in the store.
    #[error(
        "parent branch '{parent}' of '{branch}' is not adopted.\n\
         Run '{prog} adopt {parent}' first.",
        prog = program_name()
    )]
    ParentNotAdopted { branch: String, parent: String },

    /// Proposed parent change would create a cycle.
    #[error("making '{parent}' the parent of '{branch}' would create a cycle")]
    CycleDetected { branch: String, parent: String },

    /// Named branch absent from git.
    #[error(
        "branch '{0}' does not exist in git.\n\
         Run '{prog} tidy' to reconcile metadata.",
        prog = program_name()
    )]
    BranchMissing(String),

    /// Current HEAD is not on a branch.
    #[error("HEAD is detached; checkout a branch first")]
    DetachedHead,

    /// Trying to adopt a branch that is already adopted.
    #[error("branch '{0}' is already adopted")]
    AlreadyAdopted(String),

    /// Operation requires a clean working tree.
    #[error(
        "the working tree has uncommitted changes.\n\
         Commit or stash them before running this command."
    )]
    WorkingTreeDirty,

    /// User-visible policy refusal (exit code 127).
    #[error("{0}")]
    Policy(String),

    /// Unexpected state; fail loudly.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AvError {
    /// Process exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            AvError::Policy(_) => 127,
            _ => 1,
        }
    }
}

/// Map an `anyhow::Error` to the process exit code.
///
/// Errors that are not an `AvError` get the generic failure code 1.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<AvError>().map_or(1, AvError::exit_code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_exits_127() {
        let err = AvError::Policy("renaming would orphan an open PR (use --force)".into());
        assert_eq!(err.exit_code(), 127);
    }

    #[test]
    fn test_other_kinds_exit_1() {
        assert_eq!(AvError::NotInitialized.exit_code(), 1);
        assert_eq!(AvError::DetachedHead.exit_code(), 1);
        assert_eq!(AvError::BranchMissing("x".into()).exit_code(), 1);
    }

    #[test]
    fn test_exit_code_for_downcasts() {
        let err: anyhow::Error = AvError::Policy("nope".into()).into();
        assert_eq!(exit_code_for(&err), 127);

        let err = anyhow::anyhow!("some other failure");
        assert_eq!(exit_code_for(&err), 1);
    }

    #[test]
    fn test_messages_name_the_program() {
        let err = AvError::NotInitialized;
        assert!(err.to_string().contains("av init"));

        let err = AvError::ParentNotAdopted {
            branch: "feature-2".into(),
            parent: "feature-1".into(),
        };
        assert!(err.to_string().contains("av adopt feature-1"));
    }
}
