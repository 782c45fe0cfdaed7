//! Git backend abstraction.
//!
//! The core talks to git through the `GitBackend` trait so that ref reads,
//! rev-parsing and branch bookkeeping are independent of how the repository
//! stores its refs. Two implementations exist:
//!
//! - `Git2Backend` (libgit2) — fast native operations, "files" ref format.
//! - `SubprocessBackend` (git CLI) — works on any format including reftable.
//!
//! `create_backend()` picks the right one per repository. Multi-commit
//! operations with their own in-flight state (rebase, cherry-pick) always go
//! through the git CLI and live in `git_gateway`, not here: libgit2 has no
//! resumable sequencer, and the whole continue/skip/abort model depends on
//! git's own state directories.
//!
//! This module also defines the canonical `Oid` type used throughout av.

mod git2_backend;
mod subprocess_backend;

pub use git2_backend::Git2Backend;
pub use subprocess_backend::SubprocessBackend;

use anyhow::{Context, Result};
use std::path::Path;
use std::process::Command;

/// Git ref storage format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefFormat {
    /// Traditional loose refs + packed-refs
    Files,
    /// Binary reftable format (Git 2.45+)
    Reftable,
}

/// Git object ID (40-character hex string).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Oid(String);

impl Oid {
    /// Create an Oid from a hex string (validates format)
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != 40 {
            anyhow::bail!("invalid OID length: expected 40, got {}", s.len());
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            anyhow::bail!("invalid OID: contains non-hex characters");
        }
        Ok(Self(s.to_lowercase()))
    }

    /// Create an Oid without validation.
    ///
    /// Only for strings that came out of git itself.
    pub(crate) fn from_str_unchecked(s: &str) -> Self {
        Self(s.trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 7 chars)
    pub fn short(&self) -> &str {
        &self.0[..7.min(self.0.len())]
    }
}

impl std::fmt::Display for Oid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<git2::Oid> for Oid {
    fn from(oid: git2::Oid) -> Self {
        Self(oid.to_string())
    }
}

/// Low-level git operations the core needs.
///
/// All methods are synchronous; mutating methods may move HEAD or update the
/// working tree. Implementations map their native errors into `anyhow` with
/// enough context that the caller can surface them verbatim.
pub trait GitBackend: Send {
    /// Path to the .git directory
    fn git_dir(&self) -> &Path;

    /// Path to the working directory
    fn workdir(&self) -> &Path;

    /// The ref format this repo uses
    fn ref_format(&self) -> RefFormat;

    // Branches ---------------------------------------------------------------

    /// Current branch short name, or None when HEAD is detached
    fn current_branch(&self) -> Result<Option<String>>;

    /// Create a branch pointing at `at_rev` without checking it out
    fn create_branch_at(&self, name: &str, at_rev: &str) -> Result<()>;

    fn branch_exists(&self, name: &str) -> Result<bool>;

    fn remote_branch_exists(&self, remote: &str, name: &str) -> Result<bool>;

    /// Checkout an existing local branch (safe mode, keeps local changes)
    fn checkout_branch(&self, name: &str) -> Result<()>;

    /// Checkout a detached HEAD at the given revision
    fn checkout_detached(&self, rev: &str) -> Result<()>;

    fn list_branches(&self) -> Result<Vec<String>>;

    /// Delete a branch ref (force; the caller decides whether that is safe)
    fn delete_branch(&self, name: &str) -> Result<()>;

    fn rename_branch(&self, old_name: &str, new_name: &str) -> Result<()>;

    // Refs -------------------------------------------------------------------

    /// Create or move a ref. When `expected_old` is given the update only
    /// succeeds if the ref currently points there (compare-and-swap).
    fn update_ref(&self, name: &str, target: &Oid, expected_old: Option<&Oid>, log_msg: &str) -> Result<()>;

    /// Delete a ref; succeeds if the ref does not exist
    fn delete_reference(&self, name: &str) -> Result<()>;

    /// Resolve a fully-qualified ref to its target, None if absent
    fn find_reference(&self, name: &str) -> Result<Option<Oid>>;

    /// List refs matching a glob pattern
    fn list_references(&self, pattern: &str) -> Result<Vec<(String, Oid)>>;

    // Revisions --------------------------------------------------------------

    /// Resolve any revision expression to a commit OID
    fn rev_parse(&self, rev: &str) -> Result<Oid>;

    /// Merge base of two revisions
    fn merge_base(&self, a: &str, b: &str) -> Result<Oid>;

    /// Whether `ancestor` is an ancestor of (reachable from) `descendant`
    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool>;

    /// Commits in `base..tip`, newest first. `first_parent` restricts the
    /// walk to first parents (the shape stack operations care about).
    fn rev_list(&self, base: &str, tip: &str, first_parent: bool) -> Result<Vec<Oid>>;

    /// Subject (first message line) of a commit
    fn commit_subject(&self, rev: &str) -> Result<String>;

    /// Full message body of a commit
    fn commit_message(&self, rev: &str) -> Result<String>;

    /// Number of parents of a commit (>1 means merge commit)
    fn commit_parent_count(&self, rev: &str) -> Result<usize>;

    // Working tree -----------------------------------------------------------

    /// Any staged or unstaged change, untracked files included
    fn has_uncommitted_changes(&self) -> Result<bool>;

    /// Staged or modified tracked files (untracked files don't count)
    fn has_staged_or_modified_changes(&self) -> Result<bool>;

    /// Paths of tracked files with staged changes
    fn staged_tracked_files(&self) -> Result<Vec<String>>;
}

/// Detect the ref format of a repository
pub fn detect_ref_format(path: &Path) -> Result<RefFormat> {
    let output = Command::new("git")
        .args(["rev-parse", "--show-ref-format"])
        .current_dir(path)
        .output()
        .context("failed to detect ref format")?;

    if !output.status.success() {
        // Older git - assume files format
        return Ok(RefFormat::Files);
    }

    let format = String::from_utf8_lossy(&output.stdout);
    match format.trim() {
        "reftable" => Ok(RefFormat::Reftable),
        _ => Ok(RefFormat::Files),
    }
}

/// Create the appropriate backend for a repository
pub fn create_backend(path: &Path) -> Result<Box<dyn GitBackend>> {
    match detect_ref_format(path)? {
        RefFormat::Reftable => {
            // libgit2 doesn't support reftable
            Ok(Box::new(SubprocessBackend::open(path)?))
        }
        RefFormat::Files => match Git2Backend::open(path) {
            Ok(backend) => Ok(Box::new(backend)),
            Err(_) => Ok(Box::new(SubprocessBackend::open(path)?)),
        },
    }
}
