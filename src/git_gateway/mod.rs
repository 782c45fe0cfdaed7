//! Git operations gateway.
//!
//! Single doorway for everything the core asks of git: ref reads and
//! writes, rev-parsing, merge-base analysis, checkouts, rebase and
//! cherry-pick with resumable conflict handling, and state-file I/O under
//! the repository metadata directory (`.git/av/`).
//!
//! Low-level single-shot operations go through a `GitBackend` (git2 or
//! subprocess, auto-selected per ref format). Multi-commit operations that
//! leave in-flight state (rebase, cherry-pick) always shell out to the git
//! CLI so that `continue`/`skip`/`abort` hook into git's own state
//! directories.

mod rebase;
mod state_files;
mod status;


use anyhow::{Context, Result};
use colored::Colorize;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::context::ExecutionContext;
use crate::errors::AvError;
use crate::git_backend::{self, GitBackend, RefFormat};

pub use crate::git_backend::Oid;
pub use rebase::{CherryPickResult, RebaseResult, RebaseStatus, Resume};
pub use state_files::StateFileKind;
pub use status::{DiffResult, RepoStatus};

/// Log a git command when verbose mode is enabled
pub(crate) fn verbose_cmd(args: &[&str]) {
    if ExecutionContext::is_verbose() {
        eprintln!("  {} git {}", "[cmd]".dimmed(), args.join(" "));
    }
}

/// Unified interface to git operations.
///
/// Holds the configured remote name and the detected ref format; all core
/// components (store, planner, sequencer, reorder engine, detector) reach
/// git exclusively through this type.
pub struct GitGateway {
    backend: Box<dyn GitBackend>,
    pub(crate) git_dir: PathBuf,
    pub(crate) workdir: PathBuf,
    remote: String,
    trunk_override: Option<String>,
    #[allow(dead_code)] // Kept for reftable-specific diagnostics
    format: RefFormat,
}

impl GitGateway {
    /// Create a gateway from the current directory.
    ///
    /// In test mode, uses the thread-local test repository path set via
    /// `TestRepoContext`.
    pub fn new() -> Result<Self> {
        #[cfg(test)]
        {
            if let Some(path) = crate::test_context::test_repo_path() {
                return Self::from_path(&path);
            }

            // A test without TestRepoContext would operate on this repository
            panic!(
                "GitGateway::new() called in test without TestRepoContext!\n\
                 Use TestRepoContext in your test:\n\
                 \n\
                 let dir = tempdir()?;\n\
                 let _repo = init_test_repo(dir.path())?;\n\
                 let _ctx = TestRepoContext::new(dir.path());\n\
                 let gateway = GitGateway::new()?;"
            );
        }

        #[cfg(not(test))]
        {
            let cwd = std::env::current_dir().context("failed to get current directory")?;
            Self::from_path(&cwd)
        }
    }

    /// Create a gateway from a specific path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let backend = git_backend::create_backend(path)
            .context("not a git repository. Run this command from within a git repository.")?;
        let format = backend.ref_format();
        let git_dir = backend.git_dir().to_path_buf();
        let workdir = backend.workdir().to_path_buf();

        let config = Config::load(&workdir).unwrap_or_default();

        Ok(Self {
            backend,
            git_dir,
            workdir,
            remote: config.remote_name().to_string(),
            trunk_override: config.trunk,
            format,
        })
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// The configured remote name
    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Path of the repository metadata directory (`.git/av/`)
    pub fn metadata_dir(&self) -> PathBuf {
        self.git_dir.join("av")
    }

    /// Create the metadata directory if it is missing
    pub fn ensure_metadata_dir(&self) -> Result<PathBuf> {
        let dir = self.metadata_dir();
        if !dir.exists() {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create metadata directory {:?}", dir))?;
        }
        Ok(dir)
    }

    // Revisions and refs -----------------------------------------------------

    pub fn rev_parse(&self, rev: &str) -> Result<Oid> {
        self.backend.rev_parse(rev)
    }

    pub fn merge_base(&self, a: &str, b: &str) -> Result<Oid> {
        self.backend.merge_base(a, b)
    }

    pub fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        self.backend.is_ancestor(ancestor, descendant)
    }

    /// Commits in `base..tip`, newest first
    pub fn rev_list(&self, base: &str, tip: &str, first_parent: bool) -> Result<Vec<Oid>> {
        self.backend.rev_list(base, tip, first_parent)
    }

    pub fn commit_subject(&self, rev: &str) -> Result<String> {
        self.backend.commit_subject(rev)
    }

    pub fn commit_message(&self, rev: &str) -> Result<String> {
        self.backend.commit_message(rev)
    }

    pub fn commit_parent_count(&self, rev: &str) -> Result<usize> {
        self.backend.commit_parent_count(rev)
    }

    pub fn update_ref(&self, name: &str, target: &Oid, expected_old: Option<&Oid>, log_msg: &str) -> Result<()> {
        self.backend.update_ref(name, target, expected_old, log_msg)
    }

    pub fn delete_reference(&self, name: &str) -> Result<()> {
        self.backend.delete_reference(name)
    }

    pub fn find_reference(&self, name: &str) -> Result<Option<Oid>> {
        self.backend.find_reference(name)
    }

    pub fn list_references(&self, pattern: &str) -> Result<Vec<(String, Oid)>> {
        self.backend.list_references(pattern)
    }

    // Branches ---------------------------------------------------------------

    /// Current branch short name; `AvError::DetachedHead` when detached
    pub fn current_branch(&self) -> Result<String> {
        self.backend
            .current_branch()?
            .ok_or_else(|| AvError::DetachedHead.into())
    }

    /// Current branch short name, or None when HEAD is detached
    pub fn current_branch_opt(&self) -> Result<Option<String>> {
        self.backend.current_branch()
    }

    pub fn does_branch_exist(&self, name: &str) -> Result<bool> {
        self.backend.branch_exists(name)
    }

    pub fn does_remote_branch_exist(&self, name: &str) -> Result<bool> {
        self.backend.remote_branch_exists(&self.remote, name)
    }

    pub fn list_branches(&self) -> Result<Vec<String>> {
        self.backend.list_branches()
    }

    pub fn checkout(&self, name: &str) -> Result<()> {
        verbose_cmd(&["checkout", name]);
        self.backend.checkout_branch(name)
    }

    pub fn checkout_detached(&self, rev: &str) -> Result<()> {
        verbose_cmd(&["checkout", "--detach", rev]);
        self.backend.checkout_detached(rev)
    }

    pub fn create_branch_at(&self, name: &str, at_rev: &str) -> Result<()> {
        verbose_cmd(&["branch", name, at_rev]);
        self.backend.create_branch_at(name, at_rev)
    }

    pub fn branch_delete(&self, name: &str) -> Result<()> {
        verbose_cmd(&["branch", "-D", name]);
        self.backend.delete_branch(name)
    }

    pub fn branch_rename(&self, old_name: &str, new_name: &str) -> Result<()> {
        verbose_cmd(&["branch", "-m", old_name, new_name]);
        self.backend.rename_branch(old_name, new_name)
    }

    // Trunk detection --------------------------------------------------------

    /// The repository's default (trunk) branch.
    ///
    /// Resolution order: config override, the remote's HEAD symref, then the
    /// conventional names `main` and `master`.
    pub fn default_branch(&self) -> Result<String> {
        if let Some(trunk) = &self.trunk_override {
            return Ok(trunk.clone());
        }

        if let Some(name) = self.remote_head_branch()? {
            return Ok(name);
        }

        for candidate in ["main", "master"] {
            if self.backend.branch_exists(candidate)? {
                return Ok(candidate.to_string());
            }
        }

        anyhow::bail!(
            "could not detect the trunk branch. Set one in .av/config.toml (trunk = \"...\")."
        )
    }

    /// Whether a branch name is considered a trunk
    pub fn is_trunk(&self, name: &str) -> Result<bool> {
        Ok(self.trunk_branches()?.iter().any(|t| t == name))
    }

    /// All local branches considered trunks.
    ///
    /// The detected default branch plus the conventional names when they
    /// exist locally, deduplicated.
    pub fn trunk_branches(&self) -> Result<Vec<String>> {
        let mut trunks = Vec::new();

        if let Ok(default) = self.default_branch() {
            trunks.push(default);
        }
        for candidate in ["main", "master"] {
            if self.backend.branch_exists(candidate)? && !trunks.iter().any(|t| t == candidate) {
                trunks.push(candidate.to_string());
            }
        }

        Ok(trunks)
    }

    /// Tip of the remote-tracking ref of the trunk, if one exists
    pub fn remote_trunk_tip(&self, trunk: &str) -> Result<Option<Oid>> {
        self.backend
            .find_reference(&format!("refs/remotes/{}/{}", self.remote, trunk))
    }

    /// URL of the configured remote, if it exists
    pub fn remote_url(&self) -> Result<Option<String>> {
        let output = std::process::Command::new("git")
            .args(["remote", "get-url", &self.remote])
            .current_dir(&self.workdir)
            .output()
            .context("failed to run git remote get-url")?;

        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
    }

    /// Resolve the branch name the remote HEAD symref points at
    fn remote_head_branch(&self) -> Result<Option<String>> {
        let refname = format!("refs/remotes/{}/HEAD", self.remote);
        let output = std::process::Command::new("git")
            .args(["symbolic-ref", "--short", &refname])
            .current_dir(&self.workdir)
            .output()
            .context("failed to run git symbolic-ref")?;

        if !output.status.success() {
            return Ok(None);
        }

        let full = String::from_utf8_lossy(&output.stdout).trim().to_string();
        // "origin/main" -> "main"
        let prefix = format!("{}/", self.remote);
        Ok(full.strip_prefix(&prefix).map(|s| s.to_string()).or(Some(full)))
    }

    // Working tree preconditions ---------------------------------------------

    /// Refuse to start a rebase-like operation on a dirty working tree
    pub fn require_clean_for_rebase(&self) -> Result<()> {
        if self.backend.has_staged_or_modified_changes()? {
            return Err(AvError::WorkingTreeDirty.into());
        }
        Ok(())
    }

    pub(crate) fn backend(&self) -> &dyn GitBackend {
        self.backend.as_ref()
    }
}
