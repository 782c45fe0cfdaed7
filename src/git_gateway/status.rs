//! Working-tree status and diff snapshots.

use anyhow::{Context, Result};

use super::{verbose_cmd, GitGateway, Oid};

/// Snapshot of the repository state the planner and commands consult.
#[derive(Debug, Clone)]
pub struct RepoStatus {
    /// Current branch short name, None when HEAD is detached
    pub current_branch: Option<String>,
    /// OID of HEAD, None on an unborn branch
    pub oid: Option<Oid>,
    /// No staged or modified tracked files (untracked files don't count)
    pub clean: bool,
    /// Tracked files with staged changes
    pub staged_tracked_files: Vec<String>,
}

/// Result of a diff invocation.
#[derive(Debug, Clone)]
pub struct DiffResult {
    pub empty: bool,
    pub contents: String,
}

impl GitGateway {
    /// Collect the current repository status
    pub fn status(&self) -> Result<RepoStatus> {
        let current_branch = self.current_branch_opt()?;
        let oid = self.rev_parse("HEAD").ok();
        let clean = !self.backend().has_staged_or_modified_changes()?;
        let staged_tracked_files = self.backend().staged_tracked_files()?;

        Ok(RepoStatus {
            current_branch,
            oid,
            clean,
            staged_tracked_files,
        })
    }

    /// Diff between two revisions (or the working tree when `to` is None)
    pub fn diff(&self, from: &str, to: Option<&str>) -> Result<DiffResult> {
        let mut args = vec!["diff", from];
        if let Some(to) = to {
            args.push(to);
        }

        verbose_cmd(&args);
        let output = std::process::Command::new("git")
            .args(&args)
            .current_dir(&self.workdir)
            .output()
            .context("failed to run git diff")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("git diff failed: {}", stderr.trim());
        }

        let contents = String::from_utf8_lossy(&output.stdout).to_string();
        Ok(DiffResult {
            empty: contents.trim().is_empty(),
            contents,
        })
    }
}
