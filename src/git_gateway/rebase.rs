//! Rebase and cherry-pick operations with resumable conflict handling.
//!
//! Both operations run through the git CLI so that interrupted runs live in
//! git's own state directories (`rebase-merge`/`rebase-apply`,
//! `CHERRY_PICK_HEAD`/`sequencer`) and can be resumed by a later invocation.
//! The gateway maps those states into tagged results; a conflict is a normal
//! outcome here, not an error.

use anyhow::{bail, Context, Result};
use std::process::Stdio;

use super::{verbose_cmd, GitGateway};

/// How to enter an operation: fresh, or resuming git's in-flight state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    None,
    Continue,
    Skip,
    Abort,
}

/// Tagged outcome of a rebase or cherry-pick invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebaseStatus {
    /// Completed successfully
    Ok,
    /// Paused on conflicts requiring user resolution
    Conflict,
    /// In-flight operation was aborted
    Aborted,
}

/// Outcome of a rebase invocation.
///
/// `error_headline` and `hint` carry git's own wording verbatim; users
/// resolve conflicts outside the tool, so we never rephrase them.
#[derive(Debug, Clone)]
pub struct RebaseResult {
    pub status: RebaseStatus,
    pub error_headline: String,
    pub hint: String,
}

/// Outcome of a cherry-pick invocation
#[derive(Debug, Clone)]
pub struct CherryPickResult {
    pub status: RebaseStatus,
    pub error_headline: String,
    pub hint: String,
}

/// Pull the conflict headline out of git's output: the CONFLICT marker line
/// when present, otherwise the first error line.
fn extract_headline(stdout: &str, stderr: &str) -> String {
    for line in stdout.lines().chain(stderr.lines()) {
        if line.contains("CONFLICT") {
            return line.trim().to_string();
        }
    }
    for line in stderr.lines() {
        let line = line.trim();
        if let Some(msg) = line.strip_prefix("error: ") {
            return msg.to_string();
        }
    }
    stderr.lines().next().unwrap_or("").trim().to_string()
}

/// Collect git's "hint:" lines into a single message
fn extract_hint(stderr: &str) -> String {
    stderr
        .lines()
        .filter_map(|l| l.trim().strip_prefix("hint: "))
        .collect::<Vec<_>>()
        .join("\n")
}

impl GitGateway {
    /// Rebase `upstream..branch` onto `onto`.
    ///
    /// With `Resume::None`, runs `git rebase --onto <onto> <upstream>
    /// [branch]` (checking out `branch` when given). The resume variants
    /// drive the in-flight rebase instead and ignore the other arguments.
    ///
    /// Returns `Conflict` when git stops for resolution, `Aborted` after a
    /// successful `Resume::Abort`, and `Ok` otherwise. Failures that leave
    /// no in-flight state are real errors.
    pub fn rebase(&self, upstream: &str, onto: &str, branch: Option<&str>, resume: Resume) -> Result<RebaseResult> {
        let mut args: Vec<&str> = vec!["rebase"];
        match resume {
            Resume::None => {
                args.extend(["--onto", onto, upstream]);
                if let Some(branch) = branch {
                    args.push(branch);
                }
            }
            Resume::Continue => args.push("--continue"),
            Resume::Skip => args.push("--skip"),
            Resume::Abort => args.push("--abort"),
        }

        verbose_cmd(&args);
        let output = std::process::Command::new("git")
            .args(&args)
            // Suppress the editor and any interactive prompt
            .env("GIT_EDITOR", "true")
            .stdin(Stdio::null())
            .current_dir(&self.workdir)
            .output()
            .context("failed to run git rebase")?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() {
            let status = if resume == Resume::Abort {
                RebaseStatus::Aborted
            } else {
                RebaseStatus::Ok
            };
            return Ok(RebaseResult {
                status,
                error_headline: String::new(),
                hint: String::new(),
            });
        }

        if resume == Resume::Abort {
            bail!("git rebase --abort failed: {}", stderr.trim());
        }

        if self.rebase_in_progress()? {
            return Ok(RebaseResult {
                status: RebaseStatus::Conflict,
                error_headline: extract_headline(&stdout, &stderr),
                hint: extract_hint(&stderr),
            });
        }

        bail!("git {} failed: {}", args.join(" "), stderr.trim());
    }

    /// Cherry-pick a single commit onto HEAD, with the same resume model as
    /// `rebase`.
    pub fn cherry_pick(&self, commit: &str, resume: Resume) -> Result<CherryPickResult> {
        let mut args: Vec<&str> = vec!["cherry-pick"];
        match resume {
            Resume::None => args.push(commit),
            Resume::Continue => args.push("--continue"),
            Resume::Skip => args.push("--skip"),
            Resume::Abort => args.push("--abort"),
        }

        verbose_cmd(&args);
        let output = std::process::Command::new("git")
            .args(&args)
            .env("GIT_EDITOR", "true")
            .stdin(Stdio::null())
            .current_dir(&self.workdir)
            .output()
            .context("failed to run git cherry-pick")?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() {
            let status = if resume == Resume::Abort {
                RebaseStatus::Aborted
            } else {
                RebaseStatus::Ok
            };
            return Ok(CherryPickResult {
                status,
                error_headline: String::new(),
                hint: String::new(),
            });
        }

        if resume == Resume::Abort {
            bail!("git cherry-pick --abort failed: {}", stderr.trim());
        }

        if self.cherry_pick_in_progress()? {
            return Ok(CherryPickResult {
                status: RebaseStatus::Conflict,
                error_headline: extract_headline(&stdout, &stderr),
                hint: extract_hint(&stderr),
            });
        }

        bail!("git {} failed: {}", args.join(" "), stderr.trim());
    }

    /// Check for git's rebase state directories
    pub fn rebase_in_progress(&self) -> Result<bool> {
        let rebase_merge = self.git_dir.join("rebase-merge");
        let rebase_apply = self.git_dir.join("rebase-apply");
        Ok(rebase_merge.exists() || rebase_apply.exists())
    }

    /// Check for git's cherry-pick state
    pub fn cherry_pick_in_progress(&self) -> Result<bool> {
        let pick_head = self.git_dir.join("CHERRY_PICK_HEAD");
        let sequencer = self.git_dir.join("sequencer");
        Ok(pick_head.exists() || sequencer.exists())
    }

    /// Whether `branch` is already based on `base` (crash-recovery probe:
    /// lets a repeated step detect it has nothing to do)
    pub fn is_branch_based_on(&self, branch: &str, base: &str) -> Result<bool> {
        self.is_ancestor(base, branch)
    }

    /// `git reset --soft HEAD~<n>` (used to fold commits together)
    pub fn soft_reset(&self, count: usize) -> Result<()> {
        let target = format!("HEAD~{}", count);
        let args = ["reset", "--soft", &target];
        verbose_cmd(&args);

        let output = std::process::Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .context("failed to run git reset")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git reset --soft failed: {}", stderr.trim());
        }
        Ok(())
    }

    /// Commit the staged index with the given message
    pub fn commit_staged(&self, message: &str) -> Result<()> {
        let args = ["commit", "-m", message];
        verbose_cmd(&args);

        let output = std::process::Command::new("git")
            .args(args)
            .env("GIT_EDITOR", "true")
            .stdin(Stdio::null())
            .current_dir(&self.workdir)
            .output()
            .context("failed to run git commit")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git commit failed: {}", stderr.trim());
        }
        Ok(())
    }
}
