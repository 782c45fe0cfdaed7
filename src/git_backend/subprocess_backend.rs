//! Subprocess-based implementation of GitBackend.
//!
//! Uses the git CLI for every operation, so it works on any repository
//! format including reftable. Each call spawns a subprocess; the core issues
//! few enough calls per command that this stays well under interactive
//! latency.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

use super::{GitBackend, Oid, RefFormat};

pub struct SubprocessBackend {
    git_dir: PathBuf,
    workdir: PathBuf,
    ref_format: RefFormat,
}

impl SubprocessBackend {
    /// Open a repository at the given path
    pub fn open(path: &Path) -> Result<Self> {
        let output = Command::new("git")
            .args(["rev-parse", "--git-dir"])
            .current_dir(path)
            .output()
            .context("failed to find git directory")?;

        if !output.status.success() {
            anyhow::bail!("not a git repository");
        }

        let git_dir_str = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let git_dir = if Path::new(&git_dir_str).is_absolute() {
            PathBuf::from(git_dir_str)
        } else {
            path.join(git_dir_str)
        };

        let output = Command::new("git")
            .args(["rev-parse", "--show-toplevel"])
            .current_dir(path)
            .output()
            .context("failed to find working directory")?;

        if !output.status.success() {
            anyhow::bail!("not a working tree");
        }

        let workdir = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
        let ref_format = super::detect_ref_format(path)?;

        Ok(Self {
            git_dir,
            workdir,
            ref_format,
        })
    }

    fn run_git(&self, args: &[&str]) -> Result<std::process::Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("failed to run git {}", args.join(" ")))
    }

    fn run_git_success(&self, args: &[&str]) -> Result<()> {
        let output = self.run_git(args)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("git {} failed: {}", args.join(" "), stderr.trim());
        }

        Ok(())
    }

    fn run_git_stdout(&self, args: &[&str]) -> Result<String> {
        let output = self.run_git(args)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("git {} failed: {}", args.join(" "), stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl GitBackend for SubprocessBackend {
    fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn ref_format(&self) -> RefFormat {
        self.ref_format
    }

    fn current_branch(&self) -> Result<Option<String>> {
        let output = self.run_git(&["symbolic-ref", "--short", "HEAD"])?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
    }

    fn create_branch_at(&self, name: &str, at_rev: &str) -> Result<()> {
        self.run_git_success(&["branch", name, at_rev])
    }

    fn branch_exists(&self, name: &str) -> Result<bool> {
        let refname = format!("refs/heads/{}", name);
        let output = self.run_git(&["show-ref", "--verify", "--quiet", &refname])?;
        Ok(output.status.success())
    }

    fn remote_branch_exists(&self, remote: &str, name: &str) -> Result<bool> {
        let refname = format!("refs/remotes/{}/{}", remote, name);
        let output = self.run_git(&["show-ref", "--verify", "--quiet", &refname])?;
        Ok(output.status.success())
    }

    fn checkout_branch(&self, name: &str) -> Result<()> {
        self.run_git_success(&["checkout", name])
    }

    fn checkout_detached(&self, rev: &str) -> Result<()> {
        self.run_git_success(&["checkout", "--detach", rev])
    }

    fn list_branches(&self) -> Result<Vec<String>> {
        let output = self.run_git_stdout(&["for-each-ref", "--format=%(refname:short)", "refs/heads/"])?;

        Ok(output
            .lines()
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect())
    }

    fn delete_branch(&self, name: &str) -> Result<()> {
        self.run_git_success(&["branch", "-D", name])
    }

    fn rename_branch(&self, old_name: &str, new_name: &str) -> Result<()> {
        self.run_git_success(&["branch", "-m", old_name, new_name])
    }

    fn update_ref(&self, name: &str, target: &Oid, expected_old: Option<&Oid>, _log_msg: &str) -> Result<()> {
        // git update-ref has native compare-and-swap via the <old> argument
        match expected_old {
            Some(old) => self.run_git_success(&["update-ref", "--create-reflog", name, target.as_str(), old.as_str()]),
            None => self.run_git_success(&["update-ref", "--create-reflog", name, target.as_str()]),
        }
    }

    fn delete_reference(&self, name: &str) -> Result<()> {
        let output = self.run_git(&["update-ref", "-d", name])?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // Idempotent: a missing ref is fine
            if !stderr.contains("not exist") && !stderr.contains("not found") && !stderr.contains("No such ref") {
                anyhow::bail!("git update-ref -d {} failed: {}", name, stderr.trim());
            }
        }

        Ok(())
    }

    fn find_reference(&self, name: &str) -> Result<Option<Oid>> {
        let output = self.run_git(&["rev-parse", "--verify", "--quiet", name])?;

        if !output.status.success() {
            return Ok(None);
        }

        let oid = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if oid.is_empty() {
            return Ok(None);
        }

        Ok(Some(Oid::from_str_unchecked(&oid)))
    }

    fn list_references(&self, pattern: &str) -> Result<Vec<(String, Oid)>> {
        let output = self.run_git(&["for-each-ref", "--format=%(objectname) %(refname)", pattern])?;

        if !output.status.success() {
            return Ok(Vec::new());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut refs = Vec::new();

        for line in stdout.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 2 {
                refs.push((parts[1].to_string(), Oid::from_str_unchecked(parts[0])));
            }
        }

        Ok(refs)
    }

    fn rev_parse(&self, rev: &str) -> Result<Oid> {
        let spec = format!("{}^{{commit}}", rev);
        let sha = self.run_git_stdout(&["rev-parse", "--verify", &spec])?;
        Ok(Oid::from_str_unchecked(&sha))
    }

    fn merge_base(&self, a: &str, b: &str) -> Result<Oid> {
        let oid = self.run_git_stdout(&["merge-base", a, b])?;
        Ok(Oid::from_str_unchecked(&oid))
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let output = self.run_git(&["merge-base", "--is-ancestor", ancestor, descendant])?;
        Ok(output.status.success())
    }

    fn rev_list(&self, base: &str, tip: &str, first_parent: bool) -> Result<Vec<Oid>> {
        let range = format!("{}..{}", base, tip);
        let output = if first_parent {
            self.run_git_stdout(&["rev-list", "--first-parent", "--topo-order", &range])?
        } else {
            self.run_git_stdout(&["rev-list", "--topo-order", &range])?
        };

        Ok(output
            .lines()
            .filter(|s| !s.is_empty())
            .map(Oid::from_str_unchecked)
            .collect())
    }

    fn commit_subject(&self, rev: &str) -> Result<String> {
        self.run_git_stdout(&["log", "-1", "--format=%s", rev])
    }

    fn commit_message(&self, rev: &str) -> Result<String> {
        self.run_git_stdout(&["log", "-1", "--format=%B", rev])
    }

    fn commit_parent_count(&self, rev: &str) -> Result<usize> {
        let parents = self.run_git_stdout(&["log", "-1", "--format=%P", rev])?;
        Ok(parents.split_whitespace().count())
    }

    fn has_uncommitted_changes(&self) -> Result<bool> {
        let output = self.run_git_stdout(&["status", "--porcelain"])?;
        Ok(!output.is_empty())
    }

    fn has_staged_or_modified_changes(&self) -> Result<bool> {
        let output = self.run_git_stdout(&["status", "--porcelain"])?;

        for line in output.lines() {
            if !line.starts_with("??") {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn staged_tracked_files(&self) -> Result<Vec<String>> {
        let output = self.run_git_stdout(&["diff", "--cached", "--name-only"])?;

        let mut files: Vec<String> = output
            .lines()
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();
        files.sort();
        Ok(files)
    }
}
