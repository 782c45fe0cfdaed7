//! Git2 (libgit2) implementation of GitBackend.
//!
//! Only valid for repositories using the "files" ref format.

use anyhow::{Context, Result};
use git2::{BranchType, Repository};
use std::path::{Path, PathBuf};

use super::{GitBackend, Oid, RefFormat};

pub struct Git2Backend {
    repo: Repository,
    git_dir: PathBuf,
    workdir: PathBuf,
}

impl Git2Backend {
    /// Open a repository at the given path
    pub fn open(path: &Path) -> Result<Self> {
        let repo = Repository::discover(path).context("failed to open git repository")?;

        let git_dir = repo.path().to_path_buf();
        let workdir = repo.workdir().context("repository has no work tree")?.to_path_buf();

        Ok(Self { repo, git_dir, workdir })
    }

    fn git2_oid(oid: &Oid) -> Result<git2::Oid> {
        git2::Oid::from_str(oid.as_str()).context("invalid OID")
    }

    fn resolve_commit(&self, rev: &str) -> Result<git2::Commit<'_>> {
        // Branch short names resolve faster and unambiguously
        if let Ok(branch) = self.repo.find_branch(rev, BranchType::Local) {
            return branch
                .get()
                .peel_to_commit()
                .with_context(|| format!("branch '{}' does not point at a commit", rev));
        }

        self.repo
            .revparse_single(rev)
            .with_context(|| format!("failed to resolve '{}'", rev))?
            .peel_to_commit()
            .with_context(|| format!("'{}' is not a commit", rev))
    }
}

impl GitBackend for Git2Backend {
    fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn ref_format(&self) -> RefFormat {
        RefFormat::Files
    }

    fn current_branch(&self) -> Result<Option<String>> {
        let head = match self.repo.head() {
            Ok(head) => head,
            // Unborn branch counts as detached for our purposes
            Err(_) => return Ok(None),
        };

        if !head.is_branch() {
            return Ok(None);
        }

        Ok(head.shorthand().map(|s| s.to_string()))
    }

    fn create_branch_at(&self, name: &str, at_rev: &str) -> Result<()> {
        let commit = self.resolve_commit(at_rev)?;
        self.repo
            .branch(name, &commit, false)
            .with_context(|| format!("failed to create branch '{}' at '{}'", name, at_rev))?;
        Ok(())
    }

    fn branch_exists(&self, name: &str) -> Result<bool> {
        Ok(self.repo.find_branch(name, BranchType::Local).is_ok())
    }

    fn remote_branch_exists(&self, remote: &str, name: &str) -> Result<bool> {
        let refname = format!("refs/remotes/{}/{}", remote, name);
        Ok(self.repo.find_reference(&refname).is_ok())
    }

    fn checkout_branch(&self, name: &str) -> Result<()> {
        let refname = format!("refs/heads/{}", name);
        let reference = self
            .repo
            .find_reference(&refname)
            .with_context(|| format!("branch '{}' not found", name))?;
        let commit = reference.peel_to_commit().context("failed to peel reference to commit")?;
        let tree = commit.tree().context("failed to get commit tree")?;

        // Safe mode: never overwrite uncommitted changes or untracked files
        let mut checkout = git2::build::CheckoutBuilder::new();
        checkout.safe().recreate_missing(true);

        self.repo
            .checkout_tree(tree.as_object(), Some(&mut checkout))
            .with_context(|| format!("failed to checkout '{}'", name))?;
        self.repo
            .set_head(&refname)
            .with_context(|| format!("failed to set HEAD to '{}'", name))?;

        Ok(())
    }

    fn checkout_detached(&self, rev: &str) -> Result<()> {
        let commit = self.resolve_commit(rev)?;
        let tree = commit.tree().context("failed to get commit tree")?;

        let mut checkout = git2::build::CheckoutBuilder::new();
        checkout.safe().recreate_missing(true);

        self.repo
            .checkout_tree(tree.as_object(), Some(&mut checkout))
            .with_context(|| format!("failed to checkout '{}'", rev))?;
        self.repo
            .set_head_detached(commit.id())
            .with_context(|| format!("failed to detach HEAD at '{}'", rev))?;

        Ok(())
    }

    fn list_branches(&self) -> Result<Vec<String>> {
        let mut branches = Vec::new();

        for branch in self.repo.branches(Some(BranchType::Local))? {
            let (branch, _) = branch?;
            if let Some(name) = branch.name()? {
                branches.push(name.to_string());
            }
        }

        Ok(branches)
    }

    fn delete_branch(&self, name: &str) -> Result<()> {
        let mut branch = self
            .repo
            .find_branch(name, BranchType::Local)
            .with_context(|| format!("branch '{}' not found", name))?;

        branch.delete().with_context(|| format!("failed to delete branch '{}'", name))?;
        Ok(())
    }

    fn rename_branch(&self, old_name: &str, new_name: &str) -> Result<()> {
        let mut branch = self
            .repo
            .find_branch(old_name, BranchType::Local)
            .with_context(|| format!("branch '{}' not found", old_name))?;

        branch
            .rename(new_name, false)
            .with_context(|| format!("failed to rename '{}' to '{}'", old_name, new_name))?;
        Ok(())
    }

    fn update_ref(&self, name: &str, target: &Oid, expected_old: Option<&Oid>, log_msg: &str) -> Result<()> {
        let target = Self::git2_oid(target)?;

        if let Some(expected) = expected_old {
            // libgit2 has no native CAS on reference(); read-check-write is
            // fine here since the process holds the repo exclusively
            let current = self
                .repo
                .find_reference(name)
                .ok()
                .and_then(|r| r.target())
                .map(Oid::from);
            if current.as_ref() != Some(expected) {
                anyhow::bail!(
                    "ref '{}' moved: expected {}, found {}",
                    name,
                    expected.short(),
                    current.map_or_else(|| "nothing".to_string(), |o| o.short().to_string())
                );
            }
        }

        self.repo
            .reference(name, target, true, log_msg)
            .with_context(|| format!("failed to update ref '{}'", name))?;
        Ok(())
    }

    fn delete_reference(&self, name: &str) -> Result<()> {
        match self.repo.find_reference(name) {
            Ok(mut reference) => reference
                .delete()
                .with_context(|| format!("failed to delete ref '{}'", name)),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to find ref '{}'", name)),
        }
    }

    fn find_reference(&self, name: &str) -> Result<Option<Oid>> {
        match self.repo.find_reference(name) {
            Ok(reference) => {
                let resolved = reference.resolve().unwrap_or(reference);
                Ok(resolved.target().map(Oid::from))
            }
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list_references(&self, pattern: &str) -> Result<Vec<(String, Oid)>> {
        let mut refs = Vec::new();

        for reference in self.repo.references_glob(pattern)? {
            let reference = reference?;
            if let (Some(name), Some(oid)) = (reference.name(), reference.target()) {
                refs.push((name.to_string(), Oid::from(oid)));
            }
        }

        Ok(refs)
    }

    fn rev_parse(&self, rev: &str) -> Result<Oid> {
        Ok(Oid::from(self.resolve_commit(rev)?.id()))
    }

    fn merge_base(&self, a: &str, b: &str) -> Result<Oid> {
        let oid_a = self.resolve_commit(a)?.id();
        let oid_b = self.resolve_commit(b)?.id();

        let base = self
            .repo
            .merge_base(oid_a, oid_b)
            .with_context(|| format!("no merge base between '{}' and '{}'", a, b))?;

        Ok(Oid::from(base))
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let oid_ancestor = self.resolve_commit(ancestor)?.id();
        let oid_descendant = self.resolve_commit(descendant)?.id();

        match self.repo.merge_base(oid_ancestor, oid_descendant) {
            Ok(base) => Ok(base == oid_ancestor),
            Err(_) => Ok(false),
        }
    }

    fn rev_list(&self, base: &str, tip: &str, first_parent: bool) -> Result<Vec<Oid>> {
        let tip_oid = self.resolve_commit(tip)?.id();
        let base_oid = self.resolve_commit(base)?.id();

        let mut revwalk = self.repo.revwalk()?;
        revwalk.push(tip_oid)?;
        revwalk.hide(base_oid)?;
        if first_parent {
            revwalk.simplify_first_parent()?;
        }
        revwalk.set_sorting(git2::Sort::TOPOLOGICAL)?;

        let mut commits = Vec::new();
        for oid in revwalk {
            commits.push(Oid::from(oid?));
        }

        Ok(commits)
    }

    fn commit_subject(&self, rev: &str) -> Result<String> {
        let commit = self.resolve_commit(rev)?;
        Ok(commit.summary().unwrap_or("").to_string())
    }

    fn commit_message(&self, rev: &str) -> Result<String> {
        let commit = self.resolve_commit(rev)?;
        Ok(commit.message().unwrap_or("").to_string())
    }

    fn commit_parent_count(&self, rev: &str) -> Result<usize> {
        Ok(self.resolve_commit(rev)?.parent_count())
    }

    fn has_uncommitted_changes(&self) -> Result<bool> {
        let mut opts = git2::StatusOptions::new();
        opts.include_ignored(false).include_untracked(true);

        let statuses = self.repo.statuses(Some(&mut opts)).context("failed to get status")?;
        Ok(!statuses.is_empty())
    }

    fn has_staged_or_modified_changes(&self) -> Result<bool> {
        let mut opts = git2::StatusOptions::new();
        opts.include_ignored(false);

        let statuses = self.repo.statuses(Some(&mut opts))?;

        for entry in statuses.iter() {
            let status = entry.status();
            // Staged (INDEX_*) or modified tracked files; untracked excluded
            if status.intersects(
                git2::Status::INDEX_NEW
                    | git2::Status::INDEX_MODIFIED
                    | git2::Status::INDEX_DELETED
                    | git2::Status::INDEX_RENAMED
                    | git2::Status::INDEX_TYPECHANGE
                    | git2::Status::WT_MODIFIED
                    | git2::Status::WT_DELETED
                    | git2::Status::WT_RENAMED
                    | git2::Status::WT_TYPECHANGE,
            ) {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn staged_tracked_files(&self) -> Result<Vec<String>> {
        let mut opts = git2::StatusOptions::new();
        opts.include_ignored(false);

        let statuses = self.repo.statuses(Some(&mut opts))?;
        let mut files = Vec::new();

        for entry in statuses.iter() {
            let status = entry.status();
            if status.intersects(
                git2::Status::INDEX_NEW
                    | git2::Status::INDEX_MODIFIED
                    | git2::Status::INDEX_DELETED
                    | git2::Status::INDEX_RENAMED
                    | git2::Status::INDEX_TYPECHANGE,
            ) {
                if let Some(path) = entry.path() {
                    files.push(path.to_string());
                }
            }
        }

        files.sort();
        Ok(files)
    }
}
