//! Thread-local test context for parallel test execution.
//!
//! Tests set a thread-local repository path via `TestRepoContext` instead of
//! `std::env::set_current_dir()`, which is process-wide and would force
//! serial execution. `GitGateway::new()` and `MetadataDb::open_default()`
//! consult this path when running in test mode.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

#[cfg(test)]
use anyhow::Result;

thread_local! {
    static TEST_REPO_PATH: RefCell<Option<PathBuf>> = const { RefCell::new(None) };
}

/// RAII guard for setting the test repository path in the current thread.
///
/// Clears the path on drop, including on panic. `PhantomData<*const ()>`
/// makes this `!Send` so a guard cannot leak across threads.
pub struct TestRepoContext {
    _phantom: PhantomData<*const ()>,
}

impl TestRepoContext {
    pub fn new(path: &Path) -> Self {
        TEST_REPO_PATH.with(|p| *p.borrow_mut() = Some(path.to_path_buf()));
        Self { _phantom: PhantomData }
    }
}

impl Drop for TestRepoContext {
    fn drop(&mut self) {
        TEST_REPO_PATH.with(|p| *p.borrow_mut() = None);
    }
}

/// Get the current thread-local test repository path, if set
pub(crate) fn test_repo_path() -> Option<PathBuf> {
    TEST_REPO_PATH.with(|p| p.borrow().clone())
}

/// Initialize a test repository with consistent "main" branch naming.
///
/// Creates a git repository with an initial commit on `main` (CI defaults to
/// `master` without the rename) and the `.git/av/` metadata directory.
#[cfg(test)]
pub fn init_test_repo(path: &Path) -> Result<git2::Repository> {
    use std::fs;

    let repo = git2::Repository::init(path)?;

    // Commits in CI need an identity
    let mut config = repo.config()?;
    config.set_str("user.name", "Test User")?;
    config.set_str("user.email", "test@example.com")?;
    drop(config);

    let sig = git2::Signature::now("Test User", "test@example.com")?;
    let tree_id = repo.index()?.write_tree()?;
    let tree = repo.find_tree(tree_id)?;
    repo.commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])?;
    drop(tree);

    {
        let mut branch = repo
            .find_branch("master", git2::BranchType::Local)
            .or_else(|_| repo.find_branch("main", git2::BranchType::Local))?;
        if branch.name()?.unwrap_or("") == "master" {
            branch.rename("main", false)?;
        }
    }

    fs::create_dir_all(path.join(".git").join("av"))?;

    Ok(repo)
}

/// Add a commit touching `file` on the currently checked-out branch.
#[cfg(test)]
pub fn commit_file(repo: &git2::Repository, file: &str, contents: &str, message: &str) -> Result<git2::Oid> {
    use std::fs;

    let workdir = repo.workdir().expect("test repo has a workdir");
    fs::write(workdir.join(file), contents)?;

    let mut index = repo.index()?;
    index.add_path(Path::new(file))?;
    index.write()?;

    let tree_id = index.write_tree()?;
    let tree = repo.find_tree(tree_id)?;
    let sig = git2::Signature::now("Test User", "test@example.com")?;
    let parent = repo.head()?.peel_to_commit()?;
    let oid = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])?;

    Ok(oid)
}

/// Create a branch at the current HEAD and check it out.
#[cfg(test)]
pub fn create_and_checkout_branch(repo: &git2::Repository, name: &str) -> Result<()> {
    let head = repo.head()?.peel_to_commit()?;
    repo.branch(name, &head, false)?;
    repo.set_head(&format!("refs/heads/{}", name))?;
    repo.checkout_head(Some(git2::build::CheckoutBuilder::new().safe()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_context_sets_and_clears_path() {
        let dir = tempdir().unwrap();

        assert!(test_repo_path().is_none());

        {
            let _ctx = TestRepoContext::new(dir.path());
            assert_eq!(test_repo_path(), Some(dir.path().to_path_buf()));
        }

        assert!(test_repo_path().is_none());
    }

    #[test]
    fn test_context_clears_on_panic() {
        let dir = tempdir().unwrap();

        let result = std::panic::catch_unwind(|| {
            let _ctx = TestRepoContext::new(dir.path());
            panic!("intentional panic");
        });

        assert!(result.is_err());
        assert!(test_repo_path().is_none());
    }

    #[test]
    fn test_init_test_repo_creates_main_and_metadata_dir() {
        let dir = tempdir().unwrap();
        let repo = init_test_repo(dir.path()).unwrap();

        assert!(repo.find_branch("main", git2::BranchType::Local).is_ok());
        assert!(dir.path().join(".git").join("av").exists());
    }
}
