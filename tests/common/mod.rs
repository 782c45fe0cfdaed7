use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

/// Path to the av binary under test
pub fn av_binary() -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("target");
    path.push("debug");
    path.push("av");
    path
}

/// Run av in a repository and return the output
pub fn run_av(dir: &Path, args: &[&str]) -> Result<Output> {
    Ok(Command::new(av_binary())
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .env("AV_NO_PROMPT", "1")
        .output()?)
}

/// Run git directly (bypassing av)
pub fn run_git(dir: &Path, args: &[&str]) -> Result<Output> {
    Ok(Command::new("git").args(args).current_dir(dir).output()?)
}

/// Initialize a test repository on `main` with an initial commit and run
/// `av init`.
#[allow(dead_code)]
pub fn init_test_repo(dir: &Path) -> Result<()> {
    run_git(dir, &["init", "--initial-branch=main"])?;
    run_git(dir, &["config", "user.name", "Test User"])?;
    run_git(dir, &["config", "user.email", "test@example.com"])?;
    // Editors must never block tests
    run_git(dir, &["config", "core.editor", "true"])?;
    run_git(dir, &["config", "sequence.editor", "true"])?;

    fs::write(dir.join("README.md"), "# Test Repo\n")?;
    run_git(dir, &["add", "."])?;
    run_git(dir, &["commit", "-m", "Initial commit"])?;

    let output = run_av(dir, &["init"])?;
    anyhow::ensure!(
        output.status.success(),
        "av init failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    Ok(())
}

/// Commit a file on the current branch
#[allow(dead_code)]
pub fn commit_file(dir: &Path, file: &str, contents: &str, message: &str) -> Result<()> {
    fs::write(dir.join(file), contents)?;
    run_git(dir, &["add", file])?;
    let output = run_git(dir, &["commit", "-m", message])?;
    anyhow::ensure!(
        output.status.success(),
        "git commit failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(())
}

/// Create a branch at HEAD and check it out
#[allow(dead_code)]
pub fn create_branch(dir: &Path, name: &str) -> Result<()> {
    let output = run_git(dir, &["checkout", "-b", name])?;
    anyhow::ensure!(
        output.status.success(),
        "git checkout -b failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(())
}

#[allow(dead_code)]
pub fn checkout(dir: &Path, name: &str) -> Result<()> {
    let output = run_git(dir, &["checkout", name])?;
    anyhow::ensure!(
        output.status.success(),
        "git checkout failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(())
}

/// Current branch short name
#[allow(dead_code)]
pub fn current_branch(dir: &Path) -> Result<String> {
    let output = run_git(dir, &["branch", "--show-current"])?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Commit hash of a rev
#[allow(dead_code)]
pub fn rev_parse(dir: &Path, rev: &str) -> Result<String> {
    let output = run_git(dir, &["rev-parse", rev])?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Whether `ancestor` is an ancestor of `descendant`
#[allow(dead_code)]
pub fn is_ancestor(dir: &Path, ancestor: &str, descendant: &str) -> Result<bool> {
    let output = run_git(dir, &["merge-base", "--is-ancestor", ancestor, descendant])?;
    Ok(output.status.success())
}

/// Whether a local branch exists
#[allow(dead_code)]
pub fn branch_exists(dir: &Path, name: &str) -> Result<bool> {
    let output = run_git(dir, &["branch", "--list", name])?;
    Ok(!String::from_utf8_lossy(&output.stdout).trim().is_empty())
}

/// Parse the metadata document
#[allow(dead_code)]
pub fn read_db(dir: &Path) -> Result<serde_json::Value> {
    let contents = fs::read_to_string(dir.join(".git/av/av.db"))?;
    Ok(serde_json::from_str(&contents)?)
}

/// Path of a state file
#[allow(dead_code)]
pub fn state_file(dir: &Path, name: &str) -> PathBuf {
    dir.join(".git/av").join(name)
}

/// Build the standard stack used across tests: trunk -> a -> b, each with
/// one commit, both adopted.
#[allow(dead_code)]
pub fn build_linear_stack(dir: &Path) -> Result<()> {
    create_branch(dir, "a")?;
    commit_file(dir, "a.txt", "a", "a work")?;
    let output = run_av(dir, &["adopt", "a", "--parent", "main"])?;
    anyhow::ensure!(output.status.success(), "adopt a failed");

    create_branch(dir, "b")?;
    commit_file(dir, "b.txt", "b", "b work")?;
    let output = run_av(dir, &["adopt", "b", "--parent", "a"])?;
    anyhow::ensure!(output.status.success(), "adopt b failed");

    Ok(())
}
