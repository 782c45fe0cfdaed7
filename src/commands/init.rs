use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::Map;

use crate::git_gateway::GitGateway;
use crate::program_name::program_name;
use crate::store::{MetadataDb, Repository};
use crate::ui;

/// Initialize av in the current repository: create the metadata directory
/// and the metadata document with the repository record.
pub fn run(reset: bool) -> Result<i32> {
    let gateway = GitGateway::new()?;
    let metadata_dir = gateway.ensure_metadata_dir()?;

    if MetadataDb::exists(&metadata_dir) {
        if !reset {
            anyhow::bail!(
                "already initialized. Use '{} init --reset' to start over (tracked branches are forgotten).",
                program_name()
            );
        }
        std::fs::remove_file(metadata_dir.join(crate::store::DB_FILE))
            .context("failed to remove existing metadata document")?;
    }

    let repository = repository_record(&gateway)?;
    MetadataDb::init(&metadata_dir, repository.clone())?;

    let trunk = gateway.default_branch()?;
    ui::success_bold(&format!(
        "Initialized {} for {}/{} (trunk: {})",
        program_name(),
        repository.owner,
        repository.name.bold(),
        trunk.blue()
    ));
    println!(
        "Adopt existing branches with '{} adopt', or start stacking on {}.",
        program_name(),
        trunk
    );

    Ok(0)
}

/// Build the repository record from the remote URL, falling back to the
/// working directory name for remoteless repositories.
fn repository_record(gateway: &GitGateway) -> Result<Repository> {
    let (owner, name) = match gateway.remote_url()? {
        Some(url) => parse_owner_and_name(&url),
        None => (String::new(), workdir_name(gateway)),
    };

    Ok(Repository {
        id: if owner.is_empty() {
            name.clone()
        } else {
            format!("{}/{}", owner, name)
        },
        owner,
        name,
        extra: Map::new(),
    })
}

fn workdir_name(gateway: &GitGateway) -> String {
    gateway
        .workdir()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "repository".to_string())
}

/// Extract owner and repo name from the usual remote URL shapes:
/// `git@host:owner/name.git`, `https://host/owner/name.git`, `host:owner/name`.
fn parse_owner_and_name(url: &str) -> (String, String) {
    let trimmed = url.trim_end_matches('/').trim_end_matches(".git");

    // Strip scheme or scp-like host prefix
    let path = if let Some(rest) = trimmed.split_once("://").map(|(_, rest)| rest) {
        rest.split_once('/').map(|(_, path)| path).unwrap_or(rest)
    } else if let Some((_, path)) = trimmed.rsplit_once(':') {
        path
    } else {
        trimmed
    };

    let mut parts = path.rsplitn(2, '/');
    let name = parts.next().unwrap_or_default().to_string();
    let owner = parts.next().unwrap_or_default().rsplit('/').next().unwrap_or_default().to_string();

    (owner, name)
}
