use anyhow::Result;
use colored::Colorize;

use crate::git_gateway::GitGateway;
use crate::store::MetadataDb;

/// Show a branch's record: parent, branching point, PR linkage, exclusion.
pub fn run(branch: Option<String>) -> Result<i32> {
    let gateway = GitGateway::new()?;
    let db = MetadataDb::open(&gateway.metadata_dir())?;

    let target = match branch {
        Some(branch) => branch,
        None => gateway.current_branch()?,
    };

    let tx = db.read_tx();
    let (record, exists) = tx.branch(&target);
    if !exists {
        if gateway.is_trunk(&target)? {
            println!("{} is the trunk", target.blue().bold());
            return Ok(0);
        }
        anyhow::bail!(
            "branch '{}' is not adopted. Run '{} adopt {}' first.",
            target,
            crate::program_name::program_name(),
            target
        );
    }
    let record = record.expect("checked above");

    println!("{}", record.name.bold());
    if record.parent.trunk {
        println!("  parent: {} {}", record.parent.name.blue(), "(trunk)".dimmed());
    } else {
        println!("  parent: {}", record.parent.name.blue());
        if !record.parent.head.is_empty() {
            println!("  branching point: {}", &record.parent.head[..7.min(record.parent.head.len())]);
        }
    }

    let children = tx.doc().children(&record.name);
    if !children.is_empty() {
        println!("  children: {}", children.join(", "));
    }

    if let Some(pr) = &record.pull_request {
        println!("  pull request: #{} ({:?})", pr.number, pr.state);
        println!("  permalink: {}", pr.permalink.dimmed());
    }
    if let Some(merge_commit) = &record.merge_commit {
        println!("  merged as: {}", &merge_commit[..7.min(merge_commit.len())]);
    }
    if record.exclude_from_sync_all {
        println!("  {} excluded from sync --all", "•".yellow());
    }

    Ok(0)
}
