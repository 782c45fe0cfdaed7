use anyhow::Result;
use colored::Colorize;

use crate::detect::{self, BranchPiece};
use crate::errors::AvError;
use crate::git_gateway::GitGateway;
use crate::store::MetadataDb;
use crate::ui;

/// Bring existing git branches under av's control.
///
/// With `--parent`, the given parent is recorded directly and detection is
/// skipped. Otherwise the tree detector proposes parents; `--all` adopts
/// every unambiguous proposal, the default adopts only the named (or
/// current) branch.
pub fn run(branch: Option<String>, parent: Option<String>, all: bool) -> Result<i32> {
    let gateway = GitGateway::new()?;
    let mut db = MetadataDb::open(&gateway.metadata_dir())?;

    if let Some(parent) = parent {
        let target = match branch {
            Some(branch) => branch,
            None => gateway.current_branch()?,
        };
        return adopt_with_forced_parent(&gateway, &mut db, &target, &parent);
    }

    let pieces = {
        let tx = db.read_tx();
        detect::propose_adoption(&gateway, &tx)?
    };

    if pieces.is_empty() {
        ui::success("No unadopted branches found");
        return Ok(0);
    }

    let selected: Vec<BranchPiece> = if all {
        let (ready, ambiguous): (Vec<_>, Vec<_>) = pieces.into_iter().partition(|p| p.parent.is_some());
        for piece in &ambiguous {
            ui::warning(&format!(
                "skipping '{}': no unique parent{}",
                piece.name,
                if piece.possible_parents.is_empty() {
                    String::new()
                } else {
                    format!(" (candidates: {})", piece.possible_parents.join(", "))
                }
            ));
        }
        ready
    } else {
        let target = match branch {
            Some(branch) => branch,
            None => gateway.current_branch()?,
        };
        if gateway.is_trunk(&target)? {
            return Err(AvError::Policy(format!("cannot adopt trunk branch '{}'", target)).into());
        }
        let piece = pieces.into_iter().find(|p| p.name == target).ok_or_else(|| {
            if db.read_tx().is_tracked(&target) {
                anyhow::Error::from(AvError::AlreadyAdopted(target.clone()))
            } else {
                anyhow::Error::from(AvError::BranchMissing(target.clone()))
            }
        })?;
        vec![piece]
    };

    if selected.is_empty() {
        ui::success("No adoptable branches");
        return Ok(0);
    }

    detect::commit_adoption(&gateway, &mut db, &selected)?;

    for piece in &selected {
        let parent = piece.parent.as_deref().unwrap_or_default();
        ui::success(&format!(
            "Adopted {} (parent: {}{})",
            piece.name.green(),
            parent.blue(),
            if piece.contains_merge_commit {
                ", contains a merge commit".yellow().to_string()
            } else {
                String::new()
            }
        ));
    }

    Ok(0)
}

fn adopt_with_forced_parent(gateway: &GitGateway, db: &mut MetadataDb, target: &str, parent: &str) -> Result<i32> {
    if gateway.is_trunk(target)? {
        return Err(AvError::Policy(format!("cannot adopt trunk branch '{}'", target)).into());
    }
    if !gateway.does_branch_exist(target)? {
        return Err(AvError::BranchMissing(target.to_string()).into());
    }
    if !gateway.does_branch_exist(parent)? {
        return Err(AvError::BranchMissing(parent.to_string()).into());
    }

    let parent_is_trunk = gateway.is_trunk(parent)?;
    if !parent_is_trunk && !db.read_tx().is_tracked(parent) {
        return Err(AvError::ParentNotAdopted {
            branch: target.to_string(),
            parent: parent.to_string(),
        }
        .into());
    }

    let piece = BranchPiece {
        name: target.to_string(),
        parent: Some(parent.to_string()),
        parent_is_trunk,
        parent_merge_base: Some(gateway.merge_base(parent, target)?),
        included_commits: Vec::new(),
        contains_merge_commit: false,
        possible_parents: Vec::new(),
    };

    detect::commit_adoption(gateway, db, &[piece])?;
    ui::success(&format!("Adopted {} (parent: {})", target.green(), parent.blue()));
    Ok(0)
}
