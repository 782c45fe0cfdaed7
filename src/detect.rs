//! Tree detector.
//!
//! Reconstructs a plausible parent/child graph among branches the store does
//! not know about, so users can adopt them. For every candidate the detector
//! walks first-parent history from the tip until it reaches the tip of
//! another known branch or a commit the trunk can reach; the walked commits
//! belong to the candidate, the stopping commit is its branching point, and
//! the stopping branch is its parent.
//!
//! Output is deterministic: candidates are processed in name order and ties
//! between equally-close parents are surfaced in `possible_parents` rather
//! than guessed.

use anyhow::Result;
use std::collections::BTreeMap;

use crate::errors::AvError;
use crate::git_gateway::{GitGateway, Oid};
use crate::store::{BranchRecord, BranchState, MetadataDb, ReadTx};

/// Walk at most this many commits from a candidate tip before giving up on
/// finding a parent (pathological histories, fresh clones of huge repos)
const MAX_WALK_DEPTH: usize = 1000;

/// Detection result for one candidate branch.
#[derive(Debug, Clone)]
pub struct BranchPiece {
    pub name: String,
    /// The unique parent, when one was found
    pub parent: Option<String>,
    /// Whether the parent is a trunk (directly or via trunk reachability)
    pub parent_is_trunk: bool,
    /// The commit where this branch meets its parent
    pub parent_merge_base: Option<Oid>,
    /// Commits owned by this branch, tip first
    pub included_commits: Vec<Oid>,
    /// The walk crossed a merge commit
    pub contains_merge_commit: bool,
    /// Equally-plausible parents when no unique one exists (sorted)
    pub possible_parents: Vec<String>,
}

/// Detect pieces for `candidates`, treating `tracked` and `trunks` (plus the
/// other candidates) as known stopping points.
pub fn detect_pieces(
    gateway: &GitGateway,
    candidates: &[String],
    tracked: &[String],
    trunks: &[String],
) -> Result<Vec<BranchPiece>> {
    // Map every known tip to the branches sitting on it. BTreeMap keeps the
    // per-oid branch lists in name order.
    let mut tips: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut known: Vec<String> = Vec::new();
    known.extend(trunks.iter().cloned());
    known.extend(tracked.iter().cloned());
    known.extend(candidates.iter().cloned());
    known.sort();
    known.dedup();

    for branch in &known {
        if let Ok(tip) = gateway.rev_parse(branch) {
            tips.entry(tip.as_str().to_string()).or_default().push(branch.clone());
        }
    }
    for branches in tips.values_mut() {
        branches.sort();
    }

    let mut sorted_candidates: Vec<String> = candidates.to_vec();
    sorted_candidates.sort();

    let mut pieces = Vec::new();
    for candidate in &sorted_candidates {
        pieces.push(detect_one(gateway, candidate, &tips, trunks)?);
    }

    Ok(pieces)
}

fn detect_one(
    gateway: &GitGateway,
    candidate: &str,
    tips: &BTreeMap<String, Vec<String>>,
    trunks: &[String],
) -> Result<BranchPiece> {
    let mut piece = BranchPiece {
        name: candidate.to_string(),
        parent: None,
        parent_is_trunk: false,
        parent_merge_base: None,
        included_commits: Vec::new(),
        contains_merge_commit: false,
        possible_parents: Vec::new(),
    };

    let tip = gateway.rev_parse(candidate)?;
    let mut current = tip.clone();

    for _ in 0..MAX_WALK_DEPTH {
        // Tip of another known branch?
        let others: Vec<String> = tips
            .get(current.as_str())
            .map(|branches| {
                branches
                    .iter()
                    .filter(|b| b.as_str() != candidate)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if !others.is_empty() {
            piece.parent_merge_base = Some(current.clone());
            if others.len() == 1 {
                let parent = others.into_iter().next().expect("length checked");
                piece.parent_is_trunk = trunks.contains(&parent);
                piece.parent = Some(parent);
            } else {
                // Equal distance: surface the tie, never guess
                piece.possible_parents = others;
            }
            return Ok(piece);
        }

        // A commit the trunk can reach belongs to the trunk
        for trunk in trunks {
            if gateway.is_ancestor(current.as_str(), trunk)? {
                piece.parent = Some(trunk.clone());
                piece.parent_is_trunk = true;
                piece.parent_merge_base = Some(current.clone());
                return Ok(piece);
            }
        }

        piece.included_commits.push(current.clone());
        if gateway.commit_parent_count(current.as_str())? > 1 {
            piece.contains_merge_commit = true;
        }

        // Step to the first parent; a root commit ends the walk
        let parent_rev = format!("{}^", current.as_str());
        match gateway.rev_parse(&parent_rev) {
            Ok(parent) => current = parent,
            Err(_) => break,
        }
    }

    // No known branch or trunk found below the tip
    Ok(piece)
}

/// Propose adoption for every local branch that is neither tracked nor a
/// trunk.
pub fn propose_adoption(gateway: &GitGateway, tx: &ReadTx<'_>) -> Result<Vec<BranchPiece>> {
    let trunks = gateway.trunk_branches()?;
    let tracked = tx.branch_names();

    let candidates: Vec<String> = gateway
        .list_branches()?
        .into_iter()
        .filter(|b| !tracked.contains(b) && !trunks.contains(b))
        .collect();

    detect_pieces(gateway, &candidates, &tracked, &trunks)
}

/// Record the selected pieces in the store, all in one transaction.
///
/// Pieces without a unique parent are refused (the caller resolves the tie
/// by forcing a parent first). Adopting a trunk or an adopted branch is
/// refused.
pub fn commit_adoption(gateway: &GitGateway, db: &mut MetadataDb, selected: &[BranchPiece]) -> Result<()> {
    let trunks = gateway.trunk_branches()?;

    let mut tx = db.write_tx();
    for piece in selected {
        if trunks.contains(&piece.name) {
            return Err(AvError::Policy(format!("cannot adopt trunk branch '{}'", piece.name)).into());
        }
        if tx.is_tracked(&piece.name) {
            return Err(AvError::AlreadyAdopted(piece.name.clone()).into());
        }

        let parent = match &piece.parent {
            Some(parent) => parent,
            None => {
                return Err(AvError::Policy(format!(
                    "no unique parent for '{}'{}; use --parent to pick one",
                    piece.name,
                    if piece.possible_parents.is_empty() {
                        String::new()
                    } else {
                        format!(" (candidates: {})", piece.possible_parents.join(", "))
                    }
                ))
                .into());
            }
        };

        if parent == &piece.name {
            return Err(AvError::Policy(format!("branch '{}' cannot be its own parent", piece.name)).into());
        }

        let base = match &piece.parent_merge_base {
            Some(base) => base.as_str().to_string(),
            None => gateway.merge_base(parent, &piece.name)?.as_str().to_string(),
        };

        let state = if piece.parent_is_trunk {
            BranchState::trunk_parent(parent)
        } else {
            BranchState::branch_parent(parent, &base)
        };
        tx.set_branch(BranchRecord::new(&piece.name, state));
    }

    tx.commit()?;
    Ok(())
}
