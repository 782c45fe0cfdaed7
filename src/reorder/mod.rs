//! Interactive reorder engine.
//!
//! Converts the current downstack (stack root to the checked-out branch)
//! into an editable text plan, re-parses the user's edits, diffs them
//! against the original, and replays the result as git primitives:
//! per-branch reconstruction from the new parent's tip via cherry-pick, with
//! squash/fixup folds. Execution checkpoints to `reorder-state.json` and
//! shares the sequencer's continue/skip/abort model, since the underlying
//! cherry-pick can conflict.

mod exec;
pub mod plan;

pub use exec::{ReorderEngine, ReorderState};
pub use plan::{branch_blocks, parse_text, render_text, Cmd};

use anyhow::Result;
use std::collections::{HashMap, HashSet};

use crate::errors::AvError;
use crate::git_gateway::GitGateway;
use crate::store::Document;

/// Result of diffing an edited plan against the original.
#[derive(Debug, Clone, Default)]
pub struct PlanDiff {
    /// Branches whose stack-branch line was deleted. The caller decides per
    /// branch: orphan (keep git ref), delete (drop both), edit again, abort.
    pub removed_branches: Vec<String>,
}

/// Build the editable plan for the stack containing `current`: every branch
/// from the stack root down to `current`, each block listing its commits in
/// application order.
pub fn render_plan(gateway: &GitGateway, doc: &Document, current: &str) -> Result<Vec<Cmd>> {
    if gateway.is_trunk(current)? {
        anyhow::bail!("cannot reorder from the trunk; checkout a stack branch first");
    }
    if !doc.branches.contains_key(current) {
        anyhow::bail!(
            "branch '{}' is not adopted. Run '{} adopt {}' first.",
            current,
            crate::program_name::program_name(),
            current
        );
    }

    let mut chain = doc.previous_branches(current)?;
    chain.push(current.to_string());

    let mut plan = Vec::new();
    for branch in &chain {
        let record = doc.branches.get(branch).expect("chain branches are tracked");

        let base = if !record.parent.trunk && !record.parent.head.is_empty() {
            record.parent.head.clone()
        } else {
            gateway
                .merge_base(&record.parent.name, branch)?
                .as_str()
                .to_string()
        };

        plan.push(Cmd::StackBranch { name: branch.clone() });

        // rev_list is newest first; picks apply oldest first
        let mut commits = gateway.rev_list(&base, branch, true)?;
        commits.reverse();
        for commit in commits {
            plan.push(Cmd::Pick {
                commit: commit.short().to_string(),
                subject: gateway.commit_subject(commit.as_str())?,
            });
        }
    }

    Ok(plan)
}

/// Validate an edited plan against the original and produce the diff.
///
/// Edited plans may reorder, migrate, fold or drop the original commits and
/// remove branch blocks; they may not invent branches, invent commits, or
/// use a commit twice.
pub fn validate_edited(gateway: &GitGateway, original: &[Cmd], edited: &[Cmd]) -> Result<PlanDiff> {
    let original_branches: HashSet<String> = branch_blocks(original).into_iter().map(|(b, _)| b).collect();
    let edited_branches: Vec<String> = branch_blocks(edited).into_iter().map(|(b, _)| b).collect();

    for branch in &edited_branches {
        if !original_branches.contains(branch) {
            return Err(AvError::Policy(format!(
                "unknown branch '{}' in reorder plan; only branches from the original stack are allowed",
                branch
            ))
            .into());
        }
    }

    // Resolve the original commits once; edited tokens must map into them
    let mut original_oids: HashMap<String, String> = HashMap::new();
    for cmd in original {
        if let Some(token) = cmd.commit() {
            let oid = gateway.rev_parse(token)?;
            original_oids.insert(oid.as_str().to_string(), token.to_string());
        }
    }

    let mut used: HashSet<String> = HashSet::new();
    for cmd in edited {
        let Some(token) = cmd.commit() else { continue };
        let oid = gateway
            .rev_parse(token)
            .map_err(|_| AvError::Policy(format!("unknown commit '{}' in reorder plan", token)))?;

        if !original_oids.contains_key(oid.as_str()) {
            return Err(AvError::Policy(format!(
                "commit '{}' is not part of the stack being reordered",
                token
            ))
            .into());
        }
        if !used.insert(oid.as_str().to_string()) {
            return Err(AvError::Policy(format!(
                "commit '{}' appears more than once in the reorder plan",
                token
            ))
            .into());
        }
    }

    let edited_set: HashSet<&String> = edited_branches.iter().collect();
    let removed_branches = branch_blocks(original)
        .into_iter()
        .map(|(b, _)| b)
        .filter(|b| !edited_set.contains(b))
        .collect();

    Ok(PlanDiff { removed_branches })
}
