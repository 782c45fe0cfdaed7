//! On-disk schema of the metadata document (`.git/av/av.db`).
//!
//! The document is a single JSON object with camelCase keys:
//!
//! ```json
//! { "repository": { "id": "...", "owner": "...", "name": "..." },
//!   "branches": { "<name>": { "name": "...", "parent": {...},
//!                             "pullRequest": {...}, "mergeCommit": "...",
//!                             "excludeFromSyncAll": false } } }
//! ```
//!
//! Unknown fields are preserved on rewrite (`#[serde(flatten)]` catch-alls)
//! so newer versions of the tool can add fields without older versions
//! destroying them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Maximum branch name length (git's own ref-name limit)
const MAX_BRANCH_NAME_LEN: usize = 255;

/// Violations detected when committing a write transaction.
///
/// A failed commit never persists partial state; the on-disk document is
/// untouched.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid branch name '{0}'")]
    InvalidBranchName(String),

    #[error("branch '{branch}' references parent '{parent}' which is not tracked")]
    MissingParent { branch: String, parent: String },

    #[error("branch '{0}' cannot be its own parent")]
    SelfParent(String),

    #[error("branch '{branch}' participates in a parent cycle")]
    Cycle { branch: String },

    #[error("branch '{0}' has a trunk parent but a non-empty branching point")]
    TrunkWithHead(String),

    #[error("record key '{key}' does not match branch name '{name}'")]
    KeyMismatch { key: String, name: String },

    #[error("failed to persist metadata: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize metadata: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Check a short branch name against the DVCS ref-name grammar.
///
/// Conservative subset: path-like names allowed, but no leading dash or dot,
/// no `..`, no control characters, no ref-magic tokens.
pub fn validate_branch_name(name: &str) -> Result<(), StoreError> {
    static NAME_RE: OnceLock<Regex> = OnceLock::new();
    let re = NAME_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._/\-]*$").expect("branch name regex compiles")
    });

    let invalid = || StoreError::InvalidBranchName(name.to_string());

    if name.is_empty() || name.len() > MAX_BRANCH_NAME_LEN {
        return Err(invalid());
    }
    if !re.is_match(name) {
        return Err(invalid());
    }
    if name.contains("..") || name.contains("@{") || name.ends_with('/') || name.ends_with(".lock") {
        return Err(invalid());
    }

    Ok(())
}

/// Singleton record identifying the hosted repository. Immutable after init.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub id: String,
    pub owner: String,
    pub name: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Parent edge of a tracked branch.
///
/// When `trunk` is true, `name` is the trunk branch and `head` stays empty.
/// Otherwise `name` is another tracked branch and `head` records the commit
/// this branch diverges from (the branching point), updated by the sequencer
/// after every successful restack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchState {
    pub name: String,

    #[serde(default)]
    pub trunk: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub head: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BranchState {
    pub fn trunk_parent(name: &str) -> Self {
        Self {
            name: name.to_string(),
            trunk: true,
            head: String::new(),
            extra: Map::new(),
        }
    }

    pub fn branch_parent(name: &str, head: &str) -> Self {
        Self {
            name: name.to_string(),
            trunk: false,
            head: head.to_string(),
            extra: Map::new(),
        }
    }
}

/// State of the linked review artefact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrState {
    Open,
    Closed,
    Merged,
}

/// Optional pull-request linkage. Does not affect stack invariants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub id: String,
    pub number: i64,
    pub permalink: String,
    pub state: PrState,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One tracked branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchRecord {
    pub name: String,
    pub parent: BranchState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<PullRequest>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_commit: Option<String>,

    #[serde(default)]
    pub exclude_from_sync_all: bool,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BranchRecord {
    pub fn new(name: &str, parent: BranchState) -> Self {
        Self {
            name: name.to_string(),
            parent,
            pull_request: None,
            merge_commit: None,
            exclude_from_sync_all: false,
            extra: Map::new(),
        }
    }
}

/// The whole metadata document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<Repository>,

    #[serde(default)]
    pub branches: BTreeMap<String, BranchRecord>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Document {
    /// Check every store invariant. Called before any commit; a violation
    /// aborts the transaction.
    pub fn validate(&self) -> Result<(), StoreError> {
        for (key, record) in &self.branches {
            if key != &record.name {
                return Err(StoreError::KeyMismatch {
                    key: key.clone(),
                    name: record.name.clone(),
                });
            }

            validate_branch_name(&record.name)?;
            validate_branch_name(&record.parent.name)?;

            if record.parent.name == record.name {
                return Err(StoreError::SelfParent(record.name.clone()));
            }

            if record.parent.trunk {
                if !record.parent.head.is_empty() {
                    return Err(StoreError::TrunkWithHead(record.name.clone()));
                }
            } else if !self.branches.contains_key(&record.parent.name) {
                return Err(StoreError::MissingParent {
                    branch: record.name.clone(),
                    parent: record.parent.name.clone(),
                });
            }
        }

        // Every branch must reach a stack root within |branches| steps
        for name in self.branches.keys() {
            let mut current = name.as_str();
            let mut steps = 0;
            loop {
                let record = match self.branches.get(current) {
                    Some(r) => r,
                    None => break,
                };
                if record.parent.trunk {
                    break;
                }
                steps += 1;
                if steps > self.branches.len() {
                    return Err(StoreError::Cycle { branch: name.clone() });
                }
                current = record.parent.name.as_str();
            }
        }

        Ok(())
    }
}
