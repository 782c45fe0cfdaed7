//! Reorder plan commands: render to text, parse back.
//!
//! One command per line, `#` starts a comment:
//!
//! ```text
//! stack-branch <name>          begins a new branch whose parent is the
//!                              previous stack-branch (or trunk if first)
//! pick   <commit> <subject>
//! squash <commit> <subject>    fold into previous pick, concatenate messages
//! fixup  <commit> <subject>    fold into previous pick, drop the message
//! drop   <commit> <subject>
//! ```
//!
//! Within a branch block, commands appear in application order. Moving a
//! commit line into another block migrates the commit; deleting a
//! `stack-branch` line drops the branch. `squash`/`fixup` are only valid
//! after a pick in the *same* block; folding across a branch boundary is
//! rejected at parse.

use std::sync::OnceLock;

use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::AvError;

/// A single plan command.
///
/// `DeleteBranch` and `Annotate` never come out of the parser: deletions are
/// produced by diffing (after the user chooses what to do with a removed
/// branch) and annotations only decorate rendered text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "kebab-case")]
pub enum Cmd {
    StackBranch { name: String },
    Pick { commit: String, subject: String },
    Squash { commit: String, subject: String },
    Fixup { commit: String, subject: String },
    Drop { commit: String, subject: String },
    DeleteBranch { name: String, delete_git_ref: bool },
    Annotate { text: String },
}

impl Cmd {
    /// The commit token for commit-bearing commands
    pub fn commit(&self) -> Option<&str> {
        match self {
            Cmd::Pick { commit, .. }
            | Cmd::Squash { commit, .. }
            | Cmd::Fixup { commit, .. }
            | Cmd::Drop { commit, .. } => Some(commit),
            _ => None,
        }
    }
}

fn commit_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9a-f]{4,40}$").expect("commit token regex compiles"))
}

fn plan_error(line_no: usize, message: &str) -> anyhow::Error {
    AvError::Policy(format!("invalid reorder plan (line {}): {}", line_no, message)).into()
}

/// Render a plan to editable text, grammar help included.
pub fn render_text(plan: &[Cmd]) -> String {
    let mut out = String::new();
    out.push_str("# Edit the plan below, then save and close the editor.\n");
    out.push_str("#\n");
    out.push_str("# stack-branch <name>   begin a branch; its parent is the previous\n");
    out.push_str("#                       stack-branch (or the trunk for the first)\n");
    out.push_str("# pick   <commit>       apply the commit\n");
    out.push_str("# squash <commit>       fold into the previous pick, keep both messages\n");
    out.push_str("# fixup  <commit>       fold into the previous pick, drop its message\n");
    out.push_str("# drop   <commit>       remove the commit\n");
    out.push_str("#\n");
    out.push_str("# Deleting a stack-branch line removes the branch from the stack.\n");
    out.push_str("# An empty plan aborts the reorder.\n");
    out.push('\n');

    for cmd in plan {
        match cmd {
            Cmd::StackBranch { name } => {
                out.push_str(&format!("stack-branch {}\n", name));
            }
            Cmd::Pick { commit, subject } => {
                out.push_str(&format!("pick {} {}\n", commit, subject));
            }
            Cmd::Squash { commit, subject } => {
                out.push_str(&format!("squash {} {}\n", commit, subject));
            }
            Cmd::Fixup { commit, subject } => {
                out.push_str(&format!("fixup {} {}\n", commit, subject));
            }
            Cmd::Drop { commit, subject } => {
                out.push_str(&format!("drop {} {}\n", commit, subject));
            }
            Cmd::Annotate { text } => {
                out.push_str(&format!("# {}\n", text));
            }
            // Internal command, never rendered for editing
            Cmd::DeleteBranch { .. } => {}
        }
    }

    out
}

/// Parse plan text back into commands.
///
/// Violations are Policy errors (exit 127): the user edited the plan into
/// something the engine refuses to run.
pub fn parse_text(text: &str) -> Result<Vec<Cmd>> {
    let mut plan: Vec<Cmd> = Vec::new();
    let mut seen_branches: Vec<String> = Vec::new();
    // Number of picks (or folds) so far in the current block
    let mut picks_in_block = 0usize;
    let mut in_block = false;

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut parts = line.splitn(2, char::is_whitespace);
        let keyword = parts.next().unwrap_or_default();
        let rest = parts.next().unwrap_or("").trim();

        match keyword {
            "stack-branch" => {
                if rest.is_empty() {
                    return Err(plan_error(line_no, "stack-branch requires a branch name"));
                }
                if rest.split_whitespace().count() > 1 {
                    return Err(plan_error(line_no, "stack-branch takes exactly one name"));
                }
                if seen_branches.iter().any(|b| b == rest) {
                    return Err(plan_error(line_no, &format!("duplicate stack-branch '{}'", rest)));
                }
                seen_branches.push(rest.to_string());
                plan.push(Cmd::StackBranch { name: rest.to_string() });
                in_block = true;
                picks_in_block = 0;
            }
            "pick" | "squash" | "fixup" | "drop" => {
                if !in_block {
                    return Err(plan_error(
                        line_no,
                        &format!("'{}' before the first stack-branch", keyword),
                    ));
                }

                let mut rest_parts = rest.splitn(2, char::is_whitespace);
                let commit = rest_parts.next().unwrap_or_default().to_string();
                let subject = rest_parts.next().unwrap_or("").trim().to_string();

                if !commit_token_re().is_match(&commit) {
                    return Err(plan_error(
                        line_no,
                        &format!("'{}' is not a commit id", commit),
                    ));
                }

                let cmd = match keyword {
                    "pick" => {
                        picks_in_block += 1;
                        Cmd::Pick { commit, subject }
                    }
                    "squash" | "fixup" => {
                        if picks_in_block == 0 {
                            return Err(plan_error(
                                line_no,
                                &format!("'{}' must follow a pick in the same branch block", keyword),
                            ));
                        }
                        if keyword == "squash" {
                            Cmd::Squash { commit, subject }
                        } else {
                            Cmd::Fixup { commit, subject }
                        }
                    }
                    _ => Cmd::Drop { commit, subject },
                };
                plan.push(cmd);
            }
            other => {
                return Err(plan_error(line_no, &format!("unknown command '{}'", other)));
            }
        }
    }

    if plan.is_empty() {
        return Err(AvError::Policy("reorder plan is empty".into()).into());
    }

    Ok(plan)
}

/// Group a plan into per-branch blocks, in plan order.
pub fn branch_blocks(plan: &[Cmd]) -> Vec<(String, Vec<Cmd>)> {
    let mut blocks: Vec<(String, Vec<Cmd>)> = Vec::new();

    for cmd in plan {
        match cmd {
            Cmd::StackBranch { name } => blocks.push((name.clone(), Vec::new())),
            Cmd::DeleteBranch { .. } | Cmd::Annotate { .. } => {}
            other => {
                if let Some((_, cmds)) = blocks.last_mut() {
                    cmds.push(other.clone());
                }
            }
        }
    }

    blocks
}
