use anyhow::{Context, Result};
use std::io::{IsTerminal, Read, Write};

use crate::git_gateway::GitGateway;
use crate::reorder::{self, Cmd, ReorderEngine};
use crate::sequencer::SequencerOutcome;
use crate::store::{acquire_operation_lock, MetadataDb};
use crate::ui;

/// Interactively reorder the current downstack.
///
/// Renders the stack as a text plan, opens `$EDITOR` (or reads `--file`),
/// validates the edits, asks what to do with removed branches, and replays
/// the result. `--preview` only prints the plan.
pub fn run(file: Option<String>, preview: bool) -> Result<i32> {
    let gateway = GitGateway::new()?;
    let mut db = MetadataDb::open(&gateway.metadata_dir())?;

    let current = gateway.current_branch()?;
    let original = reorder::render_plan(&gateway, db.read_tx().doc(), &current)?;

    if preview {
        print!("{}", reorder::render_text(&original));
        return Ok(0);
    }

    let _lock = acquire_operation_lock(&gateway)?;
    gateway.require_clean_for_rebase()?;

    let trunk = db.read_tx().doc().trunk(&current)?;

    // Edit-validate loop: "edit" on a removed-branch prompt reopens the editor
    let mut text = reorder::render_text(&original);
    let executed = loop {
        let edited_text = match &file {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("failed to read reorder plan '{}'", path))?,
            None => edit_in_editor(&text)?,
        };

        let edited = reorder::parse_text(&edited_text)?;
        let diff = reorder::validate_edited(&gateway, &original, &edited)?;

        match resolve_removed_branches(&diff.removed_branches, file.is_some())? {
            Resolution::Proceed(mut deletions) => {
                let mut plan = edited;
                plan.append(&mut deletions);
                break plan;
            }
            Resolution::EditAgain => {
                text = edited_text;
                continue;
            }
            Resolution::Abort => {
                ui::warning("Reorder aborted; nothing changed");
                return Ok(0);
            }
        }
    };

    let outcome = {
        let mut engine = ReorderEngine::new(&gateway, &mut db);
        engine.start(executed, trunk)?
    };

    if let SequencerOutcome::Paused(info) = &outcome {
        ui::display_conflict(info, &[]);
    }
    Ok(super::report_outcome(&outcome, "Reorder"))
}

enum Resolution {
    Proceed(Vec<Cmd>),
    EditAgain,
    Abort,
}

/// Ask, per removed branch, whether to orphan it (keep the git ref), delete
/// it entirely, go back to the editor, or abort the whole reorder.
fn resolve_removed_branches(removed: &[String], non_interactive: bool) -> Result<Resolution> {
    if removed.is_empty() {
        return Ok(Resolution::Proceed(Vec::new()));
    }

    // A --file plan cannot prompt; default to the conservative choice
    if non_interactive || !std::io::stdin().is_terminal() {
        let deletions = removed
            .iter()
            .map(|name| Cmd::DeleteBranch {
                name: name.clone(),
                delete_git_ref: false,
            })
            .collect();
        for name in removed {
            ui::warning(&format!("'{}' removed from the stack; its git ref is kept", name));
        }
        return Ok(Resolution::Proceed(deletions));
    }

    let mut deletions = Vec::new();
    for name in removed {
        let choice = ui::select(
            &format!("'{}' was removed from the plan", name),
            &[
                "orphan: forget it but keep the git branch",
                "delete: forget it and delete the git branch",
                "edit: reopen the editor",
                "abort: cancel the reorder",
            ],
        )?;

        match choice {
            0 => deletions.push(Cmd::DeleteBranch {
                name: name.clone(),
                delete_git_ref: false,
            }),
            1 => deletions.push(Cmd::DeleteBranch {
                name: name.clone(),
                delete_git_ref: true,
            }),
            2 => return Ok(Resolution::EditAgain),
            _ => return Ok(Resolution::Abort),
        }
    }

    Ok(Resolution::Proceed(deletions))
}

/// Round-trip the plan text through `$EDITOR`.
fn edit_in_editor(text: &str) -> Result<String> {
    if !std::io::stdin().is_terminal() {
        anyhow::bail!(
            "reorder requires an interactive terminal.\n\
             Use --file <path> to provide an edited plan, or --preview to print the current one."
        );
    }

    let temp_path = std::env::temp_dir().join(format!("av-reorder-{}.txt", std::process::id()));
    {
        let mut temp_file = std::fs::File::create(&temp_path).context("failed to create temporary plan file")?;
        temp_file.write_all(text.as_bytes())?;
        temp_file.flush()?;
    }

    let editor = std::env::var("EDITOR")
        .or_else(|_| std::env::var("VISUAL"))
        .unwrap_or_else(|_| "vi".to_string());

    let status = std::process::Command::new(&editor)
        .arg(&temp_path)
        .status()
        .with_context(|| format!("failed to open editor '{}'", editor))?;

    if !status.success() {
        let _ = std::fs::remove_file(&temp_path);
        anyhow::bail!("editor exited with non-zero status");
    }

    let mut contents = String::new();
    std::fs::File::open(&temp_path)?.read_to_string(&mut contents)?;
    let _ = std::fs::remove_file(&temp_path);

    Ok(contents)
}
