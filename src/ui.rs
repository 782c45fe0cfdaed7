//! Terminal output and prompts.
//!
//! Glyph-prefixed lines, conflict rendering for paused operations, and thin
//! wrappers over dialoguer that degrade in non-TTY environments. All prompts
//! honor `AV_NO_PROMPT=1` (optional prompts resolve to their default) and
//! styling honors `AV_LIGHT_BG=1` (dim instead of bright accents on light
//! terminals). Neither variable affects core semantics.

use anyhow::{bail, Result};
use colored::Colorize;
use dialoguer::{theme::ColorfulTheme, Confirm, Select};
use std::io::IsTerminal;

use crate::program_name::program_name;
use crate::sequencer::ConflictInfo;

/// Check if the user asked for light-background styling.
pub fn light_background() -> bool {
    std::env::var("AV_LIGHT_BG").map(|v| v == "1").unwrap_or(false)
}

/// Check if optional prompts are suppressed.
pub fn prompts_disabled() -> bool {
    std::env::var("AV_NO_PROMPT").map(|v| v == "1").unwrap_or(false)
}

fn accent(s: &str) -> colored::ColoredString {
    if light_background() {
        s.blue().dimmed()
    } else {
        s.blue()
    }
}

pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn success_bold(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg);
}

pub fn warning(msg: &str) {
    println!("{} {}", "⚠".yellow().bold(), msg);
}

pub fn failure(msg: &str) {
    eprintln!("{} {}", "✗".red().bold(), msg);
}

pub fn step(msg: &str) {
    println!("{} {}", accent("→"), msg);
}

/// Optional confirmation: resolves to `default` in non-TTY mode or when
/// `AV_NO_PROMPT=1` is set.
pub fn confirm_optional(message: &str, default: bool) -> Result<bool> {
    if prompts_disabled() || !std::io::stdin().is_terminal() {
        return Ok(default);
    }

    Ok(Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(message)
        .default(default)
        .interact()?)
}

/// Selection prompt. Errors in non-TTY mode.
pub fn select(message: &str, items: &[&str]) -> Result<usize> {
    if !std::io::stdin().is_terminal() {
        bail!("this operation requires an interactive terminal.");
    }

    Ok(Select::with_theme(&ColorfulTheme::default())
        .with_prompt(message)
        .items(items)
        .default(0)
        .interact()?)
}

/// Render a paused-on-conflict message with the DVCS headline and hint,
/// plus the continue/skip/abort instructions.
pub fn display_conflict(info: &ConflictInfo, remaining: &[String]) {
    println!();
    warning(&format!(
        "Conflict while rebasing {} onto {}",
        info.branch.yellow(),
        info.onto.blue()
    ));

    if !info.headline.is_empty() {
        println!("  {}", info.headline);
    }
    if !info.hint.is_empty() {
        println!("  {}", info.hint.dimmed());
    }

    if !remaining.is_empty() {
        println!();
        println!("Still queued after this branch:");
        for b in remaining {
            println!("  • {}", b);
        }
    }

    println!();
    println!("Resolve the conflicts, stage the files, then run:");
    println!("  {}  to resume", format!("{} continue", program_name()).cyan());
    println!("  {}      to drop the conflicting commit", format!("{} skip", program_name()).cyan());
    println!("  {}     to roll back this operation", format!("{} abort", program_name()).cyan());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_prompts_disabled_reads_env() {
        std::env::remove_var("AV_NO_PROMPT");
        assert!(!prompts_disabled());

        std::env::set_var("AV_NO_PROMPT", "1");
        assert!(prompts_disabled());
        std::env::remove_var("AV_NO_PROMPT");
    }

    #[test]
    #[serial]
    fn test_light_background_reads_env() {
        std::env::remove_var("AV_LIGHT_BG");
        assert!(!light_background());

        std::env::set_var("AV_LIGHT_BG", "1");
        assert!(light_background());
        std::env::remove_var("AV_LIGHT_BG");
    }

    #[test]
    #[serial]
    fn test_confirm_optional_defaults_when_suppressed() {
        std::env::set_var("AV_NO_PROMPT", "1");
        assert!(confirm_optional("proceed?", true).unwrap());
        assert!(!confirm_optional("proceed?", false).unwrap());
        std::env::remove_var("AV_NO_PROMPT");
    }
}
