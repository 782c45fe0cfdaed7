use clap::{Parser, Subcommand};

mod cancel;
mod commands;
mod config;
mod context;
mod detect;
mod errors;
mod git_backend;
mod git_gateway;
mod planner;
mod program_name;
mod reorder;
mod sequencer;
mod store;
#[cfg(test)]
mod test_context;
mod tidy;
mod ui;

use context::ExecutionContext;

#[derive(Parser)]
#[command(
    about = "av: engine and CLI for stacked branches",
    long_about = None,
    version,
    disable_help_subcommand = true,
    help_template = "\
{about}

{usage-heading} {usage}

Get Started:
  init        Initialize av in your repo
  adopt       Bring existing branches under av's control
  info        Show a branch's record

Manage Stacks:
  restack     Rebase branches onto their recorded parents
  sync        Restack against the updated trunk
  reparent    Move a branch onto a new parent
  amend       Restack descendants after rewriting a branch
  reorder     Edit the stack as a text plan and replay it

Recovery:
  continue    Resume an interrupted operation
  skip        Resume, dropping the conflicting commit
  abort       Cancel the interrupted operation
  tidy        Reconcile metadata with git

Maintenance:
  branch      Delete or rename tracked branches
  exclude     Exclude a branch from sync --all

Options:
  -v, --verbose  Show git commands being executed
  -n, --dry-run  Preview without executing
  -h, --help     Print help
  -V, --version  Print version

Run '{bin} <command> --help' for more information on a command.
"
)]
struct Cli {
    /// Show git commands being executed
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Preview destructive operations without executing them
    #[arg(short = 'n', long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize av in your repo
    Init {
        /// Forget all tracked branches and reinitialize
        #[arg(long)]
        reset: bool,
    },

    /// Bring existing branches under av's control
    #[command(after_help = "\
Examples:
  adopt                    Adopt the current branch (parent detected)
  adopt feature            Adopt 'feature'
  adopt feature --parent x Record 'x' as the parent, skip detection
  adopt --all              Adopt every branch with an unambiguous parent
")]
    Adopt {
        /// Branch to adopt (defaults to the current branch)
        branch: Option<String>,
        /// Record this parent instead of detecting one
        #[arg(long)]
        parent: Option<String>,
        /// Adopt every unadopted branch with a unique detected parent
        #[arg(long)]
        all: bool,
    },

    /// Rebase branches onto their recorded parents
    Restack {
        /// Branch to restack (defaults to the current branch)
        branch: Option<String>,
        /// Restack only this branch, not its descendants
        #[arg(long, conflicts_with = "all")]
        only: bool,
        /// Restack every tracked stack
        #[arg(long)]
        all: bool,
    },

    /// Restack against the updated trunk
    Sync {
        /// Sync every tracked stack (branches excluded with 'exclude' are skipped)
        #[arg(long)]
        all: bool,
        /// Re-anchor stack roots on the trunk's remote tip
        #[arg(long)]
        rebase_to_trunk: bool,
    },

    /// Move a branch onto a new parent
    Reparent {
        /// The new parent branch
        onto: String,
        /// Branch to move (defaults to the current branch)
        branch: Option<String>,
    },

    /// Restack descendants after rewriting a branch
    Amend {
        /// The rewritten branch (defaults to the current branch)
        branch: Option<String>,
    },

    /// Edit the stack as a text plan and replay it
    Reorder {
        /// Read the edited plan from a file instead of $EDITOR
        #[arg(long)]
        file: Option<String>,
        /// Print the current plan and exit
        #[arg(long)]
        preview: bool,
    },

    /// Resume an interrupted operation
    #[command(visible_alias = "cont")]
    Continue,

    /// Resume an interrupted operation, dropping the conflicting commit
    Skip,

    /// Cancel the interrupted operation and roll back
    Abort,

    /// Reconcile metadata with git (missing branches, merged PRs)
    Tidy,

    /// Delete or rename tracked branches
    Branch {
        #[command(subcommand)]
        action: BranchAction,
    },

    /// Exclude a branch (and its descendants) from sync --all
    Exclude {
        /// Branch to exclude (defaults to the current branch)
        branch: Option<String>,
        /// Re-include the branch instead
        #[arg(long)]
        clear: bool,
    },

    /// Show a branch's record
    Info {
        /// Branch to inspect (defaults to the current branch)
        branch: Option<String>,
    },
}

#[derive(Subcommand)]
enum BranchAction {
    /// Delete a branch and its record; children move to its parent
    Delete {
        name: String,
        /// Delete even if the branch has an open PR
        #[arg(long)]
        force: bool,
    },
    /// Rename a branch; children follow automatically
    Rename {
        old_name: String,
        new_name: String,
        /// Rename even if the branch has an open PR
        #[arg(long)]
        force: bool,
    },
}

fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Commands::Init { reset } => commands::init::run(reset),
        Commands::Adopt { branch, parent, all } => commands::adopt::run(branch, parent, all),
        Commands::Restack { branch, only, all } => commands::restack::run(branch, only, all),
        Commands::Sync { all, rebase_to_trunk } => commands::sync::run(all, rebase_to_trunk),
        Commands::Reparent { onto, branch } => commands::reparent::run(onto, branch),
        Commands::Amend { branch } => commands::amend::run(branch),
        Commands::Reorder { file, preview } => commands::reorder::run(file, preview),
        Commands::Continue => commands::continue_op::run(),
        Commands::Skip => commands::skip::run(),
        Commands::Abort => commands::abort::run(),
        Commands::Tidy => commands::tidy::run(),
        Commands::Branch { action } => match action {
            BranchAction::Delete { name, force } => commands::branch::delete(name, force),
            BranchAction::Rename {
                old_name,
                new_name,
                force,
            } => commands::branch::rename(old_name, new_name, force),
        },
        Commands::Exclude { branch, clear } => commands::exclude::run(branch, clear),
        Commands::Info { branch } => commands::info::run(branch),
    }
}

fn main() {
    let cli = Cli::parse();

    ExecutionContext::init(cli.verbose, cli.dry_run);
    cancel::install_handler();

    match dispatch(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            ui::failure(&format!("{:#}", err));
            std::process::exit(errors::exit_code_for(&err));
        }
    }
}
