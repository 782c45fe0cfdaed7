//! Execution context for the av CLI.
//!
//! Provides thread-local storage for global flags like --verbose and
//! --dry-run so they don't have to be threaded through every function
//! signature. The core is single-threaded; commands initialize the context
//! once at startup and read it through the associated functions.

use std::cell::RefCell;

thread_local! {
    static CONTEXT: RefCell<ExecutionContext> = RefCell::new(ExecutionContext::default());
}

/// Global execution context for the current CLI invocation
#[derive(Clone, Copy, Default)]
pub struct ExecutionContext {
    /// Show git commands being executed
    pub verbose: bool,
    /// Preview operations without executing them
    pub dry_run: bool,
}

impl ExecutionContext {
    /// Initialize the thread-local context. Called once from main.
    pub fn init(verbose: bool, dry_run: bool) {
        CONTEXT.with(|ctx| {
            *ctx.borrow_mut() = ExecutionContext { verbose, dry_run };
        });
    }

    /// Check if verbose mode is enabled
    pub fn is_verbose() -> bool {
        CONTEXT.with(|ctx| ctx.borrow().verbose)
    }

    /// Check if dry-run mode is enabled
    pub fn is_dry_run() -> bool {
        CONTEXT.with(|ctx| ctx.borrow().dry_run)
    }
}
