//! Cooperative cancellation.
//!
//! Ctrl-C sets a flag; long-running components poll it between operations
//! only. An in-flight git command is never interrupted — the sequencer and
//! the reorder executor check the flag after each op completes and park
//! their state for a later `continue`.

use std::sync::atomic::{AtomicBool, Ordering};

static CANCELLED: AtomicBool = AtomicBool::new(false);

/// Install the Ctrl-C handler. Safe to call once per process.
pub fn install_handler() {
    let result = ctrlc::set_handler(|| {
        CANCELLED.store(true, Ordering::SeqCst);
        eprintln!("\nInterrupt received; stopping at the next safe point...");
    });

    // A second registration attempt is harmless
    if let Err(e) = result {
        if !matches!(e, ctrlc::Error::MultipleHandlers) {
            eprintln!("Warning: could not install interrupt handler: {}", e);
        }
    }
}

/// Whether a cancellation was requested
pub fn requested() -> bool {
    CANCELLED.load(Ordering::SeqCst)
}

#[cfg(test)]
pub fn reset() {
    CANCELLED.store(false, Ordering::SeqCst);
}
