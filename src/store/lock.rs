//! Exclusive operation lock.
//!
//! Prevents two av processes from mutating the same repository at once. The
//! working tree, the git index, the metadata document and the state files
//! are all process-exclusive; this lock is the single gate in front of them.
//! Held for the duration of multi-step operations and released on drop.

use anyhow::{bail, Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::git_gateway::GitGateway;
use crate::program_name::program_name;

/// Lock file name inside the metadata directory
const LOCK_FILE: &str = "operation.lock";

/// A lock whose holder PID is dead still blocks until it is at least this
/// old, to avoid racing a process that just started.
const STALE_LOCK_AGE_SECS: u64 = 300;

/// An exclusive lock on av operations. Released when dropped.
#[derive(Debug)]
pub struct OperationLock {
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
}

impl OperationLock {
    /// Acquire the lock under the given metadata directory.
    ///
    /// Stale locks (dead holder, old enough) are cleaned up automatically.
    ///
    /// # Errors
    /// Fails when another live av process holds the lock.
    pub fn acquire(metadata_dir: &Path) -> Result<Self> {
        if !metadata_dir.exists() {
            fs::create_dir_all(metadata_dir)?;
        }

        let lock_path = metadata_dir.join(LOCK_FILE);

        match Self::try_acquire_lock(&lock_path) {
            Ok(lock) => Ok(lock),
            Err(first_error) => {
                if Self::is_lock_stale(&lock_path)? {
                    eprintln!("Cleaning up stale lock from crashed process...");
                    if let Err(e) = fs::remove_file(&lock_path) {
                        eprintln!("Warning: could not remove stale lock: {}", e);
                    }
                    Self::try_acquire_lock(&lock_path)
                } else {
                    Err(first_error)
                }
            }
        }
    }

    fn try_acquire_lock(lock_path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(lock_path)
            .with_context(|| format!("failed to create lock file at {:?}", lock_path))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                let mut writer = file.try_clone()?;
                let timestamp = SystemTime::now()
                    .duration_since(SystemTime::UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                writeln!(writer, "{}:{}", std::process::id(), timestamp)?;

                Ok(Self {
                    file,
                    path: lock_path.to_path_buf(),
                })
            }
            Err(_) => {
                let holder_info = fs::read_to_string(lock_path).unwrap_or_default();
                let holder_pid = holder_info.split(':').next().unwrap_or("").trim();

                bail!(
                    "another {prog} operation is in progress{holder}.\n\n\
                     If this is incorrect (e.g. after a crash), delete the lock file:\n\
                     rm {path:?}",
                    prog = program_name(),
                    holder = if holder_pid.is_empty() {
                        String::new()
                    } else {
                        format!(" (PID: {})", holder_pid)
                    },
                    path = lock_path
                );
            }
        }
    }

    /// A lock is stale when its holder process is dead and the lock is old
    /// enough that a startup race can be ruled out.
    fn is_lock_stale(lock_path: &Path) -> Result<bool> {
        if !lock_path.exists() {
            return Ok(false);
        }

        let content = fs::read_to_string(lock_path).unwrap_or_default();
        let parts: Vec<&str> = content.trim().split(':').collect();

        let holder_pid: u32 = parts.first().and_then(|s| s.parse().ok()).unwrap_or(0);
        let lock_timestamp: u64 = parts.get(1).and_then(|s| s.parse().ok()).unwrap_or(0);

        if holder_pid == 0 {
            // Can't determine the holder; assume it's live
            return Ok(false);
        }

        if is_process_running(holder_pid) {
            return Ok(false);
        }

        if lock_timestamp > 0 {
            let now = SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            if now.saturating_sub(lock_timestamp) < STALE_LOCK_AGE_SECS {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    // kill(pid, 0) probes existence without sending a signal
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    // No portable probe; assume live so valid locks are never cleaned up
    true
}

impl Drop for OperationLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        let _ = fs::remove_file(&self.path);
    }
}

/// Acquire the operation lock and verify no operation is already in flight.
///
/// The entry point for commands that start a new multi-step operation. A
/// present state file means a previous run is paused; the new invocation is
/// refused with resume instructions. `continue`/`skip`/`abort` acquire the
/// bare lock instead.
pub fn acquire_operation_lock(gateway: &GitGateway) -> Result<OperationLock> {
    let lock = OperationLock::acquire(&gateway.metadata_dir())?;

    let present = gateway.state_files_present();
    if let Some(kind) = present.first() {
        bail!(
            "a {kind} operation is already in progress.\n\
             Use '{prog} continue' after resolving conflicts, '{prog} skip' to drop the \
             conflicting commit, or '{prog} abort' to cancel.",
            kind = kind,
            prog = program_name()
        );
    }

    Ok(lock)
}
