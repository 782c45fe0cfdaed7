//! State-file I/O under the repository metadata directory.
//!
//! Each multi-step component persists its checkpoint as JSON in
//! `.git/av/<kind>-state.json`. Presence of a file means an operation is in
//! flight; absence is the quiescent state. A fresh mutating invocation must
//! refuse to start while any state file exists.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;

use super::GitGateway;

/// Which component's state a file belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateFileKind {
    Restack,
    Sync,
    Reorder,
}

impl StateFileKind {
    pub const ALL: [StateFileKind; 3] = [StateFileKind::Restack, StateFileKind::Sync, StateFileKind::Reorder];

    pub fn file_name(self) -> &'static str {
        match self {
            StateFileKind::Restack => "restack-state.json",
            StateFileKind::Sync => "sync-state.json",
            StateFileKind::Reorder => "reorder-state.json",
        }
    }
}

impl std::fmt::Display for StateFileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateFileKind::Restack => write!(f, "restack"),
            StateFileKind::Sync => write!(f, "sync"),
            StateFileKind::Reorder => write!(f, "reorder"),
        }
    }
}

impl GitGateway {
    fn state_file_path(&self, kind: StateFileKind) -> PathBuf {
        self.metadata_dir().join(kind.file_name())
    }

    /// Read a state file, None when no operation of this kind is in flight.
    ///
    /// A present-but-unreadable file is an error with recovery instructions;
    /// it means a previous invocation died mid-write or the file was edited.
    pub fn read_state_file<T: DeserializeOwned>(&self, kind: StateFileKind) -> Result<Option<T>> {
        let path = self.state_file_path(kind);
        if !path.exists() {
            return Ok(None);
        }

        let file = std::fs::File::open(&path)
            .with_context(|| format!("failed to open state file {:?}", path))?;
        let reader = std::io::BufReader::new(file);
        let state = serde_json::from_reader(reader).with_context(|| {
            format!(
                "state file is corrupted. To recover, delete the file:\n  rm {:?}",
                path
            )
        })?;

        Ok(Some(state))
    }

    /// Write a state file, or clear it when `payload` is None
    pub fn write_state_file<T: Serialize>(&self, kind: StateFileKind, payload: Option<&T>) -> Result<()> {
        let path = self.state_file_path(kind);

        let Some(payload) = payload else {
            if path.exists() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("failed to remove state file {:?}", path))?;
            }
            return Ok(());
        };

        self.ensure_metadata_dir()?;
        let contents = serde_json::to_string_pretty(payload)?;
        std::fs::write(&path, contents)
            .with_context(|| format!("failed to write state file {:?}", path))?;

        // Operation state can reference private branch names; keep it 0600
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&path, perms)
                .context("failed to set state file permissions")?;
        }

        Ok(())
    }

    /// Whether a state file of this kind exists
    pub fn state_file_present(&self, kind: StateFileKind) -> bool {
        self.state_file_path(kind).exists()
    }

    /// The kinds of all state files currently present
    pub fn state_files_present(&self) -> Vec<StateFileKind> {
        StateFileKind::ALL
            .into_iter()
            .filter(|kind| self.state_file_present(*kind))
            .collect()
    }
}
