//! Transactional metadata store.
//!
//! Branch relationships, PR linkage and the repository record persist as a
//! single JSON document at `.git/av/av.db`. The store is single-writer,
//! multi-reader: readers get a snapshot view, writers get a copy-on-write
//! working document whose `commit` atomically replaces the file
//! (write-to-temp, fsync, rename). The tool is single-threaded, so the
//! single-writer rule is enforced at compile time — `write_tx` takes
//! `&mut self`.
//!
//! Graph queries over a snapshot live in `queries`; the cross-process
//! operation lock lives in `lock`.

mod lock;
mod queries;
pub mod schema;


pub use lock::{acquire_operation_lock, OperationLock};
pub use schema::{BranchRecord, BranchState, Document, PrState, PullRequest, Repository, StoreError};

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::errors::AvError;

/// File name of the metadata document inside the metadata directory
pub const DB_FILE: &str = "av.db";

/// Handle to the metadata document.
#[derive(Debug)]
pub struct MetadataDb {
    path: PathBuf,
    doc: Document,
}

impl MetadataDb {
    /// Open the metadata document under the given metadata directory.
    ///
    /// # Errors
    /// `AvError::NotInitialized` when the document does not exist.
    pub fn open(metadata_dir: &Path) -> Result<Self> {
        let path = metadata_dir.join(DB_FILE);
        if !path.exists() {
            return Err(AvError::NotInitialized.into());
        }

        let file = std::fs::File::open(&path)
            .with_context(|| format!("failed to open metadata at {:?}", path))?;
        let reader = std::io::BufReader::new(file);
        let doc: Document = serde_json::from_reader(reader).with_context(|| {
            format!(
                "metadata document is corrupted. To recover, restore {:?} from backup or re-initialize.",
                path
            )
        })?;

        Ok(Self { path, doc })
    }

    /// Whether a metadata document exists under the given directory
    pub fn exists(metadata_dir: &Path) -> bool {
        metadata_dir.join(DB_FILE).exists()
    }

    /// Create a fresh metadata document with the repository record.
    ///
    /// Fails if a document already exists.
    pub fn init(metadata_dir: &Path, repository: Repository) -> Result<Self> {
        let path = metadata_dir.join(DB_FILE);
        if path.exists() {
            anyhow::bail!("metadata document already exists at {:?}", path);
        }

        std::fs::create_dir_all(metadata_dir)
            .with_context(|| format!("failed to create metadata directory {:?}", metadata_dir))?;

        let doc = Document {
            repository: Some(repository),
            ..Document::default()
        };
        persist(&path, &doc)?;

        Ok(Self { path, doc })
    }

    /// Read-only snapshot of the current document
    pub fn read_tx(&self) -> ReadTx<'_> {
        ReadTx { doc: &self.doc }
    }

    /// Start a write transaction over a copy of the document.
    ///
    /// Nothing is persisted until `commit`; dropping the transaction (or
    /// calling `abort`) discards the copy.
    pub fn write_tx(&mut self) -> WriteTx<'_> {
        let work = self.doc.clone();
        WriteTx { db: self, work }
    }
}

/// Atomically replace the document file: temp file in the same directory,
/// fsync, rename over the target.
fn persist(path: &Path, doc: &Document) -> Result<(), StoreError> {
    doc.validate()?;

    let dir = path.parent().expect("db path has a parent directory");
    let tmp = dir.join(format!("{}.tmp.{}", DB_FILE, std::process::id()));

    {
        use std::io::Write;
        let mut file = std::fs::File::create(&tmp)?;
        let contents = serde_json::to_string_pretty(doc)?;
        file.write_all(contents.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
    }

    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Snapshot view over the document.
pub struct ReadTx<'a> {
    doc: &'a Document,
}

impl<'a> ReadTx<'a> {
    pub fn repository(&self) -> Option<&Repository> {
        self.doc.repository.as_ref()
    }

    /// All branch records, keyed by name (sorted)
    pub fn all_branches(&self) -> impl Iterator<Item = &BranchRecord> {
        self.doc.branches.values()
    }

    pub fn branch_names(&self) -> Vec<String> {
        self.doc.branches.keys().cloned().collect()
    }

    /// Look up a branch record; the bool reports existence
    pub fn branch(&self, name: &str) -> (Option<&BranchRecord>, bool) {
        let record = self.doc.branches.get(name);
        (record, record.is_some())
    }

    pub fn is_tracked(&self, name: &str) -> bool {
        self.doc.branches.contains_key(name)
    }

    /// The underlying document, for graph queries
    pub fn doc(&self) -> &Document {
        self.doc
    }
}

/// Copy-on-write transaction.
pub struct WriteTx<'a> {
    db: &'a mut MetadataDb,
    work: Document,
}

impl<'a> WriteTx<'a> {
    pub fn repository(&self) -> Option<&Repository> {
        self.work.repository.as_ref()
    }

    pub fn branch(&self, name: &str) -> (Option<&BranchRecord>, bool) {
        let record = self.work.branches.get(name);
        (record, record.is_some())
    }

    pub fn all_branches(&self) -> impl Iterator<Item = &BranchRecord> {
        self.work.branches.values()
    }

    pub fn is_tracked(&self, name: &str) -> bool {
        self.work.branches.contains_key(name)
    }

    pub fn doc(&self) -> &Document {
        &self.work
    }

    /// Insert or replace a branch record
    pub fn set_branch(&mut self, record: BranchRecord) {
        self.work.branches.insert(record.name.clone(), record);
    }

    /// Remove a branch record; children are the caller's responsibility
    pub fn delete_branch(&mut self, name: &str) {
        self.work.branches.remove(name);
    }

    pub fn set_repository(&mut self, repository: Repository) {
        self.work.repository = Some(repository);
    }

    /// Validate invariants and atomically persist the working document.
    ///
    /// On failure nothing is persisted and the in-memory document keeps its
    /// previous state.
    pub fn commit(self) -> Result<()> {
        persist(&self.db.path, &self.work)
            .with_context(|| format!("failed to commit metadata transaction to {:?}", self.db.path))?;
        self.db.doc = self.work;
        Ok(())
    }

    /// Drop the working copy without persisting
    pub fn abort(self) {
        // Dropping self discards the copy
    }
}
