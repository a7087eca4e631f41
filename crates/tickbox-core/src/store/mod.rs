//! The versioned store the ticket layer writes through.
//!
//! A [`VersionedStore`] is a content-addressed, commit-based repository with
//! one maintenance branch holding every ticket directory. The ticket layer
//! only ever talks to it through a [`Transaction`], which checks the branch
//! out into a working area, applies file edits, and commits them as one unit.
//!
//! Two implementations ship with the crate:
//!
//! - [`MemoryStore`] keeps everything in process, for tests and embedding.
//! - [`GitStore`] drives the `git` binary against a private index so the
//!   user's checkout is never touched.

pub mod git;
pub mod memory;
pub mod transaction;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub use git::GitStore;
pub use memory::MemoryStore;
pub use transaction::Transaction;

/// Opaque identifier of content-addressed data (a blob id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentRef(String);

impl ContentRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One committed file of a ticket directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketFile {
    /// File name relative to the ticket directory.
    pub name: String,
    pub reference: ContentRef,
}

/// Path of `file` inside the directory of `ticket`.
#[must_use]
pub fn ticket_path(ticket: &str, file: &str) -> String {
    format!("{ticket}/{file}")
}

/// Primitives the ticket layer needs from the underlying repository.
///
/// Paths are `/`-separated and relative to the branch root. `write`,
/// `stage`, `stage_all`, `remove`, `exists` and `commit` are only valid
/// between `begin` and `commit`/`rollback`.
pub trait VersionedStore {
    /// Read a repository-scoped configuration value such as `user.email`.
    fn config(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Committed files of one ticket directory at the branch tip.
    ///
    /// An unknown ticket yields an empty list.
    fn ticket_files(&self, ticket: &str) -> Result<Vec<TicketFile>, StoreError>;

    /// Dereference a content reference to its raw bytes.
    fn read_content(&self, reference: &ContentRef) -> Result<Vec<u8>, StoreError>;

    /// Check the maintenance branch out into a working area.
    fn begin(&mut self) -> Result<(), StoreError>;

    /// Whether `path` exists in the working area.
    fn exists(&self, path: &str) -> Result<bool, StoreError>;

    /// Create or overwrite a file in the working area.
    fn write(&mut self, path: &str, content: &[u8]) -> Result<(), StoreError>;

    /// Mark one pending change for inclusion in the next commit.
    fn stage(&mut self, path: &str) -> Result<(), StoreError>;

    /// Mark every pending change for inclusion in the next commit.
    fn stage_all(&mut self) -> Result<(), StoreError>;

    /// Delete and stage removal of `path`. Absent paths are not an error.
    fn remove(&mut self, path: &str) -> Result<(), StoreError>;

    /// Whether the staged tree differs from the branch tip seen at `begin`.
    fn tree_changed(&self) -> Result<bool, StoreError>;

    /// Record the staged changes as one commit and close the working area.
    fn commit(&mut self, message: &str) -> Result<(), StoreError>;

    /// Discard the working area without committing.
    fn rollback(&mut self) -> Result<(), StoreError>;
}
