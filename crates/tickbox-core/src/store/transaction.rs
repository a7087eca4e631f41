use std::collections::BTreeSet;
use std::mem;

use tracing::{debug, info, warn};

use super::VersionedStore;
use crate::error::StoreError;

/// RAII guard for one branch-scoped transaction.
///
/// [`commit`](Self::commit) stages every pending write and commits exactly
/// once, and only if something changed. Dropping an unfinished guard (early
/// return, `?`, failed commit) rolls the working area back.
pub struct Transaction<'s, S: VersionedStore + ?Sized> {
    store: &'s mut S,
    unstaged: BTreeSet<String>,
    changed: bool,
    open: bool,
}

impl<'s, S: VersionedStore + ?Sized> Transaction<'s, S> {
    /// Check out the maintenance branch and open a transaction on it.
    pub fn begin(store: &'s mut S) -> Result<Self, StoreError> {
        store.begin()?;
        Ok(Self {
            store,
            unstaged: BTreeSet::new(),
            changed: false,
            open: true,
        })
    }

    pub fn exists(&self, path: &str) -> Result<bool, StoreError> {
        self.store.exists(path)
    }

    /// Create or overwrite `path`; staged at commit time.
    pub fn write(&mut self, path: &str, content: impl AsRef<[u8]>) -> Result<(), StoreError> {
        self.store.write(path, content.as_ref())?;
        self.unstaged.insert(path.to_string());
        self.changed = true;
        Ok(())
    }

    /// Remove `path` if present. Returns whether anything was removed.
    pub fn remove(&mut self, path: &str) -> Result<bool, StoreError> {
        if !self.store.exists(path)? {
            debug!(path, "remove skipped, path already absent");
            return Ok(false);
        }
        self.store.remove(path)?;
        self.unstaged.remove(path);
        self.changed = true;
        Ok(true)
    }

    /// Stage everything written so far in one go.
    pub fn stage_all(&mut self) -> Result<(), StoreError> {
        self.store.stage_all()?;
        self.unstaged.clear();
        Ok(())
    }

    /// Whether any write or removal happened in this transaction.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.changed
    }

    /// Stage pending writes and commit with `message`.
    ///
    /// Returns `Ok(false)` without committing when nothing was touched or the
    /// staged tree equals the branch tip (a rewrite with identical content).
    pub fn commit(mut self, message: &str) -> Result<bool, StoreError> {
        if !self.changed {
            debug!(message, "nothing changed, discarding transaction");
            self.open = false;
            self.store.rollback()?;
            return Ok(false);
        }

        for path in mem::take(&mut self.unstaged) {
            self.store.stage(&path)?;
        }
        if !self.store.tree_changed()? {
            debug!(message, "tree unchanged, discarding transaction");
            self.open = false;
            self.store.rollback()?;
            return Ok(false);
        }
        self.store.commit(message)?;
        self.open = false;
        info!(message, "committed");
        Ok(true)
    }

    /// Discard all edits made in this transaction.
    pub fn rollback(mut self) -> Result<(), StoreError> {
        self.open = false;
        self.store.rollback()
    }
}

impl<S: VersionedStore + ?Sized> Drop for Transaction<'_, S> {
    fn drop(&mut self) {
        if self.open {
            if let Err(err) = self.store.rollback() {
                warn!(%err, "rollback of abandoned transaction failed");
            }
        }
    }
}
