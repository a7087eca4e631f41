use std::collections::{BTreeMap, HashMap};

use super::{ContentRef, TicketFile, VersionedStore};
use crate::error::StoreError;

/// One commit on the in-memory maintenance branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub message: String,
    /// Full branch tree after the commit.
    pub tree: BTreeMap<String, ContentRef>,
}

#[derive(Debug, Default)]
struct WorkingArea {
    files: BTreeMap<String, ContentRef>,
    index: BTreeMap<String, ContentRef>,
}

/// In-process [`VersionedStore`] with BLAKE3-addressed blobs.
///
/// Keeps the whole commit log so callers can inspect exactly what each
/// mutation recorded.
#[derive(Debug, Default)]
pub struct MemoryStore {
    config: HashMap<String, String>,
    blobs: HashMap<ContentRef, Vec<u8>>,
    tree: BTreeMap<String, ContentRef>,
    commits: Vec<CommitRecord>,
    working: Option<WorkingArea>,
    reject_next_commit: Option<String>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`set_config`](Self::set_config).
    #[must_use]
    pub fn with_config(mut self, key: &str, value: &str) -> Self {
        self.set_config(key, value);
        self
    }

    pub fn set_config(&mut self, key: &str, value: &str) {
        self.config.insert(key.to_string(), value.to_string());
    }

    /// Commits in the order they were made.
    #[must_use]
    pub fn commits(&self) -> &[CommitRecord] {
        &self.commits
    }

    /// Current tree of the maintenance branch.
    #[must_use]
    pub const fn tree(&self) -> &BTreeMap<String, ContentRef> {
        &self.tree
    }

    /// Make the next `commit` fail with [`StoreError::CommitRejected`].
    pub fn fail_next_commit(&mut self, reason: &str) {
        self.reject_next_commit = Some(reason.to_string());
    }

    fn put_blob(&mut self, content: &[u8]) -> ContentRef {
        let reference = ContentRef::new(blake3::hash(content).to_hex().to_string());
        self.blobs
            .entry(reference.clone())
            .or_insert_with(|| content.to_vec());
        reference
    }

    fn working(&self) -> Result<&WorkingArea, StoreError> {
        self.working.as_ref().ok_or(StoreError::NoTransaction)
    }

    fn working_mut(&mut self) -> Result<&mut WorkingArea, StoreError> {
        self.working.as_mut().ok_or(StoreError::NoTransaction)
    }
}

impl VersionedStore for MemoryStore {
    fn config(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.config.get(key).cloned())
    }

    fn ticket_files(&self, ticket: &str) -> Result<Vec<TicketFile>, StoreError> {
        let prefix = format!("{ticket}/");
        Ok(self
            .tree
            .range(prefix.clone()..)
            .map_while(|(path, reference)| {
                path.strip_prefix(&prefix)
                    .map(|name| (name.to_string(), reference.clone()))
            })
            .filter(|(name, _)| !name.contains('/'))
            .map(|(name, reference)| TicketFile { name, reference })
            .collect())
    }

    fn read_content(&self, reference: &ContentRef) -> Result<Vec<u8>, StoreError> {
        self.blobs
            .get(reference)
            .cloned()
            .ok_or_else(|| StoreError::MissingContent(reference.clone()))
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        if self.working.is_some() {
            return Err(StoreError::TransactionActive);
        }
        self.working = Some(WorkingArea {
            files: self.tree.clone(),
            index: self.tree.clone(),
        });
        Ok(())
    }

    fn exists(&self, path: &str) -> Result<bool, StoreError> {
        Ok(self.working()?.files.contains_key(path))
    }

    fn write(&mut self, path: &str, content: &[u8]) -> Result<(), StoreError> {
        self.working()?;
        let reference = self.put_blob(content);
        self.working_mut()?.files.insert(path.to_string(), reference);
        Ok(())
    }

    fn stage(&mut self, path: &str) -> Result<(), StoreError> {
        let working = self.working_mut()?;
        match working.files.get(path) {
            Some(reference) => {
                working.index.insert(path.to_string(), reference.clone());
            }
            None => {
                working.index.remove(path);
            }
        }
        Ok(())
    }

    fn stage_all(&mut self) -> Result<(), StoreError> {
        let working = self.working_mut()?;
        working.index = working.files.clone();
        Ok(())
    }

    fn remove(&mut self, path: &str) -> Result<(), StoreError> {
        let working = self.working_mut()?;
        working.files.remove(path);
        working.index.remove(path);
        Ok(())
    }

    fn tree_changed(&self) -> Result<bool, StoreError> {
        Ok(self.working()?.index != self.tree)
    }

    fn commit(&mut self, message: &str) -> Result<(), StoreError> {
        self.working()?;
        if let Some(reason) = self.reject_next_commit.take() {
            return Err(StoreError::CommitRejected(reason));
        }
        let working = self.working.take().ok_or(StoreError::NoTransaction)?;
        self.tree = working.index;
        self.commits.push(CommitRecord {
            message: message.to_string(),
            tree: self.tree.clone(),
        });
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        self.working = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryStore;
    use crate::error::StoreError;
    use crate::store::VersionedStore;

    #[test]
    fn blobs_are_content_addressed() -> Result<(), StoreError> {
        let mut store = MemoryStore::new();
        store.begin()?;
        store.write("a/X", b"same")?;
        store.write("b/Y", b"same")?;
        store.stage_all()?;
        store.commit("dup")?;

        let x = &store.tree()["a/X"];
        let y = &store.tree()["b/Y"];
        assert_eq!(x, y);
        assert_eq!(store.read_content(x)?, b"same");
        Ok(())
    }

    #[test]
    fn unstaged_writes_are_not_committed() -> Result<(), StoreError> {
        let mut store = MemoryStore::new();
        store.begin()?;
        store.write("t/A", b"a")?;
        store.write("t/B", b"b")?;
        store.stage("t/A")?;
        store.commit("only A")?;

        let names: Vec<_> = store
            .ticket_files("t")?
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["A".to_string()]);
        Ok(())
    }

    #[test]
    fn ticket_files_only_lists_direct_children() -> Result<(), StoreError> {
        let mut store = MemoryStore::new();
        store.begin()?;
        store.write("t/A", b"a")?;
        store.write("t/sub/B", b"b")?;
        store.write("t2/C", b"c")?;
        store.stage_all()?;
        store.commit("layout")?;

        let names: Vec<_> = store
            .ticket_files("t")?
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["A".to_string()]);
        assert!(store.ticket_files("missing")?.is_empty());
        Ok(())
    }

    #[test]
    fn operations_outside_a_transaction_fail() {
        let mut store = MemoryStore::new();
        assert!(matches!(
            store.write("t/A", b"a"),
            Err(StoreError::NoTransaction)
        ));
        assert!(matches!(store.commit("x"), Err(StoreError::NoTransaction)));
        assert!(store.begin().is_ok());
        assert!(matches!(store.begin(), Err(StoreError::TransactionActive)));
    }

    #[test]
    fn missing_content_is_reported() {
        let store = MemoryStore::new().with_config("user.email", "a@b.c");
        let err = store
            .read_content(&crate::store::ContentRef::new("deadbeef"))
            .expect_err("should fail");
        assert!(matches!(err, StoreError::MissingContent(_)));
        assert_eq!(
            store.config("user.email").ok().flatten().as_deref(),
            Some("a@b.c")
        );
    }
}
