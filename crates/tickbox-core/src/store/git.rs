//! [`VersionedStore`] backed by the `git` binary.
//!
//! All edits go through a private index file under the git dir, one per
//! store instance, seeded from the maintenance branch tip. Neither the
//! user's checkout nor their index is touched. A commit is `write-tree` +
//! `commit-tree` followed by `update-ref` with the tip observed at `begin`
//! as the expected old value; if another writer moved the branch in
//! between, the ref update is refused and nothing is recorded.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use super::{ContentRef, TicketFile, VersionedStore};
use crate::error::StoreError;

const INDEX_FILE: &str = "tickbox-index";
const FILE_MODE: &str = "100644";

static STORE_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug)]
struct Session {
    /// Branch tip when the session began; `None` if the branch did not exist.
    base: Option<String>,
    /// Written but not yet staged: path -> blob id.
    pending: BTreeMap<String, String>,
}

/// A git repository whose `branch` holds the ticket directories.
#[derive(Debug)]
pub struct GitStore {
    root: PathBuf,
    index_file: PathBuf,
    branch: String,
    session: Option<Session>,
}

impl GitStore {
    /// Open the repository containing `path`, keeping tickets on `branch`.
    pub fn open(path: impl AsRef<Path>, branch: &str) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let git_dir = probe(path, &["rev-parse", "--absolute-git-dir"])?
            .ok_or_else(|| StoreError::NotARepository(path.display().to_string()))?;
        let root = probe(path, &["rev-parse", "--show-toplevel"])?
            .filter(|top| !top.is_empty())
            .map_or_else(|| path.to_path_buf(), PathBuf::from);

        debug!(root = %root.display(), branch, "opened git store");
        Ok(Self {
            root,
            index_file: PathBuf::from(git_dir).join(format!(
                "{INDEX_FILE}.{}.{}",
                std::process::id(),
                STORE_SEQ.fetch_add(1, Ordering::Relaxed)
            )),
            branch: branch.to_string(),
            session: None,
        })
    }

    /// Keep tickets on `branch` instead. Call before any transaction.
    #[must_use]
    pub fn on_branch(mut self, branch: &str) -> Self {
        branch.clone_into(&mut self.branch);
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn branch(&self) -> &str {
        &self.branch
    }

    fn branch_ref(&self) -> String {
        format!("refs/heads/{}", self.branch)
    }

    /// Current tip of the maintenance branch, if it exists.
    pub fn tip(&self) -> Result<Option<String>, StoreError> {
        let spec = format!("{}^{{commit}}", self.branch_ref());
        let output = self.run(&["rev-parse", "--verify", "-q", &spec], None)?;
        if output.status.success() {
            Ok(Some(stdout_line(&output)))
        } else {
            Ok(None)
        }
    }

    fn run(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<Output, StoreError> {
        let mut command = Command::new("git");
        command
            .args(args)
            .current_dir(&self.root)
            .env("GIT_INDEX_FILE", &self.index_file)
            .env("GIT_LITERAL_PATHSPECS", "1")
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn()?;
        if let (Some(bytes), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(bytes)?;
        }
        Ok(child.wait_with_output()?)
    }

    fn git(&self, args: &[&str]) -> Result<String, StoreError> {
        self.git_with_input(args, None)
    }

    fn git_with_input(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<String, StoreError> {
        let output = self.run(args, stdin)?;
        if !output.status.success() {
            return Err(command_error(args, &output));
        }
        Ok(stdout_line(&output))
    }

    fn session(&self) -> Result<&Session, StoreError> {
        self.session.as_ref().ok_or(StoreError::NoTransaction)
    }

    fn session_mut(&mut self) -> Result<&mut Session, StoreError> {
        self.session.as_mut().ok_or(StoreError::NoTransaction)
    }

    fn indexed(&self, path: &str) -> Result<bool, StoreError> {
        let listed = self.git(&["ls-files", "--cached", "-z", "--", path])?;
        Ok(listed.split('\0').any(|entry| entry == path))
    }

    fn add_to_index(&self, path: &str, blob: &str) -> Result<(), StoreError> {
        let info = format!("{FILE_MODE},{blob},{path}");
        self.git(&["update-index", "--add", "--cacheinfo", &info])?;
        Ok(())
    }

    fn discard_index(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.index_file) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }
}

impl VersionedStore for GitStore {
    fn config(&self, key: &str) -> Result<Option<String>, StoreError> {
        let output = self.run(&["config", "--get", key], None)?;
        match output.status.code() {
            Some(0) => Ok(Some(stdout_line(&output))),
            // exit status 1: the key is not set
            Some(1) => Ok(None),
            _ => Err(command_error(&["config", "--get", key], &output)),
        }
    }

    fn ticket_files(&self, ticket: &str) -> Result<Vec<TicketFile>, StoreError> {
        let Some(tip) = self.tip()? else {
            return Ok(Vec::new());
        };
        let dir = format!("{ticket}/");
        let listing = self.git(&["ls-tree", "--full-tree", "-z", &tip, "--", &dir])?;

        Ok(listing
            .split('\0')
            .filter_map(|entry| {
                let (meta, path) = entry.split_once('\t')?;
                let mut meta = meta.split(' ');
                let (_mode, kind, oid) = (meta.next()?, meta.next()?, meta.next()?);
                let name = path.strip_prefix(&dir)?;
                (kind == "blob").then(|| TicketFile {
                    name: name.to_string(),
                    reference: ContentRef::new(oid),
                })
            })
            .collect())
    }

    fn read_content(&self, reference: &ContentRef) -> Result<Vec<u8>, StoreError> {
        let output = self.run(&["cat-file", "blob", reference.as_str()], None)?;
        if !output.status.success() {
            return Err(StoreError::MissingContent(reference.clone()));
        }
        Ok(output.stdout)
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        if self.session.is_some() {
            return Err(StoreError::TransactionActive);
        }
        let base = self.tip()?;
        match &base {
            Some(tip) => self.git(&["read-tree", tip])?,
            None => self.git(&["read-tree", "--empty"])?,
        };
        self.session = Some(Session {
            base,
            pending: BTreeMap::new(),
        });
        Ok(())
    }

    fn exists(&self, path: &str) -> Result<bool, StoreError> {
        if self.session()?.pending.contains_key(path) {
            return Ok(true);
        }
        self.indexed(path)
    }

    fn write(&mut self, path: &str, content: &[u8]) -> Result<(), StoreError> {
        self.session()?;
        let blob = self.git_with_input(&["hash-object", "-w", "--stdin"], Some(content))?;
        self.session_mut()?.pending.insert(path.to_string(), blob);
        Ok(())
    }

    fn stage(&mut self, path: &str) -> Result<(), StoreError> {
        if let Some(blob) = self.session_mut()?.pending.remove(path) {
            self.add_to_index(path, &blob)?;
        }
        Ok(())
    }

    fn stage_all(&mut self) -> Result<(), StoreError> {
        let pending = std::mem::take(&mut self.session_mut()?.pending);
        for (path, blob) in pending {
            self.add_to_index(&path, &blob)?;
        }
        Ok(())
    }

    fn remove(&mut self, path: &str) -> Result<(), StoreError> {
        self.session_mut()?.pending.remove(path);
        if self.indexed(path)? {
            self.git(&["update-index", "--force-remove", "--", path])?;
        }
        Ok(())
    }

    fn tree_changed(&self) -> Result<bool, StoreError> {
        let base_tree = match self.session()?.base.as_deref() {
            Some(tip) => self.git(&["rev-parse", &format!("{tip}^{{tree}}")])?,
            // empty stdin: the empty tree in this repository's hash format
            None => self.git_with_input(&["mktree"], Some(b"".as_slice()))?,
        };
        Ok(self.git(&["write-tree"])? != base_tree)
    }

    fn commit(&mut self, message: &str) -> Result<(), StoreError> {
        let base = self.session()?.base.clone();
        let tree = self.git(&["write-tree"])?;

        let mut args = vec!["commit-tree", tree.as_str()];
        if let Some(parent) = base.as_deref() {
            args.extend(["-p", parent]);
        }
        args.extend(["-m", message]);
        let commit = self.git(&args)?;

        let branch_ref = self.branch_ref();
        let expected = base.clone().unwrap_or_default();
        let update = [
            "update-ref",
            "-m",
            message,
            branch_ref.as_str(),
            commit.as_str(),
            expected.as_str(),
        ];
        if !self.run(&update, None)?.status.success() {
            return Err(StoreError::BranchMoved {
                branch: self.branch.clone(),
                expected: base.unwrap_or_else(|| "(none)".to_string()),
            });
        }

        self.session = None;
        self.discard_index()
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        self.session = None;
        self.discard_index()
    }
}

/// Run a read-only git query in `path`; `None` when git exits non-zero.
fn probe(path: &Path, args: &[&str]) -> Result<Option<String>, StoreError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(path)
        .stdin(Stdio::null())
        .output()?;
    Ok(output.status.success().then(|| stdout_line(&output)))
}

fn stdout_line(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim_end().to_string()
}

fn command_error(args: &[&str], output: &Output) -> StoreError {
    StoreError::Command {
        command: args.join(" "),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}
