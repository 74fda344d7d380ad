use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::io::lock::{LockError, VaultLock};
use crate::io::vault_io::{DATA_DIR, atomic_write, resolve_in_vault};
use crate::model::document::DocumentSnapshot;
use crate::parse::index_document;

/// Error type for document store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("could not read {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not write {path}: {source}")]
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("path is outside the vault: {0}")]
    OutsideVault(String),
    #[error(transparent)]
    Lock(#[from] LockError),
}

/// What a read-modify-write did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The document does not exist; the callback was not run
    Missing,
    /// The callback declined to write
    Unchanged,
    Written,
}

/// Access to the markdown documents of a vault, by vault-relative path
pub trait DocumentStore {
    /// Contents, or `None` if the document does not exist
    fn read(&self, path: &str) -> Result<Option<String>, StoreError>;

    /// Read-modify-write. `edit` gets the live content and returns the
    /// replacement, or `None` to leave the document alone.
    fn process(
        &self,
        path: &str,
        edit: &mut dyn FnMut(&str) -> Option<String>,
    ) -> Result<ProcessOutcome, StoreError>;

    /// Append `text` on a new line, creating the document if needed
    fn append(&self, path: &str, text: &str) -> Result<(), StoreError>;

    /// Returns true if the document was created
    fn create_if_missing(&self, path: &str, content: &str) -> Result<bool, StoreError>;

    fn exists(&self, path: &str) -> bool;

    /// Every markdown document, sorted
    fn list(&self) -> Result<Vec<String>, StoreError>;
}

/// Produces structural snapshots of documents
pub trait SnapshotProvider {
    fn snapshot(&self, path: &str) -> Result<Option<DocumentSnapshot>, StoreError>;
}

/// Join `text` onto `content` so that it starts on its own line and the
/// result ends with a newline.
fn appended(content: &str, text: &str) -> String {
    let mut out = content.to_string();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(text.trim_end_matches('\n'));
    out.push('\n');
    out
}

// ---------------------------------------------------------------------------
// Filesystem
// ---------------------------------------------------------------------------

/// Documents on disk under a vault root. Writes are atomic and happen
/// under the vault lock.
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    root: PathBuf,
    data_dir: PathBuf,
}

impl FsDocumentStore {
    pub fn new(root: &Path) -> Self {
        FsDocumentStore {
            root: root.to_path_buf(),
            data_dir: root.join(DATA_DIR),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StoreError> {
        resolve_in_vault(&self.root, path).ok_or_else(|| StoreError::OutsideVault(path.to_string()))
    }

    fn read_full(&self, full: &Path) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(full) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::ReadError {
                path: full.to_path_buf(),
                source: e,
            }),
        }
    }

    fn write_full(&self, full: &Path, content: &str) -> Result<(), StoreError> {
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::WriteError {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        atomic_write(full, content.as_bytes()).map_err(|e| StoreError::WriteError {
            path: full.to_path_buf(),
            source: e,
        })
    }

    fn lock(&self) -> Result<VaultLock, StoreError> {
        fs::create_dir_all(&self.data_dir).map_err(|e| StoreError::WriteError {
            path: self.data_dir.clone(),
            source: e,
        })?;
        Ok(VaultLock::acquire(&self.data_dir)?)
    }

    fn collect(&self, dir: &Path, prefix: &str, out: &mut Vec<String>) -> Result<(), StoreError> {
        let entries = fs::read_dir(dir).map_err(|e| StoreError::ReadError {
            path: dir.to_path_buf(),
            source: e,
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::ReadError {
                path: dir.to_path_buf(),
                source: e,
            })?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let rel = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", prefix, name)
            };
            let path = entry.path();
            if path.is_dir() {
                self.collect(&path, &rel, out)?;
            } else if path.extension().and_then(|e| e.to_str()) == Some("md") {
                out.push(rel);
            }
        }
        Ok(())
    }
}

impl DocumentStore for FsDocumentStore {
    fn read(&self, path: &str) -> Result<Option<String>, StoreError> {
        let full = self.resolve(path)?;
        self.read_full(&full)
    }

    fn process(
        &self,
        path: &str,
        edit: &mut dyn FnMut(&str) -> Option<String>,
    ) -> Result<ProcessOutcome, StoreError> {
        let full = self.resolve(path)?;
        let _lock = self.lock()?;
        let Some(content) = self.read_full(&full)? else {
            return Ok(ProcessOutcome::Missing);
        };
        match edit(&content) {
            Some(updated) if updated != content => {
                self.write_full(&full, &updated)?;
                tracing::debug!(path, "document rewritten");
                Ok(ProcessOutcome::Written)
            }
            _ => Ok(ProcessOutcome::Unchanged),
        }
    }

    fn append(&self, path: &str, text: &str) -> Result<(), StoreError> {
        let full = self.resolve(path)?;
        let _lock = self.lock()?;
        let content = self.read_full(&full)?.unwrap_or_default();
        self.write_full(&full, &appended(&content, text))
    }

    fn create_if_missing(&self, path: &str, content: &str) -> Result<bool, StoreError> {
        let full = self.resolve(path)?;
        let _lock = self.lock()?;
        if full.exists() {
            return Ok(false);
        }
        self.write_full(&full, content)?;
        Ok(true)
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_ok_and(|full| full.is_file())
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut out = Vec::new();
        self.collect(&self.root, "", &mut out)?;
        out.sort();
        Ok(out)
    }
}

/// Snapshots built by running the structural indexer over whatever a
/// store returns. The CLI pairs it with [`FsDocumentStore`].
pub struct FsSnapshotProvider<'a> {
    store: &'a dyn DocumentStore,
}

impl<'a> FsSnapshotProvider<'a> {
    pub fn new(store: &'a dyn DocumentStore) -> Self {
        FsSnapshotProvider { store }
    }
}

impl SnapshotProvider for FsSnapshotProvider<'_> {
    fn snapshot(&self, path: &str) -> Result<Option<DocumentSnapshot>, StoreError> {
        Ok(self
            .store
            .read(path)?
            .map(|content| index_document(path, &content)))
    }
}

// ---------------------------------------------------------------------------
// In memory
// ---------------------------------------------------------------------------

/// Documents held in memory, for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    docs: RefCell<BTreeMap<String, String>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: &str, content: &str) {
        self.docs
            .borrow_mut()
            .insert(path.to_string(), content.to_string());
    }

    pub fn remove(&self, path: &str) -> Option<String> {
        self.docs.borrow_mut().remove(path)
    }

    pub fn get(&self, path: &str) -> Option<String> {
        self.docs.borrow().get(path).cloned()
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn read(&self, path: &str) -> Result<Option<String>, StoreError> {
        Ok(self.get(path))
    }

    fn process(
        &self,
        path: &str,
        edit: &mut dyn FnMut(&str) -> Option<String>,
    ) -> Result<ProcessOutcome, StoreError> {
        let Some(content) = self.get(path) else {
            return Ok(ProcessOutcome::Missing);
        };
        match edit(&content) {
            Some(updated) if updated != content => {
                self.insert(path, &updated);
                Ok(ProcessOutcome::Written)
            }
            _ => Ok(ProcessOutcome::Unchanged),
        }
    }

    fn append(&self, path: &str, text: &str) -> Result<(), StoreError> {
        let content = self.get(path).unwrap_or_default();
        self.insert(path, &appended(&content, text));
        Ok(())
    }

    fn create_if_missing(&self, path: &str, content: &str) -> Result<bool, StoreError> {
        if self.docs.borrow().contains_key(path) {
            return Ok(false);
        }
        self.insert(path, content);
        Ok(true)
    }

    fn exists(&self, path: &str) -> bool {
        self.docs.borrow().contains_key(path)
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .docs
            .borrow()
            .keys()
            .filter(|k| k.ends_with(".md"))
            .cloned()
            .collect())
    }
}
