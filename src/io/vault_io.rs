use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use tempfile::NamedTempFile;

use crate::model::config::Settings;

/// Directory inside the vault that holds taskzero's own files
pub const DATA_DIR: &str = ".taskzero";
pub const CONFIG_FILE: &str = "config.toml";
pub const DB_FILE: &str = "db-tasks.json";

/// Error type for vault discovery and loading
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("not a taskzero vault: no .taskzero/ directory found (run `tz init`)")]
    NotAVault,
    #[error("could not read {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse config.toml: {0}")]
    ConfigParseError(#[from] toml::de::Error),
    #[error("could not edit config.toml: {0}")]
    ConfigEditError(#[from] toml_edit::TomlError),
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A vault root with its loaded settings
#[derive(Debug, Clone)]
pub struct Vault {
    pub root: PathBuf,
    pub data_dir: PathBuf,
    pub settings: Settings,
}

impl Vault {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE)
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE)
    }
}

/// Find the vault root by walking up from the given directory, looking
/// for a `.taskzero/` subdirectory.
pub fn discover_vault(start: &Path) -> Result<PathBuf, VaultError> {
    let mut current = start.to_path_buf();
    loop {
        if current.join(DATA_DIR).is_dir() {
            return Ok(current);
        }
        if !current.pop() {
            return Err(VaultError::NotAVault);
        }
    }
}

/// Open the vault at `root`, reading its config (defaults if the file is missing)
pub fn load_vault(root: &Path) -> Result<Vault, VaultError> {
    let data_dir = root.join(DATA_DIR);
    if !data_dir.is_dir() {
        return Err(VaultError::NotAVault);
    }
    let settings = crate::io::config_io::load_settings(&data_dir)?;
    Ok(Vault {
        root: root.to_path_buf(),
        data_dir,
        settings,
    })
}

/// Write via a temp file in the same directory, then rename over the target
pub fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Vault-relative path with forward slashes, or `None` if `path` is outside the vault
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = rel
        .components()
        .map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect::<Option<_>>()?;
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Resolve a vault-relative path. Absolute paths and `..` are rejected.
pub fn resolve_in_vault(root: &Path, rel: &str) -> Option<PathBuf> {
    let rel_path = Path::new(rel);
    if rel.is_empty() || rel_path.is_absolute() {
        return None;
    }
    let mut out = root.to_path_buf();
    for component in rel_path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(out)
}

/// Whether a vault-relative path points into taskzero's own data directory
pub fn is_data_path(rel: &str) -> bool {
    rel == DATA_DIR || rel.starts_with(&format!("{}/", DATA_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn discover_walks_up() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join(DATA_DIR)).unwrap();
        fs::create_dir_all(tmp.path().join("notes/deep")).unwrap();

        assert_eq!(discover_vault(tmp.path()).unwrap(), tmp.path());
        assert_eq!(
            discover_vault(&tmp.path().join("notes/deep")).unwrap(),
            tmp.path()
        );
    }

    #[test]
    fn discover_not_found() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            discover_vault(tmp.path()),
            Err(VaultError::NotAVault)
        ));
    }

    #[test]
    fn load_without_config_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join(DATA_DIR)).unwrap();
        let vault = load_vault(tmp.path()).unwrap();
        assert_eq!(vault.settings.tasks.block_prefix, "tz");
        assert_eq!(vault.db_path(), tmp.path().join(".taskzero/db-tasks.json"));
    }

    #[test]
    fn relative_and_resolved_paths() {
        let root = Path::new("/vault");
        assert_eq!(
            relative_path(root, Path::new("/vault/Projects/Home.md")),
            Some("Projects/Home.md".to_string())
        );
        assert_eq!(relative_path(root, Path::new("/elsewhere/a.md")), None);

        assert_eq!(
            resolve_in_vault(root, "Projects/Home.md"),
            Some(PathBuf::from("/vault/Projects/Home.md"))
        );
        assert_eq!(resolve_in_vault(root, "../secrets.md"), None);
        assert_eq!(resolve_in_vault(root, "/etc/passwd"), None);
        assert!(is_data_path(".taskzero/db-tasks.json"));
        assert!(!is_data_path(".taskzero-notes.md"));
    }

    #[test]
    fn atomic_write_creates_parents() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a/b/c.md");
        atomic_write(&path, b"- [ ] hi\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "- [ ] hi\n");
    }
}
