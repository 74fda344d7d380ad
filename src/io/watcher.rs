use std::path::{Path, PathBuf};
use std::sync::mpsc;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::io::vault_io::{CONFIG_FILE, DATA_DIR, relative_path};

/// Events sent from the file watcher to the `tz watch` loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultEvent {
    /// Markdown documents changed on disk (vault-relative paths)
    DocumentsChanged(Vec<String>),
    /// `.taskzero/config.toml` changed
    ConfigChanged,
}

/// A file system watcher over a whole vault.
pub struct VaultWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<VaultEvent>,
}

impl VaultWatcher {
    /// Start watching the vault rooted at `root`.
    /// Returns a `VaultWatcher` whose `poll()` method should be called each tick.
    pub fn start(root: &Path) -> Result<Self, notify::Error> {
        let (tx, rx) = mpsc::channel();
        let root_owned = root.to_path_buf();

        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| {
                let event = match result {
                    Ok(e) => e,
                    Err(e) => {
                        tracing::warn!(error = %e, "watcher error");
                        return;
                    }
                };
                match event.kind {
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {}
                    _ => return,
                }
                for vault_event in classify(&root_owned, event.paths) {
                    let _ = tx.send(vault_event);
                }
            },
            Config::default(),
        )?;

        watcher.watch(root, RecursiveMode::Recursive)?;
        Ok(VaultWatcher {
            _watcher: watcher,
            rx,
        })
    }

    /// Non-blocking poll for pending file events.
    /// Returns all queued events (may be empty).
    pub fn poll(&self) -> Vec<VaultEvent> {
        let mut events = Vec::new();
        while let Ok(evt) = self.rx.try_recv() {
            events.push(evt);
        }
        events
    }
}

/// Sort raw paths into vault events. Hidden directories and taskzero's own
/// data files are ignored, apart from the config.
fn classify(root: &Path, paths: Vec<PathBuf>) -> Vec<VaultEvent> {
    let config_rel = format!("{}/{}", DATA_DIR, CONFIG_FILE);
    let mut documents = Vec::new();
    let mut config = false;

    for path in paths {
        let Some(rel) = relative_path(root, &path) else {
            continue;
        };
        if rel == config_rel {
            config = true;
            continue;
        }
        if rel.split('/').any(|part| part.starts_with('.')) {
            continue;
        }
        if rel.ends_with(".md") && !documents.contains(&rel) {
            documents.push(rel);
        }
    }

    let mut events = Vec::new();
    if !documents.is_empty() {
        events.push(VaultEvent::DocumentsChanged(documents));
    }
    if config {
        events.push(VaultEvent::ConfigChanged);
    }
    events
}
