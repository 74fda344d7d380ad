use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::io::debounce::Debouncer;
use crate::io::events::{EventBus, TaskEvent};
use crate::io::lock::{LockError, VaultLock};
use crate::io::vault_io::atomic_write;
use crate::model::config::ReplicaConfig;
use crate::model::task::TaskRow;
use crate::util::clock::Clock;

/// Error type for database persistence
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("could not write {path}: {source}")]
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not serialize task database: {0}")]
    SerializeError(#[from] serde_json::Error),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("replica {self_id} is not authoritative (writer is {authoritative_id})")]
    NotAuthoritative {
        self_id: String,
        authoritative_id: String,
    },
}

/// Result of [`TaskDatabase::update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// No row had this id; it was added
    Inserted,
    Updated,
    /// Identical to the stored row; nothing persisted, no event
    Unchanged,
    /// The row has no id
    MissingId,
}

impl UpdateOutcome {
    pub fn changed(self) -> bool {
        matches!(self, UpdateOutcome::Inserted | UpdateOutcome::Updated)
    }
}

/// On-disk layout of `db-tasks.json`
#[derive(Debug, Default, Serialize, Deserialize)]
struct DbFile {
    #[serde(default)]
    autoincrement: u64,
    #[serde(default)]
    rows: Vec<TaskRow>,
}

/// Identity-indexed row store.
///
/// Rows keep insertion order. `autoincrement` is the next id to hand out
/// and never moves backwards. Every mutation emits `TasksChanged` and
/// schedules a debounced write of the whole file.
pub struct TaskDatabase {
    rows: IndexMap<u64, TaskRow>,
    autoincrement: u64,
    /// `None` keeps everything in memory
    path: Option<PathBuf>,
    persist: Debouncer,
    events: EventBus,
    clock: Rc<dyn Clock>,
    replica: ReplicaConfig,
}

impl std::fmt::Debug for TaskDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDatabase")
            .field("rows", &self.rows.len())
            .field("autoincrement", &self.autoincrement)
            .field("path", &self.path)
            .finish()
    }
}

impl TaskDatabase {
    pub fn in_memory(events: EventBus, clock: Rc<dyn Clock>) -> Self {
        TaskDatabase {
            rows: IndexMap::new(),
            autoincrement: 1,
            path: None,
            persist: Debouncer::new(Duration::ZERO),
            events,
            clock,
            replica: ReplicaConfig::default(),
        }
    }

    /// Load from `path`. A missing file gives an empty store; a corrupt one
    /// is moved aside to `<path>.bak` first.
    pub fn load(
        path: &Path,
        persist_delay: Duration,
        replica: ReplicaConfig,
        events: EventBus,
        clock: Rc<dyn Clock>,
    ) -> Self {
        let file = match fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str::<DbFile>(&text) {
                Ok(file) => file,
                Err(e) => {
                    let backup = path.with_extension("json.bak");
                    tracing::warn!(
                        path = %path.display(),
                        backup = %backup.display(),
                        error = %e,
                        "task database is corrupt, starting empty"
                    );
                    if let Err(e) = fs::rename(path, &backup) {
                        tracing::warn!(error = %e, "could not back up corrupt database");
                    }
                    DbFile::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => DbFile::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "could not read task database");
                DbFile::default()
            }
        };

        let mut db = TaskDatabase {
            rows: IndexMap::with_capacity(file.rows.len()),
            autoincrement: file.autoincrement,
            path: Some(path.to_path_buf()),
            persist: Debouncer::new(persist_delay),
            events,
            clock,
            replica,
        };
        for row in file.rows {
            if row.id == 0 {
                tracing::warn!(text = %row.text, "dropping stored row without an id");
                continue;
            }
            db.bump_counter(row.id);
            db.rows.insert(row.id, row);
        }
        db.autoincrement = db.autoincrement.max(1);
        tracing::debug!(rows = db.rows.len(), autoincrement = db.autoincrement, "loaded task database");
        db
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn replica(&self) -> &ReplicaConfig {
        &self.replica
    }

    pub fn set_replica(&mut self, replica: ReplicaConfig) {
        self.replica = replica;
    }

    /// Next id to be handed out
    pub fn autoincrement(&self) -> u64 {
        self.autoincrement
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get_row(&self, id: u64) -> Option<&TaskRow> {
        self.rows.get(&id)
    }

    pub fn rows(&self) -> impl Iterator<Item = &TaskRow> {
        self.rows.values()
    }

    /// Rows currently recorded at `path`
    pub fn rows_at<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a TaskRow> + 'a {
        self.rows.values().filter(move |r| r.path == path)
    }

    /// Has a write been scheduled that has not happened yet
    pub fn is_dirty(&self) -> bool {
        self.persist.is_pending()
    }

    /// Add a new row and assign it the next id. A row that already has an
    /// id is rejected.
    pub fn insert(&mut self, mut row: TaskRow) -> Option<TaskRow> {
        if row.id != 0 {
            tracing::debug!(id = row.id, "insert refused: row already has an id");
            return None;
        }
        row.id = self.autoincrement;
        self.autoincrement += 1;
        if row.created.is_none() {
            row.created = Some(self.clock.now_utc());
        }
        self.rows.insert(row.id, row.clone());
        self.mutated();
        Some(row)
    }

    /// Replace the row with the same id. An unknown id is inserted under
    /// that id, and the counter moves past it.
    pub fn update(&mut self, mut row: TaskRow) -> UpdateOutcome {
        if row.id == 0 {
            return UpdateOutcome::MissingId;
        }
        self.bump_counter(row.id);

        match self.rows.get_mut(&row.id) {
            Some(existing) if *existing == row => UpdateOutcome::Unchanged,
            Some(existing) => {
                *existing = row;
                self.mutated();
                UpdateOutcome::Updated
            }
            None => {
                if row.created.is_none() {
                    row.created = Some(self.clock.now_utc());
                }
                self.rows.insert(row.id, row);
                self.mutated();
                UpdateOutcome::Inserted
            }
        }
    }

    /// Insert rows without an id, update the rest. Returns the stored row.
    pub fn insert_or_update(&mut self, row: TaskRow) -> Option<TaskRow> {
        if row.id == 0 {
            return self.insert(row);
        }
        let id = row.id;
        self.update(row);
        self.rows.get(&id).cloned()
    }

    pub fn delete(&mut self, id: u64) -> Option<TaskRow> {
        let removed = self.rows.shift_remove(&id)?;
        self.mutated();
        Some(removed)
    }

    /// Make sure `id` is never handed out by `insert`, without storing a row
    pub fn reserve_id(&mut self, id: u64) {
        self.bump_counter(id);
    }

    fn bump_counter(&mut self, id: u64) {
        if id >= self.autoincrement {
            self.autoincrement = id + 1;
        }
    }

    fn mutated(&mut self) {
        self.persist.trigger(self.clock.instant());
        self.events.emit(TaskEvent::TasksChanged);
    }

    /// Write to disk if the debounce period has passed. Returns whether a
    /// write happened.
    pub fn flush_if_due(&mut self) -> Result<bool, DbError> {
        let now = self.clock.instant();
        if !self.persist.poll(now) {
            return Ok(false);
        }
        let result = self.write();
        self.settle(result)
    }

    /// Write any pending changes now
    pub fn flush(&mut self) -> Result<bool, DbError> {
        if !self.persist.poll_now() {
            return Ok(false);
        }
        let result = self.write();
        self.settle(result)
    }

    /// Close the fire handed out by the debouncer. A failed write stays
    /// pending and is tried again after another quiet period; a refused
    /// one is dropped.
    fn settle(&mut self, result: Result<(), DbError>) -> Result<bool, DbError> {
        let now = self.clock.instant();
        match result {
            Ok(()) => {
                self.persist.finish(now);
                Ok(true)
            }
            Err(e @ DbError::NotAuthoritative { .. }) => {
                self.persist.finish(now);
                Err(e)
            }
            Err(e) => {
                self.persist.retry(now);
                Err(e)
            }
        }
    }

    fn write(&self) -> Result<(), DbError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !self.replica.is_authoritative() {
            let err = DbError::NotAuthoritative {
                self_id: self.replica.resolved_self_id(),
                authoritative_id: self.replica.authoritative_id.clone(),
            };
            tracing::warn!(error = %err, "database write refused");
            return Err(err);
        }

        let file = DbFileRef {
            autoincrement: self.autoincrement,
            rows: self.rows.values().collect(),
        };
        let json = serde_json::to_string_pretty(&file)?;

        let dir = path.parent().unwrap_or(Path::new("."));
        let _lock = VaultLock::acquire(dir)?;
        atomic_write(path, json.as_bytes()).map_err(|e| {
            tracing::warn!(path = %path.display(), error = %e, "database write failed");
            DbError::WriteError {
                path: path.clone(),
                source: e,
            }
        })?;
        tracing::debug!(rows = self.rows.len(), "task database written");
        Ok(())
    }
}

/// Borrowing twin of [`DbFile`] for writing
#[derive(Serialize)]
struct DbFileRef<'a> {
    autoincrement: u64,
    rows: Vec<&'a TaskRow>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::task::TaskType;
    use crate::util::clock::FixedClock;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn clock() -> Rc<FixedClock> {
        Rc::new(FixedClock::at(NaiveDate::from_ymd_opt(2025, 1, 5).unwrap(), 9))
    }

    fn row(text: &str) -> TaskRow {
        TaskRow {
            text: text.to_string(),
            path: "Tasks.md".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn insert_assigns_sequential_ids() {
        let mut db = TaskDatabase::in_memory(EventBus::new(), clock());
        let a = db.insert(row("a")).unwrap();
        let b = db.insert(row("b")).unwrap();
        assert_eq!((a.id, b.id), (1, 2));
        assert!(a.created.is_some());
        assert_eq!(db.autoincrement(), 3);
    }

    #[test]
    fn insert_rejects_assigned_id() {
        let mut db = TaskDatabase::in_memory(EventBus::new(), clock());
        let mut r = row("a");
        r.id = 9;
        assert!(db.insert(r).is_none());
        assert!(db.is_empty());
    }

    #[test]
    fn update_unknown_id_inserts_and_bumps_counter() {
        let mut db = TaskDatabase::in_memory(EventBus::new(), clock());
        let mut r = row("imported");
        r.id = 40;
        assert_eq!(db.update(r), UpdateOutcome::Inserted);
        assert_eq!(db.autoincrement(), 41);
        assert!(db.get_row(40).unwrap().created.is_some());
        assert_eq!(db.insert(row("next")).unwrap().id, 41);
    }

    #[test]
    fn identical_update_is_a_no_op() {
        let clock = clock();
        let events = EventBus::new();
        let mut db = TaskDatabase::in_memory(events.clone(), clock.clone());
        let stored = db.insert(row("a")).unwrap();
        db.flush().unwrap();

        let (_, rx) = events.subscribe_channel();
        assert_eq!(db.update(stored.clone()), UpdateOutcome::Unchanged);
        assert!(!db.is_dirty());
        assert!(rx.try_recv().is_err());

        let mut changed = stored;
        changed.task_type = TaskType::Someday;
        assert_eq!(db.update(changed), UpdateOutcome::Updated);
        assert!(db.is_dirty());
        assert_eq!(rx.try_recv(), Ok(TaskEvent::TasksChanged));
    }

    #[test]
    fn insert_or_update_picks_by_id() {
        let mut db = TaskDatabase::in_memory(EventBus::new(), clock());
        let fresh = db.insert_or_update(row("a")).unwrap();
        assert_eq!(fresh.id, 1);

        let mut renamed = fresh;
        renamed.text = "b".to_string();
        assert_eq!(db.insert_or_update(renamed).map(|r| r.text), Some("b".to_string()));
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn missing_id_is_reported() {
        let mut db = TaskDatabase::in_memory(EventBus::new(), clock());
        assert_eq!(db.update(row("a")), UpdateOutcome::MissingId);
    }

    #[test]
    fn delete_removes_row_and_keeps_counter() {
        let mut db = TaskDatabase::in_memory(EventBus::new(), clock());
        let a = db.insert(row("a")).unwrap();
        assert_eq!(db.delete(a.id).map(|r| r.text), Some("a".to_string()));
        assert!(db.delete(a.id).is_none());
        assert_eq!(db.insert(row("b")).unwrap().id, 2);
    }

    #[test]
    fn persists_after_debounce_and_reloads() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("db-tasks.json");
        let clock = clock();

        let mut db = TaskDatabase::load(
            &path,
            Duration::from_secs(3),
            ReplicaConfig::default(),
            EventBus::new(),
            clock.clone(),
        );
        db.insert(row("a")).unwrap();
        db.insert(row("b")).unwrap();
        assert!(!db.flush_if_due().unwrap());
        assert!(!path.exists());

        clock.advance(Duration::from_secs(3));
        assert!(db.flush_if_due().unwrap());
        assert!(!db.is_dirty());

        let reloaded = TaskDatabase::load(
            &path,
            Duration::from_secs(3),
            ReplicaConfig::default(),
            EventBus::new(),
            clock,
        );
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.autoincrement(), 3);
        let texts: Vec<&str> = reloaded.rows().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[test]
    fn failed_write_is_retried() {
        let tmp = TempDir::new().unwrap();
        let data_dir = tmp.path().join(".taskzero");
        let path = data_dir.join("db-tasks.json");
        let clock = clock();

        let mut db = TaskDatabase::load(
            &path,
            Duration::from_secs(3),
            ReplicaConfig::default(),
            EventBus::new(),
            clock.clone(),
        );
        db.insert(row("a")).unwrap();
        // No data dir yet, so the lock file cannot be opened
        assert!(matches!(db.flush(), Err(DbError::Lock(_))));
        assert!(db.is_dirty());

        fs::create_dir_all(&data_dir).unwrap();
        assert!(!db.flush_if_due().unwrap());
        clock.advance(Duration::from_secs(3));
        assert!(db.flush_if_due().unwrap());
        assert!(!db.is_dirty());
        assert!(path.exists());
    }

    #[test]
    fn reserved_id_is_skipped_by_insert() {
        let mut db = TaskDatabase::in_memory(EventBus::new(), clock());
        db.reserve_id(3);
        db.reserve_id(2);
        assert!(db.get_row(3).is_none());
        assert_eq!(db.insert(row("a")).unwrap().id, 4);
    }

    #[test]
    fn counter_is_repaired_on_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("db-tasks.json");
        fs::write(
            &path,
            r#"{"autoincrement": 2, "rows": [{"id": 17, "text": "hand edited"}]}"#,
        )
        .unwrap();
        let db = TaskDatabase::load(&path, Duration::ZERO, ReplicaConfig::default(), EventBus::new(), clock());
        assert_eq!(db.autoincrement(), 18);
    }

    #[test]
    fn corrupt_file_is_backed_up() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("db-tasks.json");
        fs::write(&path, "{ not json").unwrap();
        let db = TaskDatabase::load(&path, Duration::ZERO, ReplicaConfig::default(), EventBus::new(), clock());
        assert!(db.is_empty());
        assert!(tmp.path().join("db-tasks.json.bak").exists());
    }

    #[test]
    fn non_authoritative_replica_cannot_write() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("db-tasks.json");
        let replica = ReplicaConfig {
            self_id: "laptop".into(),
            authoritative_id: "desktop".into(),
        };
        let mut db = TaskDatabase::load(&path, Duration::ZERO, replica, EventBus::new(), clock());
        db.insert(row("a")).unwrap();
        assert!(matches!(db.flush(), Err(DbError::NotAuthoritative { .. })));
        assert!(!path.exists());
    }
}
