use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;

use chrono::{DateTime, Local, NaiveDate};
use serde::Serialize;

use crate::io::activity::EditorActivity;
use crate::io::database::{DbError, TaskDatabase};
use crate::io::events::{EventBus, TaskEvent};
use crate::io::store::{DocumentStore, ProcessOutcome, SnapshotProvider, StoreError};
use crate::io::vault_io::Vault;
use crate::io::write_back::{DrainContext, DrainReport, WriteBackQueue};
use crate::model::config::Settings;
use crate::model::document::{DocumentSnapshot, ListItem};
use crate::model::task::TaskType;
use crate::ops::retention::{SweepReport, sweep_orphans};
use crate::ops::task::Task;
use crate::parse::{TaskLineParser, leading_indent, serialize_task_line, split_line_ending};
use crate::util::clock::Clock;

/// Error type for engine operations that touch more than one collaborator
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("invalid task pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// What one reconciliation of one document did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub path: String,
    /// Not the authoritative replica; nothing was looked at
    pub refused: bool,
    /// The note carries the note-level exclusion tag
    pub excluded: bool,
    pub changed: bool,
    pub inserted: Vec<u64>,
    pub orphaned: Vec<u64>,
    /// Canonical lines were written back into the document
    pub rewritten: bool,
    /// The document changed after the snapshot was taken; nothing written
    pub drifted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub drain: Option<DrainReport>,
    pub flushed: bool,
    pub flush_refused: bool,
    pub sweep: Option<SweepReport>,
}

/// One task line handled during a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessedEntry {
    /// 0 for a finished line that never had an id
    pub id: u64,
    /// Line of the top of the item's task hierarchy; the entry's own line
    /// for roots
    pub root: usize,
    pub completed: bool,
    pub task_type: TaskType,
    /// A finished line left exactly as written
    pub untouched: bool,
}

/// Bookkeeping for a single reconciliation of one snapshot. Entries are
/// recorded in line order, so later items see earlier decisions.
pub struct ReconcilePass<'s> {
    pub snapshot: &'s DocumentSnapshot,
    lines: Vec<&'s str>,
    pub today: NaiveDate,
    claimed: HashSet<u64>,
    processed: BTreeMap<usize, ProcessedEntry>,
    pub changed: bool,
    pub inserted: Vec<u64>,
}

impl<'s> ReconcilePass<'s> {
    pub fn new(snapshot: &'s DocumentSnapshot, today: NaiveDate) -> Self {
        ReconcilePass {
            snapshot,
            lines: snapshot.lines().into_iter().map(|l| split_line_ending(l).0).collect(),
            today,
            claimed: HashSet::new(),
            processed: BTreeMap::new(),
            changed: false,
            inserted: Vec::new(),
        }
    }

    pub fn line(&self, index: usize) -> Option<&'s str> {
        self.lines.get(index).copied()
    }

    /// Does the text from the nearest heading above `line` (or the top of
    /// the document) up to `line` carry `tag` as a whole token
    pub fn section_excluded(&self, line: usize, tag: &str) -> bool {
        let tag = tag.trim();
        if tag.is_empty() {
            return false;
        }
        let start = self.snapshot.nearest_heading(line).unwrap_or(0);
        self.lines[start.min(self.lines.len())..line.min(self.lines.len())]
            .iter()
            .any(|l| l.split_whitespace().any(|token| token == tag))
    }

    pub fn is_claimed(&self, id: u64) -> bool {
        self.claimed.contains(&id)
    }

    pub fn claim(&mut self, id: u64) {
        self.claimed.insert(id);
    }

    pub fn record(&mut self, line: usize, entry: ProcessedEntry) {
        self.processed.insert(line, entry);
    }

    pub fn entries(&self) -> impl Iterator<Item = (usize, &ProcessedEntry)> {
        self.processed.iter().map(|(line, e)| (*line, e))
    }

    /// Line of the root of the hierarchy `item` belongs to, if its parent
    /// item is a task handled earlier in this pass
    pub fn root_for(&self, item: &ListItem) -> Option<usize> {
        item.parent
            .and_then(|p| self.processed.get(&p))
            .map(|entry| entry.root)
    }

    pub fn parent_id(&self, item: &ListItem) -> Option<u64> {
        item.parent
            .and_then(|p| self.processed.get(&p))
            .map(|entry| entry.id)
    }

    /// Id recorded for the task on `line`; `None` when it has none
    pub fn id_at(&self, line: usize) -> Option<u64> {
        self.processed.get(&line).map(|e| e.id).filter(|id| *id != 0)
    }

    /// Is there an open, non-project task under the root on line `root`
    /// already in this pass
    pub fn blocks_in_subtree(&self, root: usize) -> bool {
        self.processed.iter().any(|(line, e)| {
            e.root == root && *line != root && !e.completed && e.task_type != TaskType::Project
        })
    }

    pub fn set_type(&mut self, id: u64, task_type: TaskType) {
        for entry in self.processed.values_mut().filter(|e| e.id == id) {
            entry.task_type = task_type;
        }
    }
}

/// Owns the database, the write-back queue and the parser, and runs
/// reconciliation, write-back and retention against a document store.
pub struct Engine {
    settings: Settings,
    parser: TaskLineParser,
    db: TaskDatabase,
    queue: WriteBackQueue,
    events: EventBus,
    clock: Rc<dyn Clock>,
    last_sweep: Option<DateTime<Local>>,
}

impl Engine {
    pub fn new(settings: Settings, mut db: TaskDatabase, clock: Rc<dyn Clock>) -> Result<Self, EngineError> {
        let parser = TaskLineParser::from_settings(&settings)?;
        db.set_replica(settings.replica.clone());
        let queue = WriteBackQueue::new(
            settings.timing.queue_interval(),
            settings.timing.queue_stale_after(),
            clock.instant(),
        );
        Ok(Engine {
            events: db.events().clone(),
            settings,
            parser,
            db,
            queue,
            clock,
            last_sweep: None,
        })
    }

    /// An engine whose database lives only in memory
    pub fn in_memory(settings: Settings, clock: Rc<dyn Clock>) -> Result<Self, EngineError> {
        let db = TaskDatabase::in_memory(EventBus::new(), clock.clone());
        Self::new(settings, db, clock)
    }

    /// Load the vault's database and build an engine over it
    pub fn open(vault: &Vault, events: EventBus, clock: Rc<dyn Clock>) -> Result<Self, EngineError> {
        let db = TaskDatabase::load(
            &vault.db_path(),
            vault.settings.timing.persist_debounce(),
            vault.settings.replica.clone(),
            events,
            clock.clone(),
        );
        Self::new(vault.settings.clone(), db, clock)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Swap in new settings, e.g. after the config file changed
    pub fn set_settings(&mut self, settings: Settings) -> Result<(), EngineError> {
        self.parser = TaskLineParser::from_settings(&settings)?;
        self.db.set_replica(settings.replica.clone());
        self.settings = settings;
        Ok(())
    }

    pub fn parser(&self) -> &TaskLineParser {
        &self.parser
    }

    pub fn db(&self) -> &TaskDatabase {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut TaskDatabase {
        &mut self.db
    }

    pub fn queue(&self) -> &WriteBackQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut WriteBackQueue {
        &mut self.queue
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn is_authoritative(&self) -> bool {
        self.settings.replica.is_authoritative()
    }

    // -----------------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------------

    /// Bring the database in line with one document snapshot, then write
    /// canonical lines back if the document has not moved on since.
    pub fn reconcile(
        &mut self,
        snapshot: &DocumentSnapshot,
        store: &dyn DocumentStore,
    ) -> Result<ReconcileReport, StoreError> {
        let path = snapshot.path.clone();
        let mut report = ReconcileReport {
            path: path.clone(),
            ..Default::default()
        };

        if !self.is_authoritative() {
            tracing::warn!(path = %path, "reconcile refused: replica is not authoritative");
            report.refused = true;
            return Ok(report);
        }

        let now_ms = self.clock.now_millis();
        let today = self.clock.today();

        // 1. The whole note is excluded
        let note_tag = self.settings.exclude.note.trim();
        if !note_tag.is_empty() && snapshot.has_tag(note_tag) {
            report.excluded = true;
            let ids: Vec<u64> = self
                .db
                .rows_at(&path)
                .filter(|r| !r.is_orphaned())
                .map(|r| r.id)
                .collect();
            for id in ids {
                if self.orphan(id, now_ms) {
                    report.orphaned.push(id);
                }
            }
            report.changed = !report.orphaned.is_empty();
            tracing::debug!(path = %path, orphaned = report.orphaned.len(), "note excluded");
            if report.changed {
                self.events.emit(TaskEvent::TasksChangedExternally);
            }
            return Ok(report);
        }

        // 2. Every task item, in line order
        let mut pass = ReconcilePass::new(snapshot, today);
        let mut items: Vec<ListItem> = snapshot.task_items().cloned().collect();
        items.sort_by_key(|item| item.line);
        for item in &items {
            Task::from_list_item(self, &mut pass, item);
        }

        // 3. Rows that used to live here and were not seen
        let unseen: Vec<u64> = self
            .db
            .rows_at(&path)
            .filter(|r| !r.is_orphaned() && !pass.is_claimed(r.id))
            .map(|r| r.id)
            .collect();
        for id in unseen {
            if self.orphan(id, now_ms) {
                tracing::debug!(path = %path, id, "task no longer in document");
                report.orphaned.push(id);
            }
        }

        // 4. Canonical lines
        let lines = snapshot.lines();
        let mut rewrites: BTreeMap<usize, (u64, String)> = BTreeMap::new();
        for (line_no, entry) in pass.entries() {
            if entry.untouched || entry.id == 0 {
                continue;
            }
            let (Some(row), Some(current)) = (self.db.get_row(entry.id), lines.get(line_no)) else {
                continue;
            };
            let (body, ending) = split_line_ending(current);
            let canonical = serialize_task_line(row, leading_indent(body), &self.settings, today);
            if canonical != body {
                rewrites.insert(line_no, (entry.id, format!("{}{}", canonical, ending)));
            }
        }

        if !rewrites.is_empty() {
            let mut drift = false;
            let outcome = store.process(&path, &mut |live| {
                if live != snapshot.content {
                    drift = true;
                    return None;
                }
                let updated: Vec<&str> = lines
                    .iter()
                    .enumerate()
                    .map(|(i, line)| rewrites.get(&i).map_or(*line, |(_, canonical)| canonical.as_str()))
                    .collect();
                Some(updated.join("\n"))
            })?;
            if outcome == ProcessOutcome::Missing {
                drift = true;
            }

            if drift {
                tracing::warn!(path = %path, lines = rewrites.len(), "document changed since snapshot, orphaning affected tasks");
                report.drifted = true;
                for (id, _) in rewrites.values() {
                    if self.orphan(*id, now_ms) {
                        report.orphaned.push(*id);
                    }
                }
            } else {
                report.rewritten = outcome == ProcessOutcome::Written;
            }
        }

        report.inserted = pass.inserted;
        report.changed = pass.changed || !report.orphaned.is_empty();
        if report.changed {
            self.events.emit(TaskEvent::TasksChangedExternally);
        }
        tracing::info!(
            path = %path,
            inserted = report.inserted.len(),
            orphaned = report.orphaned.len(),
            rewritten = report.rewritten,
            "reconciled"
        );
        Ok(report)
    }

    /// Snapshot `path` and reconcile it. A document that no longer exists
    /// orphans every row recorded there.
    pub fn reconcile_path(
        &mut self,
        path: &str,
        provider: &dyn SnapshotProvider,
        store: &dyn DocumentStore,
    ) -> Result<ReconcileReport, StoreError> {
        let snapshot = match provider.snapshot(path)? {
            Some(snapshot) => snapshot,
            None => DocumentSnapshot {
                path: path.to_string(),
                ..Default::default()
            },
        };
        self.reconcile(&snapshot, store)
    }

    fn orphan(&mut self, id: u64, now_ms: i64) -> bool {
        let Some(row) = self.db.get_row(id) else {
            return false;
        };
        if row.is_orphaned() {
            return false;
        }
        let mut row = row.clone();
        row.orphaned = now_ms;
        self.db.update(row).changed()
    }

    // -----------------------------------------------------------------------
    // Write-back, persistence, retention
    // -----------------------------------------------------------------------

    pub fn drain_write_back(
        &mut self,
        store: &dyn DocumentStore,
        activity: &dyn EditorActivity,
    ) -> Result<DrainReport, StoreError> {
        let ctx = DrainContext {
            db: &self.db,
            store,
            activity,
            parser: &self.parser,
            settings: &self.settings,
            today: self.clock.today(),
            now: self.clock.instant(),
        };
        self.queue.drain(&ctx)
    }

    /// One turn of the cooperative loop: drain the queue when its interval
    /// comes round, persist the database when its debounce expires, sweep
    /// when the sweep interval has passed.
    pub fn tick(
        &mut self,
        store: &dyn DocumentStore,
        activity: &dyn EditorActivity,
    ) -> Result<TickReport, EngineError> {
        let mut report = TickReport::default();

        if self.queue.tick(self.clock.instant()) {
            report.drain = Some(self.drain_write_back(store, activity)?);
        }

        report.sweep = self.maybe_sweep();

        match self.db.flush_if_due() {
            Ok(flushed) => report.flushed = flushed,
            Err(DbError::NotAuthoritative { .. }) => report.flush_refused = true,
            Err(e) => return Err(e.into()),
        }
        Ok(report)
    }

    /// Write the database now if anything is pending
    pub fn flush(&mut self) -> Result<bool, DbError> {
        self.db.flush()
    }

    /// Run the retention sweep if the sweep interval has passed since the
    /// last one
    pub fn maybe_sweep(&mut self) -> Option<SweepReport> {
        let now = self.clock.now();
        if let Some(last) = self.last_sweep
            && now - last < self.settings.timing.sweep_interval()
        {
            return None;
        }
        self.last_sweep = Some(now);
        Some(self.sweep())
    }

    pub fn sweep(&mut self) -> SweepReport {
        if !self.is_authoritative() {
            tracing::debug!("sweep skipped: replica is not authoritative");
            return SweepReport::default();
        }
        sweep_orphans(
            &mut self.db,
            self.clock.now_millis(),
            self.settings.timing.retention(),
        )
    }
}
