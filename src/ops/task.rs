use std::collections::HashSet;

use chrono::{Local, NaiveDate, TimeZone, Utc};

use crate::io::database::{TaskDatabase, UpdateOutcome};
use crate::io::store::{DocumentStore, ProcessOutcome, StoreError};
use crate::model::document::ListItem;
use crate::model::task::{TaskRow, TaskStatus, TaskType};
use crate::ops::reconcile::{Engine, ProcessedEntry, ReconcilePass};
use crate::parse::{leading_indent, serialize_task_line, type_is_displayed};

/// Error type for task operations
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task not found: {0}")]
    NotFound(u64),
    #[error("task has no id yet")]
    Unassigned,
    #[error("task {0} is not in any document")]
    NoPath(u64),
    #[error("document not found: {0}")]
    DocumentMissing(String),
    #[error("task text is empty")]
    EmptyText,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A parent chain that loops back on itself
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HierarchyError {
    #[error("parent cycle at task {0}")]
    Cycle(u64),
}

/// Ancestors of a task, root first, plus the id where a cycle was detected
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lineage {
    pub chain: Vec<TaskRow>,
    pub cycle: Option<u64>,
}

/// Where `move_to` puts the line in the target document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovePosition {
    End,
    Before(u64),
    After(u64),
}

/// A view over one database row. Cheap to build and throw away; the
/// database owns the data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub row: TaskRow,
    /// False when built from an id that is not in the database
    pub valid: bool,
}

impl Task {
    pub fn from_id(db: &TaskDatabase, id: u64) -> Task {
        match db.get_row(id) {
            Some(row) => Task {
                row: row.clone(),
                valid: true,
            },
            None => Task {
                row: TaskRow::default(),
                valid: false,
            },
        }
    }

    pub fn from_row(row: TaskRow) -> Task {
        Task { row, valid: true }
    }

    /// Parse free text (quick capture) and insert it as a new task
    pub fn from_text(engine: &mut Engine, text: &str) -> Result<Task, TaskError> {
        let today = engine.clock().today();
        let parsed = engine.parser().parse_text(text, today);
        if parsed.text.is_empty() {
            return Err(TaskError::EmptyText);
        }

        let mut row = TaskRow::new(engine.clock().now_utc());
        row.text = parsed.text;
        row.task_type = parsed.task_type.unwrap_or_default();
        row.due = parsed.due;
        row.scheduled = parsed.scheduled;
        if let Some(created) = parsed.created {
            row.created = Some(date_to_utc(created));
        }

        let row = engine.db_mut().insert(row).ok_or(TaskError::Unassigned)?;
        tracing::info!(id = row.id, text = %row.text, "task captured");
        Ok(Task::from_row(row))
    }

    /// Reconcile one list item of the snapshot in `pass` against the
    /// database. Returns `None` for lines that are not tracked tasks.
    pub fn from_list_item(
        engine: &mut Engine,
        pass: &mut ReconcilePass<'_>,
        item: &ListItem,
    ) -> Option<Task> {
        let line = pass.line(item.line)?;
        let parsed = engine.parser().parse_line(line, pass.today)?;

        if parsed.excluded {
            tracing::debug!(line = item.line, "skipping excluded task");
            return None;
        }
        if pass.section_excluded(item.line, &engine.settings().exclude.section) {
            tracing::debug!(line = item.line, "skipping task in excluded section");
            return None;
        }
        if parsed.text.is_empty() {
            return None;
        }

        let mut id = parsed.id;
        if let Some(claimed) = id
            && pass.is_claimed(claimed)
        {
            tracing::warn!(path = %pass.snapshot.path, line = item.line, id = claimed, "duplicate task id, assigning a new one");
            id = None;
        }

        let existing = id.and_then(|id| engine.db().get_row(id)).cloned();
        let status = parsed.status.unwrap_or_default();

        // Finished on the page and already finished (or unknown) in the
        // database: leave it exactly as it is.
        if status == TaskStatus::Done && existing.as_ref().is_none_or(|r| r.is_completed()) {
            let task_id = id.unwrap_or(0);
            if task_id != 0 {
                pass.claim(task_id);
                engine.db_mut().reserve_id(task_id);
            }

            // A row orphaned here by drift is back on the page; keep it and
            // let the canonical line be written this time
            let mut untouched = true;
            let existing = match existing {
                Some(mut row) if row.is_orphaned() && row.path == pass.snapshot.path => {
                    row.orphaned = 0;
                    if engine.db_mut().update(row.clone()).changed() {
                        pass.changed = true;
                    }
                    untouched = false;
                    tracing::debug!(id = row.id, "finished task found again");
                    Some(row)
                }
                other => other,
            };

            let root = pass.root_for(item).unwrap_or(item.line);
            pass.record(
                item.line,
                ProcessedEntry {
                    id: task_id,
                    root,
                    completed: true,
                    task_type: existing.as_ref().map(|r| r.task_type).unwrap_or_default(),
                    untouched,
                },
            );
            return existing.map(Task::from_row);
        }

        let was_completed = existing.as_ref().is_some_and(|r| r.is_completed());
        let mut row = match existing {
            Some(row) => row,
            None => {
                let mut row = TaskRow::new(engine.clock().now_utc());
                row.id = id.unwrap_or(0);
                row
            }
        };
        overlay(&mut row, &parsed, engine, was_completed, pass.today);

        row.line = item.line;
        row.orphaned = 0;
        row.path = pass.snapshot.path.clone();

        // Sequencing
        let root = pass.root_for(item);
        match root {
            Some(root_line) if !row.is_completed() => {
                row.parent = pass.parent_id(item).unwrap_or(0);
                if pass.blocks_in_subtree(root_line) {
                    row.task_type = TaskType::Dependent;
                } else if !matches!(
                    row.task_type,
                    TaskType::Someday | TaskType::WaitingOn | TaskType::Project
                ) {
                    row.task_type = TaskType::NextAction;
                }
                promote_to_project(engine, pass, root_line);
            }
            Some(_) => {
                row.parent = pass.parent_id(item).unwrap_or(0);
            }
            None => {
                row.parent = 0;
                if row.task_type == TaskType::Dependent {
                    row.task_type = TaskType::Inbox;
                }
            }
        }

        let stored = if row.id == 0 {
            let inserted = engine.db_mut().insert(row)?;
            pass.inserted.push(inserted.id);
            pass.changed = true;
            inserted
        } else {
            let id = row.id;
            let outcome = engine.db_mut().update(row);
            if outcome.changed() {
                pass.changed = true;
            }
            engine.db().get_row(id)?.clone()
        };

        pass.claim(stored.id);
        pass.record(
            item.line,
            ProcessedEntry {
                id: stored.id,
                root: root.unwrap_or(item.line),
                completed: stored.is_completed(),
                task_type: stored.task_type,
                untouched: false,
            },
        );
        Some(Task::from_row(stored))
    }

    pub fn id(&self) -> u64 {
        self.row.id
    }

    // -----------------------------------------------------------------------
    // Hierarchy
    // -----------------------------------------------------------------------

    /// Walk `parent` links upward. Stops at a root or a missing row; a
    /// repeated id stops the walk and is reported in `cycle`.
    pub fn lineage(&self, db: &TaskDatabase) -> Lineage {
        let mut chain = Vec::new();
        let mut visited: HashSet<u64> = HashSet::new();
        visited.insert(self.row.id);
        let mut parent = self.row.parent;
        let mut cycle = None;

        while parent != 0 {
            if !visited.insert(parent) {
                cycle = Some(parent);
                break;
            }
            let Some(row) = db.get_row(parent) else {
                break;
            };
            parent = row.parent;
            chain.push(row.clone());
        }
        chain.reverse();
        Lineage { chain, cycle }
    }

    /// Ancestors, root first
    pub fn ancestors(&self, db: &TaskDatabase) -> Result<Vec<TaskRow>, HierarchyError> {
        let lineage = self.lineage(db);
        match lineage.cycle {
            Some(id) => {
                tracing::warn!(id = self.row.id, cycle_at = id, "parent cycle");
                Err(HierarchyError::Cycle(id))
            }
            None => Ok(lineage.chain),
        }
    }

    /// Direct children that still exist in a document, in line order
    pub fn children(&self, db: &TaskDatabase) -> Vec<TaskRow> {
        children_of(db, self.row.id)
    }

    /// Every non-orphaned row below this one, depth first, siblings in line order
    pub fn descendants(&self, db: &TaskDatabase) -> Vec<TaskRow> {
        let mut out = Vec::new();
        let mut visited: HashSet<u64> = HashSet::new();
        visited.insert(self.row.id);
        let mut stack: Vec<TaskRow> = children_of(db, self.row.id);
        stack.reverse();

        while let Some(row) = stack.pop() {
            if !visited.insert(row.id) {
                tracing::warn!(id = row.id, "parent cycle while collecting descendants");
                continue;
            }
            let mut kids = children_of(db, row.id);
            kids.reverse();
            out.push(row);
            stack.extend(kids);
        }
        out
    }

    // -----------------------------------------------------------------------
    // Direct actions
    // -----------------------------------------------------------------------

    /// Flip between open and done, stamping or clearing the completion date
    pub fn toggle(&mut self, engine: &mut Engine) -> Result<UpdateOutcome, TaskError> {
        self.row.status = self.row.status.toggled();
        self.row.completed = match self.row.status {
            TaskStatus::Done => Some(engine.clock().today()),
            TaskStatus::Todo => None,
        };
        self.update(engine)
    }

    pub fn set_type(&mut self, engine: &mut Engine, task_type: TaskType) -> Result<UpdateOutcome, TaskError> {
        self.row.task_type = task_type;
        self.update(engine)
    }

    /// Store the row and queue it for writing back into its document
    pub fn update(&mut self, engine: &mut Engine) -> Result<UpdateOutcome, TaskError> {
        if !self.valid || self.row.id == 0 {
            tracing::debug!(text = %self.row.text, "update refused: task has no id");
            return Err(TaskError::Unassigned);
        }
        if self.row.path.is_empty() {
            tracing::debug!(id = self.row.id, "update refused: task has no path");
            return Err(TaskError::NoPath(self.row.id));
        }
        let outcome = engine.db_mut().update(self.row.clone());
        if outcome.changed() {
            engine.queue_mut().enqueue(self.row.id);
        }
        Ok(outcome)
    }

    /// Canonical line, indented one tab per ancestor
    pub fn to_markdown_line(&self, engine: &Engine) -> String {
        let depth = self.lineage(engine.db()).chain.len();
        serialize_task_line(
            &self.row,
            &"\t".repeat(depth),
            engine.settings(),
            engine.clock().today(),
        )
    }

    /// Move the task's line into `target`. Returns false (and changes
    /// nothing) if the target document does not exist.
    pub fn move_to(
        &mut self,
        engine: &mut Engine,
        store: &dyn DocumentStore,
        target: &str,
        position: MovePosition,
    ) -> Result<bool, TaskError> {
        if !self.valid || self.row.id == 0 {
            return Err(TaskError::Unassigned);
        }
        if !store.exists(target) {
            tracing::debug!(target, "move skipped: target document is missing");
            return Ok(false);
        }

        let id = self.row.id;
        let today = engine.clock().today();

        if !self.row.path.is_empty() {
            let outcome = store.process(&self.row.path, &mut |content| {
                let mut lines: Vec<&str> = content.split('\n').collect();
                let index = lines
                    .iter()
                    .position(|l| engine.parser().parse_line(l, today).and_then(|p| p.id) == Some(id))?;
                lines.remove(index);
                Some(lines.join("\n"))
            })?;
            if outcome == ProcessOutcome::Missing {
                tracing::debug!(path = %self.row.path, "source document missing, nothing to remove");
            }
        }

        let neighbour = match position {
            MovePosition::End => None,
            MovePosition::Before(n) => Some((n, false)),
            MovePosition::After(n) => Some((n, true)),
        }
        .filter(|(n, _)| engine.db().get_row(*n).is_some_and(|r| r.path == target));

        let generated = self.to_markdown_line(engine);
        let generated = generated.trim_start();
        let mut placed_at = 0;
        let mut beside = None;
        store.process(target, &mut |content| {
            let mut lines: Vec<String> = content.split('\n').map(str::to_string).collect();
            let anchor_index = neighbour.and_then(|(n, after)| {
                lines
                    .iter()
                    .position(|l| engine.parser().parse_line(l, today).and_then(|p| p.id) == Some(n))
                    .map(|i| (i, after))
            });
            beside = anchor_index.and(neighbour.map(|(n, _)| n));
            match anchor_index {
                Some((i, after)) => {
                    let indent = leading_indent(&lines[i]).to_string();
                    let line = format!("{}{}", indent, generated);
                    placed_at = if after { i + 1 } else { i };
                    lines.insert(placed_at, line);
                    Some(lines.join("\n"))
                }
                None => {
                    let trimmed = content.trim_end();
                    placed_at = if trimmed.is_empty() {
                        0
                    } else {
                        trimmed.split('\n').count()
                    };
                    if trimmed.is_empty() {
                        Some(format!("{}\n", generated))
                    } else {
                        Some(format!("{}\n{}\n", trimmed, generated))
                    }
                }
            }
        })?;

        // Siblings of the neighbour, or a new top-level task at the end
        self.row.parent = beside
            .and_then(|n| engine.db().get_row(n))
            .map_or(0, |r| r.parent);
        self.row.path = target.to_string();
        self.row.line = placed_at;
        engine.db_mut().update(self.row.clone());
        tracing::info!(id, target, "task moved");
        Ok(true)
    }

    /// Insert a new subtask line after the last descendant. The new row is
    /// stored straight away; the next reconciliation promotes this task to
    /// a project.
    pub fn add_subtask(
        &self,
        engine: &mut Engine,
        store: &dyn DocumentStore,
        text: &str,
    ) -> Result<Task, TaskError> {
        if !self.valid || self.row.id == 0 {
            return Err(TaskError::Unassigned);
        }
        if self.row.path.is_empty() {
            return Err(TaskError::NoPath(self.row.id));
        }
        if !store.exists(&self.row.path) {
            return Err(TaskError::DocumentMissing(self.row.path.clone()));
        }

        let line = self
            .descendants(engine.db())
            .iter()
            .filter(|r| r.path == self.row.path)
            .map(|r| r.line)
            .max()
            .unwrap_or(self.row.line)
            + 1;

        let mut subtask = Task::from_text(engine, text)?;
        subtask.row.parent = self.row.id;
        subtask.row.path = self.row.path.clone();
        subtask.row.line = line;
        engine.db_mut().update(subtask.row.clone());

        let generated = subtask.to_markdown_line(engine);
        store.process(&self.row.path, &mut |content| {
            let mut lines: Vec<&str> = content.split('\n').collect();
            let at = line.min(lines.len());
            lines.insert(at, &generated);
            Some(lines.join("\n"))
        })?;
        tracing::info!(parent = self.row.id, id = subtask.row.id, "subtask added");
        Ok(subtask)
    }
}

/// Non-orphaned rows whose parent is `id`, by line
pub fn children_of(db: &TaskDatabase, id: u64) -> Vec<TaskRow> {
    let mut kids: Vec<TaskRow> = db
        .rows()
        .filter(|r| r.parent == id && r.id != id && !r.is_orphaned())
        .cloned()
        .collect();
    kids.sort_by_key(|r| r.line);
    kids
}

/// Quick capture: create the task and append its line to a note
pub fn capture(
    engine: &mut Engine,
    store: &dyn DocumentStore,
    text: &str,
    note: Option<&str>,
) -> Result<Task, TaskError> {
    let path = note
        .map(str::to_string)
        .unwrap_or_else(|| engine.settings().tasks.default_note.clone());
    let content = store.read(&path)?.unwrap_or_default();

    let mut task = Task::from_text(engine, text)?;
    task.row.path = path.clone();
    task.row.line = next_line_index(&content);
    engine.db_mut().update(task.row.clone());

    let line = task.to_markdown_line(engine);
    store.append(&path, &line)?;
    Ok(task)
}

/// Index the next appended line will get
fn next_line_index(content: &str) -> usize {
    if content.is_empty() {
        0
    } else {
        content.trim_end_matches('\n').split('\n').count()
    }
}

/// Merge parsed fields over a stored row. Parsed values win; fields the
/// line would show but does not carry are cleared; hidden ones are kept.
fn overlay(
    row: &mut TaskRow,
    parsed: &crate::parse::ParsedTask,
    engine: &Engine,
    was_completed: bool,
    today: NaiveDate,
) {
    let display = &engine.settings().display;

    row.status = parsed.status.unwrap_or_default();
    row.text = parsed.text.clone();

    match parsed.task_type {
        Some(task_type) => row.task_type = task_type,
        None if !was_completed && type_is_displayed(row.task_type, display) => {
            row.task_type = TaskType::Inbox;
        }
        None => {}
    }

    overlay_date(&mut row.due, parsed.due, display.due.is_shown());
    overlay_date(&mut row.scheduled, parsed.scheduled, display.scheduled.is_shown());

    match parsed.created {
        Some(date) => {
            if row.created.map(|c| c.with_timezone(&Local).date_naive()) != Some(date) {
                row.created = Some(date_to_utc(date));
            }
        }
        None if display.created.is_shown() => row.created = None,
        None => {}
    }

    row.completed = match row.status {
        TaskStatus::Done => Some(parsed.completed.unwrap_or(today)),
        TaskStatus::Todo => None,
    };
}

fn overlay_date(stored: &mut Option<NaiveDate>, parsed: Option<NaiveDate>, displayed: bool) {
    match parsed {
        Some(date) => *stored = Some(date),
        None if displayed => *stored = None,
        None => {}
    }
}

/// Midnight local time on `date`, in UTC
fn date_to_utc(date: NaiveDate) -> chrono::DateTime<Utc> {
    date.and_hms_opt(0, 0, 0)
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or_else(|| date.and_time(chrono::NaiveTime::MIN).and_utc())
}

/// Make the root of a sequence a project, updating both the database and
/// this pass's bookkeeping.
fn promote_to_project(engine: &mut Engine, pass: &mut ReconcilePass<'_>, root_line: usize) {
    let Some(root_id) = pass.id_at(root_line) else {
        return;
    };
    let Some(root) = engine.db().get_row(root_id) else {
        return;
    };
    if root.is_completed() || root.task_type == TaskType::Project {
        return;
    }
    let mut root = root.clone();
    root.task_type = TaskType::Project;
    if engine.db_mut().update(root).changed() {
        pass.changed = true;
    }
    pass.set_type(root_id, TaskType::Project);
    tracing::debug!(id = root_id, "promoted to project");
}
