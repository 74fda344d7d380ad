use std::collections::HashSet;

use chrono::NaiveDate;
use serde::Serialize;

use crate::io::database::TaskDatabase;
use crate::model::task::{TaskRow, TaskType};
use crate::ops::task::Task;

/// Which part of the aggregated list an entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViewGroup {
    Due,
    Inbox,
    Project,
    NextAction,
    WaitingOn,
}

impl ViewGroup {
    pub fn label(self) -> &'static str {
        match self {
            ViewGroup::Due => "Due",
            ViewGroup::Inbox => "Inbox",
            ViewGroup::Project => "Projects",
            ViewGroup::NextAction => "Next actions",
            ViewGroup::WaitingOn => "Waiting on",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskListEntry {
    pub group: ViewGroup,
    pub row: TaskRow,
}

fn is_open(row: &TaskRow) -> bool {
    !row.is_orphaned() && !row.is_completed() && !row.path.is_empty()
}

/// Open tasks that live in a document, optionally of one type, oldest
/// created first. Rows without a creation time sort first.
pub fn get_tasks(db: &TaskDatabase, task_type: Option<TaskType>) -> Vec<TaskRow> {
    let mut rows: Vec<TaskRow> = db
        .rows()
        .filter(|r| is_open(r) && task_type.is_none_or(|t| r.task_type == t))
        .cloned()
        .collect();
    rows.sort_by_key(|r| r.created);
    rows
}

/// The aggregated "what now" list: due or overdue first (earliest first),
/// then inbox, stalled projects, next actions and waiting-on items. Each
/// task appears once, in the first group that claims it.
pub fn get_tasklist(db: &TaskDatabase, today: NaiveDate) -> Vec<TaskListEntry> {
    let mut out = Vec::new();
    let mut seen: HashSet<u64> = HashSet::new();

    let mut due: Vec<(NaiveDate, TaskRow)> = get_tasks(db, None)
        .into_iter()
        .filter_map(|r| r.due_on_or_before(today).map(|d| (d, r)))
        .collect();
    due.sort_by_key(|(date, _)| *date);
    push_group(&mut out, &mut seen, ViewGroup::Due, due.into_iter().map(|(_, r)| r));

    let current = |task_type: TaskType| {
        get_tasks(db, Some(task_type))
            .into_iter()
            .filter(|r| !r.scheduled_after(today))
    };

    push_group(&mut out, &mut seen, ViewGroup::Inbox, current(TaskType::Inbox));

    // Projects with nothing left to do underneath need attention
    let stalled = current(TaskType::Project).filter(|r| {
        Task::from_row(r.clone())
            .descendants(db)
            .iter()
            .all(|d| d.is_completed())
    });
    push_group(&mut out, &mut seen, ViewGroup::Project, stalled);

    push_group(&mut out, &mut seen, ViewGroup::NextAction, current(TaskType::NextAction));
    push_group(&mut out, &mut seen, ViewGroup::WaitingOn, current(TaskType::WaitingOn));
    out
}

fn push_group(
    out: &mut Vec<TaskListEntry>,
    seen: &mut HashSet<u64>,
    group: ViewGroup,
    rows: impl Iterator<Item = TaskRow>,
) {
    for row in rows {
        if seen.insert(row.id) {
            out.push(TaskListEntry { group, row });
        }
    }
}
