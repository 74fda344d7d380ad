use serde::Serialize;

use crate::model::task::{TaskRow, TaskStatus, TaskType};
use crate::ops::reconcile::ReconcileReport;
use crate::ops::views::{TaskListEntry, ViewGroup};
use crate::util::unicode::pad_to_width;

const TEXT_WIDTH: usize = 40;

// ---------------------------------------------------------------------------
// JSON output structs
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct TaskJson {
    pub id: u64,
    pub status: TaskStatus,
    pub text: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub path: String,
    pub line: usize,
    #[serde(skip_serializing_if = "is_zero")]
    pub parent: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub orphaned: bool,
}

#[derive(Serialize)]
pub struct TaskListEntryJson {
    pub group: ViewGroup,
    #[serde(flatten)]
    pub task: TaskJson,
}

#[derive(Serialize)]
pub struct TaskDetailJson {
    #[serde(flatten)]
    pub task: TaskJson,
    pub ancestors: Vec<TaskJson>,
    pub descendants: Vec<TaskJson>,
}

#[derive(Serialize)]
pub struct ReplicaJson {
    pub self_id: String,
    pub authoritative_id: Option<String>,
    pub authoritative: bool,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

pub fn task_to_json(row: &TaskRow) -> TaskJson {
    TaskJson {
        id: row.id,
        status: row.status,
        text: row.text.clone(),
        task_type: row.task_type,
        path: row.path.clone(),
        line: row.line,
        parent: row.parent,
        created: row.created.map(|c| c.to_rfc3339()),
        scheduled: row.scheduled.map(|d| d.to_string()),
        due: row.due.map(|d| d.to_string()),
        completed: row.completed.map(|d| d.to_string()),
        orphaned: row.is_orphaned(),
    }
}

pub fn tasklist_to_json(entries: &[TaskListEntry]) -> Vec<TaskListEntryJson> {
    entries
        .iter()
        .map(|e| TaskListEntryJson {
            group: e.group,
            task: task_to_json(&e.row),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Human-readable formatting
// ---------------------------------------------------------------------------

/// Format a single task as a one-line summary
pub fn format_task_line(row: &TaskRow) -> String {
    let mut tail: Vec<String> = Vec::new();
    if let Some(scheduled) = row.scheduled {
        tail.push(format!("scheduled {}", scheduled));
    }
    if let Some(due) = row.due {
        tail.push(format!("due {}", due));
    }
    if let Some(completed) = row.completed {
        tail.push(format!("done {}", completed));
    }
    tail.push(if row.path.is_empty() {
        "-".to_string()
    } else {
        row.path.clone()
    });

    format!(
        "[{}] {:>4}  {}  {}",
        row.status.checkbox_char(),
        row.id,
        pad_to_width(&row.text, TEXT_WIDTH),
        tail.join("  ")
    )
}

/// The aggregated list, one header per non-empty group
pub fn format_tasklist(entries: &[TaskListEntry]) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current: Option<ViewGroup> = None;
    for entry in entries {
        if current != Some(entry.group) {
            if current.is_some() {
                lines.push(String::new());
            }
            lines.push(format!("== {} ==", entry.group.label()));
            current = Some(entry.group);
        }
        lines.push(format_task_line(&entry.row));
    }
    lines
}

/// Detailed task view with its place in the hierarchy
pub fn format_task_detail(row: &TaskRow, ancestors: &[TaskRow], descendants: &[TaskRow]) -> Vec<String> {
    let mut lines = Vec::new();
    lines.push(format!(
        "[{}] {} {}",
        row.status.checkbox_char(),
        row.id,
        row.text
    ));
    lines.push(format!("type: {}", row.task_type.tag_name()));
    if row.path.is_empty() {
        lines.push("note: -".to_string());
    } else {
        lines.push(format!("note: {}:{}", row.path, row.line + 1));
    }
    if let Some(created) = row.created {
        lines.push(format!("created: {}", created.format("%Y-%m-%d")));
    }
    if let Some(scheduled) = row.scheduled {
        lines.push(format!("scheduled: {}", scheduled));
    }
    if let Some(due) = row.due {
        lines.push(format!("due: {}", due));
    }
    if let Some(completed) = row.completed {
        lines.push(format!("completed: {}", completed));
    }
    if row.is_orphaned() {
        lines.push("orphaned: missing from its note".to_string());
    }

    if !ancestors.is_empty() {
        lines.push(String::new());
        lines.push("ancestors:".to_string());
        for (depth, a) in ancestors.iter().enumerate() {
            lines.push(format!("{}[{}] {} {}", "  ".repeat(depth + 1), a.status.checkbox_char(), a.id, a.text));
        }
    }

    if !descendants.is_empty() {
        lines.push(String::new());
        lines.push("subtasks:".to_string());
        for d in descendants {
            let depth = depth_below(d, row.id, descendants);
            lines.push(format!("{}[{}] {} {}", "  ".repeat(depth), d.status.checkbox_char(), d.id, d.text));
        }
    }
    lines
}

/// Nesting of `row` under `top`, counted through `rows`
fn depth_below(row: &TaskRow, top: u64, rows: &[TaskRow]) -> usize {
    let mut depth = 1;
    let mut parent = row.parent;
    while parent != top && parent != 0 && depth <= rows.len() {
        match rows.iter().find(|r| r.id == parent) {
            Some(p) => {
                parent = p.parent;
                depth += 1;
            }
            None => break,
        }
    }
    depth
}

/// One line per reconciled note that did something
pub fn format_reconcile_report(report: &ReconcileReport) -> Option<String> {
    if report.refused {
        return Some(format!("{}: refused (not the authoritative replica)", report.path));
    }
    if report.excluded && report.orphaned.is_empty() {
        return None;
    }
    if !report.changed && !report.rewritten {
        return None;
    }
    let mut parts = Vec::new();
    if !report.inserted.is_empty() {
        parts.push(format!("{} new", report.inserted.len()));
    }
    if !report.orphaned.is_empty() {
        parts.push(format!("{} missing", report.orphaned.len()));
    }
    if report.rewritten {
        parts.push("rewritten".to_string());
    }
    if report.drifted {
        parts.push("changed during sync".to_string());
    }
    if parts.is_empty() {
        parts.push("updated".to_string());
    }
    Some(format!("{}: {}", report.path, parts.join(", ")))
}

/// Parse a type name into TaskType
pub fn parse_task_type(s: &str) -> Result<TaskType, String> {
    TaskType::from_tag_name(s).ok_or_else(|| {
        format!(
            "unknown type '{}' (expected: inbox, next-action, project, waiting-on, someday, dependent)",
            s
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use insta::assert_snapshot;

    fn row(id: u64, text: &str) -> TaskRow {
        TaskRow {
            id,
            text: text.to_string(),
            path: "Tasks.md".to_string(),
            line: id as usize,
            ..Default::default()
        }
    }

    #[test]
    fn tasklist_text() {
        let entries = vec![
            TaskListEntry {
                group: ViewGroup::Due,
                row: TaskRow {
                    due: NaiveDate::from_ymd_opt(2025, 1, 2),
                    ..row(4, "Pay rent")
                },
            },
            TaskListEntry {
                group: ViewGroup::Inbox,
                row: row(12, "Call the plumber about the dripping kitchen tap"),
            },
            TaskListEntry {
                group: ViewGroup::NextAction,
                row: TaskRow {
                    path: "Projects/Home.md".into(),
                    ..row(7, "Pick tiles")
                },
            },
        ];
        let output = format_tasklist(&entries).join("\n");
        assert_snapshot!(output, @r"
        == Due ==
        [ ]    4  Pay rent                                  due 2025-01-02  Tasks.md

        == Inbox ==
        [ ]   12  Call the plumber about the dripping kit…  Tasks.md

        == Next actions ==
        [ ]    7  Pick tiles                                Projects/Home.md
        ");
    }

    #[test]
    fn task_detail_text() {
        let parent = row(1, "Renovate kitchen");
        let task = TaskRow {
            parent: 1,
            task_type: TaskType::NextAction,
            ..row(2, "Pick tiles")
        };
        let child = TaskRow {
            parent: 2,
            status: TaskStatus::Done,
            completed: NaiveDate::from_ymd_opt(2025, 1, 4),
            ..row(3, "Get samples")
        };
        let grandchild = TaskRow {
            parent: 3,
            ..row(4, "Visit showroom")
        };
        let output = format_task_detail(&task, &[parent], &[child, grandchild]).join("\n");
        assert_snapshot!(output, @r"
        [ ] 2 Pick tiles
        type: next-action
        note: Tasks.md:3

        ancestors:
          [ ] 1 Renovate kitchen

        subtasks:
          [x] 3 Get samples
            [ ] 4 Visit showroom
        ");
    }

    #[test]
    fn unknown_type_is_an_error() {
        assert_eq!(parse_task_type("#someday"), Ok(TaskType::Someday));
        assert!(parse_task_type("later").is_err());
    }

    #[test]
    fn quiet_reports_print_nothing() {
        let report = ReconcileReport {
            path: "Tasks.md".into(),
            ..Default::default()
        };
        assert_eq!(format_reconcile_report(&report), None);
        let report = ReconcileReport {
            path: "Tasks.md".into(),
            changed: true,
            inserted: vec![1, 2],
            rewritten: true,
            ..Default::default()
        };
        assert_eq!(
            format_reconcile_report(&report).as_deref(),
            Some("Tasks.md: 2 new, rewritten")
        );
    }
}
