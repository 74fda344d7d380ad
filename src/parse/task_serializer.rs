use chrono::NaiveDate;

use crate::model::config::{DisplayConfig, DisplayOption, Settings};
use crate::model::task::{Signifier, TaskRow, TaskType};

/// The `^tz42` anchor that identifies a task line
pub fn block_anchor(prefix: &str, id: u64) -> String {
    format!("^{}{}", prefix, id)
}

/// Type marker for the task line, if this type is displayed.
/// Completed tasks never carry one.
pub fn type_signifier(row: &TaskRow, display: &DisplayConfig) -> Option<String> {
    if row.is_completed() {
        return None;
    }
    if !(row.task_type.always_displayed() || display.all_types) {
        return None;
    }
    match display.types {
        DisplayOption::Emoji => Some(row.task_type.emoji().to_string()),
        DisplayOption::Tag => Some(format!("#{}", row.task_type.tag_name())),
        DisplayOption::None => None,
    }
}

/// Whether a task of this type shows its type on the line
pub fn type_is_displayed(task_type: TaskType, display: &DisplayConfig) -> bool {
    display.types.is_shown() && (task_type.always_displayed() || display.all_types)
}

/// Render one canonical task line.
///
/// `indent` is written verbatim in front of the checkbox. A completed task
/// without a completion date shows `today`.
pub fn serialize_task_line(
    row: &TaskRow,
    indent: &str,
    settings: &Settings,
    today: NaiveDate,
) -> String {
    let display = &settings.display;
    let mut parts: Vec<String> = Vec::with_capacity(8);

    parts.push(format!("{}- [{}]", indent, row.status.checkbox_char()));

    if let Some(signifier) = type_signifier(row, display) {
        parts.push(signifier);
    }

    if !row.text.is_empty() {
        parts.push(row.text.clone());
    }

    if display.created.is_shown()
        && let Some(created) = row.created
    {
        parts.push(date_part(Signifier::CREATED, created.date_naive()));
    }

    if display.scheduled.is_shown()
        && let Some(scheduled) = row.scheduled
    {
        parts.push(date_part(Signifier::SCHEDULED, scheduled));
    }

    if display.due.is_shown()
        && let Some(due) = row.due
    {
        parts.push(date_part(Signifier::DUE, due));
    }

    if display.completed.is_shown() && row.is_completed() {
        parts.push(date_part(
            Signifier::COMPLETED,
            row.completed.unwrap_or(today),
        ));
    }

    if row.id != 0 {
        parts.push(block_anchor(&settings.tasks.block_prefix, row.id));
    }

    parts.join(" ")
}

fn date_part(signifier: &str, date: NaiveDate) -> String {
    format!("{} {}", signifier, date.format("%Y-%m-%d"))
}

/// Split a line cut on `\n` into its text and a trailing `\r`, if any
pub fn split_line_ending(line: &str) -> (&str, &str) {
    match line.strip_suffix('\r') {
        Some(text) => (text, "\r"),
        None => (line, ""),
    }
}

/// Leading whitespace of a line
pub fn leading_indent(line: &str) -> &str {
    &line[..line.len() - line.trim_start().len()]
}
