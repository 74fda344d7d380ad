use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Task checkbox state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Todo,
    Done,
}

impl TaskStatus {
    /// The character used inside the checkbox `[ ]`
    pub fn checkbox_char(self) -> char {
        match self {
            TaskStatus::Todo => ' ',
            TaskStatus::Done => 'x',
        }
    }

    /// Parse a checkbox character. Anything other than `x`/`X` is still open.
    pub fn from_checkbox_char(c: char) -> TaskStatus {
        match c {
            'x' | 'X' => TaskStatus::Done,
            _ => TaskStatus::Todo,
        }
    }

    pub fn toggled(self) -> TaskStatus {
        match self {
            TaskStatus::Todo => TaskStatus::Done,
            TaskStatus::Done => TaskStatus::Todo,
        }
    }
}

/// How a task is classified for the aggregated views
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    #[default]
    Inbox,
    NextAction,
    Project,
    WaitingOn,
    Someday,
    /// A task in a project sequence, waiting on the previous task to be completed
    Dependent,
}

impl TaskType {
    pub const ALL: [TaskType; 6] = [
        TaskType::Inbox,
        TaskType::NextAction,
        TaskType::Project,
        TaskType::WaitingOn,
        TaskType::Someday,
        TaskType::Dependent,
    ];

    /// Order in which type tokens win when a line carries more than one
    pub const PRECEDENCE: [TaskType; 6] = [
        TaskType::Someday,
        TaskType::WaitingOn,
        TaskType::Project,
        TaskType::NextAction,
        TaskType::Dependent,
        TaskType::Inbox,
    ];

    /// Tag name, also used as the serialized value (`#waiting-on`)
    pub fn tag_name(self) -> &'static str {
        match self {
            TaskType::Inbox => "inbox",
            TaskType::NextAction => "next-action",
            TaskType::Project => "project",
            TaskType::WaitingOn => "waiting-on",
            TaskType::Someday => "someday",
            TaskType::Dependent => "dependent",
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            TaskType::Inbox => Signifier::INBOX,
            TaskType::NextAction => Signifier::NEXT_ACTION,
            TaskType::Project => Signifier::PROJECT,
            TaskType::WaitingOn => Signifier::WAITING_ON,
            TaskType::Someday => Signifier::SOMEDAY,
            TaskType::Dependent => Signifier::DEPENDENT,
        }
    }

    pub fn from_tag_name(s: &str) -> Option<TaskType> {
        let s = s.trim_start_matches('#');
        TaskType::ALL
            .into_iter()
            .find(|t| t.tag_name().eq_ignore_ascii_case(s))
    }

    /// Types shown on the task line even when `all_types` is off
    pub fn always_displayed(self) -> bool {
        matches!(
            self,
            TaskType::Project | TaskType::Someday | TaskType::WaitingOn
        )
    }
}

/// Emoji markers written into task lines
pub struct Signifier;

impl Signifier {
    pub const INBOX: &'static str = "\u{1F4E5}";
    pub const NEXT_ACTION: &'static str = "\u{27A1}\u{FE0F}";
    pub const PROJECT: &'static str = "\u{1F5C3}\u{FE0F}";
    pub const WAITING_ON: &'static str = "\u{23F8}\u{FE0F}";
    pub const SOMEDAY: &'static str = "\u{1F4A4}";
    pub const DEPENDENT: &'static str = "\u{26D3}\u{FE0F}";
    pub const CREATED: &'static str = "\u{2795}";
    pub const SCHEDULED: &'static str = "\u{23F3}";
    pub const DUE: &'static str = "\u{1F4C5}";
    pub const COMPLETED: &'static str = "\u{2705}";

    pub const ALL: [&'static str; 10] = [
        Self::INBOX,
        Self::NEXT_ACTION,
        Self::PROJECT,
        Self::WAITING_ON,
        Self::SOMEDAY,
        Self::DEPENDENT,
        Self::CREATED,
        Self::SCHEDULED,
        Self::DUE,
        Self::COMPLETED,
    ];
}

/// One persisted task. Missing fields in stored data fall back to defaults.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskRow {
    /// 0 means "not yet assigned"
    pub id: u64,
    pub status: TaskStatus,
    pub text: String,
    /// Vault-relative document path, empty if the task lives nowhere
    pub path: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub created: Option<DateTime<Utc>>,
    pub due: Option<NaiveDate>,
    pub scheduled: Option<NaiveDate>,
    pub completed: Option<NaiveDate>,
    /// 0 while the task is present in a document, otherwise the time (ms) it went missing
    pub orphaned: i64,
    /// Zero-based line in `path`
    pub line: usize,
    /// Containing task, 0 for a root task
    pub parent: u64,
}

impl TaskRow {
    /// A fresh, unassigned row stamped with a creation time
    pub fn new(created: DateTime<Utc>) -> Self {
        TaskRow {
            created: Some(created),
            ..Default::default()
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Done
    }

    pub fn is_orphaned(&self) -> bool {
        self.orphaned != 0
    }

    /// Earliest of the due and scheduled dates, if it falls on or before `today`
    pub fn due_on_or_before(&self, today: NaiveDate) -> Option<NaiveDate> {
        [self.due, self.scheduled]
            .into_iter()
            .flatten()
            .filter(|d| *d <= today)
            .min()
    }

    pub fn scheduled_after(&self, today: NaiveDate) -> bool {
        self.scheduled.is_some_and(|d| d > today)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkbox_chars() {
        assert_eq!(TaskStatus::from_checkbox_char('x'), TaskStatus::Done);
        assert_eq!(TaskStatus::from_checkbox_char('X'), TaskStatus::Done);
        assert_eq!(TaskStatus::from_checkbox_char(' '), TaskStatus::Todo);
        assert_eq!(TaskStatus::from_checkbox_char('>'), TaskStatus::Todo);
        assert_eq!(TaskStatus::Done.checkbox_char(), 'x');
    }

    #[test]
    fn type_tag_names() {
        assert_eq!(TaskType::from_tag_name("#waiting-on"), Some(TaskType::WaitingOn));
        assert_eq!(TaskType::from_tag_name("Next-Action"), Some(TaskType::NextAction));
        assert_eq!(TaskType::from_tag_name("projects"), None);
    }

    #[test]
    fn row_fills_missing_fields_from_defaults() {
        let row: TaskRow = serde_json::from_str(r#"{"id":4,"text":"Call Bob","type":"waiting-on"}"#).unwrap();
        assert_eq!(row.id, 4);
        assert_eq!(row.task_type, TaskType::WaitingOn);
        assert_eq!(row.status, TaskStatus::Todo);
        assert_eq!(row.parent, 0);
        assert!(row.due.is_none());
    }

    #[test]
    fn due_uses_earliest_date() {
        let today = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let row = TaskRow {
            due: NaiveDate::from_ymd_opt(2025, 3, 9),
            scheduled: NaiveDate::from_ymd_opt(2025, 3, 1),
            ..Default::default()
        };
        assert_eq!(row.due_on_or_before(today), NaiveDate::from_ymd_opt(2025, 3, 1));

        let future = TaskRow {
            due: NaiveDate::from_ymd_opt(2025, 4, 1),
            ..Default::default()
        };
        assert_eq!(future.due_on_or_before(today), None);
    }
}
