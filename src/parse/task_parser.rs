use chrono::NaiveDate;
use regex::Regex;

use crate::model::config::Settings;
use crate::model::task::{Signifier, TaskStatus, TaskType};
use crate::parse::relative_date::resolve_relative_date;
use crate::parse::task_serializer::split_line_ending;

/// Fields pulled out of one task line. Absent fields were not on the line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedTask {
    /// `None` when parsed as free text (no checkbox expected)
    pub status: Option<TaskStatus>,
    pub task_type: Option<TaskType>,
    pub created: Option<NaiveDate>,
    pub due: Option<NaiveDate>,
    pub scheduled: Option<NaiveDate>,
    pub completed: Option<NaiveDate>,
    pub id: Option<u64>,
    /// Carries the task-level exclusion tag
    pub excluded: bool,
    /// What is left once every recognised token is removed
    pub text: String,
}

/// Which date field a date signifier fills
#[derive(Debug, Clone, Copy)]
enum DateField {
    Created,
    Scheduled,
    Due,
    Completed,
}

/// Ordered token extractor for task lines.
///
/// Every token kind has its own pattern. Each pattern consumes all of its
/// occurrences, replacing them with a single space; the last match wins.
#[derive(Debug, Clone)]
pub struct TaskLineParser {
    id: Regex,
    status: Regex,
    types: Vec<(TaskType, Regex)>,
    dates: Vec<(DateField, Regex)>,
    relative: Regex,
    exclude: Option<Regex>,
    stray: Regex,
}

impl TaskLineParser {
    pub fn new(block_prefix: &str, exclude_tag: &str) -> Result<Self, regex::Error> {
        let id = Regex::new(&format!(r"\^{}(\d+)\s*$", regex::escape(block_prefix)))?;
        let status = Regex::new(r"^\s*[-*+]\s+\[(.)\](?:\s+|$)")?;

        let mut types = Vec::new();
        for task_type in TaskType::PRECEDENCE {
            let pattern = format!(
                r"(?:^|\s)({}|(?i:#{}))(?:\s|$)",
                emoji_pattern(task_type.emoji()),
                regex::escape(task_type.tag_name())
            );
            types.push((task_type, Regex::new(&pattern)?));
        }

        let mut dates = Vec::new();
        for (field, emoji) in [
            (DateField::Created, Signifier::CREATED),
            (DateField::Scheduled, Signifier::SCHEDULED),
            (DateField::Due, Signifier::DUE),
            (DateField::Completed, Signifier::COMPLETED),
        ] {
            let pattern = format!(
                r"(?:^|\s){}\s*(\d{{4}}-\d{{2}}-\d{{2}})(?:\s|$)",
                emoji_pattern(emoji)
            );
            dates.push((field, Regex::new(&pattern)?));
        }

        let relative = Regex::new(r"(?:^|\s)\$([A-Za-z]+)(?:\s|$)")?;

        let exclude = if exclude_tag.trim().is_empty() {
            None
        } else {
            Some(Regex::new(&format!(
                r"(?:^|\s)({})(?:\s|$)",
                regex::escape(exclude_tag.trim())
            ))?)
        };

        let stray = Signifier::ALL
            .iter()
            .map(|emoji| emoji_pattern(emoji))
            .collect::<Vec<_>>()
            .join("|");
        let stray = Regex::new(&format!("({})", stray))?;

        Ok(TaskLineParser {
            id,
            status,
            types,
            dates,
            relative,
            exclude,
            stray,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, regex::Error> {
        Self::new(&settings.tasks.block_prefix, &settings.exclude.task)
    }

    /// Parse a full task line (`- [ ] ...`). Returns `None` if the line
    /// has no leading checkbox.
    pub fn parse_line(&self, line: &str, today: NaiveDate) -> Option<ParsedTask> {
        let mut buf = LineBuffer::new(split_line_ending(line).0);

        // The anchor sits at the end of the line and the checkbox at the
        // start, so the anchor goes first.
        let id = buf.take_all(&self.id).and_then(|digits| digits.parse().ok());
        let status = buf.take_all(&self.status)?;
        let status = TaskStatus::from_checkbox_char(status.chars().next().unwrap_or(' '));

        let mut parsed = self.extract_fields(buf, today);
        parsed.id = id;
        parsed.status = Some(status);
        Some(parsed)
    }

    /// Parse arbitrary text such as a quick-capture entry. No checkbox or
    /// anchor is expected.
    pub fn parse_text(&self, text: &str, today: NaiveDate) -> ParsedTask {
        self.extract_fields(LineBuffer::new(text), today)
    }

    fn extract_fields(&self, mut buf: LineBuffer, today: NaiveDate) -> ParsedTask {
        let mut parsed = ParsedTask::default();

        // Consume every type token; the highest-precedence one wins
        for (task_type, re) in &self.types {
            if buf.take_all(re).is_some() && parsed.task_type.is_none() {
                parsed.task_type = Some(*task_type);
            }
        }

        for (field, re) in &self.dates {
            let value = buf
                .take_all(re)
                .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok());
            if value.is_none() {
                continue;
            }
            match field {
                DateField::Created => parsed.created = value,
                DateField::Scheduled => parsed.scheduled = value,
                DateField::Due => parsed.due = value,
                DateField::Completed => parsed.completed = value,
            }
        }

        if let Some(date) = buf.take_relative_dates(&self.relative, today) {
            parsed.scheduled = Some(date);
        }

        if let Some(re) = &self.exclude {
            parsed.excluded = buf.take_all(re).is_some();
        }

        // Signifiers that did not form a recognised token
        buf.take_all(&self.stray);

        parsed.text = buf.into_text();
        parsed
    }
}

/// Regex for an emoji with its variation selector made optional
fn emoji_pattern(emoji: &str) -> String {
    let base: String = emoji.chars().filter(|c| *c != '\u{FE0F}').collect();
    format!(r"{}\x{{FE0F}}?", regex::escape(&base))
}

/// Working copy of a line that tokens are cut out of
struct LineBuffer {
    text: String,
}

impl LineBuffer {
    fn new(line: &str) -> Self {
        LineBuffer {
            text: line.to_string(),
        }
    }

    /// Remove every match of `re`, returning the first capture group of
    /// the last match.
    fn take_all(&mut self, re: &Regex) -> Option<String> {
        let mut found = None;
        while let Some(caps) = re.captures(&self.text) {
            let Some(whole) = caps.get(0) else { break };
            found = caps.get(1).map(|m| m.as_str().to_string());
            let range = whole.range();
            self.text.replace_range(range, " ");
        }
        found
    }

    /// Replace recognised `$word` tokens, leaving unknown ones in place.
    /// Returns the date of the last recognised token.
    fn take_relative_dates(&mut self, re: &Regex, today: NaiveDate) -> Option<NaiveDate> {
        let mut found = None;
        let mut pos = 0;
        while pos <= self.text.len() {
            let Some(caps) = re.captures_at(&self.text, pos) else {
                break;
            };
            let (Some(whole), Some(word)) = (caps.get(0), caps.get(1)) else {
                break;
            };
            match resolve_relative_date(word.as_str(), today) {
                Some(date) => {
                    found = Some(date);
                    let start = whole.start();
                    self.text.replace_range(whole.range(), " ");
                    pos = start;
                }
                None => pos = word.end(),
            }
        }
        found
    }

    fn into_text(self) -> String {
        self.text.trim().to_string()
    }
}
