use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::io::store::{DocumentStore, ProcessOutcome, StoreError};
use crate::ops::reconcile::Engine;

static DONE_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[ \t]*[-*+][ \t]+\[[xX]\]").unwrap());

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveReport {
    pub note: String,
    pub archive_note: String,
    /// Number of completed lines moved
    pub moved: usize,
    /// Not the authoritative replica; nothing was touched
    pub refused: bool,
}

/// Move every completed task line out of `note` and append them, without
/// indentation, to the configured archive note. Only the completed lines
/// move; open children stay where they are.
pub fn archive_completed(
    engine: &Engine,
    store: &dyn DocumentStore,
    note: &str,
) -> Result<ArchiveReport, StoreError> {
    let archive_note = engine.settings().tasks.archive_note.clone();
    let mut report = ArchiveReport {
        note: note.to_string(),
        archive_note: archive_note.clone(),
        ..Default::default()
    };

    if !engine.is_authoritative() {
        tracing::warn!(note, "archive refused: replica is not authoritative");
        report.refused = true;
        return Ok(report);
    }
    if note == archive_note {
        tracing::debug!(note, "archive note is its own source, nothing to do");
        return Ok(report);
    }

    let mut completed: Vec<String> = Vec::new();
    let outcome = store.process(note, &mut |content| {
        completed.clear();
        let mut kept: Vec<&str> = Vec::new();
        for line in content.split('\n') {
            if DONE_LINE_RE.is_match(line) {
                completed.push(line.trim().to_string());
            } else {
                kept.push(line);
            }
        }
        if completed.is_empty() {
            None
        } else {
            Some(kept.join("\n"))
        }
    })?;

    if outcome != ProcessOutcome::Written {
        return Ok(report);
    }

    store.append(&archive_note, &completed.join("\n"))?;
    report.moved = completed.len();
    tracing::info!(note, archive = %archive_note, moved = report.moved, "archived completed tasks");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::store::MemoryDocumentStore;
    use crate::model::config::Settings;
    use crate::util::clock::FixedClock;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use std::rc::Rc;

    fn engine(settings: Settings) -> Engine {
        let clock = Rc::new(FixedClock::at(NaiveDate::from_ymd_opt(2025, 1, 5).unwrap(), 9));
        Engine::in_memory(settings, clock).unwrap()
    }

    #[test]
    fn moves_completed_lines() {
        let engine = engine(Settings::default());
        let store = MemoryDocumentStore::new();
        store.insert(
            "Tasks.md",
            "# Tasks\n- [x] Filed taxes ✅ 2025-01-02 ^tz1\n- [ ] Open ^tz2\n\t- [X] Sub done ^tz3\n\t- [ ] Sub open ^tz4",
        );
        store.insert("Completed tasks.md", "# Done\n");

        let report = archive_completed(&engine, &store, "Tasks.md").unwrap();
        assert_eq!(report.moved, 2);
        assert_eq!(
            store.get("Tasks.md").unwrap(),
            "# Tasks\n- [ ] Open ^tz2\n\t- [ ] Sub open ^tz4"
        );
        assert_eq!(
            store.get("Completed tasks.md").unwrap(),
            "# Done\n- [x] Filed taxes ✅ 2025-01-02 ^tz1\n- [X] Sub done ^tz3\n"
        );
    }

    #[test]
    fn nothing_completed_writes_nothing() {
        let engine = engine(Settings::default());
        let store = MemoryDocumentStore::new();
        store.insert("Tasks.md", "- [ ] Open");
        let report = archive_completed(&engine, &store, "Tasks.md").unwrap();
        assert_eq!(report.moved, 0);
        assert!(store.get("Completed tasks.md").is_none());
    }

    #[test]
    fn refused_off_the_authoritative_replica() {
        let mut settings = Settings::default();
        settings.replica.self_id = "laptop".into();
        settings.replica.authoritative_id = "desktop".into();
        let engine = engine(settings);
        let store = MemoryDocumentStore::new();
        store.insert("Tasks.md", "- [x] Done");
        let report = archive_completed(&engine, &store, "Tasks.md").unwrap();
        assert!(report.refused);
        assert_eq!(store.get("Tasks.md").unwrap(), "- [x] Done");
    }
}
