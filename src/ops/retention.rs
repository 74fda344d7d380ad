use serde::Serialize;

use crate::io::database::TaskDatabase;

/// What one retention sweep did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Rows without a document, marked orphaned now
    pub orphaned: Vec<u64>,
    /// Rows orphaned for longer than the retention window, removed
    pub deleted: Vec<u64>,
}

/// Orphan rows that live in no document and delete rows that have been
/// orphaned for longer than `retention`.
pub fn sweep_orphans(db: &mut TaskDatabase, now_ms: i64, retention: chrono::Duration) -> SweepReport {
    let mut report = SweepReport::default();
    let window = retention.num_milliseconds();

    let pathless: Vec<u64> = db
        .rows()
        .filter(|r| r.path.is_empty() && !r.is_orphaned())
        .map(|r| r.id)
        .collect();
    for id in pathless {
        if let Some(row) = db.get_row(id) {
            let mut row = row.clone();
            row.orphaned = now_ms;
            db.update(row);
            report.orphaned.push(id);
        }
    }

    let expired: Vec<u64> = db
        .rows()
        .filter(|r| r.is_orphaned() && now_ms - r.orphaned > window)
        .map(|r| r.id)
        .collect();
    for id in expired {
        if db.delete(id).is_some() {
            report.deleted.push(id);
        }
    }

    if !report.orphaned.is_empty() || !report.deleted.is_empty() {
        tracing::info!(
            orphaned = report.orphaned.len(),
            deleted = report.deleted.len(),
            "retention sweep"
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::events::EventBus;
    use crate::model::task::TaskRow;
    use crate::util::clock::{Clock, FixedClock};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use std::rc::Rc;

    const DAY_MS: i64 = 24 * 60 * 60 * 1000;

    fn db() -> TaskDatabase {
        let clock = Rc::new(FixedClock::at(NaiveDate::from_ymd_opt(2025, 1, 5).unwrap(), 9));
        TaskDatabase::in_memory(EventBus::new(), clock)
    }

    #[test]
    fn pathless_rows_are_orphaned_at_once() {
        let mut db = db();
        db.update(TaskRow {
            id: 1,
            text: "floating".into(),
            ..Default::default()
        });
        db.update(TaskRow {
            id: 2,
            text: "placed".into(),
            path: "Tasks.md".into(),
            ..Default::default()
        });
        let report = sweep_orphans(&mut db, 1_000, chrono::Duration::days(14));
        assert_eq!(report.orphaned, vec![1]);
        assert!(report.deleted.is_empty());
        assert_eq!(db.get_row(1).unwrap().orphaned, 1_000);
        assert!(!db.get_row(2).unwrap().is_orphaned());
    }

    #[test]
    fn rows_outlive_the_window_then_go() {
        let mut db = db();
        let t = FixedClock::at(NaiveDate::from_ymd_opt(2025, 1, 5).unwrap(), 9).now_millis();
        db.update(TaskRow {
            id: 3,
            text: "gone".into(),
            path: "Tasks.md".into(),
            orphaned: t,
            ..Default::default()
        });
        let window = chrono::Duration::days(14);

        let report = sweep_orphans(&mut db, t + 13 * DAY_MS, window);
        assert!(report.deleted.is_empty());
        assert!(db.get_row(3).is_some());

        let report = sweep_orphans(&mut db, t + 15 * DAY_MS, window);
        assert_eq!(report.deleted, vec![3]);
        assert!(db.get_row(3).is_none());
    }
}
