use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use serde::Serialize;

use crate::io::activity::EditorActivity;
use crate::io::database::TaskDatabase;
use crate::io::debounce::IntervalTimer;
use crate::io::store::{DocumentStore, ProcessOutcome, StoreError};
use crate::model::config::Settings;
use crate::parse::{TaskLineParser, leading_indent, serialize_task_line, split_line_ending};

/// Everything a drain needs besides the queue itself
pub struct DrainContext<'a> {
    pub db: &'a TaskDatabase,
    pub store: &'a dyn DocumentStore,
    pub activity: &'a dyn EditorActivity,
    pub parser: &'a TaskLineParser,
    pub settings: &'a Settings,
    pub today: NaiveDate,
    pub now: Instant,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Documents that were rewritten
    pub written: Vec<String>,
    /// Ids left queued because their document is being edited
    pub deferred: Vec<u64>,
    /// Ids dropped: unknown, without a path, or in a missing document
    pub dropped: Vec<u64>,
    /// Not the authoritative replica; everything stays queued
    pub refused: bool,
}

/// Ids whose database rows must be pushed back into their documents
#[derive(Debug, Clone)]
pub struct WriteBackQueue {
    pending: BTreeSet<u64>,
    timer: IntervalTimer,
    in_flight: bool,
}

impl WriteBackQueue {
    pub fn new(interval: Duration, stale_after: Duration, now: Instant) -> Self {
        WriteBackQueue {
            pending: BTreeSet::new(),
            timer: IntervalTimer::new(interval, stale_after, now),
            in_flight: false,
        }
    }

    pub fn enqueue(&mut self, id: u64) {
        if id != 0 {
            self.pending.insert(id);
        }
    }

    pub fn contains(&self, id: u64) -> bool {
        self.pending.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Whether a drain should run now. Restarts the timer if it has stalled.
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.timer.is_stale(now) {
            tracing::warn!(pending = self.pending.len(), "write-back timer stalled, restarting");
            self.timer.restart(now);
        }
        self.timer.due(now) && !self.pending.is_empty()
    }

    /// Push pending rows into their documents.
    ///
    /// Only lines carrying exactly the row's anchor are replaced, and their
    /// indentation is kept. Documents being edited keep their ids queued.
    pub fn drain(&mut self, ctx: &DrainContext<'_>) -> Result<DrainReport, StoreError> {
        let mut report = DrainReport::default();
        if self.in_flight || self.pending.is_empty() {
            return Ok(report);
        }
        self.in_flight = true;
        let result = self.drain_inner(ctx, &mut report);
        self.in_flight = false;
        result.map(|_| report)
    }

    fn drain_inner(&mut self, ctx: &DrainContext<'_>, report: &mut DrainReport) -> Result<(), StoreError> {
        let mut by_path: BTreeMap<String, Vec<u64>> = BTreeMap::new();
        for id in std::mem::take(&mut self.pending) {
            match ctx.db.get_row(id) {
                Some(row) if !row.path.is_empty() => {
                    by_path.entry(row.path.clone()).or_default().push(id);
                }
                _ => {
                    tracing::debug!(id, "write-back dropped: no row or no path");
                    report.dropped.push(id);
                }
            }
        }

        let mut groups = by_path.into_iter();
        while let Some((path, ids)) = groups.next() {
            // Authority is checked before every document write
            if !ctx.settings.replica.is_authoritative() {
                tracing::warn!(path = %path, "write-back refused: replica is not authoritative");
                report.refused = true;
                self.pending.extend(ids);
                for (_, rest) in groups.by_ref() {
                    self.pending.extend(rest);
                }
                break;
            }

            if ctx.activity.is_editing(&path, ctx.now) {
                tracing::debug!(path = %path, count = ids.len(), "write-back deferred: document is being edited");
                report.deferred.extend(&ids);
                self.pending.extend(ids);
                continue;
            }

            let outcome = match ctx.store.process(&path, &mut |content| rewrite_anchored(ctx, content, &ids)) {
                Ok(outcome) => outcome,
                Err(e) => {
                    // Leave the rest queued for the next drain
                    self.pending.extend(ids);
                    for (_, rest) in groups.by_ref() {
                        self.pending.extend(rest);
                    }
                    return Err(e);
                }
            };
            match outcome {
                ProcessOutcome::Written => report.written.push(path),
                ProcessOutcome::Unchanged => {}
                ProcessOutcome::Missing => {
                    tracing::debug!(path = %path, "write-back dropped: document is missing");
                    report.dropped.extend(ids);
                }
            }
        }
        Ok(())
    }
}

/// Replace every line anchored to one of `ids` with its canonical form.
/// `None` when no line changes.
fn rewrite_anchored(ctx: &DrainContext<'_>, content: &str, ids: &[u64]) -> Option<String> {
    let mut changed = false;
    let lines: Vec<String> = content
        .split('\n')
        .map(|line| {
            let Some(id) = ctx
                .parser
                .parse_line(line, ctx.today)
                .and_then(|p| p.id)
                .filter(|id| ids.contains(id))
            else {
                return line.to_string();
            };
            let Some(row) = ctx.db.get_row(id) else {
                return line.to_string();
            };
            let (text, ending) = split_line_ending(line);
            let canonical = serialize_task_line(row, leading_indent(text), ctx.settings, ctx.today);
            if canonical != text {
                changed = true;
            }
            format!("{}{}", canonical, ending)
        })
        .collect();
    changed.then(|| lines.join("\n"))
}
