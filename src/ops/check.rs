use std::collections::BTreeMap;

use serde::Serialize;

use crate::io::database::TaskDatabase;
use crate::io::store::{DocumentStore, StoreError};
use crate::model::task::TaskType;
use crate::ops::reconcile::Engine;
use crate::ops::task::Task;

/// Structured result from `tz check`, suitable for --json output.
#[derive(Debug, Default, Serialize)]
pub struct CheckResult {
    pub valid: bool,
    pub errors: Vec<CheckError>,
    pub warnings: Vec<CheckWarning>,
}

/// A validation error (something that should be fixed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum CheckError {
    /// Following `parent` links from this task comes back around
    #[serde(rename = "parent_cycle")]
    ParentCycle { task_id: u64, cycle_at: u64 },
    /// `parent` names a task that is not in the database
    #[serde(rename = "dangling_parent")]
    DanglingParent { task_id: u64, parent_id: u64 },
    /// The same anchor appears on more than one line of a document
    #[serde(rename = "duplicate_anchor")]
    DuplicateAnchor {
        path: String,
        task_id: u64,
        lines: Vec<usize>,
    },
}

/// A validation warning (non-critical issue).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum CheckWarning {
    /// The parent exists but has gone missing from its document
    #[serde(rename = "orphaned_parent")]
    OrphanedParent { task_id: u64, parent_id: u64 },
    /// More than one open next action under the same project
    #[serde(rename = "multiple_next_actions")]
    MultipleNextActions { project_id: u64, task_ids: Vec<u64> },
}

// ---------------------------------------------------------------------------
// Main check entry point
// ---------------------------------------------------------------------------

/// Validate the database and the vault's documents.
///
/// Read-only. Checks performed:
/// 1. Parent chains end at a root without looping
/// 2. Every parent exists, and is still present in a document
/// 3. At most one open next action per project
/// 4. No anchor appears twice within one document
pub fn check_vault(engine: &Engine, store: &dyn DocumentStore) -> Result<CheckResult, StoreError> {
    let mut result = check_database(engine.db());

    let today = engine.clock().today();
    for path in store.list()? {
        let Some(content) = store.read(&path)? else {
            continue;
        };
        let mut anchors: BTreeMap<u64, Vec<usize>> = BTreeMap::new();
        for (line_no, line) in content.split('\n').enumerate() {
            if let Some(id) = engine.parser().parse_line(line, today).and_then(|p| p.id) {
                anchors.entry(id).or_default().push(line_no);
            }
        }
        for (task_id, lines) in anchors {
            if lines.len() > 1 {
                result.errors.push(CheckError::DuplicateAnchor {
                    path: path.clone(),
                    task_id,
                    lines,
                });
            }
        }
    }

    result.valid = result.errors.is_empty();
    Ok(result)
}

/// Database-only checks
pub fn check_database(db: &TaskDatabase) -> CheckResult {
    let mut result = CheckResult::default();
    let mut next_actions: BTreeMap<u64, Vec<u64>> = BTreeMap::new();

    for row in db.rows().filter(|r| !r.is_orphaned()) {
        let task = Task::from_row(row.clone());
        let lineage = task.lineage(db);

        if let Some(cycle_at) = lineage.cycle {
            result.errors.push(CheckError::ParentCycle {
                task_id: row.id,
                cycle_at,
            });
        }

        if row.parent != 0 {
            match db.get_row(row.parent) {
                None => result.errors.push(CheckError::DanglingParent {
                    task_id: row.id,
                    parent_id: row.parent,
                }),
                Some(parent) if parent.is_orphaned() => {
                    result.warnings.push(CheckWarning::OrphanedParent {
                        task_id: row.id,
                        parent_id: row.parent,
                    })
                }
                Some(_) => {}
            }
        }

        if row.task_type == TaskType::NextAction
            && !row.is_completed()
            && lineage.cycle.is_none()
            && let Some(root) = lineage.chain.first()
        {
            next_actions.entry(root.id).or_default().push(row.id);
        }
    }

    for (project_id, mut task_ids) in next_actions {
        if task_ids.len() > 1 {
            task_ids.sort_unstable();
            result
                .warnings
                .push(CheckWarning::MultipleNextActions { project_id, task_ids });
        }
    }

    result.valid = result.errors.is_empty();
    result
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
