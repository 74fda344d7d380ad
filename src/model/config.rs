use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration from .taskzero/config.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub tasks: TasksConfig,
    #[serde(default)]
    pub exclude: ExcludeConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub replica: ReplicaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    /// Produces anchors like `^tz123`
    #[serde(default = "default_block_prefix")]
    pub block_prefix: String,
    /// Note that quick capture appends to
    #[serde(default = "default_note")]
    pub default_note: String,
    /// Note that archived completed tasks are appended to
    #[serde(default = "default_archive_note")]
    pub archive_note: String,
}

impl Default for TasksConfig {
    fn default() -> Self {
        TasksConfig {
            block_prefix: default_block_prefix(),
            default_note: default_note(),
            archive_note: default_archive_note(),
        }
    }
}

fn default_block_prefix() -> String {
    "tz".to_string()
}

fn default_note() -> String {
    "Tasks.md".to_string()
}

fn default_archive_note() -> String {
    "Completed tasks.md".to_string()
}

/// Tags that keep a whole note, a section, or a single task out of the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExcludeConfig {
    #[serde(default = "default_exclude_note")]
    pub note: String,
    #[serde(default = "default_exclude_section")]
    pub section: String,
    #[serde(default = "default_exclude_task")]
    pub task: String,
}

impl Default for ExcludeConfig {
    fn default() -> Self {
        ExcludeConfig {
            note: default_exclude_note(),
            section: default_exclude_section(),
            task: default_exclude_task(),
        }
    }
}

fn default_exclude_note() -> String {
    "#tz-exclude-note".to_string()
}

fn default_exclude_section() -> String {
    "#tz-exclude-section".to_string()
}

fn default_exclude_task() -> String {
    "#tz-exclude".to_string()
}

/// How an element is written into a task line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayOption {
    Emoji,
    Tag,
    None,
}

impl DisplayOption {
    pub fn is_shown(self) -> bool {
        self != DisplayOption::None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Type signifiers: emoji, `#tag`, or hidden
    #[serde(default = "default_emoji")]
    pub types: DisplayOption,
    /// Also show inbox / next-action / dependent signifiers
    #[serde(default)]
    pub all_types: bool,
    #[serde(default = "default_none")]
    pub created: DisplayOption,
    #[serde(default = "default_emoji")]
    pub scheduled: DisplayOption,
    #[serde(default = "default_emoji")]
    pub due: DisplayOption,
    #[serde(default = "default_emoji")]
    pub completed: DisplayOption,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        DisplayConfig {
            types: DisplayOption::Emoji,
            all_types: false,
            created: DisplayOption::None,
            scheduled: DisplayOption::Emoji,
            due: DisplayOption::Emoji,
            completed: DisplayOption::Emoji,
        }
    }
}

fn default_emoji() -> DisplayOption {
    DisplayOption::Emoji
}

fn default_none() -> DisplayOption {
    DisplayOption::None
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_persist_debounce_ms")]
    pub persist_debounce_ms: u64,
    #[serde(default = "default_queue_interval_ms")]
    pub queue_interval_ms: u64,
    /// The write-back timer restarts after this many missed intervals
    #[serde(default = "default_queue_stale_intervals")]
    pub queue_stale_intervals: u32,
    #[serde(default = "default_change_debounce_ms")]
    pub change_debounce_ms: u64,
    /// A document modified this recently counts as being edited
    #[serde(default = "default_editing_idle_secs")]
    pub editing_idle_secs: u64,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    #[serde(default = "default_sweep_interval_mins")]
    pub sweep_interval_mins: i64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig {
            persist_debounce_ms: default_persist_debounce_ms(),
            queue_interval_ms: default_queue_interval_ms(),
            queue_stale_intervals: default_queue_stale_intervals(),
            change_debounce_ms: default_change_debounce_ms(),
            editing_idle_secs: default_editing_idle_secs(),
            retention_days: default_retention_days(),
            sweep_interval_mins: default_sweep_interval_mins(),
        }
    }
}

impl TimingConfig {
    pub fn persist_debounce(&self) -> Duration {
        Duration::from_millis(self.persist_debounce_ms)
    }

    pub fn queue_interval(&self) -> Duration {
        Duration::from_millis(self.queue_interval_ms)
    }

    pub fn queue_stale_after(&self) -> Duration {
        self.queue_interval() * self.queue_stale_intervals.max(2)
    }

    pub fn change_debounce(&self) -> Duration {
        Duration::from_millis(self.change_debounce_ms)
    }

    pub fn editing_idle(&self) -> Duration {
        Duration::from_secs(self.editing_idle_secs)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days)
    }

    pub fn sweep_interval(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.sweep_interval_mins)
    }
}

fn default_persist_debounce_ms() -> u64 {
    3000
}

fn default_queue_interval_ms() -> u64 {
    2000
}

fn default_queue_stale_intervals() -> u32 {
    5
}

fn default_change_debounce_ms() -> u64 {
    1000
}

fn default_editing_idle_secs() -> u64 {
    10
}

fn default_retention_days() -> i64 {
    14
}

fn default_sweep_interval_mins() -> i64 {
    60
}

/// Single-writer election between replicas sharing one synced vault
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// This replica's name. Empty means `$TZ_REPLICA_ID`, then the hostname.
    #[serde(default)]
    pub self_id: String,
    /// The replica allowed to write. Empty means every replica is (single-replica setup).
    #[serde(default)]
    pub authoritative_id: String,
}

impl ReplicaConfig {
    /// Resolve `self_id`, falling back to the environment
    pub fn resolved_self_id(&self) -> String {
        if !self.self_id.is_empty() {
            return self.self_id.clone();
        }
        if let Ok(id) = std::env::var("TZ_REPLICA_ID")
            && !id.is_empty()
        {
            return id;
        }
        std::env::var("HOSTNAME")
            .ok()
            .filter(|h| !h.is_empty())
            .or_else(|| {
                std::fs::read_to_string("/etc/hostname")
                    .ok()
                    .map(|h| h.trim().to_string())
            })
            .unwrap_or_else(|| "local".to_string())
    }

    pub fn is_authoritative(&self) -> bool {
        self.authoritative_id.is_empty() || self.authoritative_id == self.resolved_self_id()
    }
}
