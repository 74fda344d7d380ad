use std::fs;
use std::path::PathBuf;

use crate::cli::commands::InitArgs;
use crate::io::store::{DocumentStore, FsDocumentStore};
use crate::io::vault_io::{self, CONFIG_FILE, DATA_DIR};

const CONFIG_TEMPLATE: &str = r##"[tasks]
# Task lines end with an anchor like ^{prefix}42
block_prefix = "{prefix}"
# Note that `tz add` appends to
default_note = "{default_note}"
# Note that `tz archive` moves completed tasks into
archive_note = "Completed tasks.md"

[exclude]
note = "#{prefix}-exclude-note"
section = "#{prefix}-exclude-section"
task = "#{prefix}-exclude"

[display]
types = "emoji"        # emoji | tag | none
all_types = false      # also show inbox / next-action / dependent
created = "none"
scheduled = "emoji"
due = "emoji"
completed = "emoji"

# --- Timing ---
# Uncomment and edit to override defaults.
#
# [timing]
# persist_debounce_ms = 3000
# queue_interval_ms = 2000
# queue_stale_intervals = 5
# change_debounce_ms = 1000
# editing_idle_secs = 10
# retention_days = 14
# sweep_interval_mins = 60

# --- Replicas ---
# When the vault is synced between machines, only one may write.
# Use `tz replica claim` on that machine instead of editing by hand.
[replica]
self_id = ""
authoritative_id = ""
"##;

/// Validate that an anchor prefix is plain ASCII letters and digits.
fn validate_prefix(prefix: &str) -> Result<(), String> {
    if prefix.is_empty() {
        return Err("anchor prefix cannot be empty".to_string());
    }
    if !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(format!(
            "invalid anchor prefix \"{}\": use letters and digits only (e.g. \"tz\")",
            prefix
        ));
    }
    if prefix.ends_with(|c: char| c.is_ascii_digit()) {
        return Err(format!(
            "invalid anchor prefix \"{}\": must not end with a digit",
            prefix
        ));
    }
    Ok(())
}

fn render_config(prefix: &str, default_note: &str) -> String {
    CONFIG_TEMPLATE
        .replace("{prefix}", prefix)
        .replace("{default_note}", default_note)
}

pub fn cmd_init(args: InitArgs, vault_dir: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let root: PathBuf = match vault_dir {
        Some(dir) => PathBuf::from(dir),
        None => std::env::current_dir()?,
    };
    let data_dir = root.join(DATA_DIR);

    if data_dir.join(CONFIG_FILE).is_file() && !args.force {
        return Err(format!("taskzero vault already exists in {}/", data_dir.display()).into());
    }

    // Nested vaults are allowed but usually a mistake
    if let Some(parent) = root.parent()
        && let Ok(parent_root) = vault_io::discover_vault(parent)
    {
        eprintln!("Note: parent vault found at {}/", parent_root.display());
        eprintln!("Creating new vault in {}/", data_dir.display());
    }

    let prefix = args.prefix.unwrap_or_else(|| "tz".to_string());
    validate_prefix(&prefix)?;
    let default_note = args.default_note.unwrap_or_else(|| "Tasks.md".to_string());
    if vault_io::resolve_in_vault(&root, &default_note).is_none() {
        return Err(format!("default note must be inside the vault: {}", default_note).into());
    }

    fs::create_dir_all(&data_dir)?;
    vault_io::atomic_write(&data_dir.join(CONFIG_FILE), render_config(&prefix, &default_note).as_bytes())?;

    let store = FsDocumentStore::new(&root);
    let created_note = store.create_if_missing(&default_note, "# Tasks\n")?;

    println!("Initialized taskzero vault: {}", root.display());
    println!("  anchors: ^{}<id>", prefix);
    if created_note {
        println!("  created: {}", default_note);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::config::Settings;

    #[test]
    fn test_validate_prefix() {
        assert!(validate_prefix("tz").is_ok());
        assert!(validate_prefix("gtd2x").is_ok());
        assert!(validate_prefix("").is_err());
        assert!(validate_prefix("my-prefix").is_err());
        assert!(validate_prefix("t2").is_err());
    }

    #[test]
    fn test_rendered_config_parses() {
        let rendered = render_config("gtd", "Inbox.md");
        let settings: Settings = toml::from_str(&rendered).unwrap();
        assert_eq!(settings.tasks.block_prefix, "gtd");
        assert_eq!(settings.tasks.default_note, "Inbox.md");
        assert_eq!(settings.exclude.task, "#gtd-exclude");
        assert_eq!(settings.timing.retention_days, 14);
        assert!(settings.replica.authoritative_id.is_empty());
    }
}
