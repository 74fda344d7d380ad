use std::fs;
use std::path::Path;

use crate::io::vault_io::{CONFIG_FILE, VaultError, atomic_write};
use crate::model::config::Settings;

/// Parse `config.toml` from the data directory. A missing file yields defaults.
pub fn load_settings(data_dir: &Path) -> Result<Settings, VaultError> {
    let config_path = data_dir.join(CONFIG_FILE);
    if !config_path.exists() {
        tracing::debug!(path = %config_path.display(), "no config file, using defaults");
        return Ok(Settings::default());
    }
    let config_text = fs::read_to_string(&config_path).map_err(|e| VaultError::ReadError {
        path: config_path.clone(),
        source: e,
    })?;
    Ok(toml::from_str(&config_text)?)
}

/// Read the config, returning both the parsed settings and the raw
/// toml_edit document for round-trip-safe editing.
pub fn read_config(data_dir: &Path) -> Result<(Settings, toml_edit::DocumentMut), VaultError> {
    let config_path = data_dir.join(CONFIG_FILE);
    let config_text = if config_path.exists() {
        fs::read_to_string(&config_path).map_err(|e| VaultError::ReadError {
            path: config_path.clone(),
            source: e,
        })?
    } else {
        String::new()
    };
    let settings: Settings = toml::from_str(&config_text)?;
    let doc: toml_edit::DocumentMut = config_text.parse()?;
    Ok((settings, doc))
}

/// Write the config document back to disk, preserving formatting.
pub fn write_config(data_dir: &Path, doc: &toml_edit::DocumentMut) -> Result<(), VaultError> {
    let config_path = data_dir.join(CONFIG_FILE);
    atomic_write(&config_path, doc.to_string().as_bytes()).map_err(|e| VaultError::ReadError {
        path: config_path,
        source: e,
    })?;
    Ok(())
}

fn replica_table(doc: &mut toml_edit::DocumentMut) {
    if !doc.contains_key("replica") {
        doc["replica"] = toml_edit::Item::Table(toml_edit::Table::new());
    }
}

/// Make `replica_id` the single writer
pub fn set_authoritative(doc: &mut toml_edit::DocumentMut, replica_id: &str) {
    replica_table(doc);
    doc["replica"]["authoritative_id"] = toml_edit::value(replica_id);
}

/// Go back to single-replica mode, where every replica may write
pub fn clear_authoritative(doc: &mut toml_edit::DocumentMut) {
    if let Some(table) = doc.get_mut("replica").and_then(|t| t.as_table_mut()) {
        table.remove("authoritative_id");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_config() -> &'static str {
        r#"# Shared between the laptop and the desktop
[tasks]
block_prefix = "tz"   # keep short

[display]
types = "tag"

[replica]
self_id = "laptop"
"#
    }

    #[test]
    fn round_trip_preserves_formatting() {
        let tmp = TempDir::new().unwrap();
        let data_dir = tmp.path();
        fs::write(data_dir.join(CONFIG_FILE), sample_config()).unwrap();

        let (settings, doc) = read_config(data_dir).unwrap();
        assert_eq!(settings.replica.self_id, "laptop");
        write_config(data_dir, &doc).unwrap();

        let written = fs::read_to_string(data_dir.join(CONFIG_FILE)).unwrap();
        assert_eq!(written, sample_config());
    }

    #[test]
    fn claim_and_release() {
        let mut doc: toml_edit::DocumentMut = sample_config().parse().unwrap();
        set_authoritative(&mut doc, "desktop");
        let settings: Settings = toml::from_str(&doc.to_string()).unwrap();
        assert_eq!(settings.replica.authoritative_id, "desktop");
        assert!(!settings.replica.is_authoritative());
        assert!(doc.to_string().contains("# keep short"));

        clear_authoritative(&mut doc);
        let settings: Settings = toml::from_str(&doc.to_string()).unwrap();
        assert!(settings.replica.authoritative_id.is_empty());
        assert!(settings.replica.is_authoritative());
    }

    #[test]
    fn claim_adds_missing_table() {
        let mut doc = toml_edit::DocumentMut::new();
        set_authoritative(&mut doc, "laptop");
        doc["replica"]["self_id"] = toml_edit::value("laptop");
        let settings: Settings = toml::from_str(&doc.to_string()).unwrap();
        assert!(settings.replica.is_authoritative());
    }

    #[test]
    fn missing_config_is_default() {
        let tmp = TempDir::new().unwrap();
        let settings = load_settings(tmp.path()).unwrap();
        assert_eq!(settings.tasks.default_note, "Tasks.md");
    }
}
