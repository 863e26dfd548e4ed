// Config module: persists the API key and the privacy waiver between runs.
// Values live in one named group of a shared TOML file; anything else in
// that file belongs to someone else and is written back untouched.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

/// Name of the table holding our settings inside the shared file.
pub const GROUP: &str = "VirusTotal";

const KEY_API_KEY: &str = "api_key";
const KEY_WAIVER: &str = "waiver";

/// Minimal key-value settings interface. Implementations decide where the
/// values are persisted; callers only see strings.
pub trait Settings {
    fn get(&self, name: &str) -> Option<String>;
    fn set(&mut self, name: &str, value: &str) -> Result<()>;
}

/// Default config location: `<config dir>/vt-submit/config.toml`, falling
/// back to the current directory when the platform has no config dir.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vt-submit")
        .join("config.toml")
}

/// Settings backed by one table of a TOML file on disk.
#[derive(Debug)]
pub struct FileSettings {
    path: PathBuf,
    group: String,
    doc: toml::Table,
}

impl FileSettings {
    /// Open the file at `path`. A missing file is treated as empty; a file
    /// that exists but does not parse is an error.
    pub fn open(path: impl Into<PathBuf>, group: &str) -> Result<Self> {
        let path = path.into();
        let doc = match fs::read_to_string(&path) {
            Ok(raw) => raw
                .parse::<toml::Table>()
                .with_context(|| format!("Failed to parse config file {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => toml::Table::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read config file {}", path.display()))
            }
        };
        Ok(FileSettings {
            path,
            group: group.to_string(),
            doc,
        })
    }

    fn group(&self) -> Option<&toml::Table> {
        self.doc.get(&self.group).and_then(|v| v.as_table())
    }

    /// Write the whole document through a sibling temp file and rename it
    /// into place so a crash never leaves a half-written config behind.
    fn flush(&self) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        }
        let raw = toml::to_string(&self.doc).context("Failed to serialize config")?;
        let tmp = self.path.with_extension("toml.tmp");
        fs::write(&tmp, raw).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace config file {}", self.path.display()))?;
        Ok(())
    }
}

impl Settings for FileSettings {
    fn get(&self, name: &str) -> Option<String> {
        // Hand-edited files may hold real booleans or numbers; report them
        // in their string form.
        self.group()?.get(name).map(|v| match v {
            toml::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    fn set(&mut self, name: &str, value: &str) -> Result<()> {
        let entry = self
            .doc
            .entry(self.group.clone())
            .or_insert(toml::Value::Table(toml::Table::new()));
        if !entry.is_table() {
            *entry = toml::Value::Table(toml::Table::new());
        }
        // Flags go to disk as real booleans so other readers of the shared
        // file see `waiver = true`, not a string.
        let value = match value {
            "true" => toml::Value::Boolean(true),
            "false" => toml::Value::Boolean(false),
            other => toml::Value::String(other.to_string()),
        };
        if let toml::Value::Table(table) = entry {
            table.insert(name.to_string(), value);
        }
        self.flush()
    }
}

/// Non-persistent settings, handy when no file should be touched.
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: HashMap<String, String>,
}

impl Settings for MemorySettings {
    fn get(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }

    fn set(&mut self, name: &str, value: &str) -> Result<()> {
        self.values.insert(name.to_string(), value.to_string());
        Ok(())
    }
}

/// Typed accessors for the two values the tool cares about.
#[derive(Debug)]
pub struct ConfigStore<S: Settings> {
    settings: S,
}

impl<S: Settings> ConfigStore<S> {
    pub fn new(settings: S) -> Self {
        ConfigStore { settings }
    }

    pub fn save_api_key(&mut self, key: &str) -> Result<()> {
        self.settings.set(KEY_API_KEY, key)
    }

    /// Stored API key, or an empty string when none was ever saved.
    pub fn load_api_key(&self) -> String {
        self.settings.get(KEY_API_KEY).unwrap_or_default()
    }

    pub fn save_privacy_waiver(&mut self) -> Result<()> {
        self.settings.set(KEY_WAIVER, "true")
    }

    pub fn has_privacy_waiver(&self) -> bool {
        self.settings
            .get(KEY_WAIVER)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_api_key_before_save_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let settings = FileSettings::open(dir.path().join("config.toml"), GROUP).unwrap();
        let store = ConfigStore::new(settings);
        assert_eq!(store.load_api_key(), "");
        assert!(!store.has_privacy_waiver());
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut store = ConfigStore::new(FileSettings::open(&path, GROUP).unwrap());
        store.save_api_key("abc123").unwrap();
        store.save_privacy_waiver().unwrap();

        let reopened = ConfigStore::new(FileSettings::open(&path, GROUP).unwrap());
        assert_eq!(reopened.load_api_key(), "abc123");
        assert!(reopened.has_privacy_waiver());

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("[VirusTotal]"));
        assert!(raw.contains("api_key = \"abc123\""));
    }

    #[test]
    fn waiver_is_written_as_boolean() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut store = ConfigStore::new(FileSettings::open(&path, GROUP).unwrap());
        store.save_privacy_waiver().unwrap();

        let doc: toml::Table = fs::read_to_string(&path).unwrap().parse().unwrap();
        assert!(doc["VirusTotal"]["waiver"].is_bool());
        assert_eq!(doc["VirusTotal"]["waiver"].as_bool(), Some(true));

        let reopened = ConfigStore::new(FileSettings::open(&path, GROUP).unwrap());
        assert!(reopened.has_privacy_waiver());
    }

    #[test]
    fn foreign_sections_are_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.toml");
        fs::write(&path, "[Other]\ncolor = \"blue\"\n").unwrap();

        let mut store = ConfigStore::new(FileSettings::open(&path, GROUP).unwrap());
        store.save_api_key("k").unwrap();

        let doc: toml::Table = fs::read_to_string(&path).unwrap().parse().unwrap();
        assert_eq!(doc["Other"]["color"].as_str(), Some("blue"));
        assert_eq!(doc["VirusTotal"]["api_key"].as_str(), Some("k"));
    }

    #[test]
    fn hand_written_boolean_waiver_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[VirusTotal]\nwaiver = true\n").unwrap();

        let store = ConfigStore::new(FileSettings::open(&path, GROUP).unwrap());
        assert!(store.has_privacy_waiver());
        assert_eq!(store.load_api_key(), "");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[VirusTotal\napi_key = ").unwrap();

        let err = FileSettings::open(&path, GROUP).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config file"));
    }

    #[test]
    fn memory_settings_round_trip() {
        let mut store = ConfigStore::new(MemorySettings::default());
        assert!(!store.has_privacy_waiver());
        store.save_privacy_waiver().unwrap();
        assert!(store.has_privacy_waiver());
    }
}
