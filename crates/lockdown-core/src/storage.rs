//! Persisted configuration.
//!
//! A small key/value store of JSON values. The engine reads the policy lists
//! at construction and writes them back only on an explicit save.

use crate::error::{LockdownError, Result};
use crate::settings::LockdownSettings;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const SETTINGS_KEY: &str = "lockdown.settings";
pub const BLOCKED_KEYS_KEY: &str = "policy.blocked_keys";
pub const BLOCKED_BUTTONS_KEY: &str = "policy.blocked_buttons";
pub const BLOCK_ALL_KEY: &str = "policy.block_all_buttons";

pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// JSON object on disk, rewritten atomically on every `set`.
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, Value>>,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                LockdownError::Store(format!("{} is not a JSON object: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, Value>) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, entries)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| {
            LockdownError::Store(format!("persist {}: {}", self.path.display(), e.error))
        })?;
        debug!(path = %self.path.display(), "settings store written");
        Ok(())
    }
}

impl SettingsStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = self.entries.lock();
        let previous = entries.insert(key.to_string(), value);
        if let Err(e) = self.persist(&entries) {
            match previous {
                Some(v) => entries.insert(key.to_string(), v),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }
}

pub fn load_settings(store: &dyn SettingsStore) -> Result<LockdownSettings> {
    match store.get(SETTINGS_KEY)? {
        Some(value) => Ok(serde_json::from_value(value)?),
        None => Ok(LockdownSettings::default()),
    }
}

pub fn save_settings(store: &dyn SettingsStore, settings: &LockdownSettings) -> Result<()> {
    store.set(SETTINGS_KEY, serde_json::to_value(settings)?)
}

/// The persisted block-lists, the only state that survives a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyLists {
    pub blocked_keys: Vec<String>,
    pub blocked_buttons: Vec<String>,
    pub block_all_buttons: bool,
}

impl PolicyLists {
    pub fn from_settings(settings: &LockdownSettings) -> Self {
        Self {
            blocked_keys: settings.blocked_keys.clone(),
            blocked_buttons: settings.blocked_buttons.clone(),
            block_all_buttons: settings.block_all_buttons,
        }
    }
}

/// Stored lists, each falling back to the settings value when absent.
pub fn load_policy_lists(
    store: &dyn SettingsStore,
    settings: &LockdownSettings,
) -> Result<PolicyLists> {
    let defaults = PolicyLists::from_settings(settings);
    let blocked_keys = match store.get(BLOCKED_KEYS_KEY)? {
        Some(v) => serde_json::from_value(v)?,
        None => defaults.blocked_keys,
    };
    let blocked_buttons = match store.get(BLOCKED_BUTTONS_KEY)? {
        Some(v) => serde_json::from_value(v)?,
        None => defaults.blocked_buttons,
    };
    let block_all_buttons = match store.get(BLOCK_ALL_KEY)? {
        Some(v) => serde_json::from_value(v)?,
        None => defaults.block_all_buttons,
    };
    Ok(PolicyLists {
        blocked_keys,
        blocked_buttons,
        block_all_buttons,
    })
}

pub fn save_policy_lists(store: &dyn SettingsStore, lists: &PolicyLists) -> Result<()> {
    store.set(BLOCKED_KEYS_KEY, serde_json::to_value(&lists.blocked_keys)?)?;
    store.set(BLOCKED_BUTTONS_KEY, serde_json::to_value(&lists.blocked_buttons)?)?;
    store.set(BLOCK_ALL_KEY, Value::Bool(lists.block_all_buttons))?;
    Ok(())
}
