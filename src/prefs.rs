// Small persisted preferences (follow on/off, display name).
// Injected as a key-value port; the engine never touches global storage.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::warn;

pub const KEY_FOLLOW_ENABLED: &str = "follow_enabled";
pub const KEY_DISPLAY_NAME: &str = "display_name";

pub trait PreferenceStore: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str);

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.parse().ok())
    }
}

#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: HashMap<String, String>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }
}

/// Flat JSON object on disk, rewritten on every set.
#[derive(Debug)]
pub struct JsonFilePreferences {
    path: PathBuf,
    values: HashMap<String, String>,
}

impl JsonFilePreferences {
    /// Open (or start) a preferences file. A missing or unreadable file
    /// starts empty; preferences are never worth failing startup over.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!("Ignoring malformed preferences {}: {}", path.display(), e);
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };
        JsonFilePreferences { path, values }
    }

    fn flush(&self) {
        let json = match serde_json::to_string_pretty(&self.values) {
            Ok(j) => j,
            Err(e) => {
                warn!("Failed to encode preferences: {}", e);
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.path, json) {
            warn!("Failed to write {}: {}", self.path.display(), e);
        }
    }
}

impl PreferenceStore for JsonFilePreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
        self.flush();
    }
}
