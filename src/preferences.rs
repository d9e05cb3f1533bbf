//! Small persisted key/value store for UI preferences.
//!
//! Backed by one JSON file. Storage problems are never surfaced: a store
//! that cannot be read starts empty and a failed write only logs.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

pub const SIDEBAR_WIDTH: &str = "sidebar-width";
pub const SIDEBAR_COLLAPSED: &str = "sidebar-collapsed";
pub const THEME: &str = "fiction-forge-theme";
pub const AUTH_SESSION: &str = "fiction-forge-auth";

const FILE_NAME: &str = "preferences.json";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

pub struct PreferenceStore {
    path: Option<PathBuf>,
    values: Mutex<Map<String, Value>>,
}

impl PreferenceStore {
    /// Opens `preferences.json` under `dir`.
    pub fn open(dir: &Path) -> Self {
        let path = dir.join(FILE_NAME);
        let values = std::fs::read_to_string(&path)
            .ok()
            .and_then(|text| match serde_json::from_str(&text) {
                Ok(values) => Some(values),
                Err(e) => {
                    debug!(path = %path.display(), "Ignoring unreadable preferences: {}", e);
                    None
                }
            })
            .unwrap_or_default();

        Self {
            path: Some(path),
            values: Mutex::new(values),
        }
    }

    /// Store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            values: Mutex::new(Map::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Map<String, Value>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.lock().get(key).cloned()?;
        serde_json::from_value(value).ok()
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) {
        let Ok(value) = serde_json::to_value(value) else {
            debug!(key, "Preference value not serializable");
            return;
        };
        let mut values = self.lock();
        values.insert(key.to_string(), value);
        self.persist(&values);
    }

    pub fn remove(&self, key: &str) {
        let mut values = self.lock();
        if values.remove(key).is_some() {
            self.persist(&values);
        }
    }

    fn persist(&self, values: &Map<String, Value>) {
        let Some(path) = &self.path else {
            return;
        };

        let result = path
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|()| {
                let text = serde_json::to_string_pretty(values).map_err(std::io::Error::other)?;
                std::fs::write(path, text)
            });

        if let Err(e) = result {
            debug!(path = %path.display(), "Failed to save preferences: {}", e);
        }
    }

    pub fn sidebar_width(&self) -> Option<u32> {
        self.get(SIDEBAR_WIDTH)
    }

    pub fn set_sidebar_width(&self, width: u32) {
        self.set(SIDEBAR_WIDTH, &width);
    }

    pub fn sidebar_collapsed(&self) -> bool {
        self.get(SIDEBAR_COLLAPSED).unwrap_or(false)
    }

    pub fn set_sidebar_collapsed(&self, collapsed: bool) {
        self.set(SIDEBAR_COLLAPSED, &collapsed);
    }

    pub fn theme(&self) -> Theme {
        self.get(THEME).unwrap_or_default()
    }

    pub fn set_theme(&self, theme: Theme) {
        self.set(THEME, &theme);
    }
}
