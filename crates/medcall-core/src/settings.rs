use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CallSettings {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub broker_url: Option<String>,
    #[serde(default = "default_true")]
    pub mic_enabled_on_join: bool,
    #[serde(default = "default_true")]
    pub camera_enabled_on_join: bool,
    /// Wait after force-leaving a stale client before joining again. Reduces,
    /// but does not eliminate, the chance the server still sees the old one.
    #[serde(default = "default_cleanup_ms")]
    pub stale_client_cleanup_ms: u64,
    #[serde(default = "default_token_timeout_ms")]
    pub token_request_timeout_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_cleanup_ms() -> u64 {
    1_000
}

fn default_token_timeout_ms() -> u64 {
    10_000
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            display_name: None,
            broker_url: None,
            mic_enabled_on_join: true,
            camera_enabled_on_join: true,
            stale_client_cleanup_ms: default_cleanup_ms(),
            token_request_timeout_ms: default_token_timeout_ms(),
        }
    }
}

impl CallSettings {
    pub fn stale_client_cleanup(&self) -> Duration {
        Duration::from_millis(self.stale_client_cleanup_ms)
    }

    pub fn token_request_timeout(&self) -> Duration {
        Duration::from_millis(self.token_request_timeout_ms)
    }
}

/// Settings persisted as `settings.json` in the host's data directory.
pub struct SettingsStore {
    settings: Mutex<CallSettings>,
    file_path: PathBuf,
}

impl SettingsStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let file_path = data_dir.as_ref().join("settings.json");
        let settings = Self::load(&file_path);
        Self {
            settings: Mutex::new(settings),
            file_path,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CallSettings> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self) -> CallSettings {
        self.lock().clone()
    }

    pub fn set_display_name(&self, name: Option<String>) {
        self.lock().display_name = name;
        self.save();
    }

    pub fn set_broker_url(&self, url: Option<String>) {
        self.lock().broker_url = url;
        self.save();
    }

    pub fn set_mic_enabled_on_join(&self, enabled: bool) {
        self.lock().mic_enabled_on_join = enabled;
        self.save();
    }

    pub fn set_camera_enabled_on_join(&self, enabled: bool) {
        self.lock().camera_enabled_on_join = enabled;
        self.save();
    }

    pub fn set_stale_client_cleanup_ms(&self, ms: u64) {
        self.lock().stale_client_cleanup_ms = ms;
        self.save();
    }

    fn save(&self) {
        let settings = self.get();
        if let Some(parent) = self.file_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!("cannot create settings dir {}: {e}", parent.display());
                return;
            }
        }
        match serde_json::to_string_pretty(&settings) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.file_path, json) {
                    tracing::warn!("cannot write {}: {e}", self.file_path.display());
                }
            }
            Err(e) => tracing::warn!("cannot serialize settings: {e}"),
        }
    }

    fn load(path: &Path) -> CallSettings {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("ignoring unreadable {}: {e}", path.display());
                CallSettings::default()
            }),
            Err(_) => CallSettings::default(),
        }
    }
}
