//! Supervisor settings and configuration file reloading

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::app::{AppSpec, SharedAppList};
use super::error::ConfigError;

/// Supervisor settings.
///
/// Keys are PascalCase so configuration files from the desktop tool load as-is;
/// keys this crate does not know (`Language`, `IconPath`) are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Settings {
    /// Companion applications, in processing order
    pub apps: Vec<AppSpec>,
    /// Glob matched against the target's process image name
    pub target_pattern: String,
    /// Process table polling interval in ms
    pub poll_interval_ms: u64,
    /// Concurrent event subscriptions allowed before quota errors
    pub max_subscriptions: usize,
    /// Enable debug logging
    pub debug_logging: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            apps: Vec::new(),
            target_pattern: "FlightSimulator*.exe".to_string(),
            poll_interval_ms: 1000,
            max_subscriptions: 8,
            debug_logging: false,
        }
    }
}

impl Settings {
    /// Default configuration file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(crate::APP_NAME)
            .join("config.json")
    }

    /// Read and validate settings from `path`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut settings: Settings =
            serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        settings.validate();
        Ok(settings)
    }

    /// Like [`Settings::load`], but a missing file yields the defaults
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                info!("No configuration at {:?}, using defaults", path);
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Validate settings and fix any invalid values
    pub fn validate(&mut self) {
        self.poll_interval_ms = self.poll_interval_ms.max(100);
        // Start and stop each need a subscription
        self.max_subscriptions = self.max_subscriptions.max(2);
        if self.target_pattern.trim().is_empty() {
            self.target_pattern = Self::default().target_pattern;
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Reload the app list from `path` into `apps`. Keeps the old list on failure.
pub fn reload_apps(path: &Path, apps: &SharedAppList) -> bool {
    match Settings::load(path) {
        Ok(settings) => {
            info!("Configuration reloaded, {} apps", settings.apps.len());
            apps.replace(settings.apps);
            true
        }
        Err(e) => {
            warn!(error = %e, "Failed to reload configuration, keeping previous apps");
            false
        }
    }
}

/// Keeps the app list in sync with the configuration file while alive
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Watch `path` and reload `apps` whenever it changes.
    ///
    /// The parent directory is watched so editors that replace the file are seen.
    pub fn spawn(path: PathBuf, apps: SharedAppList) -> notify::Result<Self> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let file_name = path.file_name().map(|n| n.to_os_string());

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "Configuration watch error");
                    return;
                }
            };
            if !(event.kind.is_modify() || event.kind.is_create()) {
                return;
            }
            let touches_config = event
                .paths
                .iter()
                .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
            if touches_config {
                debug!(?event.kind, "Configuration file changed");
                reload_apps(&path, &apps);
            }
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        info!("Watching {:?} for configuration changes", dir);
        Ok(Self { _watcher: watcher })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::app::AppCatalog;
    use std::io::Write;

    fn write_config(dir: &tempfile::TempDir, json: &str) -> PathBuf {
        let path = dir.path().join("config.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(json.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_desktop_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"{
                "Apps": [
                    {"IconPath": null, "Name": "Notepad", "ExecutablePath": "notepad.exe",
                     "Arguments": "", "AutoStart": true, "AutoClose": true},
                    {"Name": "test.ps1", "ExecutablePath": "powershell.exe",
                     "Arguments": "-ExecutionPolicy Bypass -File \"C:\\Mocks\\test.ps1\"",
                     "AutoStart": false, "AutoClose": true}
                ],
                "Language": "fr"
            }"#,
        );

        let settings = Settings::load(&path).unwrap();

        assert_eq!(settings.apps.len(), 2);
        assert_eq!(settings.apps[0].name, "Notepad");
        assert!(settings.apps[1].script_kind().is_some());
        assert_eq!(settings.target_pattern, "FlightSimulator*.exe");
        assert_eq!(settings.poll_interval_ms, 1000);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_or_default(&dir.path().join("absent.json")).unwrap();
        assert!(settings.apps.is_empty());
        assert_eq!(settings.max_subscriptions, 8);
    }

    #[test]
    fn test_invalid_json_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "{ not json");
        assert!(matches!(
            Settings::load_or_default(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_validate_clamps_values() {
        let mut settings = Settings {
            poll_interval_ms: 5,
            max_subscriptions: 0,
            target_pattern: "  ".to_string(),
            ..Default::default()
        };
        settings.validate();
        assert_eq!(settings.poll_interval_ms, 100);
        assert_eq!(settings.max_subscriptions, 2);
        assert_eq!(settings.target_pattern, "FlightSimulator*.exe");
    }

    #[test]
    fn test_reload_keeps_previous_apps_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let apps = SharedAppList::new(vec![AppSpec::new("Notepad", "notepad.exe")]);

        let path = write_config(&dir, "{ broken");
        assert!(!reload_apps(&path, &apps));
        assert_eq!(apps.apps()[0].name, "Notepad");

        let path = write_config(
            &dir,
            r#"{"Apps": [{"Name": "Calc", "ExecutablePath": "calc.exe", "AutoClose": true}]}"#,
        );
        assert!(reload_apps(&path, &apps));
        assert_eq!(apps.len(), 1);
        assert_eq!(apps.apps()[0].name, "Calc");
    }
}
