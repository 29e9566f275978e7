//! Companion application specs and the catalog that serves them

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

/// Script types that run inside a shared interpreter process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptKind {
    PowerShell,
    Python,
    Batch,
}

impl ScriptKind {
    /// Detect the script kind from a declared app name (case-insensitive extension)
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        if lower.ends_with(".ps1") {
            Some(Self::PowerShell)
        } else if lower.ends_with(".py") {
            Some(Self::Python)
        } else if lower.ends_with(".bat") || lower.ends_with(".cmd") {
            Some(Self::Batch)
        } else {
            None
        }
    }

    /// Image name of the interpreter process the OS reports for this script kind
    pub fn interpreter_image(&self) -> &'static str {
        match self {
            Self::PowerShell => "powershell.exe",
            Self::Python => "python.exe",
            Self::Batch => "cmd.exe",
        }
    }

    /// Interpreter arguments that run the script at `path`
    pub fn launch_arguments(&self, path: &Path) -> String {
        match self {
            Self::PowerShell => format!("-ExecutionPolicy Bypass -File \"{}\"", path.display()),
            Self::Python => format!("\"{}\"", path.display()),
            Self::Batch => format!("/c \"{}\"", path.display()),
        }
    }
}

/// A configured companion application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AppSpec {
    /// Display name; for plain executables this is also the image name to match
    pub name: String,
    /// Executable to launch (the interpreter for script apps)
    pub executable_path: PathBuf,
    /// Raw argument string passed to the executable
    #[serde(default)]
    pub arguments: Option<String>,
    /// Launch when the target starts
    #[serde(default)]
    pub auto_start: bool,
    /// Terminate when the target stops
    #[serde(default)]
    pub auto_close: bool,
}

impl AppSpec {
    pub fn new(name: impl Into<String>, executable_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            executable_path: executable_path.into(),
            arguments: None,
            auto_start: false,
            auto_close: false,
        }
    }

    /// Build a spec that runs a script through its interpreter.
    ///
    /// Returns `None` when the file name has no known script extension.
    pub fn for_script(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();
        // Split on both separators so Windows paths work on every host
        let raw = path.to_string_lossy();
        let name = raw.rsplit(['/', '\\']).next().unwrap_or_default().to_string();
        let kind = ScriptKind::from_name(&name)?;
        Some(Self {
            name,
            executable_path: PathBuf::from(kind.interpreter_image()),
            arguments: Some(kind.launch_arguments(path)),
            auto_start: false,
            auto_close: false,
        })
    }

    pub fn with_arguments(mut self, arguments: impl Into<String>) -> Self {
        self.arguments = Some(arguments.into());
        self
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    pub fn with_auto_close(mut self, auto_close: bool) -> Self {
        self.auto_close = auto_close;
        self
    }

    pub fn script_kind(&self) -> Option<ScriptKind> {
        ScriptKind::from_name(&self.name)
    }

    /// Whether the supervisor acts on this app at all
    pub fn is_managed(&self) -> bool {
        self.auto_start || self.auto_close
    }
}

impl std::fmt::Display for AppSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Name={}, ExecutablePath={}, Arguments={}, AutoStart={}, AutoClose={}",
            self.name,
            self.executable_path.display(),
            self.arguments.as_deref().unwrap_or(""),
            self.auto_start,
            self.auto_close
        )
    }
}

/// Source of the current app list.
///
/// Every call returns a fresh snapshot; callers never cache it across events.
pub trait AppCatalog: Send + Sync {
    fn apps(&self) -> Vec<AppSpec>;
}

/// Thread-safe, mutable app list shared between the host and the supervisor
#[derive(Debug, Default)]
pub struct SharedAppList {
    inner: Arc<RwLock<Vec<AppSpec>>>,
}

impl SharedAppList {
    pub fn new(apps: Vec<AppSpec>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(apps)),
        }
    }

    /// Replace the whole list
    pub fn replace(&self, apps: Vec<AppSpec>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = apps;
    }

    /// Modify the app named `name` (case-insensitive). Returns false if absent.
    pub fn update(&self, name: &str, f: impl FnOnce(&mut AppSpec)) -> bool {
        let mut apps = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match apps.iter_mut().find(|a| a.name.eq_ignore_ascii_case(name)) {
            Some(app) => {
                f(app);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .map(|apps| apps.len())
            .unwrap_or_else(|e| e.into_inner().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AppCatalog for SharedAppList {
    fn apps(&self) -> Vec<AppSpec> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Clone for SharedAppList {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_kind_detection() {
        assert_eq!(ScriptKind::from_name("test.ps1"), Some(ScriptKind::PowerShell));
        assert_eq!(ScriptKind::from_name("Tool.PY"), Some(ScriptKind::Python));
        assert_eq!(ScriptKind::from_name("run.bat"), Some(ScriptKind::Batch));
        assert_eq!(ScriptKind::from_name("run.cmd"), Some(ScriptKind::Batch));
        assert_eq!(ScriptKind::from_name("Notepad"), None);
        assert_eq!(ScriptKind::from_name("ps1"), None);
        assert_eq!(ScriptKind::from_name("notepad.exe"), None);
    }

    #[test]
    fn test_for_script_uses_interpreter() {
        let app = AppSpec::for_script("C:/scripts/test.ps1").unwrap();
        assert_eq!(app.name, "test.ps1");
        assert_eq!(app.executable_path, PathBuf::from("powershell.exe"));
        assert_eq!(
            app.arguments.as_deref(),
            Some("-ExecutionPolicy Bypass -File \"C:/scripts/test.ps1\"")
        );

        let py = AppSpec::for_script("/opt/tools/sync.py").unwrap();
        assert_eq!(py.executable_path, PathBuf::from("python.exe"));
        assert_eq!(py.arguments.as_deref(), Some("\"/opt/tools/sync.py\""));

        let bat = AppSpec::for_script("launch.cmd").unwrap();
        assert_eq!(bat.executable_path, PathBuf::from("cmd.exe"));
        assert_eq!(bat.arguments.as_deref(), Some("/c \"launch.cmd\""));

        assert!(AppSpec::for_script("notepad.exe").is_none());
    }

    #[test]
    fn test_shared_list_update_is_visible_to_snapshots() {
        let list = SharedAppList::new(vec![AppSpec::new("test3.ps1", "powershell.exe")]);
        let before = list.apps();
        assert!(list.update("TEST3.ps1", |app| app.auto_close = true));
        assert!(!before[0].auto_close);
        assert!(list.apps()[0].auto_close);
        assert!(!list.update("missing", |_| {}));
    }

    #[test]
    fn test_deserialize_desktop_config_entry() {
        let json = r#"{
            "IconPath": "C:\\Windows\\notepad.exe",
            "Name": "Notepad",
            "ExecutablePath": "notepad.exe",
            "Arguments": null,
            "AutoStart": true,
            "AutoClose": true
        }"#;
        let app: AppSpec = serde_json::from_str(json).unwrap();
        assert_eq!(app.name, "Notepad");
        assert!(app.auto_start && app.auto_close);
        assert!(app.is_managed());
        assert!(app.arguments.is_none());
    }
}
