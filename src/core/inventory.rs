//! Process inventory - Which configured companions are running right now

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use super::app::AppSpec;
use super::directory::ProcessDirectory;

/// Running pids of one companion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InventoryEntry {
    /// App name as configured
    pub name: String,
    pub pids: BTreeSet<u32>,
}

/// Mapping from app name (case-insensitive) to the pids currently satisfying it.
///
/// Apps with no running process are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Inventory {
    entries: HashMap<String, InventoryEntry>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, pid: u32) {
        self.entries
            .entry(name.to_lowercase())
            .or_insert_with(|| InventoryEntry {
                name: name.to_string(),
                pids: BTreeSet::new(),
            })
            .pids
            .insert(pid);
    }

    pub fn get(&self, name: &str) -> Option<&BTreeSet<u32>> {
        self.entries.get(&name.to_lowercase()).map(|e| &e.pids)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_lowercase())
    }

    /// Number of apps with at least one running process
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries sorted by app name
    pub fn entries(&self) -> Vec<&InventoryEntry> {
        let mut entries: Vec<_> = self.entries.values().collect();
        entries.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        entries
    }
}

/// Computes an [`Inventory`] from the live process table
#[derive(Clone)]
pub struct ProcessInventory {
    directory: Arc<dyn ProcessDirectory>,
}

impl ProcessInventory {
    pub fn new(directory: Arc<dyn ProcessDirectory>) -> Self {
        Self { directory }
    }

    /// Rebuild the inventory for every app that has auto start or auto close set.
    ///
    /// Script apps are matched by their name appearing in the command line of an
    /// instance of their interpreter. This is a substring heuristic: an unrelated
    /// interpreter whose command line happens to contain the name also matches.
    pub fn compute(&self, apps: &[AppSpec]) -> Inventory {
        let mut inventory = Inventory::new();

        for app in apps.iter().filter(|a| a.is_managed()) {
            match app.script_kind() {
                Some(kind) => self.collect_script(app, kind.interpreter_image(), &mut inventory),
                None => self.collect_executable(app, &mut inventory),
            }
        }

        debug!(running = inventory.len(), "Inventory computed");
        inventory
    }

    fn collect_executable(&self, app: &AppSpec, inventory: &mut Inventory) {
        match self.directory.list_by_image_name(&app.name) {
            Ok(processes) => {
                for process in processes {
                    inventory.insert(&app.name, process.pid);
                }
            }
            Err(e) => warn!(app = %app.name, error = %e, "Failed to list processes"),
        }
    }

    fn collect_script(&self, app: &AppSpec, interpreter: &str, inventory: &mut Inventory) {
        let interpreters = match self.directory.list_by_image_name(interpreter) {
            Ok(processes) => processes,
            Err(e) => {
                warn!(app = %app.name, interpreter, error = %e, "Failed to list interpreter processes");
                return;
            }
        };

        let needle = app.name.to_lowercase();
        for process in interpreters {
            match self.directory.command_line(process.pid) {
                Ok(command_line) => {
                    if command_line.to_lowercase().contains(&needle) {
                        inventory.insert(&app.name, process.pid);
                    }
                }
                Err(e) => {
                    warn!(app = %app.name, pid = process.pid, error = %e, "Skipping process");
                }
            }
        }
    }
}
