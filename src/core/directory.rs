//! Process directory - Listing, launching and terminating OS processes

use std::collections::HashMap;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, PoisonError};

use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};
use tracing::{debug, info, warn};

use super::error::ProcessError;
use crate::platform;

/// A live process reported by the directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
}

/// Capability over the OS process table
pub trait ProcessDirectory: Send + Sync {
    /// All processes whose image name matches `image`; empty when none run
    fn list_by_image_name(&self, image: &str) -> Result<Vec<ProcessEntry>, ProcessError>;

    /// Full command line of a running process
    fn command_line(&self, pid: u32) -> Result<String, ProcessError>;

    /// Launch `path` with a raw argument string, returning the new pid
    fn start(&self, path: &Path, arguments: Option<&str>) -> Result<u32, ProcessError>;

    /// Terminate a process. A pid that no longer exists counts as success.
    fn terminate(&self, pid: u32) -> Result<(), ProcessError>;
}

/// Compare an OS image name against a wanted name, ignoring case and a `.exe` suffix
pub fn image_name_matches(process_name: &str, wanted: &str) -> bool {
    fn stem(name: &str) -> String {
        let lower = name.trim().to_lowercase();
        match lower.strip_suffix(".exe") {
            Some(stem) => stem.to_string(),
            None => lower,
        }
    }

    let wanted = stem(wanted);
    !wanted.is_empty() && stem(process_name) == wanted
}

/// [`ProcessDirectory`] backed by sysinfo and `std::process`.
///
/// Every query takes a fresh snapshot: a reused `System` keeps the name a pid
/// had when first seen, which is wrong for anything that later called `exec`.
pub struct SystemProcessDirectory {
    /// Children we launched, kept so exited ones get reaped
    children: Mutex<HashMap<u32, Child>>,
}

impl SystemProcessDirectory {
    pub fn new() -> Self {
        Self {
            children: Mutex::new(HashMap::new()),
        }
    }

    /// Collect exit statuses of launched children so they leave the process table
    fn reap_exited(&self) {
        let mut children = self.children.lock().unwrap_or_else(PoisonError::into_inner);
        children.retain(|pid, child| match child.try_wait() {
            Ok(Some(status)) => {
                debug!("Companion process {} exited with {}", pid, status);
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!("Error checking process {} status: {}", pid, e);
                false
            }
        });
    }
}

impl Default for SystemProcessDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessDirectory for SystemProcessDirectory {
    fn list_by_image_name(&self, image: &str) -> Result<Vec<ProcessEntry>, ProcessError> {
        self.reap_exited();

        let mut system = System::new();
        system.refresh_processes_specifics(ProcessesToUpdate::All, true, ProcessRefreshKind::new());

        let mut entries: Vec<ProcessEntry> = system
            .processes()
            .iter()
            // Linux reports threads as tasks of their process; skip them
            .filter(|(_, proc)| proc.thread_kind().is_none())
            .filter(|(_, proc)| !matches!(proc.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
            .filter_map(|(pid, proc)| {
                let name = proc.name().to_string_lossy().to_string();
                image_name_matches(&name, image).then(|| ProcessEntry {
                    pid: pid.as_u32(),
                    name,
                })
            })
            .collect();
        entries.sort_by_key(|e| e.pid);

        debug!(image, count = entries.len(), "Listed processes by image name");
        Ok(entries)
    }

    fn command_line(&self, pid: u32) -> Result<String, ProcessError> {
        let mut system = System::new();
        let sys_pid = Pid::from_u32(pid);
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::new().with_cmd(UpdateKind::Always),
        );

        let process = system.process(sys_pid).ok_or(ProcessError::NotFound { pid })?;
        let cmd: Vec<String> = process
            .cmd()
            .iter()
            .map(|s| s.to_string_lossy().to_string())
            .collect();

        // sysinfo reports an empty command line when it may not read it
        if cmd.is_empty() {
            return Err(ProcessError::Lookup {
                pid,
                reason: "command line unavailable".to_string(),
            });
        }
        Ok(cmd.join(" "))
    }

    fn start(&self, path: &Path, arguments: Option<&str>) -> Result<u32, ProcessError> {
        info!("Launching {:?} with arguments {:?}", path, arguments);

        let mut cmd = Command::new(path);

        if let Some(parent) = path.parent().filter(|p| p.is_dir()) {
            cmd.current_dir(parent);
        }

        if let Some(arguments) = arguments.filter(|a| !a.trim().is_empty()) {
            platform::apply_arguments(&mut cmd, arguments);
        }

        platform::detach(&mut cmd);

        let child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| ProcessError::Launch {
                path: path.to_path_buf(),
                source,
            })?;

        let pid = child.id();
        info!("Spawned process with PID {}", pid);

        self.children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pid, child);

        Ok(pid)
    }

    fn terminate(&self, pid: u32) -> Result<(), ProcessError> {
        match platform::kill_process(pid) {
            Ok(()) => {
                info!("Terminated process {}", pid);
            }
            Err(e) if e.is_not_found() => {
                debug!("Process {} already exited", pid);
            }
            Err(e) => return Err(e),
        }

        self.reap_exited();
        Ok(())
    }
}
