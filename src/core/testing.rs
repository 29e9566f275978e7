//! In-memory process table and event source used by unit tests

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use super::directory::{image_name_matches, ProcessDirectory, ProcessEntry};
use super::error::{ProcessError, SubscribeError};
use super::subscription::{EventSource, Subscription, TargetEvent};

struct FakeProcess {
    image: String,
    command_line: String,
}

#[derive(Default)]
struct FakeState {
    next_pid: u32,
    processes: BTreeMap<u32, FakeProcess>,
    denied: HashSet<u32>,
    failing_launches: HashSet<String>,
    failing_terminations: HashSet<u32>,
    launches: Vec<String>,
}

/// Process table held in memory
pub struct FakeProcessTable {
    state: Mutex<FakeState>,
}

impl FakeProcessTable {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                next_pid: 1000,
                ..Default::default()
            }),
        }
    }

    /// Add a process as if something outside the supervisor started it
    pub fn spawn(&self, image: &str, command_line: &str) -> u32 {
        let mut state = self.state.lock().unwrap();
        state.next_pid += 1;
        let pid = state.next_pid;
        state.processes.insert(
            pid,
            FakeProcess {
                image: image.to_string(),
                command_line: command_line.to_string(),
            },
        );
        pid
    }

    pub fn deny_lookup(&self, pid: u32) {
        self.state.lock().unwrap().denied.insert(pid);
    }

    pub fn fail_launch(&self, path: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_launches
            .insert(path.to_string());
    }

    pub fn fail_terminate(&self, pid: u32) {
        self.state.lock().unwrap().failing_terminations.insert(pid);
    }

    /// Executables launched through `start`, in order
    pub fn launches(&self) -> Vec<String> {
        self.state.lock().unwrap().launches.clone()
    }

    pub fn process_count(&self) -> usize {
        self.state.lock().unwrap().processes.len()
    }

    pub fn is_running(&self, pid: u32) -> bool {
        self.state.lock().unwrap().processes.contains_key(&pid)
    }
}

impl ProcessDirectory for FakeProcessTable {
    fn list_by_image_name(&self, image: &str) -> Result<Vec<ProcessEntry>, ProcessError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .processes
            .iter()
            .filter(|(_, p)| image_name_matches(&p.image, image))
            .map(|(pid, p)| ProcessEntry {
                pid: *pid,
                name: p.image.clone(),
            })
            .collect())
    }

    fn command_line(&self, pid: u32) -> Result<String, ProcessError> {
        let state = self.state.lock().unwrap();
        if state.denied.contains(&pid) {
            return Err(ProcessError::Lookup {
                pid,
                reason: "access denied".to_string(),
            });
        }
        state
            .processes
            .get(&pid)
            .map(|p| p.command_line.clone())
            .ok_or(ProcessError::NotFound { pid })
    }

    fn start(&self, path: &Path, arguments: Option<&str>) -> Result<u32, ProcessError> {
        let executable = path.to_string_lossy().to_string();
        {
            let mut state = self.state.lock().unwrap();
            state.launches.push(executable.clone());
            if state.failing_launches.contains(&executable) {
                return Err(ProcessError::Launch {
                    path: path.to_path_buf(),
                    source: io::Error::new(io::ErrorKind::NotFound, "executable not found"),
                });
            }
        }

        let image = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| executable.clone());
        let command_line = match arguments {
            Some(args) => format!("{} {}", executable, args),
            None => executable,
        };
        Ok(self.spawn(&image, &command_line))
    }

    fn terminate(&self, pid: u32) -> Result<(), ProcessError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_terminations.contains(&pid) {
            return Err(ProcessError::Terminate {
                pid,
                reason: "access denied".to_string(),
            });
        }
        state.processes.remove(&pid);
        Ok(())
    }
}

/// Event source whose subscribe results are scripted in advance.
///
/// Once the script runs out every subscribe succeeds.
pub struct ScriptedEventSource {
    script: Mutex<VecDeque<Result<(), SubscribeError>>>,
    calls: AtomicUsize,
    active: Arc<AtomicUsize>,
    senders: Mutex<Vec<(TargetEvent, mpsc::UnboundedSender<TargetEvent>)>>,
    fail_unsubscribe: bool,
}

impl ScriptedEventSource {
    pub fn new(script: Vec<Result<(), SubscribeError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            active: Arc::new(AtomicUsize::new(0)),
            senders: Mutex::new(Vec::new()),
            fail_unsubscribe: false,
        }
    }

    pub fn failing_unsubscribe(mut self) -> Self {
        self.fail_unsubscribe = true;
        self
    }

    pub fn subscribe_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn active_subscriptions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Deliver an event to every subscriber of that kind
    pub fn emit(&self, event: TargetEvent) {
        for (kind, sender) in self.senders.lock().unwrap().iter() {
            if *kind == event {
                let _ = sender.send(event);
            }
        }
    }
}

impl EventSource for ScriptedEventSource {
    fn subscribe(
        &self,
        _pattern: &str,
        event: TargetEvent,
        events: mpsc::UnboundedSender<TargetEvent>,
    ) -> Result<Box<dyn Subscription>, SubscribeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front().unwrap_or(Ok(()));
        next?;

        self.active.fetch_add(1, Ordering::SeqCst);
        self.senders.lock().unwrap().push((event, events));
        Ok(Box::new(ScriptedSubscription {
            active: Arc::clone(&self.active),
            fail: self.fail_unsubscribe,
        }))
    }
}

struct ScriptedSubscription {
    active: Arc<AtomicUsize>,
    fail: bool,
}

impl Subscription for ScriptedSubscription {
    fn unsubscribe(self: Box<Self>) -> Result<(), SubscribeError> {
        self.active.fetch_sub(1, Ordering::SeqCst);
        if self.fail {
            Err(SubscribeError::Other("unsubscribe failed".to_string()))
        } else {
            Ok(())
        }
    }
}
