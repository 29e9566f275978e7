//! Lifecycle controller - Starts and stops companions when the target starts and stops

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, error, info};

use super::app::{AppCatalog, AppSpec};
use super::directory::ProcessDirectory;
use super::inventory::{Inventory, ProcessInventory};
use super::subscription::TargetEvent;

/// Wait after starting or stopping processes so the process table catches up.
///
/// Fixed; it holds the controller's critical section while it runs.
pub const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Reconciles configured companions against the process table
pub struct LifecycleController {
    catalog: Arc<dyn AppCatalog>,
    directory: Arc<dyn ProcessDirectory>,
    inventory: ProcessInventory,
    /// Last computed inventory; the lock serializes whole reconcile cycles
    current: Mutex<Inventory>,
}

impl LifecycleController {
    pub fn new(catalog: Arc<dyn AppCatalog>, directory: Arc<dyn ProcessDirectory>) -> Self {
        Self {
            inventory: ProcessInventory::new(Arc::clone(&directory)),
            catalog,
            directory,
            current: Mutex::new(Inventory::new()),
        }
    }

    /// Inventory as of the end of the last completed cycle
    pub async fn inventory(&self) -> Inventory {
        self.current.lock().await.clone()
    }

    /// Recompute the inventory now, without acting on it
    pub async fn refresh(&self) -> Inventory {
        let mut current = self.current.lock().await;
        *current = self.compute().await;
        current.clone()
    }

    /// Inventory for the catalog as it is right now
    async fn compute(&self) -> Inventory {
        let apps = self.catalog.apps();
        let inventory = self.inventory.clone();
        off_runtime(move || inventory.compute(&apps)).await
    }

    /// Launch every auto-start companion that is not already running
    pub async fn on_target_started(&self) -> Inventory {
        let mut current = self.current.lock().await;
        info!("Target started, checking for apps to start...");

        let apps = self.catalog.apps();
        let directory = Arc::clone(&self.directory);
        let inventory = self.inventory.clone();
        off_runtime(move || {
            let running = inventory.compute(&apps);
            launch_missing(directory.as_ref(), &apps, &running);
        })
        .await;

        tokio::time::sleep(SETTLE_DELAY).await;
        *current = self.compute().await;
        current.clone()
    }

    /// Terminate every running auto-close companion
    pub async fn on_target_stopped(&self) -> Inventory {
        let mut current = self.current.lock().await;
        info!("Target stopped, checking for apps to close...");

        tokio::time::sleep(SETTLE_DELAY).await;
        let apps = self.catalog.apps();
        let directory = Arc::clone(&self.directory);
        let inventory = self.inventory.clone();
        off_runtime(move || {
            let running = inventory.compute(&apps);
            close_running(directory.as_ref(), &apps, &running);
        })
        .await;

        tokio::time::sleep(SETTLE_DELAY).await;
        *current = self.compute().await;
        current.clone()
    }

    /// Run the handler for `event` inside its own task.
    ///
    /// This is the single entry point for both real and simulated events. A
    /// panicking handler is logged and yields `None`; nothing propagates to the caller.
    pub async fn dispatch(self: &Arc<Self>, event: TargetEvent) -> Option<Inventory> {
        let controller = Arc::clone(self);
        let handler = tokio::spawn(async move {
            match event {
                TargetEvent::Started => controller.on_target_started().await,
                TargetEvent::Stopped => controller.on_target_stopped().await,
            }
        });

        match handler.await {
            Ok(inventory) => Some(inventory),
            Err(e) => {
                error!(fatal = true, ?event, error = %e, "Failed to handle target event!");
                None
            }
        }
    }

    /// Behave as if the target had just started
    pub async fn simulate_started(self: &Arc<Self>) -> Option<Inventory> {
        self.dispatch(TargetEvent::Started).await
    }

    /// Behave as if the target had just stopped
    pub async fn simulate_stopped(self: &Arc<Self>) -> Option<Inventory> {
        self.dispatch(TargetEvent::Stopped).await
    }
}

fn launch_missing(directory: &dyn ProcessDirectory, apps: &[AppSpec], running: &Inventory) {
    for app in apps.iter().filter(|a| a.auto_start) {
        if running.contains(&app.name) {
            debug!(app = %app.name, "Already running");
            continue;
        }

        match directory.start(&app.executable_path, app.arguments.as_deref()) {
            Ok(pid) => info!(app = %app.name, pid, "App started successfully"),
            Err(e) => error!(app = %app.name, error = %e, "Failed to start app"),
        }
    }
}

fn close_running(directory: &dyn ProcessDirectory, apps: &[AppSpec], running: &Inventory) {
    for app in apps.iter().filter(|a| a.auto_close) {
        let Some(pids) = running.get(&app.name) else {
            debug!(app = %app.name, "Not running");
            continue;
        };

        for &pid in pids {
            match directory.terminate(pid) {
                Ok(()) => info!(app = %app.name, pid, "App stopped successfully"),
                Err(e) => error!(app = %app.name, pid, error = %e, "Failed to stop app"),
            }
        }
    }
}

/// Run process table work on the blocking pool.
///
/// A panic is re-raised on the calling task so [`LifecycleController::dispatch`]
/// still contains it. Blocking tasks are only cancelled at runtime shutdown.
async fn off_runtime<T, F>(work: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(value) => value,
        Err(e) => std::panic::resume_unwind(e.into_panic()),
    }
}
