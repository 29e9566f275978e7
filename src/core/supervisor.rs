//! Supervisor - Wires subscriptions, the event dispatch loop and the lifecycle controller

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::app::AppCatalog;
use super::controller::LifecycleController;
use super::directory::ProcessDirectory;
use super::error::InitError;
use super::inventory::Inventory;
use super::subscription::{
    EventSource, RetryObserver, SubscriptionManager, SubscriptionState, TargetEvent,
};

/// Runs the companion supervisor for one target pattern
pub struct Supervisor {
    controller: Arc<LifecycleController>,
    manager: Arc<SubscriptionManager>,
    /// Taken by the dispatch loop on start
    events: Mutex<Option<mpsc::UnboundedReceiver<TargetEvent>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    pub fn new(
        catalog: Arc<dyn AppCatalog>,
        directory: Arc<dyn ProcessDirectory>,
        source: Arc<dyn EventSource>,
        pattern: &str,
        observer: Option<RetryObserver>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut manager = SubscriptionManager::new(source, pattern, events_tx);
        if let Some(observer) = observer {
            manager = manager.with_retry_observer(observer);
        }

        Self {
            controller: Arc::new(LifecycleController::new(catalog, directory)),
            manager: Arc::new(manager),
            events: Mutex::new(Some(events_rx)),
            dispatcher: Mutex::new(None),
        }
    }

    /// Start dispatching events, then subscribe to the target's start and stop.
    ///
    /// Events that arrive while subscriptions are not active are dropped.
    pub async fn start(&self) -> Result<(), InitError> {
        let Some(mut events) = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return Err(InitError::InvalidState(self.manager.state()));
        };

        let manager = Arc::clone(&self.manager);
        let controller = Arc::clone(&self.controller);
        let dispatcher = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if !manager.is_active() {
                    debug!(?event, state = ?manager.state(), "Subscriptions not active, dropping event");
                    continue;
                }
                controller.dispatch(event).await;
            }
            debug!("Event channel closed, dispatcher exiting");
        });
        *self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner) = Some(dispatcher);

        self.manager.initialize().await?;
        if self.manager.is_active() {
            info!("Supervisor started");
        }
        Ok(())
    }

    pub fn state(&self) -> SubscriptionState {
        self.manager.state()
    }

    pub async fn inventory(&self) -> Inventory {
        self.controller.inventory().await
    }

    /// Recompute the inventory without acting on it
    pub async fn refresh(&self) -> Inventory {
        self.controller.refresh().await
    }

    pub async fn simulate_started(&self) -> Option<Inventory> {
        self.controller.simulate_started().await
    }

    pub async fn simulate_stopped(&self) -> Option<Inventory> {
        self.controller.simulate_stopped().await
    }

    /// Tear down subscriptions and stop the dispatch loop. Never fails.
    ///
    /// A handler already running finishes on its own task.
    pub fn dispose(&self) {
        self.manager.dispose();
        if let Some(dispatcher) = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            dispatcher.abort();
        }
        info!("Supervisor disposed");
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Some(dispatcher) = self
            .dispatcher
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            dispatcher.abort();
        }
    }
}
