//! Core module - Companion specs, process inventory, subscriptions and lifecycle control

pub mod app;
pub mod controller;
pub mod directory;
pub mod error;
pub mod inventory;
pub mod settings;
pub mod subscription;
pub mod supervisor;
pub mod watcher;

#[cfg(test)]
mod testing;

pub use app::{AppCatalog, AppSpec, ScriptKind, SharedAppList};
pub use controller::LifecycleController;
pub use directory::{ProcessDirectory, ProcessEntry, SystemProcessDirectory};
pub use error::{ConfigError, InitError, ProcessError, SubscribeError};
pub use inventory::{Inventory, InventoryEntry, ProcessInventory};
pub use settings::{ConfigWatcher, Settings};
pub use subscription::{
    EventSource, RetryObserver, RetryProgress, Subscription, SubscriptionManager,
    SubscriptionState, TargetEvent,
};
pub use supervisor::Supervisor;
pub use watcher::PollingEventSource;
