//! Error types for the supervisor core

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::subscription::SubscriptionState;

/// Errors raised by the OS process table
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Reading details of a live process failed (permissions, races)
    #[error("Failed to inspect process {pid}: {reason}")]
    Lookup { pid: u32, reason: String },

    /// The process no longer exists
    #[error("Process not found (PID: {pid})")]
    NotFound { pid: u32 },

    /// Failed to launch an executable
    #[error("Failed to launch {}: {source}", path.display())]
    Launch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to terminate a running process
    #[error("Failed to terminate process {pid}: {reason}")]
    Terminate { pid: u32, reason: String },

    /// Operation not available on this platform
    #[error("Unsupported platform")]
    Unsupported,
}

impl ProcessError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors returned by an event source when subscribing
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubscribeError {
    /// Platform limit on concurrent subscriptions reached; retryable
    #[error("Subscription quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Any other subscription failure; not retryable
    #[error("Subscription failed: {0}")]
    Other(String),
}

impl SubscribeError {
    pub fn is_quota(&self) -> bool {
        matches!(self, Self::QuotaExceeded(_))
    }
}

/// Fatal outcome of subscription initialization
#[derive(Debug, Error)]
pub enum InitError {
    /// Every attempt hit the subscription quota
    #[error("Subscription quota still exceeded after {attempts} attempts")]
    QuotaExhausted { attempts: u32 },

    /// A non-quota failure, reported on the first occurrence
    #[error("Failed to subscribe to target process events")]
    SubscriptionFailed(#[source] SubscribeError),

    /// `initialize` was called outside the `Uninitialized` state
    #[error("Cannot initialize subscriptions from state {0:?}")]
    InvalidState(SubscriptionState),
}

impl InitError {
    pub fn is_quota_exhausted(&self) -> bool {
        matches!(self, Self::QuotaExhausted { .. })
    }
}

/// Errors loading the settings file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
