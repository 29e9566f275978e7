//! Subscriptions to target process start/stop notifications

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::{InitError, SubscribeError};

/// Maximum number of subscribe attempts while the quota is exceeded
pub const MAX_SUBSCRIBE_ATTEMPTS: u32 = 5;

/// Fixed wait between quota-limited attempts
pub const RETRY_DELAY: Duration = Duration::from_secs(15);

/// Lifecycle notification about the target application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TargetEvent {
    /// A target process was created
    Started,
    /// A target process was deleted
    Stopped,
}

/// Capability to subscribe to process creation/deletion notifications.
///
/// Notifications are pushed into `events`; the source decides on which thread.
pub trait EventSource: Send + Sync {
    fn subscribe(
        &self,
        pattern: &str,
        event: TargetEvent,
        events: mpsc::UnboundedSender<TargetEvent>,
    ) -> Result<Box<dyn Subscription>, SubscribeError>;
}

/// Handle to a live subscription
pub trait Subscription: Send {
    fn unsubscribe(self: Box<Self>) -> Result<(), SubscribeError>;
}

/// State of the subscription manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubscriptionState {
    Uninitialized,
    Subscribing,
    /// Subscribed; the only state in which events are delivered
    Active,
    /// Initialization failed for good
    Failed,
    /// Torn down through `dispose`
    Disposed,
}

/// Retry status published while waiting out the subscription quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryProgress {
    pub delay_seconds: u64,
    pub attempt: u32,
    pub max_attempts: u32,
}

/// Receives retry progress for display
pub type RetryObserver = Arc<dyn Fn(RetryProgress) + Send + Sync>;

/// Owns the start/stop subscriptions and retries them under quota pressure
pub struct SubscriptionManager {
    source: Arc<dyn EventSource>,
    pattern: String,
    events: mpsc::UnboundedSender<TargetEvent>,
    state: Mutex<SubscriptionState>,
    subscriptions: Mutex<Vec<Box<dyn Subscription>>>,
    cancel: CancellationToken,
    observer: Option<RetryObserver>,
}

impl SubscriptionManager {
    pub fn new(
        source: Arc<dyn EventSource>,
        pattern: impl Into<String>,
        events: mpsc::UnboundedSender<TargetEvent>,
    ) -> Self {
        Self {
            source,
            pattern: pattern.into(),
            events,
            state: Mutex::new(SubscriptionState::Uninitialized),
            subscriptions: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            observer: None,
        }
    }

    pub fn with_retry_observer(mut self, observer: RetryObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn state(&self) -> SubscriptionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_active(&self) -> bool {
        self.state() == SubscriptionState::Active
    }

    fn set_state(&self, state: SubscriptionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Subscribe to target start and stop events.
    ///
    /// Quota errors are retried up to [`MAX_SUBSCRIBE_ATTEMPTS`] attempts in total,
    /// [`RETRY_DELAY`] apart. Any other error fails immediately. A `dispose` during
    /// the retry wait stops the loop and returns `Ok(())`.
    pub async fn initialize(&self) -> Result<(), InitError> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != SubscriptionState::Uninitialized {
                return Err(InitError::InvalidState(*state));
            }
            *state = SubscriptionState::Subscribing;
        }

        let mut attempt = 0;
        loop {
            if self.cancel.is_cancelled() {
                info!("Subscription initialization halted by dispose");
                return Ok(());
            }

            info!(pattern = %self.pattern, "Subscribing to target process events...");
            match self.subscribe_all() {
                Ok(subscriptions) => {
                    self.activate(subscriptions);
                    return Ok(());
                }
                Err(e) if e.is_quota() => {
                    attempt += 1;
                    if attempt >= MAX_SUBSCRIBE_ATTEMPTS {
                        error!(fatal = true, error = %e, attempts = attempt, "Subscription quota exceeded, giving up");
                        self.fail();
                        return Err(InitError::QuotaExhausted { attempts: attempt });
                    }

                    warn!(
                        "Subscription quota exceeded. Retry in {} seconds... ({}/{})",
                        RETRY_DELAY.as_secs(),
                        attempt,
                        MAX_SUBSCRIBE_ATTEMPTS
                    );
                    self.publish(RetryProgress {
                        delay_seconds: RETRY_DELAY.as_secs(),
                        attempt,
                        max_attempts: MAX_SUBSCRIBE_ATTEMPTS,
                    });

                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            info!("Subscription retry cancelled by dispose");
                            return Ok(());
                        }
                        _ = tokio::time::sleep(RETRY_DELAY) => {}
                    }
                }
                Err(e) => {
                    error!(fatal = true, error = %e, "Failed to subscribe to target process events");
                    self.fail();
                    return Err(InitError::SubscriptionFailed(e));
                }
            }
        }
    }

    /// Subscribe both events, releasing the first if the second fails
    fn subscribe_all(&self) -> Result<Vec<Box<dyn Subscription>>, SubscribeError> {
        let mut subscriptions = Vec::with_capacity(2);
        for event in [TargetEvent::Started, TargetEvent::Stopped] {
            match self
                .source
                .subscribe(&self.pattern, event, self.events.clone())
            {
                Ok(subscription) => {
                    debug!(?event, "Subscribed");
                    subscriptions.push(subscription);
                }
                Err(e) => {
                    release(subscriptions);
                    return Err(e);
                }
            }
        }
        Ok(subscriptions)
    }

    fn activate(&self, subscriptions: Vec<Box<dyn Subscription>>) {
        let mut held = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // dispose cancels before it takes this lock, so checking here closes the race
        if self.cancel.is_cancelled() {
            drop(held);
            release(subscriptions);
            info!("Subscriptions released, manager was disposed while subscribing");
            return;
        }

        held.extend(subscriptions);
        self.set_state(SubscriptionState::Active);
        info!("Target process event subscriptions active");
    }

    fn fail(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != SubscriptionState::Disposed {
            *state = SubscriptionState::Failed;
        }
    }

    fn publish(&self, progress: RetryProgress) {
        if let Some(observer) = &self.observer {
            observer(progress);
        }
    }

    /// Unsubscribe everything and stop any pending retry. Never fails.
    pub fn dispose(&self) {
        info!("Disposing target process subscriptions...");
        self.cancel.cancel();

        let subscriptions: Vec<_> = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        release(subscriptions);

        // Failed is terminal; it must stay visible after teardown
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != SubscriptionState::Failed {
            *state = SubscriptionState::Disposed;
        }
        info!("Target process subscriptions disposed");
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        if !matches!(
            self.state(),
            SubscriptionState::Disposed | SubscriptionState::Failed
        ) {
            self.dispose();
        }
    }
}

/// Best-effort unsubscribe; failures are logged and swallowed
fn release(subscriptions: Vec<Box<dyn Subscription>>) {
    for subscription in subscriptions {
        if let Err(e) = subscription.unsubscribe() {
            error!(error = %e, "Failed to unsubscribe");
        }
    }
}
