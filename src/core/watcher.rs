//! Polling event source - Target process notifications from the sysinfo process table

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use glob::{MatchOptions, Pattern};
use sysinfo::{ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

use super::error::SubscribeError;
use super::subscription::{EventSource, Subscription, TargetEvent};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// [`EventSource`] that polls the process table for matching image names.
///
/// Each subscription owns one watcher thread. The number of concurrent
/// subscriptions is capped; going over the cap is a quota error.
pub struct PollingEventSource {
    interval: Duration,
    max_subscriptions: usize,
    active: Arc<AtomicUsize>,
}

impl PollingEventSource {
    pub fn new(interval: Duration, max_subscriptions: usize) -> Self {
        Self {
            interval,
            max_subscriptions,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn active_subscriptions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Claim a quota slot, failing when all are taken
    fn reserve(&self) -> Result<(), SubscribeError> {
        self.active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max_subscriptions).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|n| {
                SubscribeError::QuotaExceeded(format!(
                    "{} of {} subscriptions in use",
                    n, self.max_subscriptions
                ))
            })
    }
}

impl EventSource for PollingEventSource {
    fn subscribe(
        &self,
        pattern: &str,
        event: TargetEvent,
        events: mpsc::UnboundedSender<TargetEvent>,
    ) -> Result<Box<dyn Subscription>, SubscribeError> {
        let pattern = Pattern::new(pattern)
            .map_err(|e| SubscribeError::Other(format!("invalid pattern '{}': {}", pattern, e)))?;

        self.reserve()?;

        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let interval = self.interval;
        let thread_pattern = pattern.clone();
        let spawned = thread::Builder::new()
            .name(format!("watch-{:?}", event).to_lowercase())
            .spawn(move || watch(thread_pattern, event, interval, stop_rx, events));

        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                self.active.fetch_sub(1, Ordering::SeqCst);
                return Err(SubscribeError::Other(format!(
                    "failed to start watcher thread: {}",
                    e
                )));
            }
        };

        info!(pattern = %pattern, ?event, "Watching target processes");
        Ok(Box::new(PollingSubscription {
            stop: Some(stop_tx),
            thread: Some(thread),
            active: Arc::clone(&self.active),
        }))
    }
}

/// Pids of running processes whose image name matches `pattern`.
///
/// Snapshots are never reused; sysinfo would keep a pid's pre-`exec` name.
fn matching_pids(pattern: &Pattern) -> HashSet<u32> {
    let mut system = System::new();
    system.refresh_processes_specifics(ProcessesToUpdate::All, true, ProcessRefreshKind::new());
    system
        .processes()
        .iter()
        .filter(|(_, proc)| proc.thread_kind().is_none())
        .filter(|(_, proc)| !matches!(proc.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
        .filter(|(_, proc)| pattern.matches_with(&proc.name().to_string_lossy(), MATCH_OPTIONS))
        .map(|(pid, _)| pid.as_u32())
        .collect()
}

/// Watcher thread body; returns when stopped or when nobody listens anymore
fn watch(
    pattern: Pattern,
    event: TargetEvent,
    interval: Duration,
    stop: std_mpsc::Receiver<()>,
    events: mpsc::UnboundedSender<TargetEvent>,
) {
    let mut known = matching_pids(&pattern);

    // A message or a dropped sender both mean stop
    while let Err(std_mpsc::RecvTimeoutError::Timeout) = stop.recv_timeout(interval) {
        let seen = matching_pids(&pattern);
        let changed = match event {
            TargetEvent::Started => seen.difference(&known).count(),
            TargetEvent::Stopped => known.difference(&seen).count(),
        };
        trace!(?event, matching = seen.len(), changed, "Polled process table");
        known = seen;

        for _ in 0..changed {
            if events.send(event).is_err() {
                debug!(?event, "Event receiver dropped, watcher exiting");
                return;
            }
        }
    }
}

struct PollingSubscription {
    stop: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    active: Arc<AtomicUsize>,
}

impl PollingSubscription {
    fn shutdown(&mut self) -> Result<(), SubscribeError> {
        // Dropping the sender wakes the watcher immediately
        self.stop.take();
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        self.active.fetch_sub(1, Ordering::SeqCst);
        thread
            .join()
            .map_err(|_| SubscribeError::Other("watcher thread panicked".to_string()))
    }
}

impl Subscription for PollingSubscription {
    fn unsubscribe(mut self: Box<Self>) -> Result<(), SubscribeError> {
        self.shutdown()
    }
}

impl Drop for PollingSubscription {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!(error = %e, "Failed to stop target process watcher");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_matching_is_case_insensitive() {
        let pattern = Pattern::new("FlightSimulator*.exe").unwrap();
        assert!(pattern.matches_with("FlightSimulator.exe", MATCH_OPTIONS));
        assert!(pattern.matches_with("flightsimulator2024.EXE", MATCH_OPTIONS));
        assert!(!pattern.matches_with("Simulator.exe", MATCH_OPTIONS));
    }

    #[test]
    fn test_quota_is_enforced_and_released() {
        let source = PollingEventSource::new(Duration::from_millis(50), 1);
        let (tx, _rx) = mpsc::unbounded_channel();

        let first = source
            .subscribe("no-such-target-*", TargetEvent::Started, tx.clone())
            .unwrap();
        assert_eq!(source.active_subscriptions(), 1);

        let err = match source.subscribe("no-such-target-*", TargetEvent::Stopped, tx.clone()) {
            Err(e) => e,
            Ok(_) => panic!("second subscription should exceed the quota"),
        };
        assert!(err.is_quota());

        first.unsubscribe().unwrap();
        assert_eq!(source.active_subscriptions(), 0);

        let again = source
            .subscribe("no-such-target-*", TargetEvent::Stopped, tx)
            .unwrap();
        drop(again);
        assert_eq!(source.active_subscriptions(), 0);
    }

    #[test]
    fn test_invalid_pattern_is_not_a_quota_error() {
        let source = PollingEventSource::new(Duration::from_millis(50), 4);
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = match source.subscribe("[unclosed", TargetEvent::Started, tx) {
            Err(e) => e,
            Ok(_) => panic!("pattern should be rejected"),
        };
        assert!(!err.is_quota());
        assert_eq!(source.active_subscriptions(), 0);
    }

    #[test]
    fn test_drop_releases_slot_of_panicked_watcher() {
        let active = Arc::new(AtomicUsize::new(1));
        let thread = thread::spawn(|| panic!("watcher crashed"));
        while !thread.is_finished() {
            thread::sleep(Duration::from_millis(10));
        }

        drop(PollingSubscription {
            stop: None,
            thread: Some(thread),
            active: Arc::clone(&active),
        });

        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    /// Other tests may run `sleep` too, so skip unrelated events
    #[cfg(unix)]
    async fn wait_for(rx: &mut mpsc::UnboundedReceiver<TargetEvent>, wanted: TargetEvent) -> bool {
        let found = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = rx.recv().await {
                if event == wanted {
                    return true;
                }
            }
            false
        })
        .await;
        matches!(found, Ok(true))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_start_and_stop_events_are_emitted() {
        use std::process::Command;

        let source = PollingEventSource::new(Duration::from_millis(50), 4);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let started = source
            .subscribe("sleep", TargetEvent::Started, tx.clone())
            .unwrap();
        let stopped = source
            .subscribe("sleep", TargetEvent::Stopped, tx)
            .unwrap();

        // Give both watchers time to take their baseline snapshot
        tokio::time::sleep(Duration::from_millis(300)).await;
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        assert!(wait_for(&mut rx, TargetEvent::Started).await);

        child.kill().unwrap();
        child.wait().unwrap();
        assert!(wait_for(&mut rx, TargetEvent::Stopped).await);

        started.unsubscribe().unwrap();
        stopped.unsubscribe().unwrap();
        assert_eq!(source.active_subscriptions(), 0);
    }
}
