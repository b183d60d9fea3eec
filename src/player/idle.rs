//! Inactivity countdown for a voice channel.
//!
//! `arm` starts (or restarts) the countdown, `disarm` cancels it. When the
//! countdown runs out the timer disarms itself and hands a reason string to
//! the expiry callback, once per arm.

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, info};

use super::{Notifier, deliver};

#[derive(Default)]
struct IdleState {
    armed_at: Option<Instant>,
    task: Option<JoinHandle<()>>,
    /// Bumped on every arm/disarm so a countdown that lost the race with a
    /// cancel can tell it is stale.
    generation: u64,
    destroyed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdleStatus {
    pub armed: bool,
    pub timeout_secs: u64,
    pub remaining_ms: Option<u64>,
}

pub struct IdleTimer {
    label: String,
    timeout: Duration,
    on_expire: Notifier,
    state: Arc<Mutex<IdleState>>,
}

impl IdleTimer {
    pub fn new(label: impl Into<String>, timeout: Duration, on_expire: Notifier) -> Self {
        Self {
            label: label.into(),
            timeout,
            on_expire,
            state: Arc::new(Mutex::new(IdleState::default())),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Text handed to the expiry callback.
    pub fn reason(&self) -> String {
        format!(
            "Disconnected from voice channel due to {} seconds of inactivity",
            self.timeout.as_secs()
        )
    }

    /// Start the countdown, replacing any running one.
    pub fn arm(&self) {
        let mut state = self.state.lock();
        if state.destroyed {
            return;
        }
        if let Some(task) = state.task.take() {
            task.abort();
        }
        state.generation += 1;
        state.armed_at = Some(Instant::now());

        let generation = state.generation;
        let shared = self.state.clone();
        let timeout = self.timeout;
        let on_expire = self.on_expire.clone();
        let label = self.label.clone();
        let reason = self.reason();

        state.task = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            {
                let mut state = shared.lock();
                if state.generation != generation || state.destroyed {
                    return;
                }
                state.armed_at = None;
                // Detach our own handle so nothing aborts us mid-callback.
                state.task = None;
            }
            info!("[{}] idle timeout reached ({}s)", label, timeout.as_secs());
            deliver(&label, &on_expire, reason).await;
        }));
        debug!("[{}] idle timer armed ({}s)", self.label, self.timeout.as_secs());
    }

    /// Cancel a running countdown without firing. No-op when disarmed.
    pub fn disarm(&self) {
        let mut state = self.state.lock();
        state.generation += 1;
        if let Some(task) = state.task.take() {
            task.abort();
        }
        if state.armed_at.take().is_some() {
            debug!("[{}] idle timer disarmed", self.label);
        }
    }

    /// Disarm for good; later `arm` calls are ignored.
    pub fn destroy(&self) {
        self.disarm();
        self.state.lock().destroyed = true;
    }

    pub fn is_armed(&self) -> bool {
        self.state.lock().armed_at.is_some()
    }

    pub fn status(&self) -> IdleStatus {
        let state = self.state.lock();
        IdleStatus {
            armed: state.armed_at.is_some(),
            timeout_secs: self.timeout.as_secs(),
            remaining_ms: state
                .armed_at
                .map(|at| self.timeout.saturating_sub(at.elapsed()).as_millis() as u64),
        }
    }
}

impl Drop for IdleTimer {
    fn drop(&mut self) {
        if let Some(task) = self.state.lock().task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::FutureExt;

    use super::*;
    use crate::common::types::AnyError;

    fn recording() -> (Notifier, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let notifier: Notifier = Arc::new(move |reason: String| {
            sink.lock().push(reason);
            async { Ok::<(), AnyError>(()) }.boxed()
        });
        (notifier, seen)
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_with_the_duration() {
        let (notifier, seen) = recording();
        let timer = IdleTimer::new("g/1", Duration::from_secs(2), notifier);

        timer.arm();
        assert!(timer.is_armed());
        tokio::time::sleep(Duration::from_millis(2100)).await;

        let seen = seen.lock().clone();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("2 seconds"));
        assert!(!timer.is_armed());

        tokio::time::sleep(Duration::from_secs(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn disarm_before_expiry_never_fires() {
        let (notifier, seen) = recording();
        let timer = IdleTimer::new("g/1", Duration::from_secs(2), notifier);

        timer.arm();
        tokio::time::sleep(Duration::from_secs(1)).await;
        timer.disarm();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(seen.lock().is_empty());
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_restarts_instead_of_stacking() {
        let (notifier, seen) = recording();
        let timer = IdleTimer::new("g/1", Duration::from_secs(2), notifier);

        timer.arm();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        timer.arm();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(seen.lock().is_empty());
        assert_eq!(timer.status().remaining_ms, Some(1000));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_callback_still_disarms() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let notifier: Notifier = Arc::new(move |_: String| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), AnyError>("chat unavailable".into()) }.boxed()
        });
        let timer = IdleTimer::new("g/1", Duration::from_secs(2), notifier);

        timer.arm();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!timer.is_armed());

        // Usable again after a failed expiry.
        timer.arm();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn destroyed_timer_ignores_arm() {
        let (notifier, seen) = recording();
        let timer = IdleTimer::new("g/1", Duration::from_secs(2), notifier);
        timer.destroy();
        timer.destroy();
        timer.arm();
        assert!(!timer.is_armed());
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(seen.lock().is_empty());
    }
}
