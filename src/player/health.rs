//! Periodic voice connection health check.
//!
//! Every poll classifies the transport status. The first failure of an
//! unhealthy run triggers one rejoin attempt; once the run reaches the
//! failure threshold the user is told, once. A healthy poll ends the run.

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Notifier, deliver};
use crate::{configs::HealthConfig, voice::VoiceTransport};

pub const HEALTH_NOTICE: &str =
    "⚠️ Voice connection health degraded - attempted recovery. Please re-join if issues persist.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthState {
    pub consecutive_failures: u32,
    pub notification_sent: bool,
}

/// What a single unhealthy poll decided to do.
struct Escalation {
    failures: u32,
    reconnect: bool,
    notify: bool,
}

struct MonitorInner {
    label: String,
    transport: Weak<dyn VoiceTransport>,
    notifier: Notifier,
    threshold: u32,
    state: Mutex<HealthState>,
    destroyed: AtomicBool,
}

impl MonitorInner {
    async fn poll(&self) {
        if self.destroyed.load(Ordering::Acquire) {
            return;
        }

        // An unreachable transport counts as unhealthy.
        let status = self.transport.upgrade().map(|t| t.status());
        let healthy = status.is_some_and(|s| s.is_healthy());

        let escalation = {
            let mut state = self.state.lock();
            if healthy {
                if state.consecutive_failures > 0 {
                    info!(
                        "[{}] voice connection recovered after {} failed checks",
                        self.label, state.consecutive_failures
                    );
                    *state = HealthState::default();
                }
                return;
            }

            state.consecutive_failures += 1;
            let notify =
                state.consecutive_failures >= self.threshold && !state.notification_sent;
            if notify {
                state.notification_sent = true;
            }
            Escalation {
                failures: state.consecutive_failures,
                reconnect: state.consecutive_failures == 1,
                notify,
            }
        };

        warn!(
            "[{}] voice connection unhealthy ({:?}), failure {}/{}",
            self.label, status, escalation.failures, self.threshold
        );

        if escalation.reconnect {
            match self.transport.upgrade() {
                Some(transport) => match transport.reconnect() {
                    Ok(()) => info!("[{}] attempted voice connection rejoin", self.label),
                    Err(e) => warn!("[{}] voice connection rejoin failed: {}", self.label, e),
                },
                None => debug!("[{}] transport is gone, nothing to rejoin", self.label),
            }
        }

        if escalation.notify && !self.destroyed.load(Ordering::Acquire) {
            deliver(&self.label, &self.notifier, HEALTH_NOTICE.to_string()).await;
        }
    }
}

pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    /// Create a monitor without starting the poll loop.
    pub fn new(
        label: impl Into<String>,
        transport: &Arc<dyn VoiceTransport>,
        threshold: u32,
        notifier: Notifier,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                label: label.into(),
                transport: Arc::downgrade(transport),
                notifier,
                threshold: threshold.max(1),
                state: Mutex::new(HealthState::default()),
                destroyed: AtomicBool::new(false),
            }),
            task: Mutex::new(None),
        }
    }

    /// Create a monitor that polls every `config.interval_ms`.
    pub fn start(
        label: impl Into<String>,
        transport: &Arc<dyn VoiceTransport>,
        config: &HealthConfig,
        notifier: Notifier,
    ) -> Self {
        let monitor = Self::new(label, transport, config.failure_threshold, notifier);
        let period = Duration::from_millis(config.interval_ms.max(1));
        let inner = monitor.inner.clone();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                if inner.destroyed.load(Ordering::Acquire) {
                    break;
                }
                inner.poll().await;
            }
        });
        *monitor.task.lock() = Some(task);
        debug!(
            "[{}] health monitor started ({}ms, threshold {})",
            monitor.inner.label, config.interval_ms, monitor.inner.threshold
        );
        monitor
    }

    /// Run one check now.
    pub async fn poll(&self) {
        self.inner.poll().await;
    }

    pub fn state(&self) -> HealthState {
        *self.inner.state.lock()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    /// Stop polling. Idempotent; polls already in flight become no-ops.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        debug!("[{}] health monitor destroyed", self.inner.label);
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.destroy();
    }
}
