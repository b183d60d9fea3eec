//! Connection readiness gate.
//!
//! A resource can only be subscribed through [`ReadyTransport`], and the only
//! way to obtain one is [`await_ready`].

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::transport::{ConnectionStatus, Subscription, VoiceTransport};
use crate::{
    audio::PlayableResource,
    common::{PlaybackError, PlaybackResult},
};

enum WaitFailure {
    Destroyed,
}

/// Proof that a transport was observed Ready within budget.
pub struct ReadyTransport<'a> {
    transport: &'a dyn VoiceTransport,
    budget: Duration,
    waited: Duration,
}

impl<'a> ReadyTransport<'a> {
    pub fn waited(&self) -> Duration {
        self.waited
    }

    /// Attach `resource`. If the transport left Ready since the gate was
    /// passed, the gate is run again first.
    pub async fn subscribe(
        self,
        resource: PlayableResource,
    ) -> PlaybackResult<Box<dyn Subscription>> {
        let ready = if self.transport.status() == ConnectionStatus::Ready {
            self
        } else {
            debug!("voice connection left Ready before subscribe, waiting again");
            await_ready(self.transport, self.budget).await?
        };

        ready
            .transport
            .subscribe(resource)
            .map_err(|e| PlaybackError::Subscribe(e.to_string()))
    }
}

/// Wait up to `budget` for `transport` to reach Ready.
///
/// An already-ready transport returns immediately without touching
/// `watch_status`.
pub async fn await_ready(
    transport: &dyn VoiceTransport,
    budget: Duration,
) -> PlaybackResult<ReadyTransport<'_>> {
    let started = Instant::now();

    if transport.status() == ConnectionStatus::Ready {
        debug!(wait_duration_ms = 0u64, "voice connection already ready");
        return Ok(ReadyTransport {
            transport,
            budget,
            waited: Duration::ZERO,
        });
    }

    let mut status_rx = transport.watch_status();
    let outcome = tokio::time::timeout(budget, async {
        loop {
            match *status_rx.borrow_and_update() {
                ConnectionStatus::Ready => return Ok(()),
                ConnectionStatus::Destroyed => return Err(WaitFailure::Destroyed),
                _ => {}
            }
            // A dropped sender means the transport itself is gone.
            if status_rx.changed().await.is_err() {
                return Err(WaitFailure::Destroyed);
            }
        }
    })
    .await;

    let waited = started.elapsed();
    let wait_duration_ms = waited.as_millis() as u64;
    match outcome {
        Ok(Ok(())) => {
            info!(wait_duration_ms, "voice connection reached Ready");
            Ok(ReadyTransport {
                transport,
                budget,
                waited,
            })
        }
        Ok(Err(WaitFailure::Destroyed)) => {
            warn!(
                wait_duration_ms,
                budget_ms = budget.as_millis() as u64,
                "voice connection destroyed while waiting for Ready"
            );
            Err(PlaybackError::ConnectionDestroyed { budget })
        }
        Err(_) => {
            warn!(
                wait_duration_ms,
                budget_ms = budget.as_millis() as u64,
                "voice connection did not reach Ready in time"
            );
            Err(PlaybackError::ConnectionTimeout { budget })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::loopback::LoopbackTransport;

    const BUDGET: Duration = Duration::from_secs(5);

    #[tokio::test(start_paused = true)]
    async fn ready_transport_skips_the_wait_primitive() {
        let transport = LoopbackTransport::new(ConnectionStatus::Ready);
        let ready = await_ready(&transport, BUDGET).await.unwrap();
        assert_eq!(ready.waited(), Duration::ZERO);
        assert_eq!(transport.watch_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transition_within_budget_succeeds() {
        let transport = LoopbackTransport::new(ConnectionStatus::Signalling);
        let driver = transport.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            driver.set_status(ConnectionStatus::Connecting);
            tokio::time::sleep(Duration::from_secs(1)).await;
            driver.set_status(ConnectionStatus::Ready);
        });

        assert!(await_ready(&transport, BUDGET).await.is_ok());
        assert_eq!(transport.watch_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn never_ready_times_out() {
        let transport = LoopbackTransport::new(ConnectionStatus::Connecting);
        let err = await_ready(&transport, BUDGET).await.err().unwrap();
        assert!(matches!(err, PlaybackError::ConnectionTimeout { .. }));
        assert!(err.to_string().contains("5000ms"));
    }

    #[tokio::test(start_paused = true)]
    async fn destroyed_mid_wait_is_distinguished() {
        let transport = LoopbackTransport::new(ConnectionStatus::Connecting);
        let driver = transport.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            driver.destroy();
        });

        let err = await_ready(&transport, BUDGET).await.err().unwrap();
        assert!(matches!(err, PlaybackError::ConnectionDestroyed { .. }));
        assert!(err.to_string().contains("destroyed"));
    }

    #[tokio::test(start_paused = true)]
    async fn custom_budget_is_respected() {
        let transport = LoopbackTransport::new(ConnectionStatus::Disconnected);
        let started = Instant::now();
        let err = await_ready(&transport, Duration::from_millis(100))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, PlaybackError::ConnectionTimeout { budget } if budget.as_millis() == 100));
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(started.elapsed() < BUDGET);
    }
}
