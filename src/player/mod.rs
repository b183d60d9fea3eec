pub mod engine;
pub mod health;
pub mod idle;
pub mod session;

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::warn;

use crate::common::types::AnyResult;

pub use engine::{AudioEngine, EngineStats, EngineStatsSnapshot};
pub use health::{HealthMonitor, HealthState};
pub use idle::{IdleStatus, IdleTimer};
pub use session::{PlaybackSession, SessionSnapshot, StopReason};

/// Sends a text message to wherever the channel's users will read it.
pub type Notifier = Arc<dyn Fn(String) -> BoxFuture<'static, AnyResult<()>> + Send + Sync>;

/// Run a notifier to completion on its own task. A failing or panicking
/// notifier is logged and otherwise ignored.
pub(crate) async fn deliver(label: &str, notifier: &Notifier, message: String) {
    match tokio::spawn(notifier(message)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("[{}] notification failed: {}", label, e),
        Err(e) => warn!("[{}] notification task failed: {}", label, e),
    }
}
