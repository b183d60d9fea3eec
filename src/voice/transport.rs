//! Contract for the external real-time voice connection.
//!
//! The engine never creates a transport; it is handed one by whoever joined
//! the channel and only ever calls the operations below.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::audio::PlayableResource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionStatus {
    Signalling,
    Connecting,
    Ready,
    Disconnected,
    Destroyed,
}

impl ConnectionStatus {
    /// Connecting and Signalling count as healthy: they are the normal
    /// states a connection passes through while (re)connecting.
    pub fn is_healthy(self) -> bool {
        matches!(self, Self::Ready | Self::Connecting | Self::Signalling)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackStatus {
    Buffering,
    Playing,
    Paused,
    /// Nothing playing: never started, stopped, or reached the end.
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    StatusChanged {
        old: ConnectionStatus,
        new: ConnectionStatus,
    },
    PlaybackChanged(PlaybackStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

pub type TransportListener = Arc<dyn Fn(TransportEvent) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("voice connection is destroyed")]
    Destroyed,
    #[error("voice connection is not ready ({0:?})")]
    NotReady(ConnectionStatus),
    #[error("{0}")]
    Other(String),
}

/// Live attachment of a resource to a transport.
pub trait Subscription: Send + Sync {
    /// Returns false when there was nothing to pause.
    fn pause(&self) -> bool;

    fn resume(&self) -> bool;

    /// Detach and drop the resource. Idempotent.
    fn unsubscribe(&self);
}

pub trait VoiceTransport: Send + Sync {
    /// Cached current status; never blocks.
    fn status(&self) -> ConnectionStatus;

    /// Underlying wait primitive used by the readiness gate.
    fn watch_status(&self) -> watch::Receiver<ConnectionStatus>;

    fn subscribe(&self, resource: PlayableResource)
    -> Result<Box<dyn Subscription>, TransportError>;

    /// Best-effort rejoin of the same channel.
    fn reconnect(&self) -> Result<(), TransportError>;

    /// Leave the channel for good.
    fn destroy(&self);

    fn add_listener(&self, listener: TransportListener) -> ListenerId;

    /// Removes exactly the listener registered under `id`.
    fn remove_listener(&self, id: ListenerId) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_states() {
        assert!(ConnectionStatus::Ready.is_healthy());
        assert!(ConnectionStatus::Connecting.is_healthy());
        assert!(ConnectionStatus::Signalling.is_healthy());
        assert!(!ConnectionStatus::Disconnected.is_healthy());
        assert!(!ConnectionStatus::Destroyed.is_healthy());
    }
}
