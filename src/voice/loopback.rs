//! In-process transport that drains resources instead of sending them.
//!
//! Used by the dry-run binary and as the transport double in tests. It
//! keeps a few counters (listeners, wait calls, reconnects) so callers can
//! check what the engine did to it.

use std::sync::{
    Arc, Weak,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, warn};

use super::transport::{
    ConnectionStatus, ListenerId, PlaybackStatus, Subscription, TransportError, TransportEvent,
    TransportListener, VoiceTransport,
};
use crate::audio::PlayableResource;

struct LoopbackInner {
    status_tx: watch::Sender<ConnectionStatus>,
    listeners: DashMap<ListenerId, TransportListener>,
    next_listener: AtomicU64,
    watch_calls: AtomicU64,
    reconnects: AtomicU64,
    fail_reconnect: AtomicBool,
    bytes_drained: AtomicU64,
    active: Mutex<Option<Arc<LoopbackSubscription>>>,
}

impl LoopbackInner {
    fn emit(&self, event: TransportEvent) {
        // Snapshot first so listeners may add/remove listeners themselves.
        let listeners: Vec<TransportListener> =
            self.listeners.iter().map(|l| l.value().clone()).collect();
        for listener in listeners {
            listener(event);
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        let old = self.status_tx.send_replace(status);
        if old != status {
            debug!("loopback status {:?} -> {:?}", old, status);
            self.emit(TransportEvent::StatusChanged { old, new: status });
        }
    }
}

#[derive(Clone)]
pub struct LoopbackTransport {
    inner: Arc<LoopbackInner>,
}

impl LoopbackTransport {
    pub fn new(status: ConnectionStatus) -> Self {
        let (status_tx, _) = watch::channel(status);
        Self {
            inner: Arc::new(LoopbackInner {
                status_tx,
                listeners: DashMap::new(),
                next_listener: AtomicU64::new(1),
                watch_calls: AtomicU64::new(0),
                reconnects: AtomicU64::new(0),
                fail_reconnect: AtomicBool::new(false),
                bytes_drained: AtomicU64::new(0),
                active: Mutex::new(None),
            }),
        }
    }

    /// Drive the connection state, as the real gateway would.
    pub fn set_status(&self, status: ConnectionStatus) {
        self.inner.set_status(status);
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    pub fn watch_calls(&self) -> u64 {
        self.inner.watch_calls.load(Ordering::Relaxed)
    }

    pub fn reconnect_attempts(&self) -> u64 {
        self.inner.reconnects.load(Ordering::Relaxed)
    }

    pub fn bytes_drained(&self) -> u64 {
        self.inner.bytes_drained.load(Ordering::Relaxed)
    }

    pub fn has_subscription(&self) -> bool {
        self.inner
            .active
            .lock()
            .as_ref()
            .is_some_and(|s| !s.detached.load(Ordering::Acquire))
    }

    /// Make every following `reconnect()` fail.
    pub fn fail_reconnects(&self, fail: bool) {
        self.inner.fail_reconnect.store(fail, Ordering::Relaxed);
    }
}

impl VoiceTransport for LoopbackTransport {
    fn status(&self) -> ConnectionStatus {
        *self.inner.status_tx.borrow()
    }

    fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.watch_calls.fetch_add(1, Ordering::Relaxed);
        self.inner.status_tx.subscribe()
    }

    fn subscribe(
        &self,
        resource: PlayableResource,
    ) -> Result<Box<dyn Subscription>, TransportError> {
        match self.status() {
            ConnectionStatus::Ready => {}
            ConnectionStatus::Destroyed => return Err(TransportError::Destroyed),
            other => return Err(TransportError::NotReady(other)),
        }

        let previous = self.inner.active.lock().take();
        if let Some(previous) = previous {
            previous.unsubscribe();
        }

        let subscription = LoopbackSubscription::start(self.inner.clone(), resource);
        *self.inner.active.lock() = Some(subscription.clone());
        Ok(Box::new(SubscriptionRef(subscription)))
    }

    fn reconnect(&self) -> Result<(), TransportError> {
        self.inner.reconnects.fetch_add(1, Ordering::Relaxed);
        if self.inner.fail_reconnect.load(Ordering::Relaxed) {
            return Err(TransportError::Other("rejoin rejected".into()));
        }
        if self.status() == ConnectionStatus::Destroyed {
            return Err(TransportError::Destroyed);
        }
        self.inner.set_status(ConnectionStatus::Signalling);
        Ok(())
    }

    fn destroy(&self) {
        let active = self.inner.active.lock().take();
        if let Some(active) = active {
            active.unsubscribe();
        }
        self.inner.set_status(ConnectionStatus::Destroyed);
    }

    fn add_listener(&self, listener: TransportListener) -> ListenerId {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.insert(id, listener);
        id
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(&id).is_some()
    }
}

struct LoopbackSubscription {
    transport: Weak<LoopbackInner>,
    paused_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    /// Set once the drain finished or the subscription was dropped.
    detached: AtomicBool,
}

impl LoopbackSubscription {
    fn start(transport: Arc<LoopbackInner>, mut resource: PlayableResource) -> Arc<Self> {
        let (paused_tx, mut paused_rx) = watch::channel(false);
        let subscription = Arc::new(Self {
            transport: Arc::downgrade(&transport),
            paused_tx,
            task: Mutex::new(None),
            detached: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&subscription);
        transport.emit(TransportEvent::PlaybackChanged(PlaybackStatus::Playing));
        let task = tokio::spawn(async move {
            loop {
                if paused_rx.wait_for(|paused| !paused).await.is_err() {
                    return;
                }
                match resource.next_chunk().await {
                    Some(Ok(chunk)) => {
                        transport
                            .bytes_drained
                            .fetch_add(chunk.len() as u64, Ordering::Relaxed);
                    }
                    Some(Err(e)) => {
                        warn!("loopback playback error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
            if let Some(subscription) = weak.upgrade() {
                subscription.finish();
            }
        });
        *subscription.task.lock() = Some(task);
        subscription
    }

    fn emit(&self, status: PlaybackStatus) {
        if let Some(transport) = self.transport.upgrade() {
            transport.emit(TransportEvent::PlaybackChanged(status));
        }
    }

    fn finish(&self) {
        if !self.detached.swap(true, Ordering::AcqRel) {
            self.emit(PlaybackStatus::Idle);
        }
    }

    fn pause(&self) -> bool {
        if self.detached.load(Ordering::Acquire) || *self.paused_tx.borrow() {
            return false;
        }
        self.paused_tx.send_replace(true);
        self.emit(PlaybackStatus::Paused);
        true
    }

    fn resume(&self) -> bool {
        if self.detached.load(Ordering::Acquire) || !*self.paused_tx.borrow() {
            return false;
        }
        self.paused_tx.send_replace(false);
        self.emit(PlaybackStatus::Playing);
        true
    }

    fn unsubscribe(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.finish();
    }
}

/// The boxed handle given to callers; the transport keeps its own `Arc`.
struct SubscriptionRef(Arc<LoopbackSubscription>);

impl Subscription for SubscriptionRef {
    fn pause(&self) -> bool {
        self.0.pause()
    }

    fn resume(&self) -> bool {
        self.0.resume()
    }

    fn unsubscribe(&self) {
        self.0.unsubscribe();
    }
}
