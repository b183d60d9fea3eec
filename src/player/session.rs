use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::FutureExt;
use serde::Serialize;
use tokio::{sync::Mutex, task::JoinHandle, time::Instant};
use tracing::{debug, info, warn};

use super::{
    Notifier, deliver,
    engine::EngineStats,
    health::{HealthMonitor, HealthState},
    idle::{IdleStatus, IdleTimer},
};
use crate::{
    audio::{VolumeControl, clamp_percent, probe},
    common::{
        PlaybackError, PlaybackResult,
        types::{AnyError, ChannelKey},
    },
    configs::Config,
    source::{AcquiredSource, AudioSource, SourceDescriptor, SourceProcess},
    voice::{
        ConnectionStatus, ListenerId, PlaybackStatus, Subscription, TransportEvent,
        TransportListener, VoiceTransport, await_ready,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    Stopped,
    Completed,
    Error,
    Idle,
}

/// Serializable view of a session, for status commands and logs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub key: ChannelKey,
    pub volume: u8,
    pub playing: bool,
    pub paused: bool,
    pub source: Option<String>,
    pub elapsed_ms: Option<u64>,
    pub idle: Option<IdleStatus>,
    pub health: Option<HealthState>,
}

struct ActivePlayback {
    generation: u64,
    descriptor: SourceDescriptor,
    process: Box<dyn SourceProcess>,
    subscription: Box<dyn Subscription>,
    volume: VolumeControl,
    started_at: Instant,
    paused: bool,
    metadata_task: JoinHandle<()>,
}

#[derive(Default)]
struct Resilience {
    idle: Option<Arc<IdleTimer>>,
    health: Option<Arc<HealthMonitor>>,
    listener: Option<ListenerId>,
}

/// Playback state for one voice channel.
///
/// Owns at most one extractor process and one subscribed resource at a time,
/// plus the idle timer and health monitor once resilience is initialized.
/// The transport is only referenced; the session leaves the channel on idle
/// expiry and never otherwise.
pub struct PlaybackSession {
    key: ChannelKey,
    label: String,
    transport: Arc<dyn VoiceTransport>,
    source: Arc<dyn AudioSource>,
    config: Arc<Config>,
    stats: Arc<EngineStats>,
    volume: AtomicU8,
    playback: Mutex<Option<ActivePlayback>>,
    resilience: parking_lot::Mutex<Resilience>,
    /// Generation of the subscribed playback, 0 when none.
    active_generation: AtomicU64,
    next_generation: AtomicU64,
    closed: AtomicBool,
}

impl PlaybackSession {
    pub fn new(
        key: ChannelKey,
        transport: Arc<dyn VoiceTransport>,
        source: Arc<dyn AudioSource>,
        config: Arc<Config>,
        stats: Arc<EngineStats>,
    ) -> Arc<Self> {
        let volume = clamp_percent(i32::from(config.player.default_volume));
        Arc::new(Self {
            label: key.to_string(),
            key,
            transport,
            source,
            config,
            stats,
            volume: AtomicU8::new(volume),
            playback: Mutex::new(None),
            resilience: parking_lot::Mutex::new(Resilience::default()),
            active_generation: AtomicU64::new(0),
            next_generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    pub fn transport(&self) -> &Arc<dyn VoiceTransport> {
        &self.transport
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn volume(&self) -> u8 {
        self.volume.load(Ordering::Relaxed)
    }

    fn ensure_open(&self) -> PlaybackResult<()> {
        if self.is_closed() {
            return Err(PlaybackError::SessionClosed(self.label.clone()));
        }
        Ok(())
    }

    /// Start playing `descriptor`, replacing whatever is playing.
    ///
    /// The idle countdown is held for the whole start sequence. Any failure
    /// leaves the session with nothing playing, no process running and the
    /// countdown armed again.
    pub async fn play(&self, descriptor: SourceDescriptor) -> PlaybackResult<()> {
        self.ensure_open()?;
        let mut slot = self.playback.lock().await;
        self.ensure_open()?;

        // -- 1. Tear down the current playback ------------------------------
        if let Some(previous) = slot.take() {
            self.teardown(previous, StopReason::Stopped).await;
        }

        // The teardown above reports Idle, which arms the countdown.
        let idle = self.idle_timer();
        if let Some(idle) = &idle {
            idle.disarm();
        }

        match self.start(descriptor).await {
            Ok(playback) if self.is_closed() => {
                // An expiry that fired before we took the slot won the race.
                self.teardown(playback, StopReason::Stopped).await;
                Err(PlaybackError::SessionClosed(self.label.clone()))
            }
            Ok(playback) => {
                *slot = Some(playback);
                Ok(())
            }
            Err(e) => {
                if let Some(idle) = &idle {
                    idle.arm();
                }
                Err(e)
            }
        }
    }

    async fn start(&self, descriptor: SourceDescriptor) -> PlaybackResult<ActivePlayback> {
        // -- 2. Wait for the voice connection --------------------------------
        let ready_budget = Duration::from_millis(self.config.player.ready_timeout_ms);
        let ready = await_ready(self.transport.as_ref(), ready_budget).await?;
        debug!(
            "[{}] voice connection ready after {}ms",
            self.label,
            ready.waited().as_millis()
        );

        // -- 3. Start the extractor ------------------------------------------
        let AcquiredSource { stream, process } = self.source.acquire(&descriptor).await?;
        debug!(
            "[{}] {} started for {} (pid {:?})",
            self.label,
            self.source.name(),
            descriptor,
            process.id()
        );

        // -- 4. Probe the stream ---------------------------------------------
        let volume = VolumeControl::from_percent(self.volume());
        let probe_budget = Duration::from_millis(self.config.player.probe_timeout_ms);
        let resource = match probe(stream, probe_budget, volume.clone()).await {
            Ok(resource) => resource,
            Err(e) => {
                process.terminate().await;
                return Err(e);
            }
        };

        // -- 5. Subscribe ----------------------------------------------------
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.active_generation.store(generation, Ordering::Release);
        let subscription = match ready.subscribe(resource).await {
            Ok(subscription) => subscription,
            Err(e) => {
                self.active_generation.store(0, Ordering::Release);
                process.terminate().await;
                return Err(e);
            }
        };

        info!(
            "[{}] playing {} at {}% volume",
            self.label,
            descriptor,
            volume.percent()
        );

        Ok(ActivePlayback {
            generation,
            metadata_task: self.spawn_metadata_lookup(&descriptor),
            descriptor,
            process,
            subscription,
            volume,
            started_at: Instant::now(),
            paused: false,
        })
    }

    fn spawn_metadata_lookup(&self, descriptor: &SourceDescriptor) -> JoinHandle<()> {
        let source = self.source.clone();
        let descriptor = descriptor.clone();
        let label = self.label.clone();
        tokio::spawn(async move {
            match source.metadata(&descriptor).await {
                Some(meta) => info!(
                    "[{}] now playing \"{}\" ({:?}s)",
                    label, meta.title, meta.duration_secs
                ),
                None => debug!("[{}] no metadata for {}", label, descriptor),
            }
        })
    }

    async fn teardown(&self, playback: ActivePlayback, reason: StopReason) {
        self.active_generation.store(0, Ordering::Release);
        playback.metadata_task.abort();
        playback.subscription.unsubscribe();
        playback.process.terminate().await;
        info!(
            "[{}] playback of {} ended ({:?}) after {}s",
            self.label,
            playback.descriptor,
            reason,
            playback.started_at.elapsed().as_secs()
        );
    }

    /// Stop playback and kill the extractor. Returns false when nothing was
    /// playing.
    pub async fn stop(&self, reason: StopReason) -> bool {
        let mut slot = self.playback.lock().await;
        match slot.take() {
            Some(playback) => {
                self.teardown(playback, reason).await;
                true
            }
            None => {
                debug!("[{}] stop ({:?}): nothing playing", self.label, reason);
                false
            }
        }
    }

    /// Clean up after the transport drained playback `generation`.
    async fn complete(&self, generation: u64) {
        let mut slot = self.playback.lock().await;
        if slot.as_ref().is_some_and(|p| p.generation == generation) {
            if let Some(playback) = slot.take() {
                self.teardown(playback, StopReason::Completed).await;
            }
        }
    }

    pub async fn pause(&self) -> bool {
        let mut slot = self.playback.lock().await;
        let Some(playback) = slot.as_mut() else {
            return false;
        };
        if playback.paused || !playback.subscription.pause() {
            return false;
        }
        playback.paused = true;
        info!("[{}] paused", self.label);
        true
    }

    pub async fn resume(&self) -> bool {
        let mut slot = self.playback.lock().await;
        let Some(playback) = slot.as_mut() else {
            return false;
        };
        if !playback.paused || !playback.subscription.resume() {
            return false;
        }
        playback.paused = false;
        info!("[{}] resumed", self.label);
        true
    }

    /// Clamp `percent` to 0..=100, remember it for later plays and apply it
    /// to the current resource if there is one.
    pub async fn set_volume(&self, percent: i32) -> u8 {
        let volume = clamp_percent(percent);
        let old = self.volume.swap(volume, Ordering::Relaxed);
        info!("[{}] volume {}% -> {}%", self.label, old, volume);

        let slot = self.playback.lock().await;
        match slot.as_ref() {
            Some(playback) => playback.volume.set_percent(volume),
            None => debug!("[{}] no active resource, volume stored", self.label),
        }
        volume
    }

    fn idle_timer(&self) -> Option<Arc<IdleTimer>> {
        self.resilience.lock().idle.clone()
    }

    pub fn idle_status(&self) -> Option<IdleStatus> {
        self.resilience.lock().idle.as_ref().map(|idle| idle.status())
    }

    pub fn health_state(&self) -> Option<HealthState> {
        self.resilience.lock().health.as_ref().map(|h| h.state())
    }

    pub fn health_monitor(&self) -> Option<Arc<HealthMonitor>> {
        self.resilience.lock().health.clone()
    }

    /// Create the idle timer and health monitor and hook them to transport
    /// events. Calling it again replaces both and the listener.
    pub fn initialize_resilience(self: &Arc<Self>, notifier: Notifier) -> PlaybackResult<()> {
        self.ensure_open()?;
        let mut resilience = self.resilience.lock();
        self.release_resilience(&mut resilience);

        let weak = Arc::downgrade(self);
        let idle_notifier = notifier.clone();
        let on_expire: Notifier = Arc::new(move |reason: String| {
            let weak = weak.clone();
            let notifier = idle_notifier.clone();
            async move {
                if let Some(session) = weak.upgrade() {
                    session.expire(reason, &notifier).await;
                }
                Ok::<(), AnyError>(())
            }
            .boxed()
        });
        let idle = Arc::new(IdleTimer::new(
            self.label.clone(),
            Duration::from_secs(self.config.player.idle_timeout_secs),
            on_expire,
        ));

        let stats = self.stats.clone();
        let health_notifier: Notifier = Arc::new(move |message: String| {
            stats.record_health_notice();
            notifier(message)
        });
        let health = Arc::new(HealthMonitor::start(
            self.label.clone(),
            &self.transport,
            &self.config.health,
            health_notifier,
        ));

        let listener = self
            .transport
            .add_listener(self.listener(Arc::downgrade(&idle), Arc::downgrade(&health)));

        info!(
            "[{}] idle timeout {}s, health check every {}ms",
            self.label, self.config.player.idle_timeout_secs, self.config.health.interval_ms
        );
        *resilience = Resilience {
            idle: Some(idle),
            health: Some(health),
            listener: Some(listener),
        };
        Ok(())
    }

    fn listener(
        self: &Arc<Self>,
        idle: Weak<IdleTimer>,
        health: Weak<HealthMonitor>,
    ) -> TransportListener {
        let session = Arc::downgrade(self);
        Arc::new(move |event: TransportEvent| match event {
            TransportEvent::PlaybackChanged(PlaybackStatus::Playing) => {
                if let Some(idle) = idle.upgrade() {
                    idle.disarm();
                }
            }
            TransportEvent::PlaybackChanged(PlaybackStatus::Idle) => {
                if let Some(idle) = idle.upgrade() {
                    idle.arm();
                }
                let Some(session) = session.upgrade() else {
                    return;
                };
                let generation = session.active_generation.load(Ordering::Acquire);
                if generation != 0 {
                    tokio::spawn(async move { session.complete(generation).await });
                }
            }
            TransportEvent::StatusChanged {
                new: ConnectionStatus::Destroyed,
                ..
            } => {
                if let Some(health) = health.upgrade() {
                    health.destroy();
                }
            }
            _ => {}
        })
    }

    fn release_resilience(&self, resilience: &mut Resilience) {
        if let Some(id) = resilience.listener.take() {
            if !self.transport.remove_listener(id) {
                debug!("[{}] listener {:?} was already gone", self.label, id);
            }
        }
        if let Some(idle) = resilience.idle.take() {
            idle.destroy();
        }
        if let Some(health) = resilience.health.take() {
            health.destroy();
        }
    }

    async fn expire(&self, reason: String, notifier: &Notifier) {
        self.stats.record_idle_disconnect();
        self.destroy().await;
        self.transport.destroy();
        info!("[{}] left voice channel: {}", self.label, reason);
        deliver(&self.label, notifier, format!("🔇 {}", reason)).await;
    }

    /// Stop playback, drop the timers and remove our transport listener.
    /// Idempotent. The transport itself is left alone.
    pub async fn destroy(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop(StopReason::Stopped).await;
        {
            let mut resilience = self.resilience.lock();
            self.release_resilience(&mut resilience);
        }
        debug!("[{}] session destroyed", self.label);
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let slot = self.playback.lock().await;
        SessionSnapshot {
            key: self.key.clone(),
            volume: self.volume(),
            playing: slot.as_ref().is_some_and(|p| !p.paused),
            paused: slot.as_ref().is_some_and(|p| p.paused),
            source: slot.as_ref().map(|p| p.descriptor.to_string()),
            elapsed_ms: slot
                .as_ref()
                .map(|p| p.started_at.elapsed().as_millis() as u64),
            idle: self.idle_status(),
            health: self.health_state(),
        }
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        if !self.is_closed() {
            warn!("[{}] session dropped without destroy", self.label);
        }
        let mut resilience = std::mem::take(self.resilience.get_mut());
        self.release_resilience(&mut resilience);
    }
}
