use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use serde::Serialize;
use tracing::{Instrument, error, info, info_span};

use super::{
    Notifier,
    session::{PlaybackSession, SessionSnapshot, StopReason},
};
use crate::{
    common::{PlaybackError, PlaybackResult, types::ChannelKey},
    configs::Config,
    source::{AudioSource, Extractor, SourceDescriptor},
    voice::VoiceTransport,
};

#[derive(Debug, Default)]
pub struct EngineStats {
    plays_started: AtomicU64,
    play_failures: AtomicU64,
    idle_disconnects: AtomicU64,
    health_notices: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatsSnapshot {
    pub plays_started: u64,
    pub play_failures: u64,
    pub idle_disconnects: u64,
    pub health_notices: u64,
}

impl EngineStats {
    pub(crate) fn record_idle_disconnect(&self) {
        self.idle_disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_health_notice(&self) {
        self.health_notices.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            plays_started: self.plays_started.load(Ordering::Relaxed),
            play_failures: self.play_failures.load(Ordering::Relaxed),
            idle_disconnects: self.idle_disconnects.load(Ordering::Relaxed),
            health_notices: self.health_notices.load(Ordering::Relaxed),
        }
    }
}

/// Registry of playback sessions, one per voice channel.
pub struct AudioEngine {
    config: Arc<Config>,
    source: Arc<dyn AudioSource>,
    sessions: DashMap<ChannelKey, Arc<PlaybackSession>>,
    stats: Arc<EngineStats>,
}

impl AudioEngine {
    pub fn new(config: Arc<Config>, source: Arc<dyn AudioSource>) -> Self {
        Self {
            config,
            source,
            sessions: DashMap::new(),
            stats: Arc::new(EngineStats::default()),
        }
    }

    /// Engine backed by the configured extractor subprocess.
    pub fn with_extractor(config: Arc<Config>) -> Self {
        let extractor = Extractor::new(config.extractor.clone());
        Self::new(config, Arc::new(extractor))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Open a session for `key` on an already joined `transport`. An existing
    /// session for the same channel is destroyed first.
    pub async fn connect(
        &self,
        key: ChannelKey,
        transport: Arc<dyn VoiceTransport>,
        notifier: Notifier,
    ) -> PlaybackResult<Arc<PlaybackSession>> {
        let session = PlaybackSession::new(
            key.clone(),
            transport,
            self.source.clone(),
            self.config.clone(),
            self.stats.clone(),
        );
        session.initialize_resilience(notifier)?;

        if let Some(previous) = self.sessions.insert(key.clone(), session.clone()) {
            previous.destroy().await;
        }
        info!("[{}] session opened", key);
        Ok(session)
    }

    /// Live session for `key`. Sessions closed by idle expiry are pruned.
    pub fn session(&self, key: &ChannelKey) -> Option<Arc<PlaybackSession>> {
        let session = self.sessions.get(key).map(|s| s.value().clone())?;
        if session.is_closed() {
            self.sessions
                .remove_if(key, |_, s| Arc::ptr_eq(s, &session));
            return None;
        }
        Some(session)
    }

    fn require(&self, key: &ChannelKey) -> PlaybackResult<Arc<PlaybackSession>> {
        self.session(key)
            .ok_or_else(|| PlaybackError::SessionClosed(key.to_string()))
    }

    async fn try_play(&self, key: &ChannelKey, input: &str) -> PlaybackResult<()> {
        let descriptor = SourceDescriptor::parse(input, self.config.extractor.youtube_only)?;
        self.require(key)?.play(descriptor).await
    }

    /// Validate `input` and play it in the channel's session.
    pub async fn play(&self, key: &ChannelKey, input: &str) -> PlaybackResult<()> {
        let result = self
            .try_play(key, input)
            .instrument(info_span!("play", channel = %key))
            .await;
        match &result {
            Ok(()) => {
                self.stats.plays_started.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats.play_failures.fetch_add(1, Ordering::Relaxed);
                error!("[{}] failed to play {}: {}", key, input, e);
            }
        }
        result
    }

    pub async fn stop(&self, key: &ChannelKey) -> bool {
        match self.session(key) {
            Some(session) => session.stop(StopReason::Stopped).await,
            None => false,
        }
    }

    pub async fn pause(&self, key: &ChannelKey) -> bool {
        match self.session(key) {
            Some(session) => session.pause().await,
            None => false,
        }
    }

    pub async fn resume(&self, key: &ChannelKey) -> bool {
        match self.session(key) {
            Some(session) => session.resume().await,
            None => false,
        }
    }

    /// Returns the clamped volume, or `None` when the channel has no session.
    pub async fn set_volume(&self, key: &ChannelKey, percent: i32) -> Option<u8> {
        match self.session(key) {
            Some(session) => Some(session.set_volume(percent).await),
            None => None,
        }
    }

    /// Tear down the channel's session and leave the channel.
    pub async fn disconnect(&self, key: &ChannelKey) -> bool {
        let Some((_, session)) = self.sessions.remove(key) else {
            return false;
        };
        session.destroy().await;
        session.transport().destroy();
        info!("[{}] disconnected", key);
        true
    }

    /// Destroy every session. Transports are left to their owners.
    pub async fn shutdown(&self) {
        let keys: Vec<ChannelKey> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, session)) = self.sessions.remove(&key) {
                session.destroy().await;
            }
        }
        info!("audio engine shut down");
    }

    pub fn session_count(&self) -> usize {
        self.sessions.iter().filter(|s| !s.is_closed()).count()
    }

    pub async fn snapshots(&self) -> Vec<SessionSnapshot> {
        let sessions: Vec<Arc<PlaybackSession>> = self
            .sessions
            .iter()
            .filter(|s| !s.is_closed())
            .map(|s| s.value().clone())
            .collect();
        let mut snapshots = Vec::with_capacity(sessions.len());
        for session in sessions {
            snapshots.push(session.snapshot().await);
        }
        snapshots
    }

    pub fn stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot()
    }
}
