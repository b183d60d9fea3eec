//! In-memory stand-ins for the extractor, shared by the player tests.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::{
    common::{PlaybackError, PlaybackResult, types::AnyError},
    player::Notifier,
    source::{AcquiredSource, AudioSource, SourceDescriptor, SourceProcess, SourceStream, TrackMetadata},
};

/// MP3 (ID3) header, classified as an arbitrary stream.
pub const MP3_HEAD: &[u8] = b"ID3\x04\x00\x00\x00\x00\x00\x00\x00\x00";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeMode {
    /// Sends a header and keeps the stream open until terminated.
    Held,
    /// Sends a header and ends.
    Finite,
    /// Never produces a byte.
    Hang,
    /// Spawning fails.
    SpawnFails,
    /// Exits with an error before any byte.
    Unavailable,
}

pub struct FakeSource {
    mode: Mutex<FakeMode>,
    live: Arc<AtomicUsize>,
    acquired: AtomicUsize,
}

impl FakeSource {
    pub fn new(mode: FakeMode) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(mode),
            live: Arc::new(AtomicUsize::new(0)),
            acquired: AtomicUsize::new(0),
        })
    }

    pub fn set_mode(&self, mode: FakeMode) {
        *self.mode.lock() = mode;
    }

    /// Processes acquired and not yet terminated.
    pub fn live_processes(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioSource for FakeSource {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn acquire(&self, _descriptor: &SourceDescriptor) -> PlaybackResult<AcquiredSource> {
        let mode = *self.mode.lock();
        if mode == FakeMode::SpawnFails {
            return Err(PlaybackError::ProcessSpawn {
                program: "fake".into(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such program"),
            });
        }

        self.acquired.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);

        let (tx, stream) = SourceStream::channel(8);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            match mode {
                FakeMode::Held => {
                    let _ = tx.send_async(Ok(Bytes::from_static(MP3_HEAD))).await;
                    let _ = stop_rx.await;
                }
                FakeMode::Finite => {
                    let _ = tx.send_async(Ok(Bytes::from_static(MP3_HEAD))).await;
                }
                FakeMode::Hang => {
                    let _ = stop_rx.await;
                }
                FakeMode::Unavailable => {
                    let _ = tx
                        .send_async(Err(PlaybackError::SourceUnavailable {
                            code: Some(1),
                            diagnostics: "ERROR: Video unavailable".into(),
                        }))
                        .await;
                }
                FakeMode::SpawnFails => {}
            }
        });

        Ok(AcquiredSource {
            stream,
            process: Box::new(FakeProcess {
                live: self.live.clone(),
                terminated: AtomicBool::new(false),
                stop_tx: Mutex::new(Some(stop_tx)),
            }),
        })
    }

    async fn metadata(&self, _descriptor: &SourceDescriptor) -> Option<TrackMetadata> {
        Some(TrackMetadata {
            title: "Fake track".into(),
            duration_secs: Some(1.0),
            uploader: None,
        })
    }
}

struct FakeProcess {
    live: Arc<AtomicUsize>,
    terminated: AtomicBool,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
}

#[async_trait]
impl SourceProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        None
    }

    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    async fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(stop_tx) = self.stop_tx.lock().take() {
            let _ = stop_tx.send(());
        }
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Notifier that records every message.
pub fn recording_notifier() -> (Notifier, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let notifier: Notifier = Arc::new(move |message: String| {
        sink.lock().push(message);
        async { Ok::<(), AnyError>(()) }.boxed()
    });
    (notifier, seen)
}

pub fn youtube(id: &str) -> SourceDescriptor {
    SourceDescriptor::parse(&format!("https://www.youtube.com/watch?v={}", id), true)
        .expect("valid test url")
}
