use async_trait::async_trait;
use serde::Serialize;

use super::{SourceDescriptor, SourceStream};
use crate::common::PlaybackResult;

/// Handle to whatever produces a session's bytes (normally a subprocess).
///
/// `terminate` must be idempotent and infallible: it only ever runs on
/// cleanup paths.
#[async_trait]
pub trait SourceProcess: Send + Sync {
    fn id(&self) -> Option<u32>;

    fn is_terminated(&self) -> bool;

    /// Kill the producer and wait (bounded) until it is gone.
    async fn terminate(&self);
}

/// Output of a successful `acquire`.
pub struct AcquiredSource {
    pub stream: SourceStream,
    pub process: Box<dyn SourceProcess>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TrackMetadata {
    pub title: String,
    pub duration_secs: Option<f64>,
    pub uploader: Option<String>,
}

#[async_trait]
pub trait AudioSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start producing audio for `descriptor`. Exactly one producer per call.
    async fn acquire(&self, descriptor: &SourceDescriptor) -> PlaybackResult<AcquiredSource>;

    /// Best-effort lookup used for logging only.
    async fn metadata(&self, _descriptor: &SourceDescriptor) -> Option<TrackMetadata> {
        None
    }
}
