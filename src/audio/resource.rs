use bytes::Bytes;

use super::{demux::StreamKind, volume::VolumeControl};
use crate::{
    common::types::AudioFormat,
    source::{Chunk, SourceStream},
};

/// A probed stream ready to be handed to a voice transport.
///
/// The bytes consumed while probing are replayed first, so consumers see the
/// stream from its very first byte.
pub struct PlayableResource {
    format: AudioFormat,
    kind: StreamKind,
    head: Option<Bytes>,
    stream: SourceStream,
    volume: VolumeControl,
}

impl PlayableResource {
    pub(crate) fn new(
        format: AudioFormat,
        kind: StreamKind,
        head: Bytes,
        stream: SourceStream,
        volume: VolumeControl,
    ) -> Self {
        Self {
            format,
            kind,
            head: (!head.is_empty()).then_some(head),
            stream,
            volume,
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Shared handle to this resource's gain.
    pub fn volume(&self) -> VolumeControl {
        self.volume.clone()
    }

    pub async fn next_chunk(&mut self) -> Option<Chunk> {
        if let Some(head) = self.head.take() {
            return Some(Ok(head));
        }
        self.stream.next_chunk().await
    }
}

impl std::fmt::Debug for PlayableResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayableResource")
            .field("format", &self.format)
            .field("kind", &self.kind)
            .field("volume", &self.volume.linear())
            .finish()
    }
}
