use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::debug;

use super::{
    constants::{PROBE_MAX_BYTES, PROBE_MIN_BYTES},
    demux::{StreamKind, classify},
    resource::PlayableResource,
    volume::VolumeControl,
};
use crate::{
    common::{PlaybackError, PlaybackResult, types::AudioFormat},
    source::SourceStream,
};

/// Read the head of `stream`, classify its framing and wrap it.
///
/// The budget is enforced here, independently of whatever produces the
/// stream. On timeout the stream is dropped, which stops its producer.
pub async fn probe(
    stream: SourceStream,
    budget: Duration,
    volume: VolumeControl,
) -> PlaybackResult<PlayableResource> {
    match tokio::time::timeout(budget, read_head(stream)).await {
        Ok(Ok((format, kind, head, stream))) => {
            debug!(
                "probed {:?} ({:?}) from {} header bytes",
                format,
                kind,
                head.len()
            );
            Ok(PlayableResource::new(format, kind, head, stream, volume))
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(PlaybackError::ProbeTimeout { budget }),
    }
}

async fn read_head(
    mut stream: SourceStream,
) -> PlaybackResult<(AudioFormat, StreamKind, Bytes, SourceStream)> {
    let mut head = BytesMut::new();

    loop {
        let exhausted = match stream.next_chunk().await {
            Some(Ok(chunk)) => {
                head.extend_from_slice(&chunk);
                head.len() >= PROBE_MAX_BYTES
            }
            Some(Err(e)) => return Err(e),
            None => true,
        };

        if head.is_empty() && exhausted {
            return Err(PlaybackError::SourceUnavailable {
                code: None,
                diagnostics: "source ended before producing any audio".into(),
            });
        }

        if head.len() < PROBE_MIN_BYTES && !exhausted {
            continue;
        }

        if let Some((format, kind)) = classify(&head, exhausted) {
            return Ok((format, kind, head.freeze(), stream));
        }
    }
}
