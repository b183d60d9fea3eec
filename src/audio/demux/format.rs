//! Audio format detection via header byte sniffing.

use serde::Serialize;

use crate::common::types::AudioFormat;

/// How the transport has to treat a probed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StreamKind {
    /// Ogg pages carrying Opus; packets can be forwarded without transcoding.
    OggOpus,
    /// WebM/Matroska blocks carrying Opus.
    WebmOpus,
    /// Anything else; must be transcoded.
    Arbitrary,
}

/// Sniff the container format from the first bytes of arbitrary data.
///
/// Requires at least 4 bytes. Returns `AudioFormat::Unknown` for anything
/// not in the table.
pub fn detect_format(header: &[u8]) -> AudioFormat {
    if header.len() < 4 {
        return AudioFormat::Unknown;
    }

    // EBML magic (WebM / Matroska): 0x1A 45 DF A3
    if header.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return AudioFormat::Webm;
    }

    // ftyp / MP4 / M4A: bytes [4..8] == "ftyp"
    if header.len() >= 8 && &header[4..8] == b"ftyp" {
        return AudioFormat::Mp4;
    }

    if header.starts_with(b"OggS") {
        return AudioFormat::Ogg;
    }

    if header.starts_with(b"fLaC") {
        return AudioFormat::Flac;
    }

    // WAV: "RIFF" + 4 bytes + "WAVE"
    if header.starts_with(b"RIFF") && header.len() >= 12 && &header[8..12] == b"WAVE" {
        return AudioFormat::Wav;
    }

    // MP3: ID3 tag or sync word
    if header.starts_with(b"ID3") {
        return AudioFormat::Mp3;
    }
    if header[0] == 0xFF && (header[1] & 0xE0) == 0xE0 {
        return AudioFormat::Mp3;
    }

    AudioFormat::Unknown
}

/// Decide the stream kind from the bytes seen so far.
///
/// Returns `None` while more data could still change the answer, i.e. the
/// container may carry Opus but no codec marker has been seen yet and
/// `exhausted` is false.
pub fn classify(head: &[u8], exhausted: bool) -> Option<(AudioFormat, StreamKind)> {
    let format = detect_format(head);

    let marker: &[u8] = match format {
        AudioFormat::Ogg => b"OpusHead",
        AudioFormat::Webm => b"A_OPUS",
        other => return Some((other, StreamKind::Arbitrary)),
    };

    if contains(head, marker) {
        let kind = if format == AudioFormat::Ogg {
            StreamKind::OggOpus
        } else {
            StreamKind::WebmOpus
        };
        return Some((format, kind));
    }

    if exhausted {
        Some((format, StreamKind::Arbitrary))
    } else {
        None
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
