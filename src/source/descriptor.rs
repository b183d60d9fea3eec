use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::common::{PlaybackError, PlaybackResult};

static YOUTUBE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^((?:https?:)?//)?((?:www|m|music)\.)?(youtube(-nocookie)?\.com|youtu\.be)(/(?:[\w-]+\?v=|embed/|v/|shorts/|live/)?)([\w-]+)(\S+)?$",
    )
    .expect("YouTube URL pattern is valid")
});

/// Opaque reference to what a session is playing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceDescriptor(String);

impl SourceDescriptor {
    /// Validates user input. With `youtube_only` anything but a YouTube URL is
    /// rejected, otherwise any http(s) URL is accepted.
    pub fn parse(input: &str, youtube_only: bool) -> PlaybackResult<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(PlaybackError::InvalidSource("empty source".into()));
        }

        if YOUTUBE_URL.is_match(input) {
            return Ok(Self(input.to_string()));
        }

        if youtube_only {
            return Err(PlaybackError::InvalidSource(format!(
                "not a YouTube URL: {input}"
            )));
        }

        let is_http = input.starts_with("https://") || input.starts_with("http://");
        if !is_http || input.chars().any(char::is_whitespace) {
            return Err(PlaybackError::InvalidSource(format!(
                "not an http(s) URL: {input}"
            )));
        }
        Ok(Self(input.to_string()))
    }

    pub fn is_youtube(&self) -> bool {
        YOUTUBE_URL.is_match(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_common_youtube_forms() {
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ",
            "youtube.com/watch?v=dQw4w9WgXcQ&t=42",
            "https://m.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://music.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://www.youtube-nocookie.com/embed/dQw4w9WgXcQ",
            "https://www.youtube.com/shorts/abc123",
        ] {
            let parsed = SourceDescriptor::parse(url, true);
            assert!(parsed.is_ok(), "rejected {url}");
            assert!(parsed.unwrap().is_youtube());
        }
    }

    #[test]
    fn rejects_non_youtube_when_restricted() {
        let err = SourceDescriptor::parse("https://example.com/song.mp3", true).unwrap_err();
        assert!(matches!(err, PlaybackError::InvalidSource(_)));
    }

    #[test]
    fn accepts_plain_http_when_unrestricted() {
        let d = SourceDescriptor::parse("https://example.com/song.mp3", false).unwrap();
        assert!(!d.is_youtube());
        assert_eq!(d.as_str(), "https://example.com/song.mp3");
    }

    #[test]
    fn rejects_garbage() {
        assert!(SourceDescriptor::parse("   ", false).is_err());
        assert!(SourceDescriptor::parse("ftp://example.com/a", false).is_err());
        assert!(SourceDescriptor::parse("not a url", false).is_err());
    }
}
