use std::time::Duration;

/// Every failure the playback engine surfaces to its callers.
///
/// Cleanup and notification paths never produce these; they log and move on.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    /// The extraction subprocess could not be started at all.
    #[error("failed to start extractor `{program}`: {source}")]
    ProcessSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The extractor exited unsuccessfully before delivering any audio.
    #[error("source unavailable (exit code {code:?}): {diagnostics}")]
    SourceUnavailable {
        code: Option<i32>,
        diagnostics: String,
    },

    /// Stream framing was not detected within the probe budget.
    #[error("stream probe timed out after {}ms - extractor may not be responding", .budget.as_millis())]
    ProbeTimeout { budget: Duration },

    /// The transport never reached Ready within the readiness budget.
    #[error("voice connection did not become ready within {}ms", .budget.as_millis())]
    ConnectionTimeout { budget: Duration },

    /// The transport was destroyed while waiting for it to become ready.
    #[error("voice connection was destroyed while waiting for ready (budget {}ms)", .budget.as_millis())]
    ConnectionDestroyed { budget: Duration },

    /// The descriptor was rejected before anything was spawned.
    #[error("invalid source: {0}")]
    InvalidSource(String),

    /// The transport refused the resource.
    #[error("failed to subscribe resource to voice connection: {0}")]
    Subscribe(String),

    /// The session was destroyed and no longer accepts playback.
    #[error("playback session {0} is closed")]
    SessionClosed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PlaybackError {
    /// Short text suitable for a chat reply.
    pub fn user_message(&self) -> String {
        match self {
            Self::ProcessSpawn { .. } => {
                "Audio extraction is unavailable right now. Please try again later.".to_string()
            }
            Self::SourceUnavailable { .. } => {
                "Failed to fetch audio. The video may be unavailable, age-restricted, or private."
                    .to_string()
            }
            Self::ProbeTimeout { .. } => {
                "The audio source took too long to respond. Please try again.".to_string()
            }
            Self::ConnectionTimeout { .. } => {
                "Could not connect to the voice channel in time. Please try again.".to_string()
            }
            Self::ConnectionDestroyed { .. } => {
                "The voice connection was closed. Please re-join and try again.".to_string()
            }
            Self::InvalidSource(_) => "Please provide a valid YouTube URL.".to_string(),
            Self::Subscribe(_) | Self::SessionClosed(_) | Self::Io(_) => {
                "Playback failed. Please try again.".to_string()
            }
        }
    }
}

pub type PlaybackResult<T> = std::result::Result<T, PlaybackError>;
