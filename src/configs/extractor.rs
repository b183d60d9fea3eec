use serde::{Deserialize, Serialize};

/// How the media-extraction subprocess is launched.
///
/// The source reference is appended after `args`, so the defaults produce
/// `yt-dlp -f bestaudio/best -o - --no-playlist --quiet --no-warnings <url>`.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExtractorConfig {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Arguments for the metadata lookup (title/duration), source appended last.
    #[serde(default = "default_metadata_args")]
    pub metadata_args: Vec<String>,
    #[serde(default = "default_metadata_timeout_ms")]
    pub metadata_timeout_ms: u64,
    /// Reject anything that is not a YouTube URL.
    #[serde(default = "default_youtube_only")]
    pub youtube_only: bool,
    /// Upper bound on captured stderr kept for error messages.
    #[serde(default = "default_max_diagnostic_bytes")]
    pub max_diagnostic_bytes: usize,
    /// Grace period for the process to be reaped after a kill.
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            metadata_args: default_metadata_args(),
            metadata_timeout_ms: default_metadata_timeout_ms(),
            youtube_only: default_youtube_only(),
            max_diagnostic_bytes: default_max_diagnostic_bytes(),
            kill_grace_ms: default_kill_grace_ms(),
        }
    }
}

fn default_program() -> String {
    "yt-dlp".to_string()
}

fn default_args() -> Vec<String> {
    [
        "-f",
        "bestaudio/best",
        "-o",
        "-",
        "--no-playlist",
        "--quiet",
        "--no-warnings",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_metadata_args() -> Vec<String> {
    ["--dump-single-json", "--no-playlist", "--skip-download", "--no-warnings"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_metadata_timeout_ms() -> u64 {
    10_000
}

fn default_youtube_only() -> bool {
    true
}

fn default_max_diagnostic_bytes() -> usize {
    4 * 1024
}

fn default_kill_grace_ms() -> u64 {
    2_000
}
