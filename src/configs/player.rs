use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PlayerConfig {
    /// Seconds of inactivity before the bot leaves the channel.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Budget for detecting stream framing.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Budget for the voice connection to become ready before subscribing.
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
    /// Volume (0-100) a fresh session starts with.
    #[serde(default = "default_volume")]
    pub default_volume: u8,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            probe_timeout_ms: default_probe_timeout_ms(),
            ready_timeout_ms: default_ready_timeout_ms(),
            default_volume: default_volume(),
        }
    }
}

pub const MIN_IDLE_TIMEOUT_SECS: u64 = 5;
pub const MAX_IDLE_TIMEOUT_SECS: u64 = 3600;

fn default_idle_timeout_secs() -> u64 {
    30
}

fn default_probe_timeout_ms() -> u64 {
    15_000
}

fn default_ready_timeout_ms() -> u64 {
    5_000
}

fn default_volume() -> u8 {
    10
}
