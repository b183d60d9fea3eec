use serde::{Deserialize, Serialize};

use crate::common::types::AnyResult;
use crate::configs::*;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
  #[serde(default)]
  pub player: PlayerConfig,
  #[serde(default)]
  pub health: HealthConfig,
  #[serde(default)]
  pub extractor: ExtractorConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
}

impl Config {
  /// Loads `config.toml`, then `config.default.toml`, then built-in defaults,
  /// applies environment overrides and validates the result.
  pub fn load() -> AnyResult<Self> {
    let config_path = if std::path::Path::new("config.toml").exists() {
      Some("config.toml")
    } else if std::path::Path::new("config.default.toml").exists() {
      Some("config.default.toml")
    } else {
      None
    };

    let mut config = match config_path {
      Some(path) => {
        let config_str = std::fs::read_to_string(path)?;
        if config_str.trim().is_empty() {
          return Err(format!("{} is empty", path).into());
        }
        Self::from_toml(&config_str)?
      }
      None => Self::default(),
    };

    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
  }

  pub fn from_toml(raw: &str) -> AnyResult<Self> {
    Ok(toml::from_str(raw)?)
  }

  /// Overrides selected values from the environment. `lookup` is injected so
  /// callers can substitute their own source.
  pub fn apply_env_overrides<F>(&mut self, lookup: F) -> AnyResult<()>
  where
    F: Fn(&str) -> Option<String>,
  {
    if let Some(raw) = lookup("MUSIC_IDLE_TIMEOUT_SECONDS") {
      self.player.idle_timeout_secs = parse_env("MUSIC_IDLE_TIMEOUT_SECONDS", &raw)?;
    }
    if let Some(raw) = lookup("MUSIC_HEALTH_INTERVAL_MS") {
      self.health.interval_ms = parse_env("MUSIC_HEALTH_INTERVAL_MS", &raw)?;
    }
    if let Some(raw) = lookup("MUSIC_HEALTH_FAILURE_THRESHOLD") {
      self.health.failure_threshold = parse_env("MUSIC_HEALTH_FAILURE_THRESHOLD", &raw)?;
    }
    if let Some(path) = lookup("YTDLP_PATH") {
      if !path.trim().is_empty() {
        self.extractor.program = path;
      }
    }
    Ok(())
  }

  pub fn validate(&self) -> AnyResult<()> {
    let idle = self.player.idle_timeout_secs;
    if !(MIN_IDLE_TIMEOUT_SECS..=MAX_IDLE_TIMEOUT_SECS).contains(&idle) {
      return Err(
        format!(
          "player.idle_timeout_secs must be between {} and {} (got {})",
          MIN_IDLE_TIMEOUT_SECS, MAX_IDLE_TIMEOUT_SECS, idle
        )
        .into(),
      );
    }
    if self.player.default_volume > 100 {
      return Err(
        format!(
          "player.default_volume must be at most 100 (got {})",
          self.player.default_volume
        )
        .into(),
      );
    }
    if self.player.probe_timeout_ms == 0 || self.player.ready_timeout_ms == 0 {
      return Err("player.probe_timeout_ms and player.ready_timeout_ms must be non-zero".into());
    }
    if self.health.interval_ms == 0 {
      return Err("health.interval_ms must be non-zero".into());
    }
    if self.health.failure_threshold == 0 {
      return Err("health.failure_threshold must be at least 1".into());
    }
    if self.extractor.program.trim().is_empty() {
      return Err("extractor.program must not be empty".into());
    }
    Ok(())
  }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> AnyResult<T> {
  raw
    .trim()
    .parse::<T>()
    .map_err(|_| format!("{} has an invalid value: {:?}", key, raw).into())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_are_valid() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.player.idle_timeout_secs, 30);
    assert_eq!(config.health.interval_ms, 5_000);
    assert_eq!(config.health.failure_threshold, 3);
    assert_eq!(config.extractor.program, "yt-dlp");
  }

  #[test]
  fn partial_toml_keeps_defaults() {
    let config = Config::from_toml(
      r#"
      [player]
      idle_timeout_secs = 120

      [health]
      failure_threshold = 5
      "#,
    )
    .unwrap();

    assert_eq!(config.player.idle_timeout_secs, 120);
    assert_eq!(config.player.probe_timeout_ms, 15_000);
    assert_eq!(config.health.failure_threshold, 5);
    assert_eq!(config.health.interval_ms, 5_000);
  }

  #[test]
  fn idle_timeout_bounds_are_enforced() {
    let mut config = Config::default();
    config.player.idle_timeout_secs = 4;
    assert!(config.validate().is_err());
    config.player.idle_timeout_secs = 3601;
    assert!(config.validate().is_err());
    config.player.idle_timeout_secs = 5;
    assert!(config.validate().is_ok());
    config.player.idle_timeout_secs = 3600;
    assert!(config.validate().is_ok());
  }

  #[test]
  fn zero_threshold_is_rejected() {
    let mut config = Config::default();
    config.health.failure_threshold = 0;
    assert!(config.validate().is_err());
  }

  #[test]
  fn env_overrides_apply() {
    let mut config = Config::default();
    config
      .apply_env_overrides(|key| match key {
        "MUSIC_IDLE_TIMEOUT_SECONDS" => Some("90".into()),
        "MUSIC_HEALTH_FAILURE_THRESHOLD" => Some(" 4 ".into()),
        "YTDLP_PATH" => Some("/opt/bin/yt-dlp".into()),
        _ => None,
      })
      .unwrap();

    assert_eq!(config.player.idle_timeout_secs, 90);
    assert_eq!(config.health.failure_threshold, 4);
    assert_eq!(config.extractor.program, "/opt/bin/yt-dlp");
  }

  #[test]
  fn malformed_env_value_is_an_error() {
    let mut config = Config::default();
    let result = config.apply_env_overrides(|key| {
      (key == "MUSIC_HEALTH_INTERVAL_MS").then(|| "soon".to_string())
    });
    assert!(result.is_err());
  }
}
