//! Application configuration: a flat TOML file with CLI/env overrides.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use castvox_engine::ControllerConfig;
use castvox_foundation::AppError;
use castvox_pipeline::TranscoderConfig;
use castvox_transport::SupervisorConfig;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub feed: FeedConfig,
    pub playback: PlaybackConfig,
    pub audio: AudioConfig,
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// RSS feed URL. Required; there is no sensible default.
    pub url: String,
    pub refresh_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            refresh_secs: 900,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub watchdog_secs: u64,
    pub retry_backoff_ms: u64,
    pub staleness_secs: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            watchdog_secs: 30,
            retry_backoff_ms: 5_000,
            staleness_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub ffmpeg_path: String,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".into(),
            sample_rate: 48_000,
            channels: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub connect_attempts: u32,
    pub connect_retry_delay_secs: u64,
    pub resume_grace_secs: u64,
    pub rejoin_delay_secs: u64,
    pub keepalive_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 5,
            connect_retry_delay_secs: 2,
            resume_grace_secs: 5,
            rejoin_delay_secs: 10,
            keepalive_secs: 60,
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        toml::from_str(&text)
            .map_err(|e| AppError::Config(format!("cannot parse {}: {}", path.display(), e)))
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            watchdog_timeout: Duration::from_secs(self.playback.watchdog_secs),
            retry_backoff: Duration::from_millis(self.playback.retry_backoff_ms),
            staleness_threshold: Duration::from_secs(self.playback.staleness_secs),
        }
    }

    pub fn transcoder_config(&self) -> TranscoderConfig {
        TranscoderConfig {
            ffmpeg_path: self.audio.ffmpeg_path.clone(),
            sample_rate: self.audio.sample_rate,
            channels: self.audio.channels,
            ..TranscoderConfig::default()
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            connect_attempts: self.transport.connect_attempts,
            connect_retry_delay: Duration::from_secs(self.transport.connect_retry_delay_secs),
            resume_grace: Duration::from_secs(self.transport.resume_grace_secs),
            rejoin_delay: Duration::from_secs(self.transport.rejoin_delay_secs),
            keepalive_interval: Duration::from_secs(self.transport.keepalive_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.playback.watchdog_secs, 30);
        assert_eq!(config.audio.sample_rate, 48_000);
        assert_eq!(config.transport.keepalive_secs, 60);
        assert!(config.feed.url.is_empty());
    }

    #[test]
    fn partial_file_keeps_defaults_elsewhere() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[feed]
url = "https://feeds.example.com/cast.xml"

[playback]
staleness_secs = 120
"#
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.feed.url, "https://feeds.example.com/cast.xml");
        assert_eq!(config.feed.refresh_secs, 900);
        assert_eq!(config.playback.staleness_secs, 120);
        assert_eq!(config.playback.watchdog_secs, 30);
        assert_eq!(
            config.controller_config().staleness_threshold,
            Duration::from_secs(120)
        );
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = AppConfig::load(Path::new("/nonexistent/castvox.toml")).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
