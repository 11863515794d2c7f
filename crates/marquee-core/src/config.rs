//! Aggregated configuration
//!
//! ```json
//! {
//!   "fetch": { "cache_policy": "ignore_cache", "timeout": 30000 },
//!   "playback": { "autoplay": true, "hide_controls_after": 3000 },
//!   "schema": { "entry": "movie" },
//!   "poster_concurrency": 4
//! }
//! ```
//!
//! Every section and field is optional; durations are milliseconds.

use crate::{
    fetch::{queue::DEFAULT_MAX_CONCURRENT, FetchSettings},
    playback::PlaybackOptions,
    playlist::PlaylistSchema,
    Error, Result,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarqueeConfig {
    /// Settings applied to every fetch
    pub fetch: FetchSettings,
    pub playback: PlaybackOptions,
    /// Playlist element names
    pub schema: PlaylistSchema,
    /// Concurrent poster downloads
    pub poster_concurrency: usize,
}

impl Default for MarqueeConfig {
    fn default() -> Self {
        Self {
            fetch: FetchSettings::default(),
            playback: PlaybackOptions::default(),
            schema: PlaylistSchema::default(),
            poster_concurrency: DEFAULT_MAX_CONCURRENT,
        }
    }
}

impl MarqueeConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&json)?;
        debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn validate(&self) -> Result<()> {
        if self.fetch.timeout.is_zero() {
            return Err(Error::InvalidConfig("fetch timeout must be positive".to_string()));
        }
        if self.schema.entry.is_empty() {
            return Err(Error::InvalidConfig("schema entry element must be named".to_string()));
        }
        if !self.playback.scrub_rate.is_finite() || !self.playback.preferred_rate.is_finite() {
            return Err(Error::InvalidConfig("playback rates must be finite".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CachePolicy;
    use std::time::Duration;

    #[test]
    fn test_empty_object_gives_defaults() {
        assert_eq!(MarqueeConfig::from_json_str("{}").unwrap(), MarqueeConfig::default());
    }

    #[test]
    fn test_partial_sections() {
        let config = MarqueeConfig::from_json_str(
            r#"{
                "fetch": { "cache_policy": "ignore_cache", "timeout": 30000, "max_size": 1048576 },
                "playback": { "autoplay": true },
                "schema": { "entry": "item" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.fetch.cache_policy, CachePolicy::IgnoreCache);
        assert_eq!(config.fetch.timeout, Duration::from_secs(30));
        assert_eq!(config.fetch.max_size, Some(1_048_576));
        assert!(config.playback.autoplay);
        assert_eq!(config.schema.entry, "item");
        assert_eq!(config.schema.title, "title");
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            MarqueeConfig::from_json_str(r#"{"fetch": {"timeout": 0}}"#),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(MarqueeConfig::from_json_str("{"), Err(Error::Json(_))));
    }

    #[test]
    fn test_json_round_trip() {
        let config = MarqueeConfig::default();
        let json = config.to_json().unwrap();
        assert_eq!(MarqueeConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            MarqueeConfig::from_json_file("/nonexistent/marquee.json"),
            Err(Error::Io(_))
        ));
    }
}
