use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tier::Tier;

/// Errors from loading a [`GovernorConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Governor settings. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GovernorConfig {
    /// Raise the default log level to `debug`.
    pub debug: bool,
    /// Force a tier instead of classifying the device.
    pub tier: Option<Tier>,
    /// Object URLs tracked before the oldest is revoked.
    pub blob_capacity: usize,
    pub visibility: VisibilityConfig,
    pub jank: JankConfig,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            debug: false,
            tier: None,
            blob_capacity: memory::trackers::blob::DEFAULT_BLOB_CAPACITY,
            visibility: VisibilityConfig::default(),
            jank: JankConfig::default(),
        }
    }
}

impl GovernorConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub fn default_log_level(&self) -> &'static str {
        if self.debug {
            "debug"
        } else {
            "info"
        }
    }
}

/// Delays for the graduated restore after the page becomes visible again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VisibilityConfig {
    pub viewport_phase_ms: u64,
    pub canvas_phase_ms: u64,
    pub wide_phase_ms: u64,
    /// Wide-phase delay after a long absence.
    pub wide_phase_long_ms: u64,
    /// Hidden for longer than this counts as a long absence.
    pub long_hidden_ms: u64,
    /// Hidden for longer than this schedules a deep cleanup pass.
    pub deep_cleanup_after_ms: u64,
    /// Delay of the deep cleanup pass after the page becomes visible.
    pub deep_cleanup_delay_ms: u64,
    /// Delay of the restore after a back/forward cache page-show.
    pub bfcache_restore_ms: u64,
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            viewport_phase_ms: 200,
            canvas_phase_ms: 600,
            wide_phase_ms: 800,
            wide_phase_long_ms: 1_200,
            long_hidden_ms: 30_000,
            deep_cleanup_after_ms: 120_000,
            deep_cleanup_delay_ms: 2_000,
            bfcache_restore_ms: 500,
        }
    }
}

impl VisibilityConfig {
    pub fn viewport_phase(&self) -> Duration {
        Duration::from_millis(self.viewport_phase_ms)
    }

    pub fn canvas_phase(&self) -> Duration {
        Duration::from_millis(self.canvas_phase_ms)
    }

    pub fn wide_phase(&self, hidden_for: Duration) -> Duration {
        if hidden_for > Duration::from_millis(self.long_hidden_ms) {
            Duration::from_millis(self.wide_phase_long_ms)
        } else {
            Duration::from_millis(self.wide_phase_ms)
        }
    }

    pub fn needs_deep_cleanup(&self, hidden_for: Duration) -> bool {
        hidden_for > Duration::from_millis(self.deep_cleanup_after_ms)
    }

    pub fn deep_cleanup_delay(&self) -> Duration {
        Duration::from_millis(self.deep_cleanup_delay_ms)
    }

    pub fn bfcache_restore(&self) -> Duration {
        Duration::from_millis(self.bfcache_restore_ms)
    }
}

/// Startup frame-timing window used to detect an under-classified device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JankConfig {
    pub start_delay_ms: u64,
    pub window_ms: u64,
    pub sample_frames: usize,
    pub slow_frame_ms: u64,
    pub slow_ratio: f64,
}

impl Default for JankConfig {
    fn default() -> Self {
        Self {
            start_delay_ms: 2_000,
            window_ms: 5_000,
            sample_frames: 60,
            slow_frame_ms: 50,
            slow_ratio: 0.3,
        }
    }
}

impl JankConfig {
    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = GovernorConfig::from_toml_str("").unwrap();
        assert_eq!(config, GovernorConfig::default());
        assert_eq!(config.blob_capacity, 20);
        assert_eq!(config.default_log_level(), "info");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = GovernorConfig::from_toml_str(
            r#"
            debug = true
            tier = "ultra-low"

            [jank]
            slow_ratio = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(config.tier, Some(Tier::UltraLow));
        assert_eq!(config.jank.slow_ratio, 0.5);
        assert_eq!(config.jank.sample_frames, 60);
        assert_eq!(config.visibility.canvas_phase_ms, 600);
        assert_eq!(config.default_log_level(), "debug");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = GovernorConfig::from_toml_str("gc_interval_ms = 10").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn long_absence_stretches_wide_phase() {
        let visibility = VisibilityConfig::default();
        assert_eq!(visibility.wide_phase(Duration::from_secs(5)), Duration::from_millis(800));
        assert_eq!(
            visibility.wide_phase(Duration::from_secs(31)),
            Duration::from_millis(1_200)
        );
    }

    #[test]
    fn missing_file_reports_path() {
        let err = GovernorConfig::load("/nonexistent/ebb.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/ebb.toml"));
    }
}
