//! Bridge configuration
//!
//! One JSON document groups every tunable of the bridge. Missing sections and
//! fields take their defaults, so a partial file is always valid input.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::detect::DetectorSettings;
use crate::error::ConfigError;
use crate::timing::correlator::CalibrationState;
use crate::timing::shot_clock::ShotClockSettings;
use crate::wire::VibrationFrameLayout;

fn default_sample_target() -> usize {
    crate::DEFAULT_BASELINE_SAMPLES
}

fn default_timeout_ms() -> u64 {
    crate::DEFAULT_BASELINE_TIMEOUT_MS
}

/// Baseline calibration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineSettings {
    /// Stationary samples collected per channel
    #[serde(default = "default_sample_target")]
    pub sample_target: usize,
    /// Time allowed to collect them
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for BaselineSettings {
    fn default() -> Self {
        Self {
            sample_target: default_sample_target(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl BaselineSettings {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}

/// Complete bridge configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub vibration: VibrationFrameLayout,
    #[serde(default)]
    pub baseline: BaselineSettings,
    #[serde(default)]
    pub detector: DetectorSettings,
    #[serde(default)]
    pub timing: CalibrationState,
    #[serde(default)]
    pub shot_clock: ShotClockSettings,
    /// Calibration checkpoint path (None = in-memory only)
    #[serde(default)]
    pub calibration_file: Option<PathBuf>,
}

impl BridgeConfig {
    /// Load config from disk, falling back to defaults on any error
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Loaded config from disk");
                    config
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Save config to disk, creating parent directories if needed
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Config saved to disk");
        Ok(())
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        let layout = &self.vibration;
        if !layout.is_consistent() {
            return Err(ConfigError::invalid(
                "vibration",
                format!(
                    "axis offsets {}/{}/{} do not fit a {}-byte frame",
                    layout.x_offset, layout.y_offset, layout.z_offset, layout.frame_len
                ),
            ));
        }
        if layout.scale <= 0.0 {
            return Err(ConfigError::invalid("vibration", "scale must be positive"));
        }
        if !layout.sample_rate_hz.is_finite() || layout.sample_rate_hz < 0.0 {
            return Err(ConfigError::invalid(
                "vibration",
                "sample_rate_hz must be zero or positive",
            ));
        }

        if self.baseline.sample_target == 0 {
            return Err(ConfigError::invalid("baseline", "sample_target must be at least 1"));
        }

        let envelope = &self.detector.envelope;
        if !(envelope.trigger_low >= 0.0 && envelope.trigger_low < envelope.trigger_high) {
            return Err(ConfigError::invalid(
                "detector.envelope",
                format!(
                    "need 0 <= trigger_low < trigger_high, got {} / {}",
                    envelope.trigger_low, envelope.trigger_high
                ),
            ));
        }
        for (name, ratio) in [
            ("decay_peak_ratio", envelope.decay_peak_ratio),
            ("decay_prev_ratio", envelope.decay_prev_ratio),
        ] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(ConfigError::invalid(
                    "detector.envelope",
                    format!("{} must be within [0, 1], got {}", name, ratio),
                ));
            }
        }

        let spike = &self.detector.spike;
        if spike.min_duration_samples > spike.max_duration_samples {
            return Err(ConfigError::invalid(
                "detector.spike",
                format!(
                    "min_duration_samples {} exceeds max_duration_samples {}",
                    spike.min_duration_samples, spike.max_duration_samples
                ),
            ));
        }

        let onset = &self.detector.onset;
        if onset.onset_threshold >= onset.peak_threshold {
            return Err(ConfigError::invalid(
                "detector.onset",
                format!(
                    "onset_threshold {} must be below peak_threshold {}",
                    onset.onset_threshold, onset.peak_threshold
                ),
            ));
        }

        let timing = &self.timing;
        if !(timing.learning_rate > 0.0 && timing.learning_rate <= 1.0) {
            return Err(ConfigError::invalid(
                "timing",
                format!("learning_rate must be in (0, 1], got {}", timing.learning_rate),
            ));
        }
        if timing.correlation_window_ms <= 0.0 || timing.delay_tolerance_ms < 0.0 {
            return Err(ConfigError::invalid(
                "timing",
                "correlation_window_ms must be positive and delay_tolerance_ms non-negative",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::DetectorStrategy;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.baseline.sample_target, 100);
        assert_eq!(config.baseline.timeout_ms, 30_000);
        assert_eq!(config.detector.strategy, DetectorStrategy::Onset);
        assert_eq!(config.detector.spike.sample_rate_hz, 50.0);
        assert_eq!(config.timing.deadband_ms, 5.0);
        assert_eq!(config.timing.pending_capacity, 50);
        assert!(config.shot_clock.derive_from_split);
        assert!(config.calibration_file.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config: BridgeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn test_partial_sections() {
        let json = r#"{
            "detector": { "strategy": "envelope", "envelope": { "trigger_high": 0.2 } },
            "timing": { "expected_delay_ms": 83 },
            "vibration": { "scale": 0.001 }
        }"#;
        let config: BridgeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.detector.strategy, DetectorStrategy::Envelope);
        assert_eq!(config.detector.envelope.trigger_high, 0.2);
        assert_eq!(config.detector.envelope.trigger_low, 0.01);
        assert_eq!(config.timing.expected_delay_ms, 83.0);
        assert_eq!(config.timing.correlation_window_ms, 1520.0);
        assert_eq!(config.vibration.scale, 0.001);
        assert_eq!(config.vibration.frame_len, 32);
    }

    #[test]
    fn test_validate_rejects_inverted_thresholds() {
        let mut config = BridgeConfig::default();
        config.detector.envelope.trigger_low = 0.5;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { section: "detector.envelope", .. }));

        let mut config = BridgeConfig::default();
        config.detector.onset.onset_threshold = 200.0;
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.detector.spike.min_duration_samples = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_layout_and_learning_rate() {
        let mut config = BridgeConfig::default();
        config.vibration.z_offset = 31;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { section: "vibration", .. })
        ));

        let mut config = BridgeConfig::default();
        config.vibration.sample_rate_hz = -50.0;
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.timing.learning_rate = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_and_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let missing = BridgeConfig::load(&dir.path().join("absent.json"));
        assert_eq!(missing, BridgeConfig::default());

        let corrupt = dir.path().join("bad.json");
        std::fs::write(&corrupt, "not json").unwrap();
        assert_eq!(BridgeConfig::load(&corrupt), BridgeConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("bridge.json");

        let mut config = BridgeConfig::default();
        config.detector.strategy = DetectorStrategy::Spike;
        config.calibration_file = Some(dir.path().join("calibration.json"));
        config.save(&path).unwrap();

        let loaded = BridgeConfig::load(&path);
        assert_eq!(loaded, config);
    }
}
