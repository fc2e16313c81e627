//! Calibration checkpoint file
//!
//! Stores the learned correlation parameters as JSON so the next session can
//! warm-start:
//!
//! ```json
//! {
//!   "timing_calibration": { "expected_delay_ms": 526.0, ... },
//!   "last_updated": "2025-09-09T17:00:00Z",
//!   "status": "active"
//! }
//! ```
//!
//! A missing or unreadable file is never an error for the caller; loading
//! falls back to the supplied defaults. Writes during a session go through
//! [`CheckpointWriter`] so the correlator never touches the filesystem.

use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::correlator::CalibrationState;

/// Persisted subset of [`CalibrationState`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedCalibration {
    pub expected_delay_ms: f64,
    pub correlation_window_ms: f64,
    pub delay_tolerance_ms: f64,
    pub minimum_magnitude: f64,
    pub learning_rate: f64,
    pub sample_count: u64,
}

impl Default for PersistedCalibration {
    fn default() -> Self {
        Self::from(&CalibrationState::default())
    }
}

impl From<&CalibrationState> for PersistedCalibration {
    fn from(state: &CalibrationState) -> Self {
        Self {
            expected_delay_ms: state.expected_delay_ms,
            correlation_window_ms: state.correlation_window_ms,
            delay_tolerance_ms: state.delay_tolerance_ms,
            minimum_magnitude: state.minimum_magnitude,
            learning_rate: state.learning_rate,
            sample_count: state.sample_count,
        }
    }
}

impl PersistedCalibration {
    /// Overlay the persisted values onto `base`, keeping its runtime knobs
    pub fn apply(&self, base: CalibrationState) -> CalibrationState {
        CalibrationState {
            expected_delay_ms: self.expected_delay_ms,
            correlation_window_ms: self.correlation_window_ms,
            delay_tolerance_ms: self.delay_tolerance_ms,
            minimum_magnitude: self.minimum_magnitude,
            learning_rate: self.learning_rate,
            sample_count: self.sample_count,
            ..base
        }
    }
}

fn default_status() -> String {
    "active".to_string()
}

/// On-disk document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationDocument {
    #[serde(default)]
    pub timing_calibration: PersistedCalibration,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default = "default_status")]
    pub status: String,
}

/// Calibration checkpoint at a fixed path
#[derive(Debug, Clone)]
pub struct CalibrationStore {
    path: PathBuf,
}

impl CalibrationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the checkpoint
    pub fn read(&self) -> anyhow::Result<CalibrationDocument> {
        let contents = std::fs::read_to_string(&self.path)?;
        let document = serde_json::from_str(&contents)?;
        Ok(document)
    }

    /// Load the checkpoint over `defaults`, falling back to `defaults` on any error
    pub fn load_or(&self, defaults: CalibrationState) -> CalibrationState {
        if !self.path.exists() {
            tracing::info!(path = %self.path.display(), "No calibration file found, using defaults");
            return defaults;
        }
        match self.read() {
            Ok(document) => {
                tracing::info!(
                    path = %self.path.display(),
                    expected_delay_ms = document.timing_calibration.expected_delay_ms,
                    sample_count = document.timing_calibration.sample_count,
                    "Loaded calibration from disk"
                );
                document.timing_calibration.apply(defaults)
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to read calibration, using defaults"
                );
                defaults
            }
        }
    }

    /// Write the checkpoint, creating parent directories if needed
    pub fn save(&self, state: &CalibrationState) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let document = CalibrationDocument {
            timing_calibration: PersistedCalibration::from(state),
            last_updated: Some(Utc::now()),
            status: default_status(),
        };
        let json = serde_json::to_string_pretty(&document)?;
        std::fs::write(&self.path, json)?;
        tracing::info!(path = %self.path.display(), "Calibration saved to disk");
        Ok(())
    }
}

/// Background writer for calibration checkpoints
///
/// Owns a dedicated thread that saves submitted snapshots in order. When
/// several snapshots queue up only the newest is written. Failures are logged
/// and never reach the submitter.
#[derive(Debug)]
pub struct CheckpointWriter {
    path: PathBuf,
    tx: Option<mpsc::UnboundedSender<CalibrationState>>,
    worker: Option<JoinHandle<()>>,
}

impl CheckpointWriter {
    /// Start the writer thread for `store`
    pub fn spawn(store: CalibrationStore) -> anyhow::Result<Self> {
        let path = store.path().to_path_buf();
        let (tx, mut rx) = mpsc::unbounded_channel::<CalibrationState>();
        let worker = std::thread::Builder::new()
            .name("calibration-writer".to_string())
            .spawn(move || {
                while let Some(mut state) = rx.blocking_recv() {
                    while let Ok(newer) = rx.try_recv() {
                        state = newer;
                    }
                    if let Err(e) = store.save(&state) {
                        tracing::warn!(
                            path = %store.path().display(),
                            error = %e,
                            "calibration_save_failed"
                        );
                    }
                }
                tracing::debug!(path = %store.path().display(), "calibration_writer_stopped");
            })?;

        Ok(Self {
            path,
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue a snapshot; returns immediately
    pub fn submit(&self, state: &CalibrationState) {
        let sent = self
            .tx
            .as_ref()
            .map(|tx| tx.send(state.clone()).is_ok())
            .unwrap_or(false);
        if !sent {
            tracing::warn!(path = %self.path.display(), "calibration_writer_closed");
        }
    }

    /// Write everything queued so far and stop the thread
    ///
    /// Blocks until the last write finishes; call from a blocking context.
    /// Later submissions are dropped.
    pub fn close(&mut self) {
        self.tx = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!(path = %self.path.display(), "calibration_writer_panicked");
            }
        }
    }
}

impl Drop for CheckpointWriter {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::correlator::TimingCorrelator;
    use crate::timing::events::{ImpactRecord, ShotEvent};
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = CalibrationStore::new(dir.path().join("absent.json"));
        assert_eq!(
            store.load_or(CalibrationState::default()),
            CalibrationState::default()
        );
    }

    #[test]
    fn test_corrupt_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = CalibrationStore::new(&path);
        assert!(store.read().is_err());
        assert_eq!(
            store.load_or(CalibrationState::default()),
            CalibrationState::default()
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = CalibrationStore::new(dir.path().join("nested").join("calibration.json"));

        let state = CalibrationState {
            expected_delay_ms: 312.5,
            sample_count: 11,
            ..Default::default()
        };
        store.save(&state).unwrap();

        let document = store.read().unwrap();
        assert_eq!(document.status, "active");
        assert!(document.last_updated.is_some());

        let loaded = store.load_or(CalibrationState::default());
        assert_eq!(loaded.expected_delay_ms, 312.5);
        assert_eq!(loaded.sample_count, 11);
        assert_eq!(loaded.correlation_window_ms, 1520.0);
    }

    #[test]
    fn test_integer_fields_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        std::fs::write(
            &path,
            r#"{"timing_calibration":{"expected_delay_ms":480,"delay_tolerance_ms":300},"status":"active"}"#,
        )
        .unwrap();

        let loaded = CalibrationStore::new(&path).load_or(CalibrationState::default());
        assert_eq!(loaded.expected_delay_ms, 480.0);
        assert_eq!(loaded.delay_tolerance_ms, 300.0);
        assert_eq!(loaded.minimum_magnitude, 150.0);
    }

    #[test]
    fn test_runtime_knobs_not_persisted() {
        let base = CalibrationState {
            history_len: 7,
            pending_capacity: 9,
            ..Default::default()
        };
        let merged = PersistedCalibration::default().apply(base);
        assert_eq!(merged.history_len, 7);
        assert_eq!(merged.pending_capacity, 9);
    }

    #[test]
    fn test_correlator_checkpoints_updates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        let mut correlator = TimingCorrelator::new(CalibrationState {
            expected_delay_ms: 100.0,
            correlation_window_ms: 1000.0,
            delay_tolerance_ms: 200.0,
            ..Default::default()
        })
        .with_store(CalibrationStore::new(&path));

        let t0 = Utc.with_ymd_and_hms(2025, 9, 9, 17, 0, 0).unwrap();
        for i in 0..3 {
            let shot_at = t0 + Duration::seconds(i * 2);
            correlator.insert_shot(ShotEvent::new(shot_at, i as u8 + 1, "timer"));
            correlator.insert_impact(ImpactRecord::new(
                shot_at + Duration::milliseconds(250),
                200.0,
                "sensor",
                "plate",
            ));
        }

        correlator.close_checkpoints();
        let document = CalibrationStore::new(&path).read().unwrap();
        assert!((document.timing_calibration.expected_delay_ms - 115.0).abs() < 1e-9);
        assert_eq!(document.timing_calibration.sample_count, 7);
    }

    #[test]
    fn test_writer_keeps_last_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        let mut writer = CheckpointWriter::spawn(CalibrationStore::new(&path)).unwrap();

        for delay in [300.0, 310.0, 320.0] {
            writer.submit(&CalibrationState {
                expected_delay_ms: delay,
                ..Default::default()
            });
        }
        writer.close();

        let loaded = CalibrationStore::new(&path).load_or(CalibrationState::default());
        assert_eq!(loaded.expected_delay_ms, 320.0);

        // Closed writers drop submissions
        writer.submit(&CalibrationState::default());
        let loaded = CalibrationStore::new(&path).load_or(CalibrationState::default());
        assert_eq!(loaded.expected_delay_ms, 320.0);
    }

    #[test]
    fn test_unwritable_store_does_not_fail_correlation() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be makes the write fail
        let path = dir.path().join("blocked");
        std::fs::create_dir_all(&path).unwrap();

        let mut correlator = TimingCorrelator::new(CalibrationState {
            expected_delay_ms: 100.0,
            delay_tolerance_ms: 200.0,
            ..Default::default()
        })
        .with_store(CalibrationStore::new(&path));

        let t0 = Utc.with_ymd_and_hms(2025, 9, 9, 17, 0, 0).unwrap();
        let mut pairs = 0;
        for i in 0..3 {
            let shot_at = t0 + Duration::seconds(i * 2);
            correlator.insert_shot(ShotEvent::new(shot_at, i as u8 + 1, "timer"));
            if correlator
                .insert_impact(ImpactRecord::new(
                    shot_at + Duration::milliseconds(250),
                    200.0,
                    "sensor",
                    "plate",
                ))
                .is_some()
            {
                pairs += 1;
            }
        }
        assert_eq!(pairs, 3);
        assert!(correlator.calibration().expected_delay_ms > 100.0);
    }
}
