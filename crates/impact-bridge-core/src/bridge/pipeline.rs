//! Per-device processing chains
//!
//! Each chain is owned by the task reading its device stream and is driven
//! one notification at a time. Nothing here blocks or awaits.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::config::{BaselineSettings, BridgeConfig};
use crate::detect::{ChannelEvent, ChannelEventSource, DetectorSettings};
use crate::error::{CalibrationError, DecodeError};
use crate::sensor::baseline::{Baseline, BaselineCalibrator, CalibrationProgress};
use crate::timing::events::ShotEvent;
use crate::timing::offset_millis;
use crate::timing::shot_clock::ShotClock;
use crate::wire::timer::{decode_shot_frame, ShotTimerFrame};
use crate::wire::vibration::decode_vibration_notification;
use crate::wire::{RawFrame, VibrationFrameLayout};

/// Result of one timer notification
#[derive(Debug, Clone, PartialEq)]
pub struct TimerUpdate {
    pub frame: ShotTimerFrame,
    pub shot: Option<ShotEvent>,
}

/// Timer chain: decode then shot derivation
#[derive(Debug, Default)]
pub struct TimerPipeline {
    clock: ShotClock,
    frames: u64,
    rejected: u64,
}

impl TimerPipeline {
    pub fn new(clock: ShotClock) -> Self {
        Self {
            clock,
            frames: 0,
            rejected: 0,
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(ShotClock::new(config.shot_clock.clone()))
    }

    /// Decode one timer notification
    pub fn process(&mut self, raw: &RawFrame) -> Result<TimerUpdate, DecodeError> {
        let frame = match decode_shot_frame(&raw.bytes) {
            Ok(frame) => frame,
            Err(e) => {
                self.rejected += 1;
                tracing::debug!(device = %raw.device_id, error = %e, "timer_frame_rejected");
                return Err(e);
            }
        };
        self.frames += 1;
        tracing::trace!(device = %raw.device_id, frame = %frame.describe(), "timer_frame");

        let shot = self.clock.observe(&raw.device_id, raw.arrival, &frame);
        Ok(TimerUpdate { frame, shot })
    }

    /// Drop string state for a device that disconnected
    pub fn disconnect(&mut self, device_id: &str) {
        self.clock.forget(device_id);
    }

    pub fn clock(&self) -> &ShotClock {
        &self.clock
    }

    /// (decoded, rejected) frame counts
    pub fn frame_counts(&self) -> (u64, u64) {
        (self.frames, self.rejected)
    }
}

/// Result of one sensor notification
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorBatch {
    /// Samples decoded from the notification
    pub samples: usize,
    /// Baseline established by this notification
    pub calibrated: Option<Baseline>,
    pub events: Vec<ChannelEvent>,
}

/// Sensor chain: decode, baseline calibration and correction, detection
///
/// Each sensor device is one channel named after its device id. A channel
/// starts calibrating on connect (or on its first notification) and gets its
/// detector once the baseline is established.
pub struct SensorPipeline {
    layout: VibrationFrameLayout,
    baseline: BaselineSettings,
    detector: DetectorSettings,
    calibrator: BaselineCalibrator,
    detectors: HashMap<String, Box<dyn ChannelEventSource>>,
}

impl std::fmt::Debug for SensorPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorPipeline")
            .field("layout", &self.layout)
            .field("strategy", &self.detector.strategy)
            .field("channels", &self.detectors.len())
            .finish()
    }
}

impl SensorPipeline {
    pub fn new(
        layout: VibrationFrameLayout,
        baseline: BaselineSettings,
        detector: DetectorSettings,
    ) -> Self {
        Self {
            layout,
            baseline,
            detector,
            calibrator: BaselineCalibrator::new(),
            detectors: HashMap::new(),
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(
            config.vibration.clone(),
            config.baseline.clone(),
            config.detector.clone(),
        )
    }

    /// Start baseline collection for a device
    pub fn connect(&mut self, device_id: &str, at: DateTime<Utc>) -> Result<(), CalibrationError> {
        self.detectors.remove(device_id);
        self.calibrator.begin_calibration(
            device_id,
            at,
            self.baseline.sample_target,
            self.baseline.timeout(),
        )
    }

    /// Process one sensor notification
    ///
    /// Sub-frames are spaced by the nominal sample period, ending at the
    /// notification's arrival time.
    ///
    /// # Errors
    /// [`CalibrationError::Timeout`] when this notification arrives after the
    /// calibration deadline, [`CalibrationError::Failed`] for every later
    /// notification on that channel
    pub fn process(&mut self, raw: &RawFrame) -> Result<SensorBatch, CalibrationError> {
        let channel = raw.device_id.as_str();
        if !self.calibrator.is_calibrated(channel) && !self.calibrator.is_collecting(channel) {
            if self.calibrator.is_failed(channel) {
                return Err(CalibrationError::Failed(channel.to_string()));
            }
            self.connect(channel, raw.arrival)?;
        }

        let samples = decode_vibration_notification(&raw.bytes, &self.layout);
        let mut batch = SensorBatch {
            samples: samples.len(),
            ..Default::default()
        };
        if samples.is_empty() {
            self.calibrator.check_timeout(channel, raw.arrival)?;
            tracing::trace!(device = channel, len = raw.bytes.len(), "sensor_notification_empty");
            return Ok(batch);
        }

        let period_ms = self.layout.sample_period_ms();
        let last = samples.len() - 1;
        for (i, sample) in samples.iter().enumerate() {
            let at = offset_millis(raw.arrival, -((last - i) as f64) * period_ms);
            if self.calibrator.is_collecting(channel) {
                match self.calibrator.offer(channel, at, sample)? {
                    CalibrationProgress::Collecting { .. } => {}
                    CalibrationProgress::Completed(baseline) => {
                        self.detectors
                            .insert(channel.to_string(), self.detector.build(channel));
                        batch.calibrated = Some(baseline);
                    }
                }
                continue;
            }

            let corrected = self.calibrator.correct(channel, at, sample)?;
            let detector = self
                .detectors
                .entry(channel.to_string())
                .or_insert_with(|| self.detector.build(channel));
            if let Some(event) = detector.process_sample(&corrected) {
                batch.events.push(event);
            }
        }

        Ok(batch)
    }

    /// Fail a device still calibrating past its deadline
    pub fn check_timeout(&mut self, device_id: &str, now: DateTime<Utc>) -> Result<(), CalibrationError> {
        self.calibrator.check_timeout(device_id, now)
    }

    pub fn calibrator(&self) -> &BaselineCalibrator {
        &self.calibrator
    }

    /// Check if a device's detector has an open event window
    pub fn is_active(&self, device_id: &str) -> bool {
        self.detectors
            .get(device_id)
            .map(|d| d.is_active())
            .unwrap_or(false)
    }
}
