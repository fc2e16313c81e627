//! Baseline calibration for vibration channels
//!
//! Before a channel may feed a detector it collects a batch of stationary
//! samples, from which the per-axis mean (zero reference) and population
//! standard deviation (noise level) are computed. A channel that cannot fill
//! its batch before the timeout stays failed for the rest of the session.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CalibrationError;
use crate::wire::VibrationSample;

/// Zero reference and noise level per axis, in raw counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub mean: [f64; 3],
    pub noise: [f64; 3],
    /// Number of samples the baseline was computed from
    pub sample_count: usize,
}

impl Baseline {
    /// Compute mean and population standard deviation per axis
    ///
    /// Returns `None` for an empty batch.
    pub fn from_samples(samples: &[[i16; 3]]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let n = samples.len() as f64;
        let mut mean = [0.0; 3];
        let mut noise = [0.0; 3];

        for axis in 0..3 {
            let sum: f64 = samples.iter().map(|s| s[axis] as f64).sum();
            mean[axis] = sum / n;
            let var: f64 = samples
                .iter()
                .map(|s| {
                    let d = s[axis] as f64 - mean[axis];
                    d * d
                })
                .sum::<f64>()
                / n;
            noise[axis] = var.sqrt();
        }

        Some(Self {
            mean,
            noise,
            sample_count: samples.len(),
        })
    }

    /// Subtract the zero reference from a decoded sample
    pub fn correct(&self, timestamp: DateTime<Utc>, sample: &VibrationSample) -> CorrectedSample {
        let x = sample.raw[0] as f64 - self.mean[0];
        let y = sample.raw[1] as f64 - self.mean[1];
        let z = sample.raw[2] as f64 - self.mean[2];
        CorrectedSample {
            timestamp,
            raw: sample.raw,
            x,
            y,
            z,
            magnitude: (x * x + y * y + z * z).sqrt(),
            scale: sample.scale,
        }
    }
}

/// Baseline-corrected sample, in raw counts relative to the zero reference
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorrectedSample {
    pub timestamp: DateTime<Utc>,
    /// Uncorrected counts as decoded
    pub raw: [i16; 3],
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Euclidean norm of the corrected axes
    pub magnitude: f64,
    /// Physical units per raw count
    pub scale: f64,
}

impl CorrectedSample {
    /// Magnitude converted to physical units
    pub fn scaled_magnitude(&self) -> f64 {
        self.magnitude * self.scale
    }
}

/// Progress reported after each calibration sample
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationProgress {
    Collecting { collected: usize, target: usize },
    Completed(Baseline),
}

#[derive(Debug)]
enum ChannelCalibration {
    Collecting {
        started_at: DateTime<Utc>,
        target: usize,
        timeout: Duration,
        samples: Vec<[i16; 3]>,
    },
    Calibrated(Baseline),
    Failed,
}

/// Per-channel baseline calibration state
///
/// # Example
/// ```
/// use std::time::Duration;
/// use chrono::Utc;
/// use impact_bridge_core::sensor::baseline::{BaselineCalibrator, CalibrationProgress};
/// use impact_bridge_core::wire::VibrationSample;
///
/// let mut calibrator = BaselineCalibrator::new();
/// let start = Utc::now();
/// calibrator.begin_calibration("plate-1", start, 2, Duration::from_secs(30)).unwrap();
///
/// let sample = VibrationSample { offset: 0, raw: [10, 20, 30], scale: 1.0 };
/// calibrator.offer("plate-1", start, &sample).unwrap();
/// let done = calibrator.offer("plate-1", start, &sample).unwrap();
/// assert!(matches!(done, CalibrationProgress::Completed(_)));
/// assert!(calibrator.is_calibrated("plate-1"));
/// ```
#[derive(Debug, Default)]
pub struct BaselineCalibrator {
    channels: HashMap<String, ChannelCalibration>,
}

impl BaselineCalibrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch a channel into collection-only mode
    ///
    /// A calibrated channel may be recalibrated; a failed channel may not.
    pub fn begin_calibration(
        &mut self,
        channel: &str,
        started_at: DateTime<Utc>,
        sample_target: usize,
        timeout: Duration,
    ) -> Result<(), CalibrationError> {
        match self.channels.get(channel) {
            Some(ChannelCalibration::Collecting { .. }) => {
                return Err(CalibrationError::AlreadyCalibrating(channel.to_string()))
            }
            Some(ChannelCalibration::Failed) => {
                return Err(CalibrationError::Failed(channel.to_string()))
            }
            _ => {}
        }

        let target = sample_target.max(1);
        tracing::info!(
            channel = channel,
            target = target,
            timeout_ms = timeout.as_millis() as u64,
            "baseline_calibration_started"
        );
        self.channels.insert(
            channel.to_string(),
            ChannelCalibration::Collecting {
                started_at,
                target,
                timeout,
                samples: Vec::with_capacity(target),
            },
        );
        Ok(())
    }

    /// Feed one decoded sample to a collecting channel
    ///
    /// Completing the batch marks the channel calibrated. A sample arriving
    /// after the timeout fails the channel permanently.
    pub fn offer(
        &mut self,
        channel: &str,
        timestamp: DateTime<Utc>,
        sample: &VibrationSample,
    ) -> Result<CalibrationProgress, CalibrationError> {
        self.check_timeout(channel, timestamp)?;

        let entry = self
            .channels
            .get_mut(channel)
            .ok_or_else(|| CalibrationError::NotCalibrated(channel.to_string()))?;

        let completed = match entry {
            ChannelCalibration::Collecting {
                target, samples, ..
            } => {
                samples.push(sample.raw);
                if samples.len() < *target {
                    return Ok(CalibrationProgress::Collecting {
                        collected: samples.len(),
                        target: *target,
                    });
                }
                Baseline::from_samples(samples)
            }
            ChannelCalibration::Calibrated(baseline) => {
                return Ok(CalibrationProgress::Completed(baseline.clone()))
            }
            ChannelCalibration::Failed => {
                return Err(CalibrationError::Failed(channel.to_string()))
            }
        };

        let baseline = completed.ok_or(CalibrationError::EmptySample)?;
        tracing::info!(
            channel = channel,
            mean_x = baseline.mean[0],
            mean_y = baseline.mean[1],
            mean_z = baseline.mean[2],
            noise_x = baseline.noise[0],
            noise_y = baseline.noise[1],
            noise_z = baseline.noise[2],
            "baseline_established"
        );
        *entry = ChannelCalibration::Calibrated(baseline.clone());
        Ok(CalibrationProgress::Completed(baseline))
    }

    /// Fail a collecting channel whose timeout has elapsed by `now`
    ///
    /// Lets the owner enforce the timeout even when the device stops sending.
    pub fn check_timeout(
        &mut self,
        channel: &str,
        now: DateTime<Utc>,
    ) -> Result<(), CalibrationError> {
        let Some(entry) = self.channels.get_mut(channel) else {
            return Ok(());
        };
        if let ChannelCalibration::Collecting {
            started_at,
            target,
            timeout,
            samples,
        } = entry
        {
            let elapsed_ms = (now - *started_at).num_milliseconds();
            if elapsed_ms > timeout.as_millis() as i64 {
                let err = CalibrationError::Timeout {
                    channel: channel.to_string(),
                    collected: samples.len(),
                    target: *target,
                    elapsed_ms,
                };
                tracing::warn!(error = %err, "baseline_calibration_failed");
                *entry = ChannelCalibration::Failed;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Baseline-correct a sample on a calibrated channel
    pub fn correct(
        &self,
        channel: &str,
        timestamp: DateTime<Utc>,
        sample: &VibrationSample,
    ) -> Result<CorrectedSample, CalibrationError> {
        match self.channels.get(channel) {
            Some(ChannelCalibration::Calibrated(baseline)) => {
                Ok(baseline.correct(timestamp, sample))
            }
            Some(ChannelCalibration::Failed) => Err(CalibrationError::Failed(channel.to_string())),
            _ => Err(CalibrationError::NotCalibrated(channel.to_string())),
        }
    }

    /// Baseline of a calibrated channel
    pub fn baseline(&self, channel: &str) -> Option<&Baseline> {
        match self.channels.get(channel) {
            Some(ChannelCalibration::Calibrated(baseline)) => Some(baseline),
            _ => None,
        }
    }

    /// Check if a channel is calibrated and eligible for detection
    pub fn is_calibrated(&self, channel: &str) -> bool {
        self.baseline(channel).is_some()
    }

    /// Check if a channel is currently collecting calibration samples
    pub fn is_collecting(&self, channel: &str) -> bool {
        matches!(
            self.channels.get(channel),
            Some(ChannelCalibration::Collecting { .. })
        )
    }

    /// Check if a channel failed calibration this session
    pub fn is_failed(&self, channel: &str) -> bool {
        matches!(self.channels.get(channel), Some(ChannelCalibration::Failed))
    }
}
