//! Single-threshold, duration-gated pulse classifier
//!
//! Works on one raw axis against a fixed baseline. A pulse is accepted only
//! when it stays over threshold for a bounded number of consecutive samples,
//! which rejects both single-sample glitches and long mechanical rumble.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ChannelEvent, ChannelEventSource};
use crate::sensor::baseline::CorrectedSample;
use crate::timing::millis_between;

/// Number of accepted events kept for introspection
pub const RECENT_EVENTS: usize = 10;

/// Sensor axis a classifier reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    #[default]
    X,
    Y,
    Z,
}

impl Axis {
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

/// Tuning parameters for [`SpikeClassifier`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpikeParams {
    /// Fixed resting value of the axis in raw counts
    pub baseline: f64,
    /// Minimum deviation from baseline counted as over threshold
    pub threshold: f64,
    pub min_duration_samples: usize,
    pub max_duration_samples: usize,
    /// Minimum time between accepted pulses
    pub min_interval_seconds: f64,
    /// Nominal sensor rate, used for the inferred span of a pulse
    pub sample_rate_hz: f64,
    pub axis: Axis,
}

impl Default for SpikeParams {
    fn default() -> Self {
        Self {
            baseline: 2089.0,
            threshold: 150.0,
            min_duration_samples: 6,
            max_duration_samples: 11,
            min_interval_seconds: 1.0,
            sample_rate_hz: 50.0,
            axis: Axis::X,
        }
    }
}

/// Accepted pulse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeEvent {
    pub channel_id: String,
    /// 1-based count of accepted pulses on this channel
    pub sequence: u64,
    /// 1-based index of the first over-threshold sample
    pub start_sample: u64,
    pub end_sample: u64,
    pub duration_samples: usize,
    pub max_deviation: f64,
    /// Timestamp of the first over-threshold sample
    pub start_timestamp: DateTime<Utc>,
    /// Timestamp of the sample that closed the pulse
    pub timestamp: DateTime<Utc>,
    /// Axis values over the pulse
    pub values: Vec<f64>,
    /// Wall-clock span inferred from the nominal sample rate
    pub span_ms: f64,
}

#[derive(Debug)]
struct OpenPulse {
    start_sample: u64,
    start_timestamp: DateTime<Utc>,
    values: Vec<f64>,
}

/// Counters for one classifier
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpikeStats {
    pub total_samples: u64,
    pub total_events: u64,
    pub events_per_minute: f64,
    pub recent_events: usize,
    pub last_event: Option<DateTime<Utc>>,
}

/// Spike-duration classifier for one channel
#[derive(Debug)]
pub struct SpikeClassifier {
    params: SpikeParams,
    channel_id: String,
    sample_count: u64,
    event_count: u64,
    pulse: Option<OpenPulse>,
    /// Set after an over-long abort until the signal returns below threshold
    awaiting_quiet: bool,
    last_event: Option<DateTime<Utc>>,
    recent: VecDeque<SpikeEvent>,
}

impl SpikeClassifier {
    pub fn new(params: SpikeParams, channel_id: impl Into<String>) -> Self {
        Self {
            params,
            channel_id: channel_id.into(),
            sample_count: 0,
            event_count: 0,
            pulse: None,
            awaiting_quiet: false,
            last_event: None,
            recent: VecDeque::with_capacity(RECENT_EVENTS),
        }
    }

    /// Process one axis value
    ///
    /// # Returns
    /// `Some(SpikeEvent)` when this sample closes a pulse of acceptable length
    pub fn process(&mut self, timestamp: DateTime<Utc>, value: f64) -> Option<SpikeEvent> {
        self.sample_count += 1;
        let deviation = (value - self.params.baseline).abs();
        let over = deviation >= self.params.threshold;

        if self.awaiting_quiet {
            if !over {
                self.awaiting_quiet = false;
            }
            return None;
        }

        match (self.pulse.as_mut(), over) {
            (None, true) => {
                if let Some(last) = self.last_event {
                    let since = millis_between(last, timestamp) / 1000.0;
                    if since < self.params.min_interval_seconds {
                        tracing::trace!(
                            channel = %self.channel_id,
                            since_last_s = since,
                            "spike_rejected_interval"
                        );
                        return None;
                    }
                }
                tracing::trace!(
                    channel = %self.channel_id,
                    sample = self.sample_count,
                    deviation = deviation,
                    "spike_start"
                );
                self.pulse = Some(OpenPulse {
                    start_sample: self.sample_count,
                    start_timestamp: timestamp,
                    values: vec![value],
                });
                None
            }
            (Some(pulse), true) => {
                pulse.values.push(value);
                if pulse.values.len() > self.params.max_duration_samples {
                    tracing::debug!(
                        channel = %self.channel_id,
                        samples = pulse.values.len(),
                        "spike_rejected_too_long"
                    );
                    self.pulse = None;
                    self.awaiting_quiet = true;
                }
                None
            }
            (Some(_), false) => {
                let pulse = self.pulse.take()?;
                self.close_pulse(pulse, timestamp)
            }
            (None, false) => None,
        }
    }

    fn close_pulse(&mut self, pulse: OpenPulse, timestamp: DateTime<Utc>) -> Option<SpikeEvent> {
        let duration = pulse.values.len();
        if duration < self.params.min_duration_samples {
            tracing::trace!(
                channel = %self.channel_id,
                samples = duration,
                "spike_rejected_too_short"
            );
            return None;
        }

        self.event_count += 1;
        let baseline = self.params.baseline;
        let max_deviation = pulse
            .values
            .iter()
            .map(|v| (v - baseline).abs())
            .fold(0.0, f64::max);
        let span_ms = if self.params.sample_rate_hz > 0.0 {
            duration as f64 * 1000.0 / self.params.sample_rate_hz
        } else {
            0.0
        };

        let event = SpikeEvent {
            channel_id: self.channel_id.clone(),
            sequence: self.event_count,
            start_sample: pulse.start_sample,
            end_sample: pulse.start_sample + duration as u64 - 1,
            duration_samples: duration,
            max_deviation,
            start_timestamp: pulse.start_timestamp,
            timestamp,
            values: pulse.values,
            span_ms,
        };

        self.last_event = Some(timestamp);
        if self.recent.len() >= RECENT_EVENTS {
            self.recent.pop_front();
        }
        self.recent.push_back(event.clone());

        tracing::info!(
            channel = %self.channel_id,
            sequence = event.sequence,
            start_sample = event.start_sample,
            end_sample = event.end_sample,
            max_deviation = event.max_deviation,
            "spike_detected"
        );
        Some(event)
    }

    /// Clear all state including counters
    pub fn reset(&mut self) {
        self.sample_count = 0;
        self.event_count = 0;
        self.pulse = None;
        self.awaiting_quiet = false;
        self.last_event = None;
        self.recent.clear();
    }

    /// Most recent accepted events, oldest first
    pub fn recent_events(&self, count: usize) -> Vec<&SpikeEvent> {
        let skip = self.recent.len().saturating_sub(count);
        self.recent.iter().skip(skip).collect()
    }

    pub fn stats(&self) -> SpikeStats {
        let minutes = if self.params.sample_rate_hz > 0.0 {
            self.sample_count as f64 / self.params.sample_rate_hz / 60.0
        } else {
            0.0
        };
        SpikeStats {
            total_samples: self.sample_count,
            total_events: self.event_count,
            events_per_minute: if minutes > 0.0 {
                self.event_count as f64 / minutes
            } else {
                0.0
            },
            recent_events: self.recent.len(),
            last_event: self.last_event,
        }
    }

    pub fn in_pulse(&self) -> bool {
        self.pulse.is_some()
    }

    pub fn params(&self) -> &SpikeParams {
        &self.params
    }
}

impl ChannelEventSource for SpikeClassifier {
    fn channel_id(&self) -> &str {
        &self.channel_id
    }

    fn process_sample(&mut self, sample: &CorrectedSample) -> Option<ChannelEvent> {
        let value = sample.raw[self.params.axis.index()] as f64;
        self.process(sample.timestamp, value).map(ChannelEvent::Spike)
    }

    fn is_active(&self) -> bool {
        self.in_pulse()
    }
}
