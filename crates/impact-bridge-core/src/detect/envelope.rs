//! Envelope-based impact detection with hysteresis
//!
//! Each channel runs an amplitude state machine: a trigger opens when the
//! amplitude rises `trigger_high` above an adaptive baseline floor and
//! releases once it falls back under `trigger_low`. A release before
//! `ring_min_ms` discards the window, and no new trigger may open within
//! `dead_time_ms` of the previous event.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{ChannelEvent, ChannelEventSource};
use crate::sensor::baseline::CorrectedSample;
use crate::timing::millis_between;

/// Tuning parameters for [`EnvelopeDetector`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeParams {
    /// Normalized amplitude that opens a trigger
    pub trigger_high: f64,
    /// Normalized amplitude at or below which a trigger releases
    pub trigger_low: f64,
    /// Minimum trigger duration for an event to be emitted
    pub ring_min_ms: u64,
    /// Quiet period after an event during which no trigger may open
    pub dead_time_ms: u64,
    /// Initial period that only feeds the baseline estimator
    pub warmup_ms: u64,
    /// Lower bound of the baseline floor
    pub baseline_min: f64,
    /// Samples below this amplitude never reach the state machine
    pub min_amp: f64,
    /// Fallback release when amplitude decays to this fraction of the window peak
    pub decay_peak_ratio: f64,
    /// Fallback release when amplitude drops to this fraction of the previous sample
    pub decay_prev_ratio: f64,
    /// Number of recent amplitudes the baseline floor is taken over
    pub baseline_window: usize,
}

impl Default for EnvelopeParams {
    fn default() -> Self {
        Self {
            trigger_high: 0.05,
            trigger_low: 0.01,
            ring_min_ms: 10,
            dead_time_ms: 50,
            warmup_ms: 2000,
            baseline_min: 1e-6,
            min_amp: 0.01,
            decay_peak_ratio: 0.60,
            decay_prev_ratio: 0.55,
            baseline_window: 100,
        }
    }
}

/// Impact detected by the envelope detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactEvent {
    pub channel_id: String,
    /// First sample of the trigger window
    pub start_timestamp: DateTime<Utc>,
    /// Sample with the highest amplitude
    pub peak_timestamp: DateTime<Utc>,
    /// Sample that released the trigger
    pub end_timestamp: DateTime<Utc>,
    pub peak_amplitude: f64,
    /// Root mean square over the window
    pub rms_amplitude: f64,
    /// Time from first to last sample of the window
    pub duration_ms: f64,
    pub sample_count: usize,
}

#[derive(Debug)]
enum TriggerState {
    Idle,
    Triggered {
        start: DateTime<Utc>,
        samples: Vec<(DateTime<Utc>, f64)>,
    },
}

enum Release {
    Hold,
    Emit,
    Discard,
}

/// Introspection snapshot of one channel's detector
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectorStatus {
    pub channel_id: String,
    pub warmed_up: bool,
    pub baseline: f64,
    pub sample_count: usize,
    pub triggered: bool,
}

/// Envelope hit detector for a single channel
///
/// The warmup clock starts at the first processed sample.
///
/// # Example
/// ```
/// use chrono::{Duration, Utc};
/// use impact_bridge_core::detect::envelope::{EnvelopeDetector, EnvelopeParams};
///
/// let params = EnvelopeParams { warmup_ms: 0, ..Default::default() };
/// let mut detector = EnvelopeDetector::new(params, "plate-1");
/// let t0 = Utc::now();
///
/// assert!(detector.process(t0, 0.02).is_none());
/// assert!(detector.process(t0 + Duration::milliseconds(5), 0.5).is_none());
/// assert!(detector.process(t0 + Duration::milliseconds(10), 0.3).is_none());
/// let hit = detector.process(t0 + Duration::milliseconds(20), 0.02);
/// assert!(hit.is_some());
/// ```
#[derive(Debug)]
pub struct EnvelopeDetector {
    params: EnvelopeParams,
    channel_id: String,
    warmup_end: Option<DateTime<Utc>>,
    last_seen: Option<DateTime<Utc>>,
    /// Recent amplitudes for the baseline floor
    window: VecDeque<f64>,
    /// Current baseline floor
    baseline: f64,
    state: TriggerState,
    /// Finalize time of the last emitted event (dead time reference)
    last_event: Option<DateTime<Utc>>,
}

impl EnvelopeDetector {
    pub fn new(params: EnvelopeParams, channel_id: impl Into<String>) -> Self {
        let capacity = params.baseline_window.max(1);
        Self {
            baseline: params.baseline_min,
            params,
            channel_id: channel_id.into(),
            warmup_end: None,
            last_seen: None,
            window: VecDeque::with_capacity(capacity),
            state: TriggerState::Idle,
            last_event: None,
        }
    }

    /// Process one amplitude sample
    ///
    /// # Returns
    /// `Some(ImpactEvent)` when this sample releases a valid trigger
    pub fn process(&mut self, timestamp: DateTime<Utc>, amplitude: f64) -> Option<ImpactEvent> {
        let warmup = Duration::milliseconds(self.params.warmup_ms as i64);
        let warmup_end = *self.warmup_end.get_or_insert(timestamp + warmup);
        self.last_seen = Some(timestamp);

        if timestamp < warmup_end {
            self.push_window(amplitude);
            return None;
        }

        self.push_window(amplitude);
        self.baseline = self
            .window
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min)
            .max(self.params.baseline_min);

        if amplitude < self.params.min_amp {
            return None;
        }

        let normalized = (amplitude - self.baseline).max(0.0);

        match &mut self.state {
            TriggerState::Idle => {
                if self.in_dead_time(timestamp) {
                    return None;
                }
                if normalized >= self.params.trigger_high {
                    tracing::debug!(
                        channel = %self.channel_id,
                        amplitude = amplitude,
                        normalized = normalized,
                        baseline = self.baseline,
                        "trigger_start"
                    );
                    self.state = TriggerState::Triggered {
                        start: timestamp,
                        samples: vec![(timestamp, amplitude)],
                    };
                }
                None
            }
            TriggerState::Triggered { start, samples } => {
                samples.push((timestamp, amplitude));
                let elapsed_ms = millis_between(*start, timestamp);
                let release = Self::release_decision(&self.params, normalized, elapsed_ms, samples);

                match release {
                    Release::Hold => None,
                    Release::Discard => {
                        tracing::trace!(
                            channel = %self.channel_id,
                            elapsed_ms = elapsed_ms,
                            "trigger_discarded_short"
                        );
                        self.state = TriggerState::Idle;
                        None
                    }
                    Release::Emit => {
                        let samples = std::mem::take(samples);
                        self.state = TriggerState::Idle;
                        self.last_event = Some(timestamp);
                        let event = self.finalize(&samples);
                        tracing::debug!(
                            channel = %self.channel_id,
                            peak = event.peak_amplitude,
                            rms = event.rms_amplitude,
                            duration_ms = event.duration_ms,
                            samples = event.sample_count,
                            "impact_finalized"
                        );
                        Some(event)
                    }
                }
            }
        }
    }

    fn release_decision(
        params: &EnvelopeParams,
        normalized: f64,
        elapsed_ms: f64,
        samples: &[(DateTime<Utc>, f64)],
    ) -> Release {
        let ring_done = elapsed_ms >= params.ring_min_ms as f64;

        if normalized <= params.trigger_low {
            return if ring_done {
                Release::Emit
            } else {
                Release::Discard
            };
        }

        // Waveforms sampled coarsely may decay without crossing trigger_low
        if ring_done && samples.len() >= 3 {
            let amplitude = samples[samples.len() - 1].1;
            let previous = samples[samples.len() - 2].1;
            let peak = samples.iter().map(|&(_, a)| a).fold(0.0, f64::max);

            let decayed_from_peak = peak > 0.0 && amplitude <= peak * params.decay_peak_ratio;
            let rapid_drop = previous > 0.0 && amplitude <= previous * params.decay_prev_ratio;
            if decayed_from_peak || rapid_drop {
                return Release::Emit;
            }
        }

        Release::Hold
    }

    fn finalize(&self, samples: &[(DateTime<Utc>, f64)]) -> ImpactEvent {
        let (first, _) = samples[0];
        let (last, _) = samples[samples.len() - 1];

        let mut peak_amplitude = 0.0;
        let mut peak_timestamp = first;
        let mut sum_squares = 0.0;
        for &(ts, amplitude) in samples {
            if amplitude > peak_amplitude {
                peak_amplitude = amplitude;
                peak_timestamp = ts;
            }
            sum_squares += amplitude * amplitude;
        }

        ImpactEvent {
            channel_id: self.channel_id.clone(),
            start_timestamp: first,
            peak_timestamp,
            end_timestamp: last,
            peak_amplitude,
            rms_amplitude: (sum_squares / samples.len() as f64).sqrt(),
            duration_ms: millis_between(first, last),
            sample_count: samples.len(),
        }
    }

    fn push_window(&mut self, amplitude: f64) {
        while self.window.len() >= self.params.baseline_window.max(1) {
            self.window.pop_front();
        }
        self.window.push_back(amplitude);
    }

    fn in_dead_time(&self, timestamp: DateTime<Utc>) -> bool {
        self.last_event
            .map(|last| millis_between(last, timestamp) < self.params.dead_time_ms as f64)
            .unwrap_or(false)
    }

    /// Check if the warmup period has elapsed as of the last processed sample
    pub fn is_warmed_up(&self) -> bool {
        match (self.warmup_end, self.last_seen) {
            (Some(end), Some(seen)) => seen >= end,
            _ => false,
        }
    }

    /// Get current baseline floor
    pub fn baseline(&self) -> f64 {
        self.baseline
    }

    /// Check if a trigger window is open
    pub fn is_triggered(&self) -> bool {
        matches!(self.state, TriggerState::Triggered { .. })
    }

    /// Number of amplitudes in the baseline window
    pub fn sample_count(&self) -> usize {
        self.window.len()
    }

    pub fn params(&self) -> &EnvelopeParams {
        &self.params
    }

    pub fn status(&self) -> DetectorStatus {
        DetectorStatus {
            channel_id: self.channel_id.clone(),
            warmed_up: self.is_warmed_up(),
            baseline: self.baseline,
            sample_count: self.sample_count(),
            triggered: self.is_triggered(),
        }
    }
}

impl ChannelEventSource for EnvelopeDetector {
    fn channel_id(&self) -> &str {
        &self.channel_id
    }

    fn process_sample(&mut self, sample: &CorrectedSample) -> Option<ChannelEvent> {
        self.process(sample.timestamp, sample.scaled_magnitude())
            .map(ChannelEvent::Envelope)
    }

    fn is_active(&self) -> bool {
        self.is_triggered()
    }
}

/// Envelope detectors for many channels sharing one parameter set
///
/// Detectors are created on the first sample of a new channel, each with its
/// own warmup clock.
#[derive(Debug, Default)]
pub struct MultiChannelDetector {
    params: EnvelopeParams,
    detectors: HashMap<String, EnvelopeDetector>,
}

impl MultiChannelDetector {
    pub fn new(params: EnvelopeParams) -> Self {
        Self {
            params,
            detectors: HashMap::new(),
        }
    }

    /// Register a channel ahead of its first sample
    pub fn add_channel(&mut self, channel_id: &str) {
        if !self.detectors.contains_key(channel_id) {
            self.detectors.insert(
                channel_id.to_string(),
                EnvelopeDetector::new(self.params.clone(), channel_id),
            );
        }
    }

    /// Route a sample to its channel's detector
    pub fn process(
        &mut self,
        channel_id: &str,
        timestamp: DateTime<Utc>,
        amplitude: f64,
    ) -> Option<ImpactEvent> {
        self.add_channel(channel_id);
        self.detectors
            .get_mut(channel_id)
            .and_then(|d| d.process(timestamp, amplitude))
    }

    pub fn detector(&self, channel_id: &str) -> Option<&EnvelopeDetector> {
        self.detectors.get(channel_id)
    }

    pub fn status(&self, channel_id: &str) -> Option<DetectorStatus> {
        self.detectors.get(channel_id).map(|d| d.status())
    }

    /// Status of every known channel, sorted by channel id
    pub fn all_status(&self) -> Vec<DetectorStatus> {
        let mut all: Vec<DetectorStatus> = self.detectors.values().map(|d| d.status()).collect();
        all.sort_by(|a, b| a.channel_id.cmp(&b.channel_id));
        all
    }

    pub fn channel_count(&self) -> usize {
        self.detectors.len()
    }
}
