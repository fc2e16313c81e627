//! Online shot/impact correlation
//!
//! Shots and impacts arrive on independent streams. Each insertion tries to
//! pair the new event against the other stream's pending queue, preferring
//! the candidate whose delay is closest to the expected delay. Matched events
//! never enter (or immediately leave) the queues, so an event takes part in
//! at most one pair. Accepted delays feed an exponential moving average of
//! the expected delay.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::events::{CorrelatedPair, ImpactRecord, ShotEvent};
use super::millis_between;
use super::persist::{CalibrationStore, CheckpointWriter};
use crate::stats::store::CorrelationStats;

/// Correlation parameters and learning state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationState {
    /// Current estimate of shot-to-impact latency
    pub expected_delay_ms: f64,
    /// Maximum shot-to-impact separation
    pub correlation_window_ms: f64,
    /// Maximum deviation from the expected delay for a pair to be accepted
    pub delay_tolerance_ms: f64,
    /// Impacts below this magnitude are ignored
    pub minimum_magnitude: f64,
    /// EMA weight of the recent mean delay
    pub learning_rate: f64,
    /// Number of accepted recalibrations, including any loaded from disk
    pub sample_count: u64,
    /// Bound of the rolling delay history
    pub history_len: usize,
    /// Expected-delay changes at or below this are not applied
    pub deadband_ms: f64,
    /// Bound of each pending queue
    pub pending_capacity: usize,
    /// Recent accepted delays, oldest first
    #[serde(skip)]
    pub delay_history: VecDeque<f64>,
}

impl Default for CalibrationState {
    fn default() -> Self {
        Self {
            expected_delay_ms: 526.0,
            correlation_window_ms: 1520.0,
            delay_tolerance_ms: 663.0,
            minimum_magnitude: 150.0,
            learning_rate: 0.1,
            sample_count: 6,
            history_len: 20,
            deadband_ms: 5.0,
            pending_capacity: 50,
            delay_history: VecDeque::new(),
        }
    }
}

impl CalibrationState {
    /// Confidence of a pair with the given observed delay
    pub fn confidence(&self, delay_ms: f64) -> f64 {
        delay_confidence(
            (delay_ms - self.expected_delay_ms).abs(),
            self.delay_tolerance_ms,
        )
    }

    /// Record an accepted delay and update the expected delay
    ///
    /// # Returns
    /// `Some((old, new))` when the expected delay changed
    pub fn learn(&mut self, delay_ms: f64) -> Option<(f64, f64)> {
        let capacity = self.history_len.max(1);
        while self.delay_history.len() >= capacity {
            self.delay_history.pop_front();
        }
        self.delay_history.push_back(delay_ms);

        if self.delay_history.len() < 3 {
            return None;
        }

        let mean = self.delay_history.iter().sum::<f64>() / self.delay_history.len() as f64;
        let old = self.expected_delay_ms;
        let new = old * (1.0 - self.learning_rate) + mean * self.learning_rate;
        if (new - old).abs() <= self.deadband_ms {
            return None;
        }

        self.expected_delay_ms = new;
        self.sample_count += 1;
        Some((old, new))
    }
}

/// Confidence for a delay deviation under a tolerance
///
/// 1 at zero deviation, falling linearly to 0.5 at the tolerance and on to 0
/// at twice the tolerance.
pub fn delay_confidence(deviation_ms: f64, tolerance_ms: f64) -> f64 {
    if deviation_ms <= 0.0 {
        return 1.0;
    }
    if tolerance_ms <= 0.0 {
        return 0.0;
    }
    let confidence = if deviation_ms <= tolerance_ms {
        1.0 - 0.5 * deviation_ms / tolerance_ms
    } else {
        0.5 - 0.5 * (deviation_ms - tolerance_ms) / tolerance_ms
    };
    confidence.clamp(0.0, 1.0)
}

/// Pairs shots with impacts
///
/// # Example
/// ```
/// use chrono::{Duration, Utc};
/// use impact_bridge_core::timing::correlator::{CalibrationState, TimingCorrelator};
/// use impact_bridge_core::timing::events::{ImpactRecord, ShotEvent};
///
/// let mut correlator = TimingCorrelator::new(CalibrationState {
///     expected_delay_ms: 100.0,
///     correlation_window_ms: 1000.0,
///     delay_tolerance_ms: 50.0,
///     ..Default::default()
/// });
/// let t0 = Utc::now();
/// assert!(correlator.insert_shot(ShotEvent::new(t0, 1, "timer")).is_none());
/// let pair = correlator
///     .insert_impact(ImpactRecord::new(t0 + Duration::milliseconds(120), 200.0, "sensor", "plate"))
///     .unwrap();
/// assert_eq!(pair.delay_ms, 120.0);
/// ```
#[derive(Debug)]
pub struct TimingCorrelator {
    calibration: CalibrationState,
    /// Unmatched shots, ordered by timestamp
    pending_shots: VecDeque<ShotEvent>,
    /// Unmatched impacts, ordered by timestamp
    pending_impacts: VecDeque<ImpactRecord>,
    stats: CorrelationStats,
    checkpoints: Option<CheckpointWriter>,
}

impl TimingCorrelator {
    pub fn new(calibration: CalibrationState) -> Self {
        tracing::info!(
            expected_delay_ms = calibration.expected_delay_ms,
            window_ms = calibration.correlation_window_ms,
            tolerance_ms = calibration.delay_tolerance_ms,
            minimum_magnitude = calibration.minimum_magnitude,
            "correlator_initialized"
        );
        Self {
            calibration,
            pending_shots: VecDeque::new(),
            pending_impacts: VecDeque::new(),
            stats: CorrelationStats::new(),
            checkpoints: None,
        }
    }

    /// Checkpoint expected-delay updates to `store` in the background
    pub fn with_store(mut self, store: CalibrationStore) -> Self {
        let path = store.path().display().to_string();
        match CheckpointWriter::spawn(store) {
            Ok(writer) => self.checkpoints = Some(writer),
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "calibration_writer_unavailable");
            }
        }
        self
    }

    /// Finish pending checkpoint writes and stop checkpointing
    ///
    /// Blocks until the writer has flushed.
    pub fn close_checkpoints(&mut self) {
        if let Some(mut writer) = self.checkpoints.take() {
            writer.close();
        }
    }

    /// Insert a shot and try to pair it with a pending impact
    pub fn insert_shot(&mut self, shot: ShotEvent) -> Option<CorrelatedPair> {
        self.stats.record_shot(shot.timestamp);
        let window = self.calibration.correlation_window_ms;

        self.pending_shots
            .retain(|s| millis_between(s.timestamp, shot.timestamp) <= window);

        let best = self
            .pending_impacts
            .iter()
            .enumerate()
            .filter_map(|(i, impact)| {
                let delay = millis_between(shot.timestamp, impact.timestamp);
                (0.0..=window).contains(&delay).then_some((i, delay))
            })
            .fold(None, |best: Option<(usize, f64)>, (i, delay)| {
                self.closer(best, i, delay)
            });

        if let Some((index, delay)) = best {
            if self.accepts(delay, self.pending_impacts[index].magnitude) {
                if let Some(impact) = self.pending_impacts.remove(index) {
                    return Some(self.accept(shot, impact));
                }
            }
            tracing::debug!(
                shot = shot.shot_number,
                delay_ms = delay,
                expected_delay_ms = self.calibration.expected_delay_ms,
                "correlation_rejected"
            );
        }

        tracing::debug!(
            device = %shot.device_id,
            shot = shot.shot_number,
            pending_impacts = self.pending_impacts.len(),
            "shot_pending"
        );
        insert_ordered(&mut self.pending_shots, shot, |s| s.timestamp);
        truncate_front(&mut self.pending_shots, self.calibration.pending_capacity);
        None
    }

    /// Insert an impact and try to pair it with a pending shot
    pub fn insert_impact(&mut self, impact: ImpactRecord) -> Option<CorrelatedPair> {
        let strong_enough = impact.magnitude >= self.calibration.minimum_magnitude;
        self.stats.record_impact(impact.timestamp, strong_enough);
        if !strong_enough {
            tracing::trace!(
                channel = %impact.channel_id,
                magnitude = impact.magnitude,
                minimum = self.calibration.minimum_magnitude,
                "impact_below_minimum"
            );
            return None;
        }
        let window = self.calibration.correlation_window_ms;

        self.pending_impacts
            .retain(|i| millis_between(i.timestamp, impact.timestamp) <= window);

        let best = self
            .pending_shots
            .iter()
            .enumerate()
            .filter_map(|(i, shot)| {
                let delay = millis_between(shot.timestamp, impact.timestamp);
                (0.0..=window).contains(&delay).then_some((i, delay))
            })
            .fold(None, |best: Option<(usize, f64)>, (i, delay)| {
                self.closer(best, i, delay)
            });

        if let Some((index, delay)) = best {
            if self.accepts(delay, impact.magnitude) {
                if let Some(shot) = self.pending_shots.remove(index) {
                    return Some(self.accept(shot, impact));
                }
            }
            tracing::debug!(
                channel = %impact.channel_id,
                delay_ms = delay,
                expected_delay_ms = self.calibration.expected_delay_ms,
                "correlation_rejected"
            );
        }

        insert_ordered(&mut self.pending_impacts, impact, |i| i.timestamp);
        truncate_front(&mut self.pending_impacts, self.calibration.pending_capacity);
        None
    }

    /// Keep whichever candidate is closer to the expected delay; ties keep the earlier one
    fn closer(&self, best: Option<(usize, f64)>, index: usize, delay: f64) -> Option<(usize, f64)> {
        let expected = self.calibration.expected_delay_ms;
        match best {
            Some((_, best_delay)) if (best_delay - expected).abs() <= (delay - expected).abs() => {
                best
            }
            _ => Some((index, delay)),
        }
    }

    fn accepts(&self, delay_ms: f64, magnitude: f64) -> bool {
        let c = &self.calibration;
        (0.0..=c.correlation_window_ms).contains(&delay_ms)
            && magnitude >= c.minimum_magnitude
            && (delay_ms - c.expected_delay_ms).abs() <= c.delay_tolerance_ms
    }

    fn accept(&mut self, shot: ShotEvent, impact: ImpactRecord) -> CorrelatedPair {
        let delay = millis_between(shot.timestamp, impact.timestamp);
        let pair = CorrelatedPair::new(shot, impact, self.calibration.confidence(delay));
        self.stats.record_pair(&pair);

        tracing::info!(
            shot = pair.shot.shot_number,
            timer = %pair.shot.device_id,
            channel = %pair.impact.channel_id,
            magnitude = pair.impact.magnitude,
            delay_ms = pair.delay_ms,
            confidence = pair.confidence,
            "shot_correlated"
        );

        if let Some((old, new)) = self.calibration.learn(pair.delay_ms) {
            tracing::info!(
                old_ms = old,
                new_ms = new,
                history = self.calibration.delay_history.len(),
                "expected_delay_updated"
            );
            self.checkpoint();
        }
        pair
    }

    fn checkpoint(&self) {
        if let Some(writer) = &self.checkpoints {
            writer.submit(&self.calibration);
        }
    }

    pub fn calibration(&self) -> &CalibrationState {
        &self.calibration
    }

    pub fn stats(&self) -> &CorrelationStats {
        &self.stats
    }

    pub fn pending_shots(&self) -> usize {
        self.pending_shots.len()
    }

    pub fn pending_impacts(&self) -> usize {
        self.pending_impacts.len()
    }
}

fn insert_ordered<T, K: Ord>(queue: &mut VecDeque<T>, item: T, key: impl Fn(&T) -> K) {
    let k = key(&item);
    let position = queue.partition_point(|existing| key(existing) <= k);
    queue.insert(position, item);
}

fn truncate_front<T>(queue: &mut VecDeque<T>, capacity: usize) {
    while queue.len() > capacity.max(1) {
        queue.pop_front();
    }
}
