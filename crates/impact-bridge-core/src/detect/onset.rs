//! Two-threshold onset detection
//!
//! A window opens on the first sample at or above `onset_threshold` and closes
//! on the first sample that falls back below it. Only windows whose peak
//! reaches `peak_threshold` become events, so small excursions never count as
//! impacts no matter how long they last.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ChannelEvent, ChannelEventSource};
use crate::sensor::baseline::CorrectedSample;
use crate::timing::millis_between;

/// Tuning parameters for [`OnsetDetector`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnsetParams {
    /// Magnitude that opens a window
    pub onset_threshold: f64,
    /// Magnitude the window peak must reach
    pub peak_threshold: f64,
    /// Minimum window length, counting the closing sample
    pub minimum_duration_samples: usize,
}

impl Default for OnsetParams {
    fn default() -> Self {
        Self {
            onset_threshold: 30.0,
            peak_threshold: 150.0,
            minimum_duration_samples: 3,
        }
    }
}

/// Impact reported with both onset and peak timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancedImpactEvent {
    pub channel_id: String,
    pub onset_timestamp: DateTime<Utc>,
    pub peak_timestamp: DateTime<Utc>,
    pub onset_magnitude: f64,
    pub peak_magnitude: f64,
    pub duration_ms: f64,
    pub sample_count: usize,
    /// Detection confidence in [0, 1]
    pub confidence: f64,
}

impl EnhancedImpactEvent {
    /// Rise time from onset to peak
    pub fn onset_to_peak_ms(&self) -> f64 {
        millis_between(self.onset_timestamp, self.peak_timestamp)
    }
}

/// Confidence score of an onset window
///
/// Weighs the onset-to-peak magnitude ratio (saturating at 5x), the window
/// length (saturating at 6 samples) and the peak strength relative to 1.5x
/// the peak threshold.
pub fn onset_confidence(
    onset_magnitude: f64,
    peak_magnitude: f64,
    sample_count: usize,
    peak_threshold: f64,
) -> f64 {
    let ratio = peak_magnitude / onset_magnitude.max(1.0);
    let magnitude_confidence = (ratio / 5.0).min(1.0);
    let duration_confidence = (sample_count as f64 / 6.0).min(1.0);
    let strength_confidence = if peak_threshold > 0.0 {
        (peak_magnitude / (peak_threshold * 1.5)).min(1.0)
    } else {
        1.0
    };

    (0.4 * magnitude_confidence + 0.3 * duration_confidence + 0.3 * strength_confidence)
        .clamp(0.0, 1.0)
}

/// Onset detector for one channel
#[derive(Debug)]
pub struct OnsetDetector {
    params: OnsetParams,
    channel_id: String,
    /// Open window as (timestamp, magnitude)
    window: Vec<(DateTime<Utc>, f64)>,
    in_impact: bool,
    events_emitted: u64,
    windows_discarded: u64,
}

impl OnsetDetector {
    pub fn new(params: OnsetParams, channel_id: impl Into<String>) -> Self {
        Self {
            params,
            channel_id: channel_id.into(),
            window: Vec::new(),
            in_impact: false,
            events_emitted: 0,
            windows_discarded: 0,
        }
    }

    /// Process one corrected magnitude
    pub fn process(
        &mut self,
        timestamp: DateTime<Utc>,
        magnitude: f64,
    ) -> Option<EnhancedImpactEvent> {
        if !self.in_impact {
            if magnitude >= self.params.onset_threshold {
                tracing::debug!(
                    channel = %self.channel_id,
                    magnitude = magnitude,
                    "impact_onset"
                );
                self.in_impact = true;
                self.window.clear();
                self.window.push((timestamp, magnitude));
            }
            return None;
        }

        self.window.push((timestamp, magnitude));
        if magnitude >= self.params.onset_threshold {
            return None;
        }

        self.in_impact = false;
        let window = std::mem::take(&mut self.window);
        let event = self.close_window(&window);
        if event.is_none() {
            self.windows_discarded += 1;
        }
        event
    }

    fn close_window(&mut self, window: &[(DateTime<Utc>, f64)]) -> Option<EnhancedImpactEvent> {
        if window.len() < self.params.minimum_duration_samples {
            tracing::trace!(
                channel = %self.channel_id,
                samples = window.len(),
                "impact_too_short"
            );
            return None;
        }

        let (onset_timestamp, onset_magnitude) = *window.first()?;
        let (last_timestamp, _) = *window.last()?;
        let (peak_timestamp, peak_magnitude) = window
            .iter()
            .copied()
            .fold((onset_timestamp, f64::MIN), |best, s| {
                if s.1 > best.1 {
                    s
                } else {
                    best
                }
            });

        if peak_magnitude < self.params.peak_threshold {
            tracing::trace!(
                channel = %self.channel_id,
                peak = peak_magnitude,
                threshold = self.params.peak_threshold,
                "impact_below_peak_threshold"
            );
            return None;
        }

        let confidence = onset_confidence(
            onset_magnitude,
            peak_magnitude,
            window.len(),
            self.params.peak_threshold,
        );
        let event = EnhancedImpactEvent {
            channel_id: self.channel_id.clone(),
            onset_timestamp,
            peak_timestamp,
            onset_magnitude,
            peak_magnitude,
            duration_ms: millis_between(onset_timestamp, last_timestamp),
            sample_count: window.len(),
            confidence,
        };
        self.events_emitted += 1;

        tracing::debug!(
            channel = %self.channel_id,
            onset_magnitude = onset_magnitude,
            peak_magnitude = peak_magnitude,
            onset_to_peak_ms = event.onset_to_peak_ms(),
            duration_ms = event.duration_ms,
            confidence = confidence,
            "impact_detected"
        );
        Some(event)
    }

    pub fn in_impact(&self) -> bool {
        self.in_impact
    }

    pub fn events_emitted(&self) -> u64 {
        self.events_emitted
    }

    pub fn windows_discarded(&self) -> u64 {
        self.windows_discarded
    }

    pub fn params(&self) -> &OnsetParams {
        &self.params
    }
}

impl ChannelEventSource for OnsetDetector {
    fn channel_id(&self) -> &str {
        &self.channel_id
    }

    fn process_sample(&mut self, sample: &CorrectedSample) -> Option<ChannelEvent> {
        self.process(sample.timestamp, sample.magnitude)
            .map(ChannelEvent::Onset)
    }

    fn is_active(&self) -> bool {
        self.in_impact
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone};

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 9, 17, 0, 0).unwrap() + Duration::milliseconds(ms)
    }

    fn run(detector: &mut OnsetDetector, magnitudes: &[f64]) -> Vec<EnhancedImpactEvent> {
        magnitudes
            .iter()
            .enumerate()
            .filter_map(|(i, &m)| detector.process(t(i as i64 * 50), m))
            .collect()
    }

    #[test]
    fn test_recorded_impact_sequence() {
        let mut detector = OnsetDetector::new(OnsetParams::default(), "plate");
        let magnitudes = [0.0, 6.0, 10.6, 64.2, 48.2, 83.6, 187.3, 151.1, 21.4, 7.5];
        let events = run(&mut detector, &magnitudes);

        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.onset_timestamp, t(150));
        assert_eq!(event.peak_timestamp, t(300));
        assert_eq!(event.onset_magnitude, 64.2);
        assert_eq!(event.peak_magnitude, 187.3);
        assert_eq!(event.sample_count, 6);
        assert_relative_eq!(event.duration_ms, 250.0);
        assert_relative_eq!(event.onset_to_peak_ms(), 150.0);

        let expected = 0.4 * (187.3 / 64.2 / 5.0) + 0.3 + 0.3 * (187.3 / 225.0);
        assert_relative_eq!(event.confidence, expected, epsilon = 1e-12);
        assert!(!detector.in_impact());
    }

    #[test]
    fn test_never_reaching_peak_threshold_discarded() {
        let mut detector = OnsetDetector::new(OnsetParams::default(), "plate");
        let mut magnitudes = vec![0.0];
        magnitudes.extend(std::iter::repeat(149.9).take(200));
        magnitudes.push(0.0);

        assert!(run(&mut detector, &magnitudes).is_empty());
        assert_eq!(detector.windows_discarded(), 1);
    }

    #[test]
    fn test_too_short_discarded() {
        let params = OnsetParams {
            minimum_duration_samples: 4,
            ..Default::default()
        };
        let mut detector = OnsetDetector::new(params, "plate");
        // Window is [200, 180, 5]: three samples
        assert!(run(&mut detector, &[0.0, 200.0, 180.0, 5.0]).is_empty());
    }

    #[test]
    fn test_window_open_until_drop() {
        let mut detector = OnsetDetector::new(OnsetParams::default(), "plate");
        assert!(detector.process(t(0), 40.0).is_none());
        assert!(detector.in_impact());
        assert!(detector.process(t(20), 300.0).is_none());
        assert!(detector.process(t(40), 30.0).is_none());
        let event = detector.process(t(60), 29.9).unwrap();
        assert_eq!(event.sample_count, 4);
        assert_eq!(event.peak_timestamp, t(20));
    }

    #[test]
    fn test_confidence_bounds() {
        assert_relative_eq!(onset_confidence(30.0, 1000.0, 20, 150.0), 1.0);
        let low = onset_confidence(150.0, 150.0, 3, 150.0);
        assert!(low > 0.0 && low < 1.0);
        // Onset below 1.0 is treated as 1.0
        assert_relative_eq!(
            onset_confidence(0.2, 5.0, 6, 150.0),
            0.4 + 0.3 + 0.3 * (5.0 / 225.0)
        );
    }

    #[test]
    fn test_consecutive_impacts() {
        let mut detector = OnsetDetector::new(OnsetParams::default(), "plate");
        let magnitudes = [0.0, 50.0, 200.0, 10.0, 0.0, 60.0, 220.0, 90.0, 12.0];
        let events = run(&mut detector, &magnitudes);
        assert_eq!(events.len(), 2);
        assert_eq!(detector.events_emitted(), 2);
        assert_eq!(events[1].peak_magnitude, 220.0);
    }
}
