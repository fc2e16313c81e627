//! Correlation statistics for a session
//!
//! Counts shots, impacts and pairs, and keeps a bounded history of recent
//! pairs for delay and confidence summaries.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

use crate::timing::events::CorrelatedPair;

/// Maximum number of recent pairs kept for summaries
const MAX_PAIR_HISTORY: usize = 100;

/// One correlated pair reduced to its measurements
#[derive(Debug, Clone, PartialEq)]
pub struct PairMeasurement {
    /// Shot timestamp of the pair
    pub timestamp: DateTime<Utc>,
    pub delay_ms: f64,
    pub confidence: f64,
}

/// Delay distribution over the recent pair history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DelaySummary {
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
    pub median_ms: f64,
    /// Sample standard deviation, 0 with fewer than two pairs
    pub stdev_ms: f64,
}

/// Confidence range over the recent pair history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfidenceSummary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

/// Snapshot of the session counters and summaries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationSummary {
    pub shots_received: u64,
    pub impacts_received: u64,
    /// Impacts dropped for falling under the minimum magnitude
    pub impacts_filtered: u64,
    pub pairs_correlated: u64,
    /// Pairs per shot received
    pub correlation_rate: f64,
    pub delay: Option<DelaySummary>,
    pub confidence: Option<ConfidenceSummary>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Running correlation statistics
#[derive(Debug)]
pub struct CorrelationStats {
    shots_received: u64,
    impacts_received: u64,
    impacts_filtered: u64,
    pairs_correlated: u64,
    /// Recent pairs, oldest first
    pair_history: VecDeque<PairMeasurement>,
    max_size: usize,
    last_updated: Option<DateTime<Utc>>,
}

impl Default for CorrelationStats {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationStats {
    pub fn new() -> Self {
        Self::with_capacity(MAX_PAIR_HISTORY)
    }

    /// Create with a custom pair history bound
    pub fn with_capacity(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            shots_received: 0,
            impacts_received: 0,
            impacts_filtered: 0,
            pairs_correlated: 0,
            pair_history: VecDeque::with_capacity(max_size),
            max_size,
            last_updated: None,
        }
    }

    pub fn record_shot(&mut self, timestamp: DateTime<Utc>) {
        self.shots_received += 1;
        self.last_updated = Some(timestamp);
    }

    /// Record an impact offered to the correlator
    ///
    /// # Arguments
    /// * `accepted` - false when the impact was dropped for low magnitude
    pub fn record_impact(&mut self, timestamp: DateTime<Utc>, accepted: bool) {
        self.impacts_received += 1;
        if !accepted {
            self.impacts_filtered += 1;
        }
        self.last_updated = Some(timestamp);
    }

    pub fn record_pair(&mut self, pair: &CorrelatedPair) {
        self.pairs_correlated += 1;
        if self.pair_history.len() >= self.max_size {
            self.pair_history.pop_front();
        }
        self.pair_history.push_back(PairMeasurement {
            timestamp: pair.shot.timestamp,
            delay_ms: pair.delay_ms,
            confidence: pair.confidence,
        });
    }

    pub fn shots_received(&self) -> u64 {
        self.shots_received
    }

    pub fn impacts_received(&self) -> u64 {
        self.impacts_received
    }

    pub fn pairs_correlated(&self) -> u64 {
        self.pairs_correlated
    }

    /// Pairs per shot received, 0 before the first shot
    pub fn correlation_rate(&self) -> f64 {
        if self.shots_received == 0 {
            0.0
        } else {
            self.pairs_correlated as f64 / self.shots_received as f64
        }
    }

    pub fn pair_history(&self) -> &VecDeque<PairMeasurement> {
        &self.pair_history
    }

    pub fn delay_summary(&self) -> Option<DelaySummary> {
        if self.pair_history.is_empty() {
            return None;
        }
        let mut delays: Vec<f64> = self.pair_history.iter().map(|p| p.delay_ms).collect();
        delays.sort_by(|a, b| a.total_cmp(b));

        let n = delays.len();
        let mean = delays.iter().sum::<f64>() / n as f64;
        let median = if n % 2 == 0 {
            (delays[n / 2 - 1] + delays[n / 2]) / 2.0
        } else {
            delays[n / 2]
        };
        let stdev = if n > 1 {
            let var = delays.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
            var.sqrt()
        } else {
            0.0
        };

        Some(DelaySummary {
            min_ms: delays[0],
            max_ms: delays[n - 1],
            mean_ms: mean,
            median_ms: median,
            stdev_ms: stdev,
        })
    }

    pub fn confidence_summary(&self) -> Option<ConfidenceSummary> {
        if self.pair_history.is_empty() {
            return None;
        }
        let mut min = f64::MAX;
        let mut max = f64::MIN;
        let mut sum = 0.0;
        for p in &self.pair_history {
            min = min.min(p.confidence);
            max = max.max(p.confidence);
            sum += p.confidence;
        }
        Some(ConfidenceSummary {
            min,
            max,
            mean: sum / self.pair_history.len() as f64,
        })
    }

    pub fn summary(&self) -> CorrelationSummary {
        CorrelationSummary {
            shots_received: self.shots_received,
            impacts_received: self.impacts_received,
            impacts_filtered: self.impacts_filtered,
            pairs_correlated: self.pairs_correlated,
            correlation_rate: self.correlation_rate(),
            delay: self.delay_summary(),
            confidence: self.confidence_summary(),
            last_updated: self.last_updated,
        }
    }

    /// Reset all counters and history
    pub fn clear(&mut self) {
        *self = Self::with_capacity(self.max_size);
    }
}
