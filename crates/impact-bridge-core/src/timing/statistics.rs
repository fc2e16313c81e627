//! Batch delay statistics over a closed sample set
//!
//! Advisory companion to the online correlator: summarizes a fixed set of
//! observed shot-to-impact delays, projects impact times for new shots and
//! grades observed delays against the distribution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{millis_between, offset_millis};
use crate::error::CalibrationError;

/// Central value used to project an impact time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionStrategy {
    #[default]
    Median,
    Mean,
    Lower68,
    Upper68,
    Lower95,
    Upper95,
}

/// Where an observed delay falls relative to the confidence bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayBand {
    Within68,
    Within95,
    Below95,
    Above95,
}

/// Projected impact time for a shot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Projection {
    pub shot_timestamp: DateTime<Utc>,
    pub projected_impact: DateTime<Utc>,
    pub offset_ms: f64,
    pub strategy: ProjectionStrategy,
    /// One standard deviation
    pub uncertainty_ms: f64,
}

/// Grading of one observed delay
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DelayAnalysis {
    pub actual_delay_ms: f64,
    /// Median delay of the sample set
    pub predicted_delay_ms: f64,
    /// Actual impact minus median projection; positive means late
    pub prediction_error_ms: f64,
    pub band: DelayBand,
    pub within_one_sigma: bool,
    /// Approximate percentile under a normal model
    pub percentile: f64,
}

/// Summary statistics of a closed delay sample set
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticalCalibrator {
    pub sample_size: usize,
    pub mean_ms: f64,
    pub median_ms: f64,
    /// Population standard deviation
    pub std_dev_ms: f64,
    pub band_68: (f64, f64),
    pub band_95: (f64, f64),
}

impl StatisticalCalibrator {
    /// Summarize a set of delays in milliseconds
    pub fn from_delays(delays: &[f64]) -> Result<Self, CalibrationError> {
        if delays.is_empty() {
            return Err(CalibrationError::EmptySample);
        }
        let n = delays.len();
        let mut sorted = delays.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let mean = sorted.iter().sum::<f64>() / n as f64;
        let median = if n % 2 == 0 {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        } else {
            sorted[n / 2]
        };
        let std_dev = (sorted.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n as f64).sqrt();

        let calibrator = Self {
            sample_size: n,
            mean_ms: mean,
            median_ms: median,
            std_dev_ms: std_dev,
            band_68: (mean - std_dev, mean + std_dev),
            band_95: (mean - 1.96 * std_dev, mean + 1.96 * std_dev),
        };
        tracing::debug!(
            samples = n,
            mean_ms = mean,
            median_ms = median,
            std_dev_ms = std_dev,
            "delay_statistics_computed"
        );
        Ok(calibrator)
    }

    /// Delay offset a strategy projects with
    pub fn offset(&self, strategy: ProjectionStrategy) -> f64 {
        match strategy {
            ProjectionStrategy::Median => self.median_ms,
            ProjectionStrategy::Mean => self.mean_ms,
            ProjectionStrategy::Lower68 => self.band_68.0,
            ProjectionStrategy::Upper68 => self.band_68.1,
            ProjectionStrategy::Lower95 => self.band_95.0,
            ProjectionStrategy::Upper95 => self.band_95.1,
        }
    }

    /// Project the impact time of a shot
    pub fn project(&self, shot: DateTime<Utc>, strategy: ProjectionStrategy) -> Projection {
        let offset_ms = self.offset(strategy);
        Projection {
            shot_timestamp: shot,
            projected_impact: offset_millis(shot, offset_ms),
            offset_ms,
            strategy,
            uncertainty_ms: self.std_dev_ms,
        }
    }

    pub fn classify(&self, delay_ms: f64) -> DelayBand {
        if (self.band_68.0..=self.band_68.1).contains(&delay_ms) {
            DelayBand::Within68
        } else if (self.band_95.0..=self.band_95.1).contains(&delay_ms) {
            DelayBand::Within95
        } else if delay_ms < self.band_95.0 {
            DelayBand::Below95
        } else {
            DelayBand::Above95
        }
    }

    /// Approximate percentile of a delay, piecewise linear in the z-score
    pub fn percentile(&self, delay_ms: f64) -> f64 {
        let z = if self.std_dev_ms > 0.0 {
            (delay_ms - self.mean_ms) / self.std_dev_ms
        } else if delay_ms > self.mean_ms {
            f64::INFINITY
        } else if delay_ms < self.mean_ms {
            f64::NEG_INFINITY
        } else {
            0.0
        };

        if z <= -1.0 {
            16.0
        } else if z <= 0.0 {
            16.0 + 34.0 * (z + 1.0)
        } else if z <= 1.0 {
            50.0 + 34.0 * z
        } else {
            (84.0 + 16.0 * (z - 1.0).min(1.0)).min(100.0)
        }
    }

    /// Grade an observed shot/impact pair against the distribution
    pub fn analyze(&self, shot: DateTime<Utc>, impact: DateTime<Utc>) -> DelayAnalysis {
        let actual = millis_between(shot, impact);
        let projected = offset_millis(shot, self.median_ms);
        DelayAnalysis {
            actual_delay_ms: actual,
            predicted_delay_ms: self.median_ms,
            prediction_error_ms: millis_between(projected, impact),
            band: self.classify(actual),
            within_one_sigma: (actual - self.median_ms).abs() <= self.std_dev_ms,
            percentile: self.percentile(actual),
        }
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

    fn calibrator() -> StatisticalCalibrator {
        // mean 100, population sigma 20
        StatisticalCalibrator::from_delays(&[80.0, 120.0, 80.0, 120.0]).unwrap()
    }

    #[test]
    fn test_empty_rejected() {
        assert_eq!(
            StatisticalCalibrator::from_delays(&[]),
            Err(CalibrationError::EmptySample)
        );
    }

    #[test]
    fn test_summary() {
        let c = calibrator();
        assert_eq!(c.sample_size, 4);
        assert_relative_eq!(c.mean_ms, 100.0);
        assert_relative_eq!(c.median_ms, 100.0);
        assert_relative_eq!(c.std_dev_ms, 20.0);
        assert_relative_eq!(c.band_68.0, 100.0 - c.std_dev_ms);
        assert_relative_eq!(c.band_95.1, 139.2, epsilon = 1e-9);
    }

    #[test]
    fn test_median_odd_and_even() {
        let odd = StatisticalCalibrator::from_delays(&[50.0, 10.0, 30.0]).unwrap();
        assert_eq!(odd.median_ms, 30.0);
        let even = StatisticalCalibrator::from_delays(&[40.0, 10.0, 30.0, 20.0]).unwrap();
        assert_eq!(even.median_ms, 25.0);
    }

    #[test]
    fn test_projection_strategies() {
        let c = calibrator();
        let shot = t(0);
        assert_eq!(
            c.project(shot, ProjectionStrategy::Median).projected_impact,
            t(100)
        );
        assert_eq!(c.project(shot, ProjectionStrategy::Upper68).projected_impact, t(120));
        assert_eq!(c.project(shot, ProjectionStrategy::Lower68).projected_impact, t(80));
        let low95 = c.project(shot, ProjectionStrategy::Lower95);
        assert_relative_eq!(low95.offset_ms, 60.8, epsilon = 1e-9);
        assert_eq!(ProjectionStrategy::default(), ProjectionStrategy::Median);
    }

    #[test]
    fn test_classify() {
        let c = calibrator();
        assert_eq!(c.classify(100.0), DelayBand::Within68);
        assert_eq!(c.classify(130.0), DelayBand::Within95);
        assert_eq!(c.classify(50.0), DelayBand::Below95);
        assert_eq!(c.classify(150.0), DelayBand::Above95);
    }

    #[test]
    fn test_percentile() {
        let c = calibrator();
        assert_relative_eq!(c.percentile(100.0), 50.0);
        assert_relative_eq!(c.percentile(110.0), 67.0);
        assert_relative_eq!(c.percentile(90.0), 33.0);
        assert_relative_eq!(c.percentile(40.0), 16.0);
        assert_relative_eq!(c.percentile(130.0), 92.0);
        assert_relative_eq!(c.percentile(500.0), 100.0);
    }

    #[test]
    fn test_analyze() {
        let c = calibrator();
        let analysis = c.analyze(t(1000), t(1130));
        assert_relative_eq!(analysis.actual_delay_ms, 130.0);
        assert_relative_eq!(analysis.prediction_error_ms, 30.0);
        assert_eq!(analysis.band, DelayBand::Within95);
        assert!(!analysis.within_one_sigma);

        let early = c.analyze(t(1000), t(1090));
        assert!(early.within_one_sigma);
        assert_relative_eq!(early.prediction_error_ms, -10.0);
    }

    #[test]
    fn test_constant_delays() {
        let c = StatisticalCalibrator::from_delays(&[75.0, 75.0]).unwrap();
        assert_eq!(c.std_dev_ms, 0.0);
        assert_eq!(c.percentile(75.0), 50.0);
        assert_eq!(c.percentile(80.0), 100.0);
        assert_eq!(c.classify(75.0), DelayBand::Within68);
    }
}
