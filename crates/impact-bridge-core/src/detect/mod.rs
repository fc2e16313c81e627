//! Impact detection strategies
//!
//! Three detectors turn a channel's baseline-corrected samples into discrete
//! events, each with a different trade-off:
//! - Envelope hysteresis with ring time and dead time ([`envelope`])
//! - Single-threshold, duration-gated pulse classification ([`spike`])
//! - Two-threshold onset timing with confidence ([`onset`])
//!
//! All three sit behind [`ChannelEventSource`] so a sensor pipeline can be
//! wired with any of them at startup.

pub mod envelope;
pub mod onset;
pub mod spike;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sensor::baseline::CorrectedSample;
use envelope::{EnvelopeDetector, EnvelopeParams, ImpactEvent};
use onset::{EnhancedImpactEvent, OnsetDetector, OnsetParams};
use spike::{SpikeClassifier, SpikeEvent, SpikeParams};

/// Discrete event produced by a channel detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelEvent {
    Envelope(ImpactEvent),
    Spike(SpikeEvent),
    Onset(EnhancedImpactEvent),
}

impl ChannelEvent {
    /// Channel the event was detected on
    pub fn channel_id(&self) -> &str {
        match self {
            ChannelEvent::Envelope(e) => &e.channel_id,
            ChannelEvent::Spike(e) => &e.channel_id,
            ChannelEvent::Onset(e) => &e.channel_id,
        }
    }

    /// Timestamp used for shot correlation
    ///
    /// Envelope events report their peak, spike events the first sample over
    /// threshold, onset events their onset.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ChannelEvent::Envelope(e) => e.peak_timestamp,
            ChannelEvent::Spike(e) => e.start_timestamp,
            ChannelEvent::Onset(e) => e.onset_timestamp,
        }
    }

    /// Strength of the event in the detector's input units
    pub fn magnitude(&self) -> f64 {
        match self {
            ChannelEvent::Envelope(e) => e.peak_amplitude,
            ChannelEvent::Spike(e) => e.max_deviation,
            ChannelEvent::Onset(e) => e.peak_magnitude,
        }
    }

    pub fn duration_ms(&self) -> f64 {
        match self {
            ChannelEvent::Envelope(e) => e.duration_ms,
            ChannelEvent::Spike(e) => e.span_ms,
            ChannelEvent::Onset(e) => e.duration_ms,
        }
    }
}

/// Per-channel detector fed with baseline-corrected samples
///
/// Implementations are owned by the task reading the channel's stream and
/// are never shared.
pub trait ChannelEventSource: Send {
    /// Channel this detector is bound to
    fn channel_id(&self) -> &str;

    /// Process one sample, returning an event when one completes
    fn process_sample(&mut self, sample: &CorrectedSample) -> Option<ChannelEvent>;

    /// Check if an event window is currently open
    fn is_active(&self) -> bool;
}

/// Which detector a sensor pipeline uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorStrategy {
    Envelope,
    Spike,
    #[default]
    Onset,
}

/// Strategy selection plus the parameters of every strategy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    pub strategy: DetectorStrategy,
    pub envelope: EnvelopeParams,
    pub spike: SpikeParams,
    pub onset: OnsetParams,
}

impl DetectorSettings {
    /// Build the configured detector for a channel
    pub fn build(&self, channel_id: &str) -> Box<dyn ChannelEventSource> {
        match self.strategy {
            DetectorStrategy::Envelope => {
                Box::new(EnvelopeDetector::new(self.envelope.clone(), channel_id))
            }
            DetectorStrategy::Spike => {
                Box::new(SpikeClassifier::new(self.spike.clone(), channel_id))
            }
            DetectorStrategy::Onset => Box::new(OnsetDetector::new(self.onset.clone(), channel_id)),
        }
    }
}
