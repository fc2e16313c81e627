//! Event records exchanged with the correlator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::millis_between;
use crate::detect::ChannelEvent;

/// A shot reported by a timer device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotEvent {
    /// Timestamp used for correlation
    pub timestamp: DateTime<Utc>,
    /// Local receipt time of the frame that reported the shot
    pub arrival: DateTime<Utc>,
    pub shot_number: u8,
    pub device_id: String,
}

impl ShotEvent {
    /// Shot stamped with its receipt time
    pub fn new(timestamp: DateTime<Utc>, shot_number: u8, device_id: impl Into<String>) -> Self {
        Self {
            timestamp,
            arrival: timestamp,
            shot_number,
            device_id: device_id.into(),
        }
    }

    /// Whether the correlation timestamp was derived from the timer's split time
    pub fn is_derived(&self) -> bool {
        self.timestamp != self.arrival
    }
}

/// An impact as seen by the correlator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactRecord {
    pub timestamp: DateTime<Utc>,
    pub magnitude: f64,
    pub device_id: String,
    pub channel_id: String,
}

impl ImpactRecord {
    pub fn new(
        timestamp: DateTime<Utc>,
        magnitude: f64,
        device_id: impl Into<String>,
        channel_id: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            magnitude,
            device_id: device_id.into(),
            channel_id: channel_id.into(),
        }
    }

    /// Impact record for a detector event on `device_id`
    ///
    /// Onset events correlate on their onset, envelope events on their peak.
    pub fn from_event(device_id: impl Into<String>, event: &ChannelEvent) -> Self {
        Self {
            timestamp: event.timestamp(),
            magnitude: event.magnitude(),
            device_id: device_id.into(),
            channel_id: event.channel_id().to_string(),
        }
    }
}

/// A shot matched to the impact it caused
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelatedPair {
    pub shot: ShotEvent,
    pub impact: ImpactRecord,
    /// Impact time minus shot time
    pub delay_ms: f64,
    /// Match confidence in [0, 1]
    pub confidence: f64,
}

impl CorrelatedPair {
    pub fn new(shot: ShotEvent, impact: ImpactRecord, confidence: f64) -> Self {
        let delay_ms = millis_between(shot.timestamp, impact.timestamp);
        Self {
            shot,
            impact,
            delay_ms,
            confidence,
        }
    }

    pub fn delay_seconds(&self) -> f64 {
        self.delay_ms / 1000.0
    }
}
