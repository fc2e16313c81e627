//! Device wire formats
//!
//! Pure, stateless decoders for the two devices' notification payloads:
//! - Shot timer frames ([`timer`])
//! - Vibration sensor notifications made of back-to-back sub-frames ([`vibration`])

pub mod timer;
pub mod vibration;

use chrono::{DateTime, Utc};

pub use timer::{decode_shot_frame, ShotState, ShotTimerFrame, TIMER_FRAME_LEN};
pub use vibration::{decode_vibration_notification, VibrationFrameLayout, VibrationSample};

/// Raw notification bytes as delivered by the transport layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Device that produced the notification
    pub device_id: String,
    /// Local receipt time of the notification
    pub arrival: DateTime<Utc>,
    /// Notification payload
    pub bytes: Vec<u8>,
}

impl RawFrame {
    pub fn new(device_id: impl Into<String>, arrival: DateTime<Utc>, bytes: Vec<u8>) -> Self {
        Self {
            device_id: device_id.into(),
            arrival,
            bytes,
        }
    }
}
