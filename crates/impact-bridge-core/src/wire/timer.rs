//! Shot timer frame decoding
//!
//! The timer sends fixed 14-byte notifications. Multi-byte fields are
//! big-endian; time fields are in hundredths of a second.
//!
//! ```text
//! offset  0      type id
//! offset  1      shot state (3 = active, 5 = start, 8 = stopped)
//! offset  2      shot number
//! offset  3      total shots
//! offset  4..6   current time
//! offset  6..8   split time
//! offset  8..10  first shot time
//! offset 10..12  second shot time
//! offset 12..14  round number
//! ```

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Length of a timer notification in bytes
pub const TIMER_FRAME_LEN: usize = 14;

/// Shot state reported in byte 1 of a timer frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShotState {
    /// A shot was registered
    Active,
    /// Start beep sounded, a new string begins
    Start,
    /// The string was stopped
    Stopped,
    /// State code this decoder does not recognize
    Unknown(u8),
}

impl ShotState {
    pub fn from_code(code: u8) -> Self {
        match code {
            3 => ShotState::Active,
            5 => ShotState::Start,
            8 => ShotState::Stopped,
            other => ShotState::Unknown(other),
        }
    }

    /// Wire code for this state
    pub fn code(&self) -> u8 {
        match self {
            ShotState::Active => 3,
            ShotState::Start => 5,
            ShotState::Stopped => 8,
            ShotState::Unknown(code) => *code,
        }
    }
}

/// Decoded shot timer notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotTimerFrame {
    pub type_id: u8,
    pub shot_state: ShotState,
    pub shot_number: u8,
    pub total_shots: u8,
    /// Current time in hundredths of a second
    pub current_time_cs: u16,
    /// Split time in hundredths of a second
    pub split_time_cs: u16,
    /// First shot time in hundredths of a second
    pub first_shot_time_cs: u16,
    /// Second shot time in hundredths of a second
    pub second_shot_time_cs: u16,
    pub round_number: u16,
}

fn be_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

fn centis_to_secs(value: u16) -> f64 {
    value as f64 / 100.0
}

/// Decode a shot timer notification
///
/// Buffers shorter than [`TIMER_FRAME_LEN`] are rejected outright; nothing is
/// partially decoded. Bytes past the 14th are ignored.
///
/// # Example
/// ```
/// use impact_bridge_core::wire::timer::{decode_shot_frame, ShotState};
///
/// let bytes = [0x01, 0x03, 0x05, 0x00, 0x01, 0x2C, 0, 0, 0, 0, 0, 0, 0, 0];
/// let frame = decode_shot_frame(&bytes).unwrap();
/// assert_eq!(frame.shot_state, ShotState::Active);
/// assert_eq!(frame.shot_number, 5);
/// assert!((frame.current_time() - 3.0).abs() < 1e-9);
/// ```
pub fn decode_shot_frame(bytes: &[u8]) -> Result<ShotTimerFrame, DecodeError> {
    if bytes.len() < TIMER_FRAME_LEN {
        return Err(DecodeError::TooShort {
            len: bytes.len(),
            required: TIMER_FRAME_LEN,
        });
    }

    Ok(ShotTimerFrame {
        type_id: bytes[0],
        shot_state: ShotState::from_code(bytes[1]),
        shot_number: bytes[2],
        total_shots: bytes[3],
        current_time_cs: be_u16(bytes, 4),
        split_time_cs: be_u16(bytes, 6),
        first_shot_time_cs: be_u16(bytes, 8),
        second_shot_time_cs: be_u16(bytes, 10),
        round_number: be_u16(bytes, 12),
    })
}

impl ShotTimerFrame {
    /// Current time in seconds
    pub fn current_time(&self) -> f64 {
        centis_to_secs(self.current_time_cs)
    }

    /// Split time in seconds
    pub fn split_time(&self) -> f64 {
        centis_to_secs(self.split_time_cs)
    }

    /// First shot time in seconds
    pub fn first_shot_time(&self) -> f64 {
        centis_to_secs(self.first_shot_time_cs)
    }

    /// Second shot time in seconds
    pub fn second_shot_time(&self) -> f64 {
        centis_to_secs(self.second_shot_time_cs)
    }

    /// Encode back into the 14-byte wire layout
    pub fn encode(&self) -> [u8; TIMER_FRAME_LEN] {
        let mut out = [0u8; TIMER_FRAME_LEN];
        out[0] = self.type_id;
        out[1] = self.shot_state.code();
        out[2] = self.shot_number;
        out[3] = self.total_shots;
        out[4..6].copy_from_slice(&self.current_time_cs.to_be_bytes());
        out[6..8].copy_from_slice(&self.split_time_cs.to_be_bytes());
        out[8..10].copy_from_slice(&self.first_shot_time_cs.to_be_bytes());
        out[10..12].copy_from_slice(&self.second_shot_time_cs.to_be_bytes());
        out[12..14].copy_from_slice(&self.round_number.to_be_bytes());
        out
    }

    /// Human-readable one-line summary for event logs
    pub fn describe(&self) -> String {
        match self.shot_state {
            ShotState::Start => format!("Timer Started (Round {})", self.round_number),
            ShotState::Stopped => format!("Timer Stopped - Total: {:.2}s", self.current_time()),
            ShotState::Active if (10..=26).contains(&self.type_id) => format!(
                "Shot Sequence {}/{}: {:.2}s",
                self.shot_number,
                self.total_shots,
                self.current_time()
            ),
            ShotState::Active => {
                format!("Shot {}: {:.2}s", self.shot_number, self.current_time())
            }
            ShotState::Unknown(code) => {
                format!("State {}: {:.2}s", code, self.current_time())
            }
        }
    }
}
