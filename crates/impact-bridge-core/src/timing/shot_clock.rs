//! Shot derivation from decoded timer frames
//!
//! A timer reports a string as a Start frame (the start beep), one Active
//! frame per shot carrying the time since the beep, and a Stopped frame.
//! The clock remembers the local receipt time of each device's start beep so
//! a shot can be stamped on the local clock as `start + current_time`,
//! independent of notification latency.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::events::ShotEvent;
use super::offset_millis;
use crate::wire::timer::{ShotState, ShotTimerFrame};

/// Settings for [`ShotClock`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShotClockSettings {
    /// Stamp shots with start beep + frame time instead of receipt time
    pub derive_from_split: bool,
}

impl Default for ShotClockSettings {
    fn default() -> Self {
        Self {
            derive_from_split: true,
        }
    }
}

#[derive(Debug, Default)]
struct StringState {
    started_at: Option<DateTime<Utc>>,
    last_shot_number: Option<u8>,
    shots: u32,
}

/// Per-device shot string tracker
#[derive(Debug, Default)]
pub struct ShotClock {
    settings: ShotClockSettings,
    devices: HashMap<String, StringState>,
}

impl ShotClock {
    pub fn new(settings: ShotClockSettings) -> Self {
        Self {
            settings,
            devices: HashMap::new(),
        }
    }

    /// Observe one frame from a timer device
    ///
    /// # Returns
    /// `Some(ShotEvent)` for a new shot; `None` for start, stop, unknown or
    /// repeated frames
    pub fn observe(
        &mut self,
        device_id: &str,
        arrival: DateTime<Utc>,
        frame: &ShotTimerFrame,
    ) -> Option<ShotEvent> {
        let state = self.devices.entry(device_id.to_string()).or_default();

        match frame.shot_state {
            ShotState::Start => {
                tracing::info!(device = device_id, "timer_string_started");
                *state = StringState {
                    started_at: Some(arrival),
                    ..Default::default()
                };
                None
            }
            ShotState::Stopped => {
                tracing::info!(
                    device = device_id,
                    shots = state.shots,
                    total_shots = frame.total_shots,
                    "timer_string_stopped"
                );
                state.started_at = None;
                state.last_shot_number = None;
                None
            }
            ShotState::Unknown(code) => {
                tracing::warn!(
                    device = device_id,
                    code = code,
                    "timer_unknown_shot_state"
                );
                None
            }
            ShotState::Active => {
                if state.last_shot_number == Some(frame.shot_number) {
                    tracing::trace!(
                        device = device_id,
                        shot = frame.shot_number,
                        "timer_duplicate_shot"
                    );
                    return None;
                }
                state.last_shot_number = Some(frame.shot_number);
                state.shots += 1;

                let timestamp = match state.started_at {
                    Some(start) if self.settings.derive_from_split => {
                        offset_millis(start, frame.current_time_cs as f64 * 10.0)
                    }
                    _ => arrival,
                };

                tracing::info!(
                    device = device_id,
                    shot = frame.shot_number,
                    current_time_s = frame.current_time(),
                    split_time_s = frame.split_time(),
                    derived = timestamp != arrival,
                    "timer_shot"
                );

                Some(ShotEvent {
                    timestamp,
                    arrival,
                    shot_number: frame.shot_number,
                    device_id: device_id.to_string(),
                })
            }
        }
    }

    /// Check if a device is inside a started string
    pub fn string_active(&self, device_id: &str) -> bool {
        self.devices
            .get(device_id)
            .map(|s| s.started_at.is_some())
            .unwrap_or(false)
    }

    /// Shots seen since the device's last start beep
    pub fn shots_in_string(&self, device_id: &str) -> u32 {
        self.devices.get(device_id).map(|s| s.shots).unwrap_or(0)
    }

    /// Forget a device's string state, e.g. after a disconnect
    pub fn forget(&mut self, device_id: &str) {
        self.devices.remove(device_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 9, 17, 0, 0).unwrap() + Duration::milliseconds(ms)
    }

    fn frame(state: ShotState, shot_number: u8, current_time_cs: u16) -> ShotTimerFrame {
        ShotTimerFrame {
            type_id: 1,
            shot_state: state,
            shot_number,
            total_shots: shot_number,
            current_time_cs,
            split_time_cs: 0,
            first_shot_time_cs: 0,
            second_shot_time_cs: 0,
            round_number: 0,
        }
    }

    #[test]
    fn test_derived_timestamp() {
        let mut clock = ShotClock::new(ShotClockSettings::default());
        assert!(clock.observe("amg", t(0), &frame(ShotState::Start, 0, 0)).is_none());
        assert!(clock.string_active("amg"));

        let shot = clock
            .observe("amg", t(1350), &frame(ShotState::Active, 1, 123))
            .unwrap();
        assert_eq!(shot.timestamp, t(1230));
        assert_eq!(shot.arrival, t(1350));
        assert!(shot.is_derived());
        assert_eq!(clock.shots_in_string("amg"), 1);
    }

    #[test]
    fn test_arrival_timestamp_without_start() {
        let mut clock = ShotClock::new(ShotClockSettings::default());
        let shot = clock
            .observe("amg", t(500), &frame(ShotState::Active, 1, 123))
            .unwrap();
        assert_eq!(shot.timestamp, t(500));
        assert!(!shot.is_derived());
    }

    #[test]
    fn test_derivation_disabled() {
        let mut clock = ShotClock::new(ShotClockSettings {
            derive_from_split: false,
        });
        clock.observe("amg", t(0), &frame(ShotState::Start, 0, 0));
        let shot = clock
            .observe("amg", t(1350), &frame(ShotState::Active, 1, 123))
            .unwrap();
        assert_eq!(shot.timestamp, t(1350));
    }

    #[test]
    fn test_unknown_state_produces_no_shot() {
        let mut clock = ShotClock::new(ShotClockSettings::default());
        assert!(clock
            .observe("amg", t(0), &frame(ShotState::Unknown(9), 2, 10))
            .is_none());
        assert_eq!(clock.shots_in_string("amg"), 0);
    }

    #[test]
    fn test_duplicate_frames_ignored() {
        let mut clock = ShotClock::new(ShotClockSettings::default());
        clock.observe("amg", t(0), &frame(ShotState::Start, 0, 0));
        assert!(clock
            .observe("amg", t(100), &frame(ShotState::Active, 1, 10))
            .is_some());
        assert!(clock
            .observe("amg", t(120), &frame(ShotState::Active, 1, 10))
            .is_none());
        assert!(clock
            .observe("amg", t(900), &frame(ShotState::Active, 2, 85))
            .is_some());
        assert_eq!(clock.shots_in_string("amg"), 2);
    }

    #[test]
    fn test_stop_ends_string() {
        let mut clock = ShotClock::new(ShotClockSettings::default());
        clock.observe("amg", t(0), &frame(ShotState::Start, 0, 0));
        clock.observe("amg", t(100), &frame(ShotState::Active, 1, 10));
        clock.observe("amg", t(3000), &frame(ShotState::Stopped, 1, 10));
        assert!(!clock.string_active("amg"));

        // A later shot without a new beep falls back to arrival time
        let shot = clock
            .observe("amg", t(5000), &frame(ShotState::Active, 1, 10))
            .unwrap();
        assert_eq!(shot.timestamp, t(5000));
    }

    #[test]
    fn test_devices_independent() {
        let mut clock = ShotClock::new(ShotClockSettings::default());
        clock.observe("amg-1", t(0), &frame(ShotState::Start, 0, 0));
        assert!(clock.string_active("amg-1"));
        assert!(!clock.string_active("amg-2"));

        clock.forget("amg-1");
        assert!(!clock.string_active("amg-1"));
    }
}
