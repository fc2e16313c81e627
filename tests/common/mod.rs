//! Shared fixtures for the end-to-end tests

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use impact_bridge::wire::VibrationFrameLayout;

/// Install a test-friendly subscriber once per test binary
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("impact_bridge_core=debug".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

/// Session-relative timestamp
pub fn t(ms: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 9, 17, 0, 0).unwrap() + Duration::milliseconds(ms)
}

/// Timer frame with the given state code, shot number and time in hundredths
pub fn timer_frame(state: u8, shot: u8, current_cs: u16) -> Vec<u8> {
    let [hi, lo] = current_cs.to_be_bytes();
    vec![1, state, shot, shot, hi, lo, 0, 0, 0, 0, 0, 0, 0, 0]
}

/// Sensor notification carrying the given raw readings
pub fn sensor_notification(layout: &VibrationFrameLayout, readings: &[[i16; 3]]) -> Vec<u8> {
    readings
        .iter()
        .flat_map(|r| layout.encode_subframe(*r))
        .collect()
}
