//! Shot/impact timing: event records, shot derivation from timer frames,
//! online correlation, batch statistics and calibration checkpoints

pub mod correlator;
pub mod events;
pub mod persist;
pub mod shot_clock;
pub mod statistics;

use chrono::{DateTime, Utc};

/// Signed milliseconds from `from` to `to`, with microsecond resolution
pub fn millis_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let delta = to - from;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1000.0,
        None => delta.num_milliseconds() as f64,
    }
}

/// Offset a timestamp by fractional milliseconds
pub fn offset_millis(base: DateTime<Utc>, ms: f64) -> DateTime<Utc> {
    base + chrono::Duration::microseconds((ms * 1000.0).round() as i64)
}
