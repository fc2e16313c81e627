//! Sensor-side signal conditioning
//!
//! - Per-channel zero reference and noise estimation ([`baseline`])

pub mod baseline;
