//! Impact Bridge Core - Frame decoding, impact detection, and timing correlation
//!
//! This library pairs shots reported by a shot timer with impacts measured by a
//! vibration sensor mounted on a steel target. It decodes both devices' wire
//! frames, turns the continuous vibration stream into discrete impact events,
//! and correlates the two independently clocked event streams.

pub mod bridge;
pub mod config;
pub mod detect;
pub mod error;
pub mod sensor;
pub mod stats;
pub mod timing;
pub mod wire;

pub use bridge::pipeline::{SensorPipeline, TimerPipeline};
pub use bridge::session::{
    BridgeSession, CorrelatorHandle, DeviceKind, SessionRecord, TransportMessage,
};
pub use config::{BaselineSettings, BridgeConfig};
pub use detect::{ChannelEvent, ChannelEventSource, DetectorSettings, DetectorStrategy};
pub use error::{CalibrationError, ConfigError, DecodeError};
pub use sensor::baseline::{Baseline, BaselineCalibrator, CorrectedSample};
pub use stats::store::{CorrelationStats, CorrelationSummary};
pub use timing::correlator::{CalibrationState, TimingCorrelator};
pub use timing::events::{CorrelatedPair, ImpactRecord, ShotEvent};
pub use wire::{RawFrame, ShotTimerFrame, VibrationFrameLayout, VibrationSample};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default number of stationary samples collected for a baseline
pub const DEFAULT_BASELINE_SAMPLES: usize = 100;

/// Default baseline collection timeout in milliseconds
pub const DEFAULT_BASELINE_TIMEOUT_MS: u64 = 30_000;
