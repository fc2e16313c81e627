//! Impact Bridge - shot timer and steel-target impact correlation
//!
//! This library re-exports the decoding, detection and correlation
//! functionality from `impact-bridge-core`.

pub use impact_bridge_core::{bridge, config, detect, error, sensor, stats, timing, wire};

pub use impact_bridge_core::{
    BridgeConfig, BridgeSession, CalibrationError, CalibrationState, ChannelEvent, ConfigError,
    CorrelatedPair, DecodeError, DetectorStrategy, DeviceKind, ImpactRecord, RawFrame,
    SessionRecord, ShotEvent, TimingCorrelator, TransportMessage,
};
pub use impact_bridge_core::{DEFAULT_BASELINE_SAMPLES, DEFAULT_BASELINE_TIMEOUT_MS, VERSION};
