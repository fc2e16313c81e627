//! Wiring from transport notifications to correlated pairs
//!
//! [`pipeline`] holds the synchronous per-device chains (decode, baseline,
//! detect) and [`session`] runs them as tokio tasks feeding one correlator.

pub mod pipeline;
pub mod session;

pub use pipeline::{SensorBatch, SensorPipeline, TimerPipeline, TimerUpdate};
pub use session::{
    BridgeEvent, BridgeSession, CorrelatorHandle, CorrelatorTask, DeviceKind, SessionRecord,
    TransportMessage,
};
