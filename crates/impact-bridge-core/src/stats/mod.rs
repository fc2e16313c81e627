//! Session statistics

pub mod store;

pub use store::{CorrelationStats, CorrelationSummary, DelaySummary};
