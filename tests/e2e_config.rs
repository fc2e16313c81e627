//! E2E tests for loading a config file and running a session from it

mod common;

use common::t;
use impact_bridge::detect::ChannelEvent;
use impact_bridge::wire::VibrationFrameLayout;
use impact_bridge::{
    BridgeConfig, BridgeSession, DetectorStrategy, DeviceKind, RawFrame, SessionRecord,
    TransportMessage,
};

#[test]
fn test_partial_file_keeps_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bridge.json");
    std::fs::write(
        &path,
        r#"{ "baseline": { "sample_target": 5 }, "detector": { "strategy": "spike" } }"#,
    )
    .unwrap();

    let config = BridgeConfig::load(&path);
    assert_eq!(config.baseline.sample_target, 5);
    assert_eq!(config.baseline.timeout_ms, 30_000);
    assert_eq!(config.detector.strategy, DetectorStrategy::Spike);
    assert_eq!(config.detector.spike.threshold, 150.0);
    assert_eq!(config.timing.expected_delay_ms, 526.0);
    assert!(config.validate().is_ok());
}

#[test]
fn test_invalid_file_refuses_to_start() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bridge.json");
    std::fs::write(&path, r#"{ "detector": { "onset": { "onset_threshold": 500 } } }"#).unwrap();

    let config = BridgeConfig::load(&path);
    assert!(BridgeSession::start(config).is_err());
}

#[tokio::test]
async fn test_session_uses_configured_strategy() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bridge.json");

    let mut config = BridgeConfig::default();
    config.baseline.sample_target = 5;
    config.detector.strategy = DetectorStrategy::Spike;
    config.save(&path).unwrap();

    let layout = VibrationFrameLayout::default();
    let mut session = BridgeSession::start(BridgeConfig::load(&path)).unwrap();
    let mut records = session.records().unwrap();
    let sensor = session.attach(DeviceKind::Sensor);

    let mut readings = vec![[2089i16, 0, 0]; 5];
    readings.extend(std::iter::repeat([2400i16, 0, 0]).take(7));
    readings.push([2089, 0, 0]);
    for (i, reading) in readings.iter().enumerate() {
        let bytes = common::sensor_notification(&layout, &[*reading]);
        sensor
            .send(TransportMessage::Notification(RawFrame::new(
                "bt50",
                t(i as i64 * 20),
                bytes,
            )))
            .await
            .unwrap();
    }
    drop(sensor);
    session.shutdown().await.unwrap();

    let mut spikes = Vec::new();
    while let Some(record) = records.recv().await {
        if let SessionRecord::Impact {
            event: ChannelEvent::Spike(spike),
            ..
        } = record
        {
            spikes.push(spike);
        }
    }
    assert_eq!(spikes.len(), 1);
    assert_eq!(spikes[0].duration_samples, 7);
    assert_eq!(spikes[0].max_deviation, 311.0);
}
