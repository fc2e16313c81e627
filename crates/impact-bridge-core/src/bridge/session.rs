//! Session wiring on tokio
//!
//! Every attached device gets its own stream task that runs the synchronous
//! pipeline for that device and forwards discrete events. A single correlator
//! task owns the [`TimingCorrelator`] and consumes the merged event channel,
//! so pending-queue mutation is serialized without locks. [`CorrelatorHandle`]
//! is the lock-based alternative for callers that drive correlation directly.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::pipeline::{SensorPipeline, TimerPipeline};
use crate::config::BridgeConfig;
use crate::detect::ChannelEvent;
use crate::error::{CalibrationError, ConfigError};
use crate::stats::store::CorrelationSummary;
use crate::timing::correlator::{CalibrationState, TimingCorrelator};
use crate::timing::events::{CorrelatedPair, ImpactRecord, ShotEvent};
use crate::timing::persist::CalibrationStore;
use crate::wire::RawFrame;

/// Capacity of the transport, event and record channels
const CHANNEL_CAPACITY: usize = 256;

/// Kind of device behind a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Timer,
    Sensor,
}

/// Message delivered by the transport layer for one device
#[derive(Debug, Clone, PartialEq)]
pub enum TransportMessage {
    Connected {
        device_id: String,
        at: DateTime<Utc>,
    },
    Notification(RawFrame),
    Disconnected {
        device_id: String,
        at: DateTime<Utc>,
    },
}

/// Event forwarded from a stream task to the correlator task
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    Shot(ShotEvent),
    Impact {
        device_id: String,
        event: ChannelEvent,
    },
    CalibrationFailed {
        device_id: String,
        error: CalibrationError,
    },
    Connection {
        device_id: String,
        kind: DeviceKind,
        connected: bool,
        at: DateTime<Utc>,
    },
}

/// Record emitted by a session for downstream logging
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum SessionRecord {
    Shot(ShotEvent),
    Impact {
        device_id: String,
        event: ChannelEvent,
    },
    Pair(CorrelatedPair),
    CalibrationFailed {
        device_id: String,
        message: String,
    },
    Connection {
        device_id: String,
        kind: DeviceKind,
        connected: bool,
        at: DateTime<Utc>,
    },
}

/// Commands handled by the correlator task
pub enum CorrelatorCommand {
    Event(BridgeEvent),
    GetSummary {
        reply: oneshot::Sender<CorrelationSummary>,
    },
    GetCalibration {
        reply: oneshot::Sender<CalibrationState>,
    },
}

/// Handle to the correlator task
#[derive(Clone)]
pub struct CorrelatorTask {
    tx: mpsc::Sender<CorrelatorCommand>,
}

impl CorrelatorTask {
    /// Spawn the correlator task
    ///
    /// The task ends once every handle is dropped and returns the correlator.
    /// Records are sent with backpressure, so `records` must be drained.
    pub fn spawn(
        mut correlator: TimingCorrelator,
        records: mpsc::Sender<SessionRecord>,
    ) -> (Self, JoinHandle<TimingCorrelator>) {
        let (tx, mut rx) = mpsc::channel::<CorrelatorCommand>(CHANNEL_CAPACITY);

        let task = tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    CorrelatorCommand::Event(event) => {
                        for record in handle_event(&mut correlator, event) {
                            if records.send(record).await.is_err() {
                                tracing::trace!("session_records_dropped");
                            }
                        }
                    }
                    CorrelatorCommand::GetSummary { reply } => {
                        let _ = reply.send(correlator.stats().summary());
                    }
                    CorrelatorCommand::GetCalibration { reply } => {
                        let _ = reply.send(correlator.calibration().clone());
                    }
                }
            }
            tracing::debug!("correlator_task_stopped");
            correlator
        });

        (Self { tx }, task)
    }

    pub async fn submit(&self, event: BridgeEvent) -> anyhow::Result<()> {
        self.tx
            .send(CorrelatorCommand::Event(event))
            .await
            .map_err(|_| anyhow::anyhow!("Correlator task stopped"))
    }

    pub async fn summary(&self) -> anyhow::Result<CorrelationSummary> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(CorrelatorCommand::GetSummary { reply })
            .await
            .map_err(|_| anyhow::anyhow!("Correlator task stopped"))?;
        rx.await.map_err(|_| anyhow::anyhow!("Correlator task stopped"))
    }

    pub async fn calibration(&self) -> anyhow::Result<CalibrationState> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(CorrelatorCommand::GetCalibration { reply })
            .await
            .map_err(|_| anyhow::anyhow!("Correlator task stopped"))?;
        rx.await.map_err(|_| anyhow::anyhow!("Correlator task stopped"))
    }
}

fn handle_event(correlator: &mut TimingCorrelator, event: BridgeEvent) -> Vec<SessionRecord> {
    let mut records = Vec::with_capacity(2);
    match event {
        BridgeEvent::Shot(shot) => {
            records.push(SessionRecord::Shot(shot.clone()));
            if let Some(pair) = correlator.insert_shot(shot) {
                records.push(SessionRecord::Pair(pair));
            }
        }
        BridgeEvent::Impact { device_id, event } => {
            let impact = ImpactRecord::from_event(device_id.clone(), &event);
            records.push(SessionRecord::Impact { device_id, event });
            if let Some(pair) = correlator.insert_impact(impact) {
                records.push(SessionRecord::Pair(pair));
            }
        }
        BridgeEvent::CalibrationFailed { device_id, error } => {
            tracing::warn!(device = %device_id, error = %error, "sensor_calibration_failed");
            records.push(SessionRecord::CalibrationFailed {
                device_id,
                message: error.to_string(),
            });
        }
        BridgeEvent::Connection {
            device_id,
            kind,
            connected,
            at,
        } => {
            tracing::info!(device = %device_id, kind = ?kind, connected = connected, "device_connection");
            records.push(SessionRecord::Connection {
                device_id,
                kind,
                connected,
                at,
            });
        }
    }
    records
}

/// Drive one timer device's notifications into the correlator
pub async fn run_timer_stream(
    mut rx: mpsc::Receiver<TransportMessage>,
    mut pipeline: TimerPipeline,
    correlator: CorrelatorTask,
) {
    while let Some(message) = rx.recv().await {
        let event = match message {
            TransportMessage::Connected { device_id, at } => Some(BridgeEvent::Connection {
                device_id,
                kind: DeviceKind::Timer,
                connected: true,
                at,
            }),
            TransportMessage::Disconnected { device_id, at } => {
                pipeline.disconnect(&device_id);
                Some(BridgeEvent::Connection {
                    device_id,
                    kind: DeviceKind::Timer,
                    connected: false,
                    at,
                })
            }
            TransportMessage::Notification(raw) => match pipeline.process(&raw) {
                Ok(update) => update.shot.map(BridgeEvent::Shot),
                Err(_) => None,
            },
        };

        if let Some(event) = event {
            if correlator.submit(event).await.is_err() {
                tracing::warn!("timer_stream_correlator_gone");
                break;
            }
        }
    }
    tracing::debug!("timer_stream_ended");
}

/// Drive one sensor device's notifications into the correlator
pub async fn run_sensor_stream(
    mut rx: mpsc::Receiver<TransportMessage>,
    mut pipeline: SensorPipeline,
    correlator: CorrelatorTask,
) {
    while let Some(message) = rx.recv().await {
        let mut events = Vec::new();
        match message {
            TransportMessage::Connected { device_id, at } => {
                if let Err(e) = pipeline.connect(&device_id, at) {
                    tracing::warn!(device = %device_id, error = %e, "sensor_connect_calibration_skipped");
                }
                events.push(BridgeEvent::Connection {
                    device_id,
                    kind: DeviceKind::Sensor,
                    connected: true,
                    at,
                });
            }
            TransportMessage::Disconnected { device_id, at } => {
                if let Err(error) = pipeline.check_timeout(&device_id, at) {
                    events.push(BridgeEvent::CalibrationFailed {
                        device_id: device_id.clone(),
                        error,
                    });
                }
                events.push(BridgeEvent::Connection {
                    device_id,
                    kind: DeviceKind::Sensor,
                    connected: false,
                    at,
                });
            }
            TransportMessage::Notification(raw) => match pipeline.process(&raw) {
                Ok(batch) => {
                    if let Some(baseline) = &batch.calibrated {
                        tracing::info!(
                            device = %raw.device_id,
                            samples = baseline.sample_count,
                            "sensor_ready"
                        );
                    }
                    events.extend(batch.events.into_iter().map(|event| BridgeEvent::Impact {
                        device_id: raw.device_id.clone(),
                        event,
                    }));
                }
                Err(error @ CalibrationError::Timeout { .. }) => {
                    events.push(BridgeEvent::CalibrationFailed {
                        device_id: raw.device_id.clone(),
                        error,
                    });
                }
                Err(e) => {
                    tracing::trace!(device = %raw.device_id, error = %e, "sensor_notification_dropped");
                }
            },
        }

        for event in events {
            if correlator.submit(event).await.is_err() {
                tracing::warn!("sensor_stream_correlator_gone");
                return;
            }
        }
    }
    tracing::debug!("sensor_stream_ended");
}

/// A running bridge session
///
/// Must be started inside a tokio runtime.
pub struct BridgeSession {
    config: BridgeConfig,
    correlator: CorrelatorTask,
    correlator_task: JoinHandle<TimingCorrelator>,
    streams: Vec<JoinHandle<()>>,
    records: Option<mpsc::Receiver<SessionRecord>>,
}

impl BridgeSession {
    /// Validate the config, warm-start calibration and spawn the correlator task
    pub fn start(config: BridgeConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let correlator = match &config.calibration_file {
            Some(path) => {
                let store = CalibrationStore::new(path);
                let calibration = store.load_or(config.timing.clone());
                TimingCorrelator::new(calibration).with_store(store)
            }
            None => TimingCorrelator::new(config.timing.clone()),
        };

        let (records_tx, records_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (handle, task) = CorrelatorTask::spawn(correlator, records_tx);
        tracing::info!(
            strategy = ?config.detector.strategy,
            "bridge_session_started"
        );

        Ok(Self {
            config,
            correlator: handle,
            correlator_task: task,
            streams: Vec::new(),
            records: Some(records_rx),
        })
    }

    /// Spawn a stream task for one device and return its transport sender
    pub fn attach(&mut self, kind: DeviceKind) -> mpsc::Sender<TransportMessage> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let correlator = self.correlator.clone();
        let task = match kind {
            DeviceKind::Timer => {
                let pipeline = TimerPipeline::from_config(&self.config);
                tokio::spawn(run_timer_stream(rx, pipeline, correlator))
            }
            DeviceKind::Sensor => {
                let pipeline = SensorPipeline::from_config(&self.config);
                tokio::spawn(run_sensor_stream(rx, pipeline, correlator))
            }
        };
        self.streams.push(task);
        tx
    }

    /// Take the record stream; returns `None` after the first call
    pub fn records(&mut self) -> Option<mpsc::Receiver<SessionRecord>> {
        self.records.take()
    }

    pub fn correlator(&self) -> &CorrelatorTask {
        &self.correlator
    }

    /// Wait for every stream to end, then stop the correlator task
    ///
    /// Streams end when their transport senders are dropped. Pending
    /// calibration checkpoints are flushed; the returned correlator no longer
    /// checkpoints.
    pub async fn shutdown(self) -> anyhow::Result<TimingCorrelator> {
        let Self {
            correlator,
            correlator_task,
            streams,
            records,
            ..
        } = self;

        // An untaken record stream fills up and stalls the correlator, which
        // in turn stalls every stream task in `submit`
        let drain = records.map(|mut rx| {
            tokio::spawn(async move { while rx.recv().await.is_some() {} })
        });

        for stream in streams {
            stream.await?;
        }
        drop(correlator);

        let mut correlator = correlator_task.await?;
        if let Some(drain) = drain {
            drain.await?;
        }
        let correlator = tokio::task::spawn_blocking(move || {
            correlator.close_checkpoints();
            correlator
        })
        .await?;

        tracing::info!(
            pairs = correlator.stats().pairs_correlated(),
            "bridge_session_stopped"
        );
        Ok(correlator)
    }
}

/// Lock-based correlator access for callers outside the task model
#[derive(Clone)]
pub struct CorrelatorHandle {
    inner: Arc<Mutex<TimingCorrelator>>,
}

impl CorrelatorHandle {
    pub fn new(correlator: TimingCorrelator) -> Self {
        Self {
            inner: Arc::new(Mutex::new(correlator)),
        }
    }

    pub fn insert_shot(&self, shot: ShotEvent) -> Option<CorrelatedPair> {
        match self.inner.lock() {
            Ok(mut correlator) => correlator.insert_shot(shot),
            Err(_) => {
                tracing::warn!("correlator_lock_poisoned");
                None
            }
        }
    }

    pub fn insert_impact(&self, impact: ImpactRecord) -> Option<CorrelatedPair> {
        match self.inner.lock() {
            Ok(mut correlator) => correlator.insert_impact(impact),
            Err(_) => {
                tracing::warn!("correlator_lock_poisoned");
                None
            }
        }
    }

    pub fn summary(&self) -> Option<CorrelationSummary> {
        self.inner.lock().ok().map(|c| c.stats().summary())
    }

    pub fn calibration(&self) -> Option<CalibrationState> {
        self.inner.lock().ok().map(|c| c.calibration().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::onset::EnhancedImpactEvent;
    use chrono::{Duration, TimeZone};

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 9, 17, 0, 0).unwrap() + Duration::milliseconds(ms)
    }

    fn onset_event(ms: i64, peak: f64) -> ChannelEvent {
        ChannelEvent::Onset(EnhancedImpactEvent {
            channel_id: "bt50".to_string(),
            onset_timestamp: t(ms),
            peak_timestamp: t(ms + 40),
            onset_magnitude: 40.0,
            peak_magnitude: peak,
            duration_ms: 100.0,
            sample_count: 5,
            confidence: 0.9,
        })
    }

    fn calibration() -> CalibrationState {
        CalibrationState {
            expected_delay_ms: 100.0,
            correlation_window_ms: 1000.0,
            delay_tolerance_ms: 50.0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_correlator_task_pairs_events() {
        let (records_tx, mut records_rx) = mpsc::channel(16);
        let (handle, task) = CorrelatorTask::spawn(TimingCorrelator::new(calibration()), records_tx);

        handle
            .submit(BridgeEvent::Shot(ShotEvent::new(t(0), 1, "amg")))
            .await
            .unwrap();
        handle
            .submit(BridgeEvent::Impact {
                device_id: "bt50".to_string(),
                event: onset_event(110, 250.0),
            })
            .await
            .unwrap();

        let summary = handle.summary().await.unwrap();
        assert_eq!(summary.pairs_correlated, 1);
        drop(handle);

        let mut kinds = Vec::new();
        while let Some(record) = records_rx.recv().await {
            kinds.push(match record {
                SessionRecord::Shot(_) => "shot",
                SessionRecord::Impact { .. } => "impact",
                SessionRecord::Pair(pair) => {
                    assert_eq!(pair.delay_ms, 110.0);
                    "pair"
                }
                _ => "other",
            });
        }
        assert_eq!(kinds, ["shot", "impact", "pair"]);

        let correlator = task.await.unwrap();
        assert_eq!(correlator.pending_shots(), 0);
    }

    #[tokio::test]
    async fn test_calibration_query() {
        let (records_tx, _records_rx) = mpsc::channel(16);
        let (handle, _task) = CorrelatorTask::spawn(TimingCorrelator::new(calibration()), records_tx);
        let state = handle.calibration().await.unwrap();
        assert_eq!(state.expected_delay_ms, 100.0);
    }

    #[tokio::test]
    async fn test_submit_after_stop_fails() {
        let (records_tx, _records_rx) = mpsc::channel(16);
        let (handle, task) = CorrelatorTask::spawn(TimingCorrelator::new(calibration()), records_tx);
        task.abort();
        let _ = task.await;
        assert!(handle.summary().await.is_err());
    }

    #[test]
    fn test_correlator_handle_shared() {
        let handle = CorrelatorHandle::new(TimingCorrelator::new(calibration()));
        let producer = handle.clone();

        let thread = std::thread::spawn(move || producer.insert_shot(ShotEvent::new(t(0), 1, "amg")));
        assert!(thread.join().unwrap().is_none());

        let pair = handle
            .insert_impact(ImpactRecord::new(t(95), 200.0, "bt50", "bt50"))
            .unwrap();
        assert_eq!(pair.delay_ms, 95.0);
        assert_eq!(handle.summary().unwrap().pairs_correlated, 1);
        assert_eq!(handle.calibration().unwrap().expected_delay_ms, 100.0);
    }

    #[test]
    fn test_session_record_serializes() {
        let record = SessionRecord::Connection {
            device_id: "amg".to_string(),
            kind: DeviceKind::Timer,
            connected: true,
            at: t(0),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["record"], "connection");
        assert_eq!(json["kind"], "timer");
    }

    #[test]
    fn test_start_rejects_invalid_config() {
        let mut config = BridgeConfig::default();
        config.timing.learning_rate = 2.0;
        assert!(BridgeSession::start(config).is_err());
    }
}
