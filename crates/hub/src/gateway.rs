//! [`SensorGateway`] over MQTT.
//!
//! The broker event loop (in `main`) feeds inbound publishes into
//! [`handle_publish`], which caches the latest reading and any pending
//! override.  The engine reads from that cache and publishes commands
//! through the shared `AsyncClient`.

use async_trait::async_trait;
use rumqttc::{AsyncClient, QoS};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::mqtt::{self, CommandMsg, Route, Topics};
use crate::ports::SensorGateway;
use crate::sensor::{ManualRequest, RawReading, SensorReading};
use crate::state::SharedState;

#[derive(Default)]
struct Cache {
    latest: Option<(Instant, SensorReading)>,
    pending_override: Option<(Instant, ManualRequest)>,
    connected: bool,
}

pub struct MqttGateway {
    client: AsyncClient,
    node_id: String,
    topics: Topics,
    stale_after: Duration,
    override_ttl: Duration,
    cache: Mutex<Cache>,
}

impl MqttGateway {
    /// Overrides older than `override_ttl` when polled are dropped unread.
    pub fn new(
        client: AsyncClient,
        node_id: &str,
        stale_after: Duration,
        override_ttl: Duration,
    ) -> Self {
        Self {
            client,
            node_id: node_id.to_string(),
            topics: Topics::for_node(node_id),
            stale_after,
            override_ttl,
            cache: Mutex::new(Cache::default()),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// (Re)subscribe to this node's inbound topics.  Call on every ConnAck.
    ///
    /// Uses the non-blocking client calls: this runs inside the event loop
    /// task, which is the only thing draining the request channel.
    pub fn subscribe(&self) -> Result<(), rumqttc::ClientError> {
        self.client
            .try_subscribe(self.topics.reading.as_str(), QoS::AtLeastOnce)?;
        self.client
            .try_subscribe(self.topics.override_set.as_str(), QoS::AtLeastOnce)?;
        info!(
            reading = %self.topics.reading,
            override_set = %self.topics.override_set,
            "subscribed"
        );
        Ok(())
    }

    /// A disconnect also drops any pending override.
    pub async fn set_connected(&self, connected: bool) {
        let mut cache = self.cache.lock().await;
        cache.connected = connected;
        if !connected && cache.pending_override.take().is_some() {
            warn!(node = %self.node_id, "pending override dropped on disconnect");
        }
    }

    /// Sanitise and cache a reading, returning the sanitised value.
    pub async fn ingest_reading(&self, raw: &RawReading) -> SensorReading {
        let (reading, defaulted) = SensorReading::from_raw(raw);
        if !defaulted.is_empty() {
            debug!(node = %self.node_id, fields = defaulted.len(), "reading had defaulted fields");
        }
        self.cache.lock().await.latest = Some((Instant::now(), reading));
        reading
    }

    /// Latest override wins; it is consumed by the next `read_override`.
    pub async fn ingest_override(&self, request: ManualRequest) {
        self.cache.lock().await.pending_override = Some((Instant::now(), request));
    }
}

#[async_trait]
impl SensorGateway for MqttGateway {
    async fn read_latest(&self) -> Result<SensorReading, EngineError> {
        let cache = self.cache.lock().await;
        match cache.latest {
            None => Err(EngineError::DataUnavailable(format!(
                "no reading received from node '{}'",
                self.node_id
            ))),
            Some((at, _)) if at.elapsed() > self.stale_after => {
                Err(EngineError::DataUnavailable(format!(
                    "latest reading from node '{}' is {}s old",
                    self.node_id,
                    at.elapsed().as_secs()
                )))
            }
            Some((_, reading)) => Ok(reading),
        }
    }

    async fn read_override(&self) -> Result<ManualRequest, EngineError> {
        let mut cache = self.cache.lock().await;
        if !cache.connected {
            return Err(EngineError::DataUnavailable("broker not connected".into()));
        }
        match cache.pending_override.take() {
            Some((at, request)) if at.elapsed() <= self.override_ttl => Ok(request),
            Some((at, request)) => {
                warn!(
                    node = %self.node_id,
                    volume = request.volume,
                    age_sec = at.elapsed().as_secs(),
                    "expired override dropped"
                );
                Ok(ManualRequest::NONE)
            }
            None => Ok(ManualRequest::NONE),
        }
    }

    async fn write_command(&self, volume: f64, is_manual: bool) -> Result<(), EngineError> {
        if !self.cache.lock().await.connected {
            return Err(EngineError::CommandFailure("broker not connected".into()));
        }
        let body = serde_json::to_vec(&CommandMsg {
            volume,
            manual: is_manual,
            ts: OffsetDateTime::now_utc().unix_timestamp(),
        })
        .map_err(|e| EngineError::CommandFailure(e.to_string()))?;

        self.client
            .publish(self.topics.command.as_str(), QoS::AtLeastOnce, false, body)
            .await
            .map_err(|e| EngineError::CommandFailure(e.to_string()))
    }
}

/// Route one inbound publish into the gateway cache and the status state.
pub async fn handle_publish(
    topic: &str,
    payload: &[u8],
    gateway: &MqttGateway,
    shared: &SharedState,
) {
    match mqtt::route(topic) {
        Some(Route::Reading { node_id }) if node_id == gateway.node_id() => {
            match mqtt::parse_reading_payload(payload) {
                Ok(raw) => {
                    let reading = gateway.ingest_reading(&raw).await;
                    debug!(
                        node = %node_id,
                        soil_moisture = reading.soil_moisture,
                        temperature = reading.temperature,
                        humidity = reading.humidity,
                        rain_sensor = reading.rain_sensor,
                        "telemetry"
                    );
                    shared.write().await.record_reading(reading);
                }
                Err(e) => {
                    warn!(%topic, "bad telemetry: {e}");
                    shared
                        .write()
                        .await
                        .record_error(format!("bad telemetry on {topic}: {e}"));
                }
            }
        }
        Some(Route::Override { node_id }) if node_id == gateway.node_id() => {
            match mqtt::parse_override_payload(payload) {
                Ok(request) => {
                    info!(active = request.active, volume = request.volume, "override received");
                    gateway.ingest_override(request).await;
                }
                Err(e) => {
                    warn!(%topic, "bad override: {e}");
                    shared
                        .write()
                        .await
                        .record_error(format!("bad override on {topic}: {e}"));
                }
            }
        }
        _ => debug!(%topic, "unhandled topic"),
    }
}
