//! The irrigation decision engine.
//!
//! One engine is built at startup and shared (`Arc`) between the scheduler
//! task and the HTTP handlers.  It owns no mutable cycle state: the
//! scheduler's timestamps live in [`Scheduler`](crate::scheduler::Scheduler),
//! and every external call goes through a collaborator port with a bounded
//! timeout.
//!
//! ```text
//! manual:    read_override ─▶ write_command ─▶ record ─▶ alert
//! automatic: read_latest ─▶ forecast ─▶ (ml | fallback) ─▶ rainfall adjust
//!            ─▶ clamp ─▶ write_command (if > 0) ─▶ record
//! ```

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::crop::{CropProfile, CropRegistry};
use crate::decision::{CommandStatus, DecisionRecord, PredictionMode};
use crate::error::EngineError;
use crate::forecast::ForecastResult;
use crate::ports::{CycleLog, ForecastProvider, Notifier, Predictor, SensorGateway};
use crate::predictor::Features;
use crate::rules::{adjust_for_rainfall, clamp_volume, fallback_need};
use crate::sensor::{ManualRequest, SensorReading};
use crate::state::SharedState;

/// Everything the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub gateway: Arc<dyn SensorGateway>,
    pub forecast: Arc<dyn ForecastProvider>,
    pub predictor: Arc<dyn Predictor>,
    pub notifier: Arc<dyn Notifier>,
    pub log: Arc<dyn CycleLog>,
}

/// Result of an on-demand prediction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Estimate {
    pub volume: f64,
    pub mode: PredictionMode,
    pub forecast: ForecastResult,
}

pub struct DecisionEngine {
    crop_id: String,
    profile: CropProfile,
    ports: Collaborators,
    io_timeout: Duration,
    shared: SharedState,
}

impl DecisionEngine {
    /// Fails with `UnknownCrop` if `crop_id` is not in `registry`.
    pub fn new(
        crop_id: &str,
        registry: &CropRegistry,
        ports: Collaborators,
        io_timeout: Duration,
        shared: SharedState,
    ) -> Result<Self, EngineError> {
        let profile = registry.lookup(crop_id)?;
        Ok(Self {
            crop_id: crop_id.to_string(),
            profile,
            ports,
            io_timeout,
            shared,
        })
    }

    pub fn crop_id(&self) -> &str {
        &self.crop_id
    }

    pub fn profile(&self) -> &CropProfile {
        &self.profile
    }

    // -----------------------------------------------------------------------
    // Caller-facing queries
    // -----------------------------------------------------------------------

    /// Pass-through gateway read, bounded by the I/O timeout.
    pub async fn latest_sensor_snapshot(&self) -> Result<SensorReading, EngineError> {
        self.within("read_latest", self.ports.gateway.read_latest())
            .await
            .unwrap_or_else(|| {
                Err(EngineError::DataUnavailable("sensor read timed out".into()))
            })
    }

    /// Estimate a volume for caller-supplied sensor values.  Values outside
    /// the plausible ranges are defaulted exactly like gateway readings.
    pub async fn predict_for_request(
        &self,
        soil_moisture: f64,
        temperature: f64,
        humidity: f64,
        rain_sensor: f64,
    ) -> Estimate {
        let (reading, _) = SensorReading::from_values(
            Some(soil_moisture),
            Some(temperature),
            Some(humidity),
            Some(rain_sensor),
        );
        let forecast = self.fetch_forecast().await;
        let (volume, mode) = self.estimate(&reading, &forecast).await;
        Estimate {
            volume,
            mode,
            forecast,
        }
    }

    // -----------------------------------------------------------------------
    // Manual path
    // -----------------------------------------------------------------------

    /// Poll the override channel once and act on an actionable request.
    ///
    /// Returns whether a manual command was issued.  Override channel errors
    /// count as "no override".
    pub async fn handle_manual_request(&self) -> bool {
        let request = match self
            .within("read_override", self.ports.gateway.read_override())
            .await
        {
            Some(Ok(r)) => r,
            Some(Err(e)) => {
                debug!(error = %e, "override check failed, treating as no override");
                return false;
            }
            None => {
                debug!("override check timed out, treating as no override");
                return false;
            }
        };
        if !request.is_actionable() {
            return false;
        }

        let volume = self.manual_volume(&request);
        info!(requested = request.volume, volume, "manual irrigation requested");

        let command = self.dispatch(volume, true).await;
        let reading = self
            .latest_sensor_snapshot()
            .await
            .unwrap_or(SensorReading::ZERO);
        let record = DecisionRecord::new(
            &reading,
            &ForecastResult::unavailable(),
            volume,
            PredictionMode::Manual,
            &self.crop_id,
            command,
        );
        self.persist(&record).await;

        let message = match command {
            CommandStatus::Sent => format!("Manual irrigation completed: {volume:.2} liters"),
            _ => format!("Manual irrigation of {volume:.2} liters could not be delivered"),
        };
        self.alert(&message).await;
        true
    }

    fn manual_volume(&self, request: &ManualRequest) -> f64 {
        let volume = clamp_volume(request.volume, &self.profile);
        if volume < request.volume {
            warn!(
                requested = request.volume,
                max_water = self.profile.max_water,
                "manual volume capped at crop maximum"
            );
        }
        volume
    }

    // -----------------------------------------------------------------------
    // Automatic path
    // -----------------------------------------------------------------------

    /// One automatic decision.  `Err(DataUnavailable)` means the sensors could
    /// not be read: an alert has been sent and no record was produced.
    pub async fn run_automatic_cycle(&self) -> Result<DecisionRecord, EngineError> {
        let reading = match self.latest_sensor_snapshot().await {
            Ok(r) => r,
            Err(e) => {
                let e = match e {
                    EngineError::DataUnavailable(_) => e,
                    other => EngineError::DataUnavailable(other.to_string()),
                };
                warn!(error = %e, "automatic cycle skipped");
                self.alert(&format!(
                    "Sensor data not received from the field gateway ({e})"
                ))
                .await;
                return Err(e);
            }
        };

        let forecast = self.fetch_forecast().await;
        let (volume, mode) = self.estimate(&reading, &forecast).await;

        let command = if volume > 0.0 {
            self.dispatch(volume, false).await
        } else {
            info!(mode = %mode, "no irrigation needed");
            CommandStatus::Skipped
        };

        let record = DecisionRecord::new(
            &reading,
            &forecast,
            volume,
            mode,
            &self.crop_id,
            command,
        );
        self.persist(&record).await;
        Ok(record)
    }

    /// Pick ml or fallback, then apply the rainfall adjustment and clamp.
    async fn estimate(
        &self,
        reading: &SensorReading,
        forecast: &ForecastResult,
    ) -> (f64, PredictionMode) {
        let learned = if forecast.success {
            self.query_predictor(reading, forecast).await
        } else {
            debug!("forecast unavailable, using rule-based estimate");
            None
        };

        let (need, mode) = match learned {
            Some(need) => (need, PredictionMode::Ml),
            None => (fallback_need(reading, &self.profile), PredictionMode::Fallback),
        };
        let volume = adjust_for_rainfall(
            need,
            forecast.rainfall_24h,
            forecast.rainfall_72h,
            &self.profile,
        );
        debug!(need, volume, mode = %mode, "water requirement estimated");
        (volume, mode)
    }

    async fn query_predictor(
        &self,
        reading: &SensorReading,
        forecast: &ForecastResult,
    ) -> Option<f64> {
        let features = Features::new(reading, forecast.rainfall_24h, forecast.rainfall_72h);
        let result = self
            .within("predict", self.ports.predictor.predict(&features))
            .await
            .unwrap_or_else(|| Err(EngineError::PredictionFailure("timed out".into())));
        match result {
            Ok(v) if v.is_finite() => Some(v),
            Ok(v) => {
                warn!(value = v, "predictor returned a non-numeric value, falling back");
                None
            }
            Err(e) => {
                warn!(error = %e, "predictor failed, falling back");
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Side effects
    // -----------------------------------------------------------------------

    async fn fetch_forecast(&self) -> ForecastResult {
        self.within("forecast", self.ports.forecast.fetch())
            .await
            .unwrap_or_else(ForecastResult::unavailable)
    }

    async fn dispatch(&self, volume: f64, is_manual: bool) -> CommandStatus {
        let result = self
            .within(
                "write_command",
                self.ports.gateway.write_command(volume, is_manual),
            )
            .await
            .unwrap_or_else(|| Err(EngineError::CommandFailure("timed out".into())));
        match result {
            Ok(()) => {
                info!(volume, is_manual, "irrigation command sent");
                CommandStatus::Sent
            }
            Err(e) => {
                error!(volume, is_manual, error = %e, "irrigation command failed");
                self.shared
                    .write()
                    .await
                    .record_error(format!("command of {volume:.2}L failed: {e}"));
                CommandStatus::Failed
            }
        }
    }

    async fn persist(&self, record: &DecisionRecord) {
        self.shared.write().await.record_decision(record);

        let result = self
            .within("log_append", self.ports.log.append(record))
            .await
            .unwrap_or_else(|| Err(EngineError::LogFailure("timed out".into())));
        if let Err(e) = result {
            error!(error = %e, "failed to persist decision record");
            self.shared
                .write()
                .await
                .record_error(format!("cycle log: {e}"));
        }
    }

    /// Best-effort alert; delivery failures are logged and dropped.
    pub async fn alert(&self, message: &str) {
        match self.within("notify", self.ports.notifier.notify(message)).await {
            Some(Ok(())) => {}
            Some(Err(e)) => warn!("alert delivery failed: {e:#}"),
            None => warn!("alert delivery timed out"),
        }
    }

    /// Run `fut` under the I/O timeout.  `None` means it timed out.
    async fn within<T>(&self, call: &'static str, fut: impl Future<Output = T>) -> Option<T> {
        match tokio::time::timeout(self.io_timeout, fut).await {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(
                    call,
                    timeout_ms = self.io_timeout.as_millis() as u64,
                    "external call timed out"
                );
                None
            }
        }
    }
}
