//! Capability traits the decision engine is built from.
//!
//! ```text
//!   adapter (MQTT, HTTP, SQLite, ...) ──▶ port trait ──▶ DecisionEngine
//! ```
//!
//! The engine holds each collaborator as `Arc<dyn Port>` so the scheduler
//! task and the request handlers share one engine without globals, and tests
//! swap in recording mocks.

use async_trait::async_trait;

use crate::decision::DecisionRecord;
use crate::error::EngineError;
use crate::forecast::ForecastResult;
use crate::predictor::Features;
use crate::sensor::{ManualRequest, SensorReading};

/// Field-side telemetry and actuation.
#[async_trait]
pub trait SensorGateway: Send + Sync {
    /// Latest sanitised reading, or `DataUnavailable`.
    async fn read_latest(&self) -> Result<SensorReading, EngineError>;

    /// Pending operator override.  `ManualRequest::NONE` when nothing is pending.
    async fn read_override(&self) -> Result<ManualRequest, EngineError>;

    /// Ask the field to deliver `volume` litres.
    async fn write_command(&self, volume: f64, is_manual: bool) -> Result<(), EngineError>;
}

/// Rainfall outlook.  Never fails the caller: failure is encoded in
/// [`ForecastResult::success`].
#[async_trait]
pub trait ForecastProvider: Send + Sync {
    async fn fetch(&self) -> ForecastResult;
}

/// Learned water-requirement estimator.
#[async_trait]
pub trait Predictor: Send + Sync {
    async fn predict(&self, features: &Features) -> Result<f64, EngineError>;
}

/// Human-facing alert delivery.  Callers log and ignore failures.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> anyhow::Result<()>;
}

/// Append-only store of decision records.
#[async_trait]
pub trait CycleLog: Send + Sync {
    async fn append(&self, record: &DecisionRecord) -> Result<(), EngineError>;
}
