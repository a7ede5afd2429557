//! Recording stand-ins for every engine collaborator.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::crop::CropRegistry;
use crate::decision::DecisionRecord;
use crate::engine::{Collaborators, DecisionEngine};
use crate::error::EngineError;
use crate::forecast::ForecastResult;
use crate::ports::{CycleLog, ForecastProvider, Notifier, Predictor, SensorGateway};
use crate::predictor::Features;
use crate::sensor::{ManualRequest, SensorReading};
use crate::state::{self, SharedState};

/// The wheat example reading: 50% moisture, 30C, 50% humidity, dry.
pub const WHEAT_READING: SensorReading = SensorReading {
    soil_moisture: 50.0,
    temperature: 30.0,
    humidity: 50.0,
    rain_sensor: 0.0,
};

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

pub struct MockGateway {
    reading: Mutex<Result<SensorReading, EngineError>>,
    overrides: Mutex<VecDeque<Result<ManualRequest, EngineError>>>,
    write_result: Mutex<Result<(), EngineError>>,
    hang_reads: Mutex<bool>,
    commands: Mutex<Vec<(f64, bool)>>,
    reads: AtomicUsize,
    override_reads: AtomicUsize,
}

impl MockGateway {
    pub fn with_reading(reading: SensorReading) -> Self {
        Self {
            reading: Mutex::new(Ok(reading)),
            overrides: Mutex::new(VecDeque::new()),
            write_result: Mutex::new(Ok(())),
            hang_reads: Mutex::new(false),
            commands: Mutex::new(Vec::new()),
            reads: AtomicUsize::new(0),
            override_reads: AtomicUsize::new(0),
        }
    }

    pub fn set_reading(&self, reading: Result<SensorReading, EngineError>) {
        *self.reading.lock().unwrap() = reading;
    }

    pub fn make_unavailable(&self) {
        self.set_reading(Err(EngineError::DataUnavailable("no reading".into())));
    }

    /// Queue the result of the next `read_override` call.
    pub fn push_override(&self, request: Result<ManualRequest, EngineError>) {
        self.overrides.lock().unwrap().push_back(request);
    }

    pub fn fail_writes(&self) {
        *self.write_result.lock().unwrap() =
            Err(EngineError::CommandFailure("broker rejected".into()));
    }

    /// Make `read_latest` never complete.
    pub fn hang_reads(&self) {
        *self.hang_reads.lock().unwrap() = true;
    }

    pub fn commands(&self) -> Vec<(f64, bool)> {
        self.commands.lock().unwrap().clone()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn override_reads(&self) -> usize {
        self.override_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SensorGateway for MockGateway {
    async fn read_latest(&self) -> Result<SensorReading, EngineError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let hang = *self.hang_reads.lock().unwrap();
        if hang {
            std::future::pending::<()>().await;
        }
        self.reading.lock().unwrap().clone()
    }

    async fn read_override(&self) -> Result<ManualRequest, EngineError> {
        self.override_reads.fetch_add(1, Ordering::SeqCst);
        self.overrides
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(ManualRequest::NONE))
    }

    async fn write_command(&self, volume: f64, is_manual: bool) -> Result<(), EngineError> {
        self.commands.lock().unwrap().push((volume, is_manual));
        self.write_result.lock().unwrap().clone()
    }
}

// ---------------------------------------------------------------------------
// Forecast
// ---------------------------------------------------------------------------

pub struct MockForecast {
    result: Mutex<ForecastResult>,
    calls: AtomicUsize,
}

impl MockForecast {
    pub fn new(result: ForecastResult) -> Self {
        Self {
            result: Mutex::new(result),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, result: ForecastResult) {
        *self.result.lock().unwrap() = result;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ForecastProvider for MockForecast {
    async fn fetch(&self) -> ForecastResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.result.lock().unwrap()
    }
}

// ---------------------------------------------------------------------------
// Predictor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub enum PredictorBehaviour {
    Returns(f64),
    Fails,
    Panics,
    Hangs,
}

pub struct MockPredictor {
    behaviour: Mutex<PredictorBehaviour>,
    seen: Mutex<Vec<Features>>,
}

impl MockPredictor {
    pub fn new(behaviour: PredictorBehaviour) -> Self {
        Self {
            behaviour: Mutex::new(behaviour),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn set(&self, behaviour: PredictorBehaviour) {
        *self.behaviour.lock().unwrap() = behaviour;
    }

    pub fn seen(&self) -> Vec<Features> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Predictor for MockPredictor {
    async fn predict(&self, features: &Features) -> Result<f64, EngineError> {
        self.seen.lock().unwrap().push(*features);
        let behaviour = *self.behaviour.lock().unwrap();
        match behaviour {
            PredictorBehaviour::Returns(v) => Ok(v),
            PredictorBehaviour::Fails => Err(EngineError::PredictionFailure("model offline".into())),
            PredictorBehaviour::Panics => panic!("predictor blew up"),
            PredictorBehaviour::Hangs => std::future::pending().await,
        }
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockNotifier {
    messages: Mutex<Vec<String>>,
    fail: bool,
}

impl MockNotifier {
    pub fn failing() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn notify(&self, message: &str) -> anyhow::Result<()> {
        self.messages.lock().unwrap().push(message.to_string());
        if self.fail {
            anyhow::bail!("smtp down");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Cycle log
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockLog {
    records: Mutex<Vec<DecisionRecord>>,
    fail: Mutex<bool>,
}

impl MockLog {
    pub fn fail_appends(&self) {
        *self.fail.lock().unwrap() = true;
    }

    pub fn records(&self) -> Vec<DecisionRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl CycleLog for MockLog {
    async fn append(&self, record: &DecisionRecord) -> Result<(), EngineError> {
        if *self.fail.lock().unwrap() {
            return Err(EngineError::LogFailure("disk full".into()));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// One set of mocks plus the state they report into.
///
/// Defaults: gateway returns [`WHEAT_READING`], forecast unavailable,
/// predictor returns 20 litres.
pub struct Harness {
    pub gateway: Arc<MockGateway>,
    pub forecast: Arc<MockForecast>,
    pub predictor: Arc<MockPredictor>,
    pub notifier: Arc<MockNotifier>,
    pub log: Arc<MockLog>,
    pub shared: SharedState,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            gateway: Arc::new(MockGateway::with_reading(WHEAT_READING)),
            forecast: Arc::new(MockForecast::new(ForecastResult::unavailable())),
            predictor: Arc::new(MockPredictor::new(PredictorBehaviour::Returns(20.0))),
            notifier: Arc::new(MockNotifier::default()),
            log: Arc::new(MockLog::default()),
            shared: state::shared("wheat"),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            gateway: self.gateway.clone(),
            forecast: self.forecast.clone(),
            predictor: self.predictor.clone(),
            notifier: self.notifier.clone(),
            log: self.log.clone(),
        }
    }

    pub fn engine_for(&self, crop_id: &str) -> DecisionEngine {
        DecisionEngine::new(
            crop_id,
            &CropRegistry::builtin(),
            self.collaborators(),
            Duration::from_secs(10),
            self.shared.clone(),
        )
        .unwrap()
    }

    pub fn engine(&self) -> DecisionEngine {
        self.engine_for("wheat")
    }
}
