use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::decision::DecisionRecord;
use crate::sensor::SensorReading;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

pub fn shared(crop_id: &str) -> SharedState {
    Arc::new(RwLock::new(SystemState::new(crop_id)))
}

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct SystemState {
    pub started_at: Instant,
    pub crop_id: String,
    pub mqtt_connected: bool,
    pub latest_reading: Option<TimedReading>,
    pub last_decision: Option<DecisionRecord>,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Clone, Serialize)]
pub struct TimedReading {
    #[serde(with = "time::serde::rfc3339")]
    pub received: OffsetDateTime,
    pub reading: SensorReading,
}

#[derive(Clone, Debug, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Reading,
    Decision,
    Alert,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub crop_id: String,
    pub mqtt_connected: bool,
    pub latest_reading: Option<TimedReading>,
    pub last_decision: Option<DecisionRecord>,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    pub fn new(crop_id: &str) -> Self {
        Self {
            started_at: Instant::now(),
            crop_id: crop_id.to_string(),
            mqtt_connected: false,
            latest_reading: None,
            last_decision: None,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Record a telemetry reading accepted from the field node.
    pub fn record_reading(&mut self, reading: SensorReading) {
        let detail = format!(
            "moisture={:.1}% temp={:.1}C humidity={:.1}% rain={:.1}%",
            reading.soil_moisture, reading.temperature, reading.humidity, reading.rain_sensor
        );
        self.latest_reading = Some(TimedReading {
            received: OffsetDateTime::now_utc(),
            reading,
        });
        self.push_event(EventKind::Reading, detail);
    }

    /// Record a completed cycle.
    pub fn record_decision(&mut self, record: &DecisionRecord) {
        self.push_event(
            EventKind::Decision,
            format!(
                "{:.2}L ({}, command {})",
                record.water_volume, record.mode, record.command
            ),
        );
        self.last_decision = Some(record.clone());
    }

    pub fn record_alert(&mut self, detail: String) {
        self.push_event(EventKind::Alert, detail);
    }

    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            crop_id: self.crop_id.clone(),
            mqtt_connected: self.mqtt_connected,
            latest_reading: self.latest_reading.clone(),
            last_decision: self.last_decision.clone(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    /// Events of one kind, oldest first.
    #[cfg(test)]
    pub fn events_of(&self, kind: EventKind) -> Vec<&SystemEvent> {
        self.events.iter().filter(|e| e.kind == kind).collect()
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{CommandStatus, PredictionMode};
    use crate::forecast::ForecastResult;

    #[test]
    fn ring_buffer_caps_at_max_events() {
        let mut st = SystemState::new("wheat");
        for i in 0..(MAX_EVENTS + 25) {
            st.record_system(format!("event {i}"));
        }
        assert_eq!(st.events.len(), MAX_EVENTS);
        assert_eq!(st.events.front().unwrap().detail, "event 25");
    }

    #[test]
    fn status_lists_newest_first() {
        let mut st = SystemState::new("wheat");
        st.record_system("first".into());
        st.record_error("second".into());
        let status = st.to_status();
        assert_eq!(status.events[0].detail, "second");
        assert_eq!(status.events[1].detail, "first");
        assert_eq!(status.crop_id, "wheat");
    }

    #[test]
    fn record_decision_keeps_last() {
        let mut st = SystemState::new("rice");
        let rec = DecisionRecord::new(
            &SensorReading::ZERO,
            &ForecastResult::unavailable(),
            7.5,
            PredictionMode::Fallback,
            "rice",
            CommandStatus::Sent,
        );
        st.record_decision(&rec);
        assert_eq!(st.last_decision.as_ref().unwrap().water_volume, 7.5);
        let decisions = st.events_of(EventKind::Decision);
        assert_eq!(decisions.len(), 1);
        assert!(decisions[0].detail.contains("fallback"));
    }

    #[test]
    fn record_reading_updates_latest() {
        let mut st = SystemState::new("wheat");
        st.record_reading(SensorReading {
            soil_moisture: 41.0,
            temperature: 22.0,
            humidity: 70.0,
            rain_sensor: 0.0,
        });
        assert_eq!(st.latest_reading.as_ref().unwrap().reading.soil_moisture, 41.0);
        assert_eq!(st.events_of(EventKind::Reading).len(), 1);
    }
}
