use serde::Serialize;
use serde_json::Value;

use crate::sensor::{ManualRequest, RawReading};

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

/// Per-node topic names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    /// `tele/<node>/reading`: node → hub telemetry.
    pub reading: String,
    /// `override/<node>/set`: operator → hub manual request.
    pub override_set: String,
    /// `irrigation/<node>/command`: hub → node water command.
    pub command: String,
}

impl Topics {
    pub fn for_node(node_id: &str) -> Self {
        Self {
            reading: format!("tele/{node_id}/reading"),
            override_set: format!("override/{node_id}/set"),
            command: format!("irrigation/{node_id}/command"),
        }
    }
}

/// Which inbound channel a topic belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    Reading { node_id: &'a str },
    Override { node_id: &'a str },
}

/// Classify "tele/<node>/reading" and "override/<node>/set".
pub fn route(topic: &str) -> Option<Route<'_>> {
    let parts: Vec<&str> = topic.split('/').collect();
    match parts.as_slice() {
        ["tele", node_id, "reading"] if !node_id.is_empty() => {
            Some(Route::Reading { node_id: *node_id })
        }
        ["override", node_id, "set"] if !node_id.is_empty() => {
            Some(Route::Override { node_id: *node_id })
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Hub → node command body.
#[derive(Debug, Serialize)]
pub struct CommandMsg {
    pub volume: f64,
    pub manual: bool,
    pub ts: i64,
}

/// A number, or a string holding one.  Anything else is "missing".
fn numeric(v: Option<&Value>) -> Option<f64> {
    match v? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn flag(v: Option<&Value>) -> bool {
    match v {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64() == Some(1.0),
        Some(Value::String(s)) => {
            let s = s.trim();
            s == "1" || s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("on")
        }
        _ => false,
    }
}

fn object(payload: &[u8]) -> Result<serde_json::Map<String, Value>, String> {
    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, got {other}")),
        Err(e) => Err(format!("bad json: {e}")),
    }
}

/// Parse a telemetry body.  Individual fields may be missing or junk (they
/// are defaulted later); a body with no usable field at all is an error.
pub fn parse_reading_payload(payload: &[u8]) -> Result<RawReading, String> {
    let map = object(payload)?;
    let raw = RawReading {
        soil_moisture: numeric(map.get("soil_moisture")),
        temperature: numeric(map.get("temperature")),
        humidity: numeric(map.get("humidity")),
        raindrop_raw: numeric(map.get("raindrop_raw")),
    };
    if raw.is_empty() {
        return Err("reading has no sensor fields".to_string());
    }
    Ok(raw)
}

/// Parse an override body: `{"active": true, "volume": 12.5}`.
pub fn parse_override_payload(payload: &[u8]) -> Result<ManualRequest, String> {
    let map = object(payload)?;
    Ok(ManualRequest {
        active: flag(map.get("active")),
        volume: numeric(map.get("volume")).unwrap_or(0.0),
    })
}

// ===========================================================================
// Tests
// ===========================================================================
