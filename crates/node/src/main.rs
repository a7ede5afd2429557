mod sim;

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use std::{env, time::Duration};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use sim::{FieldReading, FieldSim, Scenario};

/// Telemetry payload published on `tele/<node>/reading`.
#[derive(Debug, Serialize)]
struct ReadingMsg {
    soil_moisture: f64,
    temperature: f64,
    humidity: f64,
    raindrop_raw: f64,
    ts: i64,
}

impl ReadingMsg {
    fn new(r: FieldReading, ts: i64) -> Self {
        Self {
            soil_moisture: r.soil_moisture,
            temperature: r.temperature,
            humidity: r.humidity,
            raindrop_raw: r.raindrop_raw,
            ts,
        }
    }
}

/// Irrigation command from the hub on `irrigation/<node>/command`.
#[derive(Debug, Deserialize, PartialEq)]
struct CommandMsg {
    volume: f64,
    #[serde(default)]
    manual: bool,
}

fn parse_command(payload: &[u8]) -> Result<CommandMsg, serde_json::Error> {
    serde_json::from_slice(payload)
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Env config
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env_or("MQTT_PORT", 1883);
    let node_id = env::var("NODE_ID").unwrap_or_else(|_| "field-1".to_string());
    let sample_every_s: u64 = env_or("SAMPLE_EVERY_S", 60).max(1);
    let day_length_s: f64 = env_or("SIM_DAY_S", 86_400.0);
    let scenario = Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_default());

    let client_id = format!("greenguard-node-{node_id}");
    let mut mqttoptions = MqttOptions::new(client_id, broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    let (client, eventloop) = AsyncClient::new(mqttoptions, 10);

    let reading_topic = format!("tele/{node_id}/reading");
    let command_topic = format!("irrigation/{node_id}/command");
    info!(%scenario, %reading_topic, %command_topic, sample_every_s, "node starting");

    // Commands are applied by the sampling loop, which owns the simulator.
    let (water_tx, mut water_rx) = mpsc::channel::<f64>(16);
    tokio::spawn(pump_mqtt(
        eventloop,
        client.clone(),
        command_topic,
        water_tx,
    ));

    let mut sim = FieldSim::new(scenario, day_length_s);
    let mut ticker = tokio::time::interval(Duration::from_secs(sample_every_s));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let msg = ReadingMsg::new(
                    sim.step(sample_every_s as f64),
                    OffsetDateTime::now_utc().unix_timestamp(),
                );
                let payload = serde_json::to_vec(&msg).context("failed to encode reading")?;
                match client.publish(&reading_topic, QoS::AtLeastOnce, false, payload).await {
                    Ok(()) => debug!(
                        soil_moisture = msg.soil_moisture,
                        temperature = msg.temperature,
                        humidity = msg.humidity,
                        raindrop_raw = msg.raindrop_raw,
                        raining = sim.is_raining(),
                        "published reading"
                    ),
                    Err(e) => warn!("publish error: {e}"),
                }
            }
            Some(litres) = water_rx.recv() => {
                sim.apply_water(litres);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("node stopping");
                break;
            }
        }
    }

    Ok(())
}

async fn pump_mqtt(
    mut eventloop: EventLoop,
    client: AsyncClient,
    command_topic: String,
    water_tx: mpsc::Sender<f64>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("node connected to mqtt");
                // Non-blocking: this task is what drains the request channel.
                if let Err(e) = client.try_subscribe(command_topic.as_str(), QoS::AtLeastOnce) {
                    warn!("subscribe failed: {e}");
                }
            }
            Ok(Event::Incoming(Packet::Publish(p))) if p.topic == command_topic => {
                match parse_command(&p.payload) {
                    Ok(cmd) => {
                        info!(volume = cmd.volume, manual = cmd.manual, "irrigation command");
                        if water_tx.send(cmd.volume).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("bad command payload: {e}"),
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!("mqtt error: {e}. retrying...");
                sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
