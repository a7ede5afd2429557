mod alert;
mod config;
mod crop;
mod db;
mod decision;
mod engine;
mod error;
mod forecast;
mod gateway;
mod mqtt;
mod ports;
mod predictor;
mod rules;
mod scheduler;
mod sensor;
mod state;
mod web;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet};
use std::{env, sync::Arc, time::Duration};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use alert::{FanOutNotifier, LogNotifier, WebhookNotifier};
use config::{Config, PredictorSection};
use db::Db;
use engine::{Collaborators, DecisionEngine};
use forecast::{NoForecast, OpenWeatherProvider};
use gateway::{handle_publish, MqttGateway};
use ports::{ForecastProvider, Notifier, Predictor};
use predictor::RemotePredictor;
use scheduler::Scheduler;
use state::SharedState;
use web::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Env config ──────────────────────────────────────────────────
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);
    let db_url = env::var("DB_URL")
        .unwrap_or_else(|_| "sqlite:greenguard.db?mode=rwc".to_string());
    let web_port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    // ── Config file ─────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let mut cfg = config::load(&config_path)?;
    if let Ok(key) = env::var("WEATHER_API_KEY") {
        if !key.trim().is_empty() {
            cfg.weather.api_key = Some(key);
        }
    }

    // ── Database ────────────────────────────────────────────────────
    let db = Db::connect(&db_url).await?;
    db.migrate().await?;
    info!(decisions = db.count_decisions().await?, "db ready");

    // ── Shared state (ephemeral, for the API) ───────────────────────
    let shared = state::shared(&cfg.crop);
    shared.write().await.record_system("hub started".to_string());

    // ── MQTT ────────────────────────────────────────────────────────
    let client_id = format!("greenguard-hub-{}", cfg.mqtt.node_id);
    let mut mqttoptions = MqttOptions::new(client_id, broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    let (client, eventloop) = AsyncClient::new(mqttoptions, 20);
    let gateway = Arc::new(MqttGateway::new(
        client,
        &cfg.mqtt.node_id,
        cfg.stale_after(),
        cfg.timing().manual_check,
    ));

    // ── Engine ──────────────────────────────────────────────────────
    let collaborators = Collaborators {
        gateway: gateway.clone(),
        forecast: build_forecast(&cfg)?,
        predictor: build_predictor(&cfg)?,
        notifier: build_notifier(&cfg, &shared)?,
        log: Arc::new(db.clone()),
    };
    let engine = Arc::new(
        DecisionEngine::new(
            &cfg.crop,
            &cfg.registry(),
            collaborators,
            cfg.io_timeout(),
            shared.clone(),
        )
        .context("failed to build decision engine")?,
    );
    let profile = engine.profile();
    info!(
        crop = %engine.crop_id(),
        ideal_moisture = profile.ideal_moisture,
        max_water = profile.max_water,
        "decision engine ready"
    );

    // ── Tasks ───────────────────────────────────────────────────────
    let (stop_tx, stop_rx) = watch::channel(false);
    // The pump stops last so an in-flight command can still reach the broker.
    let (pump_stop_tx, pump_stop_rx) = watch::channel(false);

    let web_state = AppState {
        engine: Arc::clone(&engine),
        shared: Arc::clone(&shared),
        db: db.clone(),
    };
    let web_task = tokio::spawn(web::serve(web_state, web_port, stop_rx.clone()));

    let pump_task = tokio::spawn(pump_mqtt(
        eventloop,
        Arc::clone(&gateway),
        Arc::clone(&shared),
        pump_stop_rx,
    ));

    let scheduler_task = tokio::spawn(Scheduler::new(engine, cfg.timing()).run(stop_rx));

    // ── Shutdown ────────────────────────────────────────────────────
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown requested, finishing current tick");
    shared
        .write()
        .await
        .record_system("shutdown requested".to_string());
    if stop_tx.send(true).is_err() {
        warn!("all tasks already stopped");
    }

    stop_in_order(scheduler_task, pump_stop_tx, pump_task).await?;
    match web_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("web server: {e:#}"),
        Err(e) => error!("web task panicked: {e}"),
    }

    info!("hub stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Collaborator wiring
// ---------------------------------------------------------------------------

fn build_forecast(cfg: &Config) -> Result<Arc<dyn ForecastProvider>> {
    let w = &cfg.weather;
    match w.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
        Some(key) => Ok(Arc::new(OpenWeatherProvider::new(
            &w.base_url,
            w.latitude,
            w.longitude,
            key,
            cfg.io_timeout(),
        )?)),
        None => {
            warn!("no weather API key configured; every cycle will use the rule-based estimate");
            Ok(Arc::new(NoForecast))
        }
    }
}

fn build_predictor(cfg: &Config) -> Result<Arc<dyn Predictor>> {
    let predictor: Arc<dyn Predictor> = match &cfg.predictor {
        PredictorSection::Linear(model) => Arc::new(*model),
        PredictorSection::Remote { url } => Arc::new(RemotePredictor::new(url, cfg.io_timeout())?),
    };
    Ok(predictor)
}

fn build_notifier(cfg: &Config, shared: &SharedState) -> Result<Arc<dyn Notifier>> {
    let mut sinks: Vec<Arc<dyn Notifier>> = Vec::new();
    sinks.push(Arc::new(LogNotifier::new(Arc::clone(shared))));
    if let Some(url) = &cfg.alerts.webhook_url {
        sinks.push(Arc::new(WebhookNotifier::new(url, cfg.io_timeout())?));
    }
    Ok(Arc::new(FanOutNotifier::new(sinks)))
}

/// Wait for the scheduler to finish its current tick, then stop the MQTT
/// pump.  The pump owns the event loop that carries outgoing commands.
async fn stop_in_order(
    scheduler: JoinHandle<()>,
    pump_stop: watch::Sender<bool>,
    pump: JoinHandle<()>,
) -> Result<()> {
    scheduler.await.context("scheduler task panicked")?;
    if pump_stop.send(true).is_err() {
        warn!("mqtt pump already stopped");
    }
    pump.await.context("mqtt task panicked")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// MQTT event pump
// ---------------------------------------------------------------------------

async fn pump_mqtt(
    mut eventloop: EventLoop,
    gateway: Arc<MqttGateway>,
    shared: SharedState,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            ev = eventloop.poll() => ev,
            _ = stop.changed() => break,
        };

        match event {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                handle_publish(&p.topic, &p.payload, &gateway, &shared).await;
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt connected");
                gateway.set_connected(true).await;
                if let Err(e) = gateway.subscribe() {
                    error!("mqtt subscribe failed: {e}");
                }
                let mut st = shared.write().await;
                st.mqtt_connected = true;
                st.record_system("mqtt connected".to_string());
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("mqtt disconnected");
                gateway.set_connected(false).await;
                let mut st = shared.write().await;
                st.mqtt_connected = false;
                st.record_system("mqtt disconnected".to_string());
            }
            Ok(_) => {}
            Err(e) => {
                warn!("mqtt error: {e}. reconnecting...");
                gateway.set_connected(false).await;
                {
                    let mut st = shared.write().await;
                    st.mqtt_connected = false;
                    st.record_error(format!("mqtt error: {e}"));
                }
                sleep(Duration::from_secs(2)).await;
            }
        }
    }
}
