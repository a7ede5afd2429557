use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;
use time::OffsetDateTime;

use crate::decision::{CommandStatus, DecisionRecord, PredictionMode};
use crate::error::EngineError;
use crate::ports::CycleLog;

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

impl Db {
    /// db_url examples:
    /// - "sqlite:/home/pi/greenguard/greenguard.db"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal);

        // Every connection to an in-memory database is a separate database.
        let max_connections = if db_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    // ----------------------------
    // Decisions
    // ----------------------------

    pub async fn insert_decision(&self, r: &DecisionRecord) -> Result<i64> {
        let id = sqlx::query(
            r#"
            INSERT INTO decisions (
              ts,
              soil_moisture, temperature, humidity, rain_sensor,
              rainfall_24h, rainfall_72h,
              water_volume, mode, crop_id, is_manual, command
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(r.timestamp.unix_timestamp())
        .bind(r.soil_moisture)
        .bind(r.temperature)
        .bind(r.humidity)
        .bind(r.rain_sensor)
        .bind(r.rainfall_24h)
        .bind(r.rainfall_72h)
        .bind(r.water_volume)
        .bind(r.mode.as_str())
        .bind(&r.crop_id)
        .bind(r.is_manual)
        .bind(r.command.as_str())
        .execute(&self.pool)
        .await
        .context("insert_decision failed")?
        .last_insert_rowid();
        Ok(id)
    }

    /// Newest first.
    pub async fn recent_decisions(&self, limit: i64) -> Result<Vec<DecisionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT ts,
                   soil_moisture, temperature, humidity, rain_sensor,
                   rainfall_24h, rainfall_72h,
                   water_volume, mode, crop_id, is_manual, command
            FROM decisions
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("recent_decisions failed")?;

        rows.iter().map(decision_from_row).collect()
    }

    pub async fn count_decisions(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM decisions")
            .fetch_one(&self.pool)
            .await
            .context("count_decisions failed")?;
        Ok(n)
    }
}

fn decision_from_row(row: &SqliteRow) -> Result<DecisionRecord> {
    let ts: i64 = row.try_get("ts")?;
    let mode: String = row.try_get("mode")?;
    let command: String = row.try_get("command")?;
    let is_manual: i64 = row.try_get("is_manual")?;

    Ok(DecisionRecord {
        timestamp: OffsetDateTime::from_unix_timestamp(ts)
            .with_context(|| format!("bad decision timestamp {ts}"))?,
        soil_moisture: row.try_get("soil_moisture")?,
        temperature: row.try_get("temperature")?,
        humidity: row.try_get("humidity")?,
        rain_sensor: row.try_get("rain_sensor")?,
        rainfall_24h: row.try_get("rainfall_24h")?,
        rainfall_72h: row.try_get("rainfall_72h")?,
        water_volume: row.try_get("water_volume")?,
        mode: mode.parse::<PredictionMode>().map_err(anyhow::Error::msg)?,
        crop_id: row.try_get("crop_id")?,
        is_manual: is_manual != 0,
        command: command.parse::<CommandStatus>().map_err(anyhow::Error::msg)?,
    })
}

#[async_trait]
impl CycleLog for Db {
    async fn append(&self, record: &DecisionRecord) -> Result<(), EngineError> {
        self.insert_decision(record)
            .await
            .map(|_| ())
            .map_err(|e| EngineError::LogFailure(format!("{e:#}")))
    }
}
