//! Scheduler loop: arbitrates between the manual and automatic paths.
//!
//! Each tick runs at most one of them:
//!
//! ```text
//! tick ──▶ ManualCheck ──[acted]──────────────────────────▶ sleep manual_pause
//!              │
//!              └─[no override]─▶ AutomaticCheck ──[not due]─▶ sleep idle_pause
//!                                     │
//!                                     ├─[record]──────────▶ sleep idle_pause
//!                                     └─[skip / failure]──▶ sleep cooldown
//! ```
//!
//! Time comes from `tokio::time::Instant`, so tests drive the loop with a
//! paused clock.  The stop signal is only observed between ticks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::decision::DecisionRecord;
use crate::engine::DecisionEngine;
use crate::error::EngineError;

/// Loop pacing.  See `[engine]` in the config file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
    /// Minimum spacing between override polls.
    pub manual_check: Duration,
    /// Minimum spacing between automatic cycle attempts, start to start.
    pub auto_interval: Duration,
    pub manual_pause: Duration,
    pub idle_pause: Duration,
    pub cooldown: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            manual_check: Duration::from_secs(30),
            auto_interval: Duration::from_secs(300),
            manual_pause: Duration::from_secs(10),
            idle_pause: Duration::from_secs(5),
            cooldown: Duration::from_secs(60),
        }
    }
}

/// What one tick did.
#[derive(Debug)]
pub enum TickOutcome {
    /// A manual command was issued; the automatic path was not considered.
    Manual,
    /// Nothing due yet.
    Idle,
    /// An automatic cycle completed.
    Cycle(DecisionRecord),
    /// Sensors unreadable; the engine already alerted.
    Skipped,
    /// Unexpected failure inside the tick.
    Failed(EngineError),
}

pub struct Scheduler {
    engine: Arc<DecisionEngine>,
    timing: Timing,
    last_manual_check: Option<Instant>,
    last_auto_check: Option<Instant>,
}

impl Scheduler {
    pub fn new(engine: Arc<DecisionEngine>, timing: Timing) -> Self {
        Self {
            engine,
            timing,
            last_manual_check: None,
            last_auto_check: None,
        }
    }

    /// Loop until `stop` turns true (or its sender goes away).
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        info!(
            crop = %self.engine.crop_id(),
            manual_check_sec = self.timing.manual_check.as_secs(),
            auto_interval_sec = self.timing.auto_interval.as_secs(),
            "scheduler started"
        );

        loop {
            if *stop.borrow() {
                break;
            }

            let outcome = self.tick().await;
            match &outcome {
                TickOutcome::Cycle(record) => debug!(
                    volume = record.water_volume,
                    mode = %record.mode,
                    command = %record.command,
                    "automatic cycle complete"
                ),
                TickOutcome::Failed(e) => {
                    error!(kind = e.kind(), error = %e, "scheduler tick failed");
                    self.engine.alert(&format!("System error: {e}")).await;
                }
                _ => {}
            }

            let pause = self.pause_after(&outcome);
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }

        info!("scheduler stopped");
    }

    /// Run one tick: the manual check, then the automatic check if nothing
    /// manual happened.
    pub async fn tick(&mut self) -> TickOutcome {
        match self.check_manual().await {
            Ok(true) => return TickOutcome::Manual,
            Ok(false) => {}
            Err(e) => return TickOutcome::Failed(e),
        }

        let now = Instant::now();
        if let Some(last) = self.last_auto_check {
            if now.duration_since(last) < self.timing.auto_interval {
                return TickOutcome::Idle;
            }
        }
        self.last_auto_check = Some(now);

        let engine = Arc::clone(&self.engine);
        match isolate(async move { engine.run_automatic_cycle().await }).await {
            Ok(Ok(record)) => TickOutcome::Cycle(record),
            Ok(Err(EngineError::DataUnavailable(reason))) => {
                warn!(%reason, cooldown_sec = self.timing.cooldown.as_secs(), "backing off");
                TickOutcome::Skipped
            }
            Ok(Err(e)) | Err(e) => TickOutcome::Failed(e),
        }
    }

    /// Rate-limited override poll.  No I/O happens if the previous poll was
    /// less than `manual_check` ago.
    async fn check_manual(&mut self) -> Result<bool, EngineError> {
        let now = Instant::now();
        if let Some(last) = self.last_manual_check {
            if now.duration_since(last) < self.timing.manual_check {
                return Ok(false);
            }
        }

        let engine = Arc::clone(&self.engine);
        let acted = isolate(async move { engine.handle_manual_request().await }).await;
        self.last_manual_check = Some(now);
        acted
    }

    fn pause_after(&self, outcome: &TickOutcome) -> Duration {
        match outcome {
            TickOutcome::Manual => self.timing.manual_pause,
            TickOutcome::Idle | TickOutcome::Cycle(_) => self.timing.idle_pause,
            TickOutcome::Skipped | TickOutcome::Failed(_) => self.timing.cooldown,
        }
    }
}

/// Run engine work on its own task so a panic surfaces as an error instead
/// of unwinding through the loop.
async fn isolate<T, F>(fut: F) -> Result<T, EngineError>
where
    F: std::future::Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(fut)
        .await
        .map_err(|e| EngineError::Internal(format!("engine task aborted: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::PredictionMode;
    use crate::forecast::ForecastResult;
    use crate::sensor::ManualRequest;
    use crate::testing::{Harness, PredictorBehaviour};

    fn scheduler(h: &Harness) -> Scheduler {
        Scheduler::new(Arc::new(h.engine()), Timing::default())
    }

    fn manual(volume: f64) -> Result<ManualRequest, EngineError> {
        Ok(ManualRequest {
            active: true,
            volume,
        })
    }

    // -- manual rate limiting --------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn two_ticks_within_29s_poll_override_once() {
        let h = Harness::new();
        let mut s = scheduler(&h);

        s.tick().await;
        tokio::time::advance(Duration::from_secs(29)).await;
        s.tick().await;

        assert_eq!(h.gateway.override_reads(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn override_polled_again_after_30s() {
        let h = Harness::new();
        let mut s = scheduler(&h);

        s.tick().await;
        tokio::time::advance(Duration::from_secs(30)).await;
        s.tick().await;

        assert_eq!(h.gateway.override_reads(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_tick_skips_automatic_path() {
        let h = Harness::new();
        h.gateway.push_override(manual(8.0));
        let mut s = scheduler(&h);

        assert!(matches!(s.tick().await, TickOutcome::Manual));
        assert_eq!(h.gateway.reads(), 1); // best-effort read for the record only
        assert_eq!(h.forecast.calls(), 0);
        assert_eq!(h.log.records()[0].mode, PredictionMode::Manual);
    }

    #[tokio::test(start_paused = true)]
    async fn override_error_falls_through_to_automatic() {
        let h = Harness::new();
        h.gateway
            .push_override(Err(EngineError::DataUnavailable("garbled".into())));
        let mut s = scheduler(&h);

        assert!(matches!(s.tick().await, TickOutcome::Cycle(_)));
    }

    // -- automatic interval ----------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn first_tick_runs_cycle_then_waits_for_interval() {
        let h = Harness::new();
        let mut s = scheduler(&h);

        assert!(matches!(s.tick().await, TickOutcome::Cycle(_)));
        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(matches!(s.tick().await, TickOutcome::Idle));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(matches!(s.tick().await, TickOutcome::Cycle(_)));
        assert_eq!(h.log.records().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_measured_from_attempt_start() {
        let h = Harness::new();
        h.gateway.make_unavailable();
        let mut s = scheduler(&h);

        assert!(matches!(s.tick().await, TickOutcome::Skipped));
        h.gateway.set_reading(Ok(crate::testing::WHEAT_READING));
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(matches!(s.tick().await, TickOutcome::Idle));
    }

    // -- failure handling ------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn sensor_skip_backs_off_with_cooldown() {
        let h = Harness::new();
        h.gateway.make_unavailable();
        let mut s = scheduler(&h);

        let outcome = s.tick().await;
        assert!(matches!(outcome, TickOutcome::Skipped));
        assert_eq!(s.pause_after(&outcome), Duration::from_secs(60));
        assert_eq!(h.notifier.messages().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_predictor_is_caught() {
        let h = Harness::new();
        h.forecast.set(ForecastResult::ok(0.0, 0.0));
        h.predictor.set(PredictorBehaviour::Panics);
        let mut s = scheduler(&h);

        let outcome = s.tick().await;
        assert!(matches!(outcome, TickOutcome::Failed(EngineError::Internal(_))));
        assert_eq!(s.pause_after(&outcome), Duration::from_secs(60));
    }

    #[test]
    fn pauses_follow_outcome() {
        let h = Harness::new();
        let s = scheduler(&h);
        assert_eq!(s.pause_after(&TickOutcome::Manual), Duration::from_secs(10));
        assert_eq!(s.pause_after(&TickOutcome::Idle), Duration::from_secs(5));
    }

    // -- run loop --------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn run_cycles_on_interval_until_stopped() {
        let h = Harness::new();
        let s = scheduler(&h);
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(s.run(stop_rx));

        tokio::time::sleep(Duration::from_secs(650)).await;
        stop_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(h.log.records().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn run_survives_failures_and_alerts() {
        let h = Harness::new();
        h.forecast.set(ForecastResult::ok(0.0, 0.0));
        h.predictor.set(PredictorBehaviour::Panics);
        let s = scheduler(&h);
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(s.run(stop_rx));

        tokio::time::sleep(Duration::from_secs(30)).await;
        h.predictor.set(PredictorBehaviour::Returns(4.0));
        tokio::time::sleep(Duration::from_secs(300)).await;
        stop_tx.send(true).unwrap();
        handle.await.unwrap();

        let alerts = h.notifier.messages();
        assert!(alerts[0].starts_with("System error"));
        assert_eq!(h.log.records().len(), 1);
        assert_eq!(h.log.records()[0].mode, PredictionMode::Ml);
    }

    #[tokio::test(start_paused = true)]
    async fn run_exits_immediately_when_already_stopped() {
        let h = Harness::new();
        let (_stop_tx, stop_rx) = watch::channel(true);
        scheduler(&h).run(stop_rx).await;
        assert_eq!(h.gateway.override_reads(), 0);
    }
}
