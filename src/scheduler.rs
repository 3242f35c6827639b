//! Round-to-round orchestration.
//!
//! The scheduler owns the timers: the tick interval and the round's hard
//! deadline live inside one `select!` loop per round and are dropped when the
//! round leaves `Active`, so a stale timer can never re-enter crash logic for
//! a settled round. The engine owns all state; the scheduler only drives it.

use crate::engine::{CrashEngine, TickOutcome};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{error, info, warn};

pub struct RoundScheduler {
    engine: Arc<CrashEngine>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Handle used to stop a running scheduler.
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

impl RoundScheduler {
    pub fn new(engine: Arc<CrashEngine>) -> (Self, ShutdownHandle) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                engine,
                shutdown_rx: rx,
            },
            ShutdownHandle { tx },
        )
    }

    /// Run rounds until shutdown. Resolves the starting round number from
    /// persisted history, then loops: create -> tick until crash or deadline
    /// -> settle -> cooldown.
    pub async fn run(mut self) {
        if let Err(e) = self.engine.sync_round_counter().await {
            // History unavailable: numbering restarts at 1. Verifiers key on
            // (seed, number), so duplicated numbers only hurt bookkeeping.
            warn!("could not resolve last round number, starting from scratch: {e}");
        }

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }
            if !self.start_round_with_retry().await {
                break;
            }
            let crashed_cleanly = self.drive_round().await;
            self.engine.settle_current().await;
            if !crashed_cleanly {
                break; // Shutdown raced the round.
            }

            tokio::select! {
                _ = sleep(self.engine.config().cooldown()) => {}
                _ = self.shutdown_rx.changed() => break,
            }
        }

        self.engine.shutdown().await;
        info!("scheduler stopped");
    }

    /// Bounded retry with backoff: the engine must not sit indefinitely
    /// without an active round, but a persistently failing creation path
    /// (bad fairness config, dead price feed) eventually surfaces as an
    /// error instead of a silent hot loop.
    async fn start_round_with_retry(&mut self) -> bool {
        let max_attempts = self.engine.config().round.create_max_attempts;
        for attempt in 1..=max_attempts {
            match self.engine.begin_round().await {
                Ok(round_id) => {
                    if attempt > 1 {
                        info!(%round_id, attempt, "round creation recovered");
                    }
                    return true;
                }
                Err(e) => {
                    if attempt == max_attempts {
                        error!("round creation failed after {max_attempts} attempts: {e}");
                        return false;
                    }
                    warn!(attempt, "round creation failed, backing off: {e}");
                    tokio::select! {
                        _ = sleep(self.engine.config().retry_backoff()) => {}
                        _ = self.shutdown_rx.changed() => return false,
                    }
                }
            }
        }
        false
    }

    /// Tick the active round until it crashes, hits its wall-clock deadline,
    /// or shutdown is requested. Returns false iff shutdown interrupted it.
    async fn drive_round(&mut self) -> bool {
        let mut ticker = interval(self.engine.config().tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let deadline = sleep(self.engine.config().max_round_duration());
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.engine.tick().await {
                        TickOutcome::Running { .. } => {}
                        TickOutcome::Crashed { .. } => return true,
                        // Someone else (deadline, shutdown) already crashed it.
                        TickOutcome::Idle => return true,
                    }
                }
                _ = &mut deadline => {
                    // Liveness safeguard, independent of the tick loop.
                    warn!("round hit its hard deadline, forcing crash");
                    self.engine.crash_current().await;
                    return true;
                }
                _ = self.shutdown_rx.changed() => {
                    self.engine.crash_current().await;
                    return false;
                }
            }
        }
    }
}
