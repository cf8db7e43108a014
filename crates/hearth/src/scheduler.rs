//! Fixed-rate tick loop.
//!
//! Each task keeps its own countdown, decremented by the measured time
//! between ticks. When it reaches zero the task runs once and the countdown is
//! re-armed by adding the interval, so lateness in one run is paid back by
//! the next rather than accumulating.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::context::EngineContext;
use crate::tasks::TaskDef;

struct Slot {
    def: TaskDef,
    interval: f64,
    countdown: f64,
}

pub struct Scheduler {
    slots: Vec<Slot>,
    period: Duration,
}

/// How long to sleep after a tick that took `took`. Never negative; a slow
/// tick is not made up with extra ticks.
pub fn next_sleep(period: Duration, took: Duration) -> Duration {
    period.saturating_sub(took)
}

impl Scheduler {
    pub fn new(tasks: &[TaskDef], period: Duration) -> Self {
        let slots = tasks
            .iter()
            .map(|def| {
                let interval = def.interval.as_secs_f64();
                Slot {
                    def: def.clone(),
                    interval,
                    countdown: interval,
                }
            })
            .collect();
        Self { slots, period }
    }

    /// Charge `elapsed` seconds to every countdown. Returns the tasks now due,
    /// each with the time since it last ran.
    pub fn advance(&mut self, elapsed: f64) -> Vec<(usize, f64)> {
        let mut due = Vec::new();
        for (i, slot) in self.slots.iter_mut().enumerate() {
            slot.countdown -= elapsed;
            if slot.countdown <= 0.0 {
                due.push((i, slot.interval + slot.countdown.abs()));
                slot.countdown += slot.interval;
            }
        }
        due
    }

    async fn run_task(&self, ctx: &EngineContext, idx: usize, observed: f64) {
        let def = &self.slots[idx].def;
        let res = AssertUnwindSafe(def.runner.run(ctx, observed))
            .catch_unwind()
            .await;
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(task = def.name, err = %format!("{e:#}"), "task failed"),
            Err(_) => error!(task = def.name, "task panicked"),
        }
    }

    /// Tick until `shutdown` flips to true (or its sender goes away).
    pub async fn run(mut self, ctx: Arc<EngineContext>, mut shutdown: watch::Receiver<bool>) {
        info!(
            period_ms = self.period.as_millis() as u64,
            tasks = self.slots.len(),
            "scheduler started"
        );
        let mut last = Instant::now();
        loop {
            if *shutdown.borrow() {
                break;
            }
            let start = Instant::now();
            let elapsed = start.duration_since(last).as_secs_f64();
            last = start;

            for (idx, observed) in self.advance(elapsed) {
                self.run_task(&ctx, idx, observed).await;
            }

            let took = start.elapsed();
            if took > self.period {
                debug!(took_ms = took.as_millis() as u64, "tick overran its period");
            }
            tokio::select! {
                _ = tokio::time::sleep(next_sleep(self.period, took)) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("scheduler stopped");
    }
}
