//! Periodic world tasks run by the [`Scheduler`](crate::scheduler::Scheduler).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::warn;

use crate::context::{EngineContext, Settings};

pub mod session_input;
pub mod simulation;

#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// `delta` is the time since this task last ran, in seconds.
    async fn run(&self, ctx: &EngineContext, delta: f64) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct TaskDef {
    pub name: &'static str,
    pub interval: Duration,
    pub runner: Arc<dyn TaskRunner>,
}

impl std::fmt::Debug for TaskDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDef")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .finish()
    }
}

pub fn registry(settings: &Settings) -> Vec<TaskDef> {
    vec![
        TaskDef {
            name: "session_input",
            interval: settings.session_input_interval,
            runner: Arc::new(session_input::SessionInput),
        },
        TaskDef {
            name: "simulation_commands",
            interval: settings.simulation_interval,
            runner: Arc::new(simulation::SimulationCommands),
        },
    ]
}

/// One document's queue, as it was just before the drain emptied it.
#[derive(Debug, Clone, PartialEq)]
pub struct Drained {
    pub id: String,
    pub items: Vec<Value>,
    pub tag: Option<String>,
}

impl Drained {
    fn from_row(row: Value) -> Option<Self> {
        let Value::Array(mut cols) = row else {
            return None;
        };
        if cols.len() != 3 {
            return None;
        }
        let tag = cols.pop()?.as_str().map(str::to_string);
        let items = match cols.pop()? {
            Value::Array(items) => items,
            _ => return None,
        };
        let id = cols.pop()?.as_str()?.to_string();
        Some(Self { id, items, tag })
    }
}

/// Take every non-empty queue in one store-side statement.
pub async fn drain(ctx: &EngineContext, statement: &str) -> anyhow::Result<Vec<Drained>> {
    let rows = ctx.query(statement, json!({})).await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let shown = row.to_string();
        match Drained::from_row(row) {
            Some(d) => out.push(d),
            None => warn!(row = %shown, "malformed drain row"),
        }
    }
    Ok(out)
}
