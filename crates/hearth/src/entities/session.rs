use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use mudproto::event::{COMMAND, Envelope, Event, GMCP};
use serde_json::Value;
use tracing::{debug, warn};

use super::{Entity, Handle};
use crate::context::{EngineContext, EventRegistry};
use crate::hub::Routed;

/// A connection's document: its queued input and who it is logged in as.
pub struct SessionEntity;

pub fn session() -> Arc<dyn Entity> {
    Arc::new(SessionEntity)
}

#[async_trait]
impl Entity for SessionEntity {
    fn kind(&self) -> &'static str {
        "session"
    }

    async fn execute_event(
        &self,
        ctx: &EngineContext,
        me: &Handle,
        event: &str,
        payload: Value,
    ) -> anyhow::Result<()> {
        let Some(handler) = ctx.events().get(event) else {
            anyhow::bail!("no handler for event {event:?}");
        };
        handler(ctx, me, payload).await
    }
}

pub fn events() -> EventRegistry {
    EventRegistry::new(&[(COMMAND, on_command), (GMCP, on_gmcp)])
}

/// A typed line, drained from the session's input: hand it to the live
/// connection, which runs it through its parsers. A connection too far behind
/// to take it loses the line and is told so.
fn on_command<'a>(
    ctx: &'a EngineContext,
    me: &'a Handle,
    payload: Value,
) -> BoxFuture<'a, anyhow::Result<()>> {
    async move {
        let line = match Event::try_from(Envelope::new(COMMAND, payload))? {
            Event::Command { data } => data,
            other => anyhow::bail!("expected a Command, got {}", other.name()),
        };
        match ctx.hub().route_line(me.id(), line).await {
            Routed::Delivered => {}
            Routed::Busy(line) => {
                warn!(session = %me.id(), len = line.len(), "connection is not keeping up, dropping line");
                ctx.hub()
                    .send_to_session(me.id(), Event::text("Too much input at once; a line was dropped."))
                    .await;
            }
            Routed::Offline => {
                warn!(session = %me.id(), "command for a session with no live connection");
            }
        }
        Ok(())
    }
    .boxed()
}

fn on_gmcp<'a>(
    _ctx: &'a EngineContext,
    me: &'a Handle,
    payload: Value,
) -> BoxFuture<'a, anyhow::Result<()>> {
    async move {
        debug!(session = %me.id(), %payload, "ignoring GMCP");
        Ok(())
    }
    .boxed()
}
