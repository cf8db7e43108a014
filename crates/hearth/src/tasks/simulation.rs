use async_trait::async_trait;
use hearth_store::DocumentId;
use serde_json::Value;
use tracing::{debug, warn};

use super::{TaskRunner, drain};
use crate::context::EngineContext;
use crate::queries;

/// Runs every object's pending command lines through its behavior.
pub struct SimulationCommands;

#[async_trait]
impl TaskRunner for SimulationCommands {
    async fn run(&self, ctx: &EngineContext, delta: f64) -> anyhow::Result<()> {
        let batch = drain(ctx, queries::DRAIN_PENDING_COMMANDS).await?;
        if batch.is_empty() {
            return Ok(());
        }
        debug!(objects = batch.len(), delta, "running pending commands");

        for d in batch {
            let handle = match DocumentId::parse(&d.id)
                .and_then(|id| ctx.store().handle(id, d.tag.as_deref()))
            {
                Ok(h) => h,
                Err(e) => {
                    warn!(object = %d.id, items = d.items.len(), err = %e, "dropping commands for unresolvable object");
                    continue;
                }
            };
            for item in d.items {
                let line = match item {
                    Value::String(line) => line,
                    other => {
                        warn!(object = %d.id, item = %other, "pending command is not a string");
                        continue;
                    }
                };
                if let Err(e) = handle.behavior().execute_command(ctx, &handle, &line).await {
                    warn!(object = %d.id, command = %line, err = %format!("{e:#}"), "command failed");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::SimulationCommands;
    use crate::queries;
    use crate::tasks::TaskRunner;
    use crate::testutil;

    #[tokio::test]
    async fn pending_commands_run_in_order_and_failures_are_skipped() {
        let (fake, ctx) = testutil::engine().await;
        let mut ann = testutil::playing(&ctx, "Ann", "Zed").await;
        for line in ["say one", "dance", "say two"] {
            ctx.query(
                queries::PUSH_PENDING_COMMAND,
                json!({ "id": ann.character.id().as_str(), "item": line }),
            )
            .await
            .unwrap();
        }
        fake.with_state(|s| {
            let doc = s.doc_mut(ann.character.id().as_str()).unwrap();
            doc["pending_commands"].as_array_mut().unwrap().insert(1, json!(7));
        });
        fake.insert("object", json!({ "proxy": "gargoyle", "pending_commands": ["look"] }));

        SimulationCommands.run(&ctx, 0.25).await.unwrap();
        assert_eq!(ann.next_text().await, "You say, \"one\"");
        assert_eq!(ann.next_text().await, crate::commands::NO_MATCH);
        assert_eq!(ann.next_text().await, "You say, \"two\"");
        assert_eq!(
            fake.doc(ann.character.id().as_str()).unwrap()["pending_commands"],
            json!([])
        );
    }
}
