use async_trait::async_trait;
use hearth_store::DocumentId;
use mudproto::event::Envelope;
use tracing::{debug, warn};

use super::{TaskRunner, drain};
use crate::context::EngineContext;
use crate::queries;

/// Feeds queued `[event, payload]` items to their session's behavior.
pub struct SessionInput;

#[async_trait]
impl TaskRunner for SessionInput {
    async fn run(&self, ctx: &EngineContext, delta: f64) -> anyhow::Result<()> {
        let batch = drain(ctx, queries::DRAIN_SESSION_INPUT).await?;
        if batch.is_empty() {
            return Ok(());
        }
        debug!(sessions = batch.len(), delta, "draining session input");

        for d in batch {
            let handle = match DocumentId::parse(&d.id)
                .and_then(|id| ctx.store().handle(id, d.tag.as_deref()))
            {
                Ok(h) => h,
                Err(e) => {
                    warn!(session = %d.id, items = d.items.len(), err = %e, "dropping input for unresolvable session");
                    continue;
                }
            };
            for item in d.items {
                let env: Envelope = match serde_json::from_value(item) {
                    Ok(env) => env,
                    Err(e) => {
                        warn!(session = %d.id, err = %e, "malformed input item");
                        continue;
                    }
                };
                if let Err(e) = handle
                    .behavior()
                    .execute_event(ctx, &handle, &env.event, env.payload)
                    .await
                {
                    warn!(session = %d.id, event = %env.event, err = %format!("{e:#}"), "input item failed");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mudproto::event::Event;
    use mudproto::session::SessionId;
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::SessionInput;
    use crate::hub::session_key;
    use crate::session::enqueue_line;
    use crate::tasks::TaskRunner;
    use crate::testutil;

    #[tokio::test]
    async fn queued_lines_reach_the_connection_in_order() {
        let (fake, ctx) = testutil::engine().await;
        let sid = SessionId(41);
        let session = ctx
            .collection("session")
            .unwrap()
            .create_proxy(json!({}), Some(&session_key(sid)))
            .await
            .unwrap();
        let (otx, _orx) = mpsc::channel(8);
        let (itx, mut irx) = mpsc::channel(8);
        ctx.hub().register(sid, otx, itx).await;

        enqueue_line(&ctx, &session, "look").await.unwrap();
        enqueue_line(&ctx, &session, "say hi").await.unwrap();
        fake.with_state(|s| {
            let doc = s.doc_mut(session.id().as_str()).unwrap();
            doc["input"].as_array_mut().unwrap().insert(1, json!("garbage"));
            doc["input"]
                .as_array_mut()
                .unwrap()
                .push(json!(["Dance", {}]));
        });

        SessionInput.run(&ctx, 0.1).await.unwrap();
        assert_eq!(irx.recv().await.as_deref(), Some("look"));
        assert_eq!(irx.recv().await.as_deref(), Some("say hi"));
        assert!(irx.try_recv().is_err());
        assert_eq!(fake.doc(session.id().as_str()).unwrap()["input"], json!([]));
    }

    #[tokio::test]
    async fn an_untagged_session_does_not_stop_the_batch() {
        let (fake, ctx) = testutil::engine().await;
        fake.insert("session", json!({ "_key": "broken", "input": [["Command", { "data": "x" }]] }));
        let sid = SessionId(42);
        let session = ctx
            .collection("session")
            .unwrap()
            .create_proxy(json!({}), Some(&session_key(sid)))
            .await
            .unwrap();
        let (otx, _orx) = mpsc::channel(8);
        let (itx, mut irx) = mpsc::channel(8);
        ctx.hub().register(sid, otx, itx).await;
        enqueue_line(&ctx, &session, "who").await.unwrap();

        SessionInput.run(&ctx, 0.1).await.unwrap();
        assert_eq!(irx.recv().await.as_deref(), Some("who"));
        assert_eq!(fake.doc("session/broken").unwrap()["input"], json!([]));
    }

    #[tokio::test]
    async fn a_stalled_connection_does_not_hold_up_the_tick() {
        let (_fake, ctx) = testutil::engine().await;
        let mut sessions = Vec::new();
        for n in [51u128, 52] {
            let sid = SessionId(n);
            let handle = ctx
                .collection("session")
                .unwrap()
                .create_proxy(json!({}), Some(&session_key(sid)))
                .await
                .unwrap();
            sessions.push((sid, handle));
        }
        // The first connection never reads its input or its output.
        let (stalled_out, mut stalled_orx) = mpsc::channel(1);
        let (stalled_in, mut stalled_irx) = mpsc::channel(1);
        ctx.hub().register(sessions[0].0, stalled_out, stalled_in).await;
        let (otx, _orx) = mpsc::channel(8);
        let (itx, mut irx) = mpsc::channel(8);
        ctx.hub().register(sessions[1].0, otx, itx).await;

        enqueue_line(&ctx, &sessions[0].1, "one").await.unwrap();
        enqueue_line(&ctx, &sessions[0].1, "two").await.unwrap();
        enqueue_line(&ctx, &sessions[0].1, "three").await.unwrap();
        enqueue_line(&ctx, &sessions[1].1, "who").await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), SessionInput.run(&ctx, 0.1))
            .await
            .expect("tick waited on a stalled connection")
            .unwrap();
        assert_eq!(irx.recv().await.as_deref(), Some("who"));
        assert_eq!(stalled_irx.recv().await.as_deref(), Some("one"));
        assert!(stalled_irx.try_recv().is_err());
        assert_eq!(
            stalled_orx.recv().await,
            Some(Event::text("Too much input at once; a line was dropped."))
        );
    }
}
