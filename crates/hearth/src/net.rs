//! Line-oriented TCP front door: one task per connection, plus a writer task
//! that owns the socket's write half.

use std::sync::Arc;

use anyhow::Context as _;
use mudproto::event::Event;
use mudproto::line::{LineReader, render};
use mudproto::session::SessionId;
use serde_json::json;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};
use zeroize::Zeroize;

use crate::config::InputMode;
use crate::context::EngineContext;
use crate::hub::session_key;
use crate::session::{Connection, enqueue_line};

pub async fn serve(ctx: Arc<EngineContext>, listener: TcpListener) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let (rd, wr) = stream.into_split();
            if let Err(e) = serve_connection(ctx, rd, wr).await {
                warn!(peer = %peer, err = %format!("{e:#}"), "connection ended with error");
            }
        });
    }
}

/// Run one connection to completion: session document, parser stack, and
/// cleanup on the way out.
pub async fn serve_connection<R, W>(ctx: Arc<EngineContext>, rd: R, mut wr: W) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let sid = SessionId::random().map_err(|e| anyhow::anyhow!("session id: {e}"))?;
    let handle = ctx
        .collection("session")?
        .create_proxy(
            json!({ "input": [], "connected_at": chrono::Utc::now().to_rfc3339() }),
            Some(&session_key(sid)),
        )
        .await
        .context("create session document")?;

    let (write_tx, mut write_rx) = mpsc::channel::<Event>(128);
    let writer = tokio::spawn(async move {
        while let Some(ev) = write_rx.recv().await {
            let Some(text) = render(&ev) else {
                continue;
            };
            if wr.write_all(text.as_bytes()).await.is_err() {
                break;
            }
        }
        let _ = wr.shutdown().await;
    });

    let (line_tx, mut line_rx) = mpsc::channel::<String>(64);
    ctx.hub().register(sid, write_tx.clone(), line_tx).await;
    info!(session = %sid, "connected");

    let mut conn = Connection::new(ctx.clone(), sid, handle, write_tx);
    let res = drive(&ctx, &mut conn, LineReader::new(rd), &mut line_rx).await;

    conn.teardown().await;
    drop(conn);
    let _ = writer.await;
    info!(session = %sid, "disconnected");
    res
}

async fn drive<R: AsyncRead + Unpin>(
    ctx: &EngineContext,
    conn: &mut Connection,
    mut lines: LineReader<R>,
    routed: &mut mpsc::Receiver<String>,
) -> anyhow::Result<()> {
    conn.start().await?;
    while !conn.is_closing() {
        let res = tokio::select! {
            line = lines.read_line() => {
                let Some(mut line) = line? else {
                    return Ok(());
                };
                let res = match ctx.settings().input_mode {
                    InputMode::Direct => conn.dispatch(&line).await,
                    InputMode::Queued => enqueue_line(ctx, &conn.state().handle, &line).await,
                };
                // Lines may be passwords.
                line.zeroize();
                res
            }
            Some(mut line) = routed.recv() => {
                let res = conn.dispatch(&line).await;
                line.zeroize();
                res
            }
        };
        if let Err(e) = res {
            warn!(session = %conn.state().sid, err = %format!("{e:#}"), "input failed");
            conn.state()
                .send_text("Something went wrong handling that. It has been logged.")
                .await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mudproto::line::LineReader;
    use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf};

    use super::serve_connection;
    use crate::config::InputMode;
    use crate::context::Settings;
    use crate::tasks::TaskRunner;
    use crate::tasks::session_input::SessionInput;
    use crate::testutil;

    async fn until(lines: &mut LineReader<ReadHalf<DuplexStream>>, needle: &str) -> Vec<String> {
        let mut seen = Vec::new();
        loop {
            let line = tokio::time::timeout(Duration::from_secs(5), lines.read_line())
                .await
                .expect("timed out waiting for output")
                .unwrap()
                .expect("connection closed early");
            let hit = line.contains(needle);
            seen.push(line);
            if hit {
                return seen;
            }
        }
    }

    #[tokio::test]
    async fn a_line_client_signs_up_and_quits() {
        let (fake, ctx) = testutil::engine().await;
        let (client, server) = tokio::io::duplex(8192);
        let (srd, swr) = tokio::io::split(server);
        let task = tokio::spawn(serve_connection(ctx.clone(), srd, swr));
        let (crd, mut cwr) = tokio::io::split(client);
        let mut lines = LineReader::new(crd);

        until(&mut lines, "Enter Username:").await;
        assert_eq!(fake.with_state(|s| s.docs("session").len()), 1);
        assert_eq!(ctx.hub().len().await, 1);

        cwr.write_all(b"Ann\r\nyes\r\nsecret-pw\r\nsecret-pw\r\n").await.unwrap();
        until(&mut lines, "SUPERUSER").await;
        let menu = until(&mut lines, "play <name>").await;
        assert!(menu.iter().any(|l| l == "You have no characters yet."));

        cwr.write_all(b"IDLE\r\nQUIT\r\n").await.unwrap();
        until(&mut lines, "Goodbye.").await;
        assert!(lines.read_line().await.unwrap().is_none());

        task.await.unwrap().unwrap();
        assert!(fake.with_state(|s| s.docs("session").is_empty()));
        assert!(ctx.hub().is_empty().await);
    }

    #[tokio::test]
    async fn queued_input_goes_through_the_session_document() {
        let (fake, ctx) = testutil::engine_with(Settings {
            input_mode: InputMode::Queued,
            ..Settings::default()
        })
        .await;
        let (client, server) = tokio::io::duplex(8192);
        let (srd, swr) = tokio::io::split(server);
        let task = tokio::spawn(serve_connection(ctx.clone(), srd, swr));
        let (crd, mut cwr) = tokio::io::split(client);
        let mut lines = LineReader::new(crd);
        until(&mut lines, "Enter Username:").await;

        cwr.write_all(b"Bob\r\n").await.unwrap();
        let queued = loop {
            let input = fake.with_state(|s| s.docs("session")[0]["input"].clone());
            if input.as_array().is_some_and(|a| !a.is_empty()) {
                break input;
            }
            tokio::task::yield_now().await;
        };
        assert_eq!(queued, serde_json::json!([["Command", { "data": "Bob" }]]));

        SessionInput.run(&ctx, 0.1).await.unwrap();
        until(&mut lines, "You want your Username to be: Bob").await;

        cwr.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
        assert!(fake.with_state(|s| s.docs("session").is_empty()));
    }
}
