use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use hearth::config::parse_args;
use hearth::context::{EngineContext, Settings};
use hearth::net;
use hearth::scheduler::Scheduler;
use hearth_store::{DatabaseManager, HttpTransport};
use tokio::net::TcpListener;
use tracing::{Level, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,hearth=info".into()),
        )
        .with_target(false)
        .with_max_level(Level::INFO)
        .init();

    let cfg = parse_args();

    let transport = HttpTransport::new(&cfg.db_url, Duration::from_secs(10)).context("store transport")?;
    let db = Arc::new(DatabaseManager::new(cfg.store.clone(), Arc::new(transport)));
    db.connect()
        .await
        .with_context(|| format!("connect to store at {}", cfg.db_url))?;
    tokio::spawn(db.clone().token_refresh_loop());

    let ctx = Arc::new(EngineContext::new(db, Settings::from(&cfg))?);
    ctx.initialize().await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let scheduler = Scheduler::new(ctx.tasks(), cfg.tick_period());
    let ticking = tokio::spawn(scheduler.run(ctx.clone(), shutdown_rx));

    let listener = TcpListener::bind(cfg.bind).await?;
    info!(
        bind = %cfg.bind,
        db_url = %cfg.db_url,
        database = %cfg.store.database,
        tick_hz = cfg.tick_hz,
        input_mode = ?cfg.input_mode,
        node_id = %cfg.node_id.as_deref().unwrap_or("-"),
        "hearth listening"
    );

    let res = tokio::select! {
        res = net::serve(ctx, listener) => res,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            Ok(())
        }
    };
    let _ = shutdown_tx.send(true);
    let _ = ticking.await;
    res
}
