mod config;
mod render;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use skybot_client::{BskyClient, OpenAiCompletion, PlcDirectory};
use skybot_db::Database;
use skybot_engine::{Aggregator, Dispatcher, Engine, EngineContext, SocialClient};

use crate::config::Config;
use crate::render::ResvgRenderer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skybot=debug,skybot_engine=debug,skybot_client=info".into()),
        )
        .init();

    let config = Config::from_env()?;

    // The decision loop and the aggregation loop each get their own connection
    let engine_db = Arc::new(Database::open(&config.db_path)?);
    let aggregate_db = Arc::new(Database::open(&config.db_path)?);

    let social: Arc<dyn SocialClient> = Arc::new(BskyClient::new(
        &config.pds_url,
        &config.bot_handle,
        &config.bot_password,
    )?);
    let completion = Arc::new(OpenAiCompletion::new(
        &config.openai_url,
        &config.openai_api_key,
        &config.model,
    )?);
    let dispatcher = Arc::new(Dispatcher::new(
        config.engine.retry.clone(),
        config.engine.min_call_gap,
    ));

    let session = dispatcher.call("login", || social.login()).await?;
    info!(did = %session.did, handle = %session.handle, db = %config.db_path.display(), "Skybot starting");

    // Background aggregation
    let aggregator = Aggregator::new(
        aggregate_db,
        Arc::new(PlcDirectory::new(&config.plc_url)?),
        social.clone(),
        dispatcher.clone(),
        config.engine.directory_endpoint.clone(),
        config.engine.milestone_step,
        config.engine.chunk_chars,
    );
    tokio::spawn(aggregator.run(config.aggregate_secs));

    let ctx = EngineContext {
        db: engine_db,
        social,
        completion,
        renderer: Arc::new(ResvgRenderer::new(1024)),
        dispatcher,
        config: config.engine.clone(),
    };
    let engine = Engine::new(ctx, session)?;

    tokio::select! {
        _ = engine.run(Duration::from_secs(config.poll_secs)) => {}
        _ = shutdown_signal() => {}
    }

    info!("Skybot stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
