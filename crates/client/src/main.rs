mod shutdown;

use clap::Parser;

use crybb_bot_core::config::Cli;
use crybb_bot_core::counters::Counters;
use crybb_bot_engine::{start_engine, EngineConfig, EngineEvent};

use crate::shutdown::{spawn_ctrl_c_handler, ShutdownController, ShutdownEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from(cli);
    let counters = Counters::new();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting crybb-bot");

    let engine = start_engine(config, counters);
    let mut events = engine.subscribe();

    let shutdown = std::sync::Arc::new(ShutdownController::new());
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::unbounded_channel::<ShutdownEvent>();
    spawn_ctrl_c_handler(shutdown.clone(), shutdown_tx);

    let mut immediate_exit = false;

    loop {
        tokio::select! {
            ev_opt = shutdown_rx.recv() => {
                match ev_opt {
                    Some(ShutdownEvent::Graceful) => {
                        tracing::info!("stop requested, finishing in-flight work before exiting");
                        engine.request_stop();
                    }
                    Some(ShutdownEvent::Immediate) => {
                        tracing::warn!("stop requested again, exiting immediately");
                        immediate_exit = true;
                        break;
                    }
                    None => {}
                }
            }
            evt = events.recv() => {
                let evt = match evt {
                    Ok(v) => v,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "engine event stream lagged");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };

                match evt {
                    EngineEvent::Started => tracing::info!("engine started"),
                    EngineEvent::StopRequested => {}
                    EngineEvent::BatchFetched { count } => {
                        tracing::info!(count, "batch fetched");
                    }
                    EngineEvent::MentionFinished { mention_id, outcome } => {
                        tracing::info!(mention_id, ?outcome, "mention finished");
                    }
                    EngineEvent::Warning { message } => tracing::warn!("{message}"),
                    EngineEvent::Error { message } => tracing::error!("{message}"),
                    EngineEvent::Stopped => {
                        tracing::info!("engine stopped");
                        break;
                    }
                }
            }
        }
    }

    if immediate_exit {
        std::process::exit(130);
    }

    engine.wait().await?;
    Ok(())
}
