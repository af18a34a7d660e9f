use std::net::SocketAddr;
use std::sync::Arc;

use lockstep_server::config::ServerConfig;
use lockstep_server::scheduler::GameServer;
use rod_transport::{Endpoint, EndpointEvent, EndpointRole};
use tracing::info;

#[tokio::main]
async fn main() {
    let config = Arc::new(match ServerConfig::load("server.toml") {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load server.toml: {e}");
            std::process::exit(1);
        }
    });

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();

    info!(
        "lockstep-server v{} starting on {}:{}",
        env!("CARGO_PKG_VERSION"),
        config.server.address,
        config.server.port
    );
    info!(
        "frame interval {}ms, room GC after {}s",
        config.scheduler.frame_interval_ms, config.scheduler.room_gc_seconds
    );

    let addr: SocketAddr = format!("{}:{}", config.server.address, config.server.port)
        .parse()
        .expect("invalid bind address");

    let (mut endpoint, mut events, handle) =
        Endpoint::bind(addr, EndpointRole::Server, config.transport.to_endpoint_config())
            .await
            .expect("failed to bind UDP socket");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let shutdown_tx_ctrlc = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown signal received");
        let _ = shutdown_tx_ctrlc.send(true);
    });

    let mut game_server = GameServer::new(handle, config.scheduler.room_gc());
    let mut tick_interval = tokio::time::interval(config.scheduler.frame_interval());
    let mut shutdown_rx_game = shutdown_rx.clone();

    let game_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(EndpointEvent::Message { addr, payload }) => {
                            game_server.handle_message(addr, payload).await;
                        }
                        Some(EndpointEvent::Disconnected { addr }) => {
                            game_server.handle_disconnect(addr).await;
                        }
                        Some(EndpointEvent::SendFailed { addr, seq }) => {
                            tracing::warn!("reliable send to {addr} (seq {seq}) exhausted retries");
                        }
                        None => break,
                    }
                }
                _ = tick_interval.tick() => {
                    game_server.tick().await;
                }
                _ = shutdown_rx_game.changed() => {
                    if *shutdown_rx_game.borrow() {
                        break;
                    }
                }
            }
        }
    });

    endpoint.run(shutdown_rx).await;
    let _ = game_task.await;
    info!("server shut down");
}
