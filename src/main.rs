//! # Voice Call Agent - Main Application Entry Point
//!
//! Sets up an Actix-web server that takes live voice calls over WebSocket:
//!
//! - `GET /ws/audio/{client_id}` and `GET /ws/audio`: raw binary PCM16 calls
//! - `GET /streams/{call_sid}`: JSON-enveloped media streams
//! - `GET /health`, `GET /readiness` and the `/api/v1` management endpoints
//!
//! Each call gets voice activity detection with barge-in, buffered transcription
//! and a cancellable reply pipeline. Out of the box the pipeline talks to offline
//! stand-in collaborators, so the server runs with no external services.

mod audio;
mod config;
mod connection;
mod error;
mod handlers;
mod health;
mod pipeline;
mod state;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use crate::config::AppConfig;
use crate::state::AppState;
use tracing::{debug, error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting voice-call-agent v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    info!(
        sample_rate = config.audio.sample_rate,
        frame_ms = config.audio.frame_duration_ms,
        vad_aggressiveness = config.vad.aggressiveness,
        "Audio pipeline configured"
    );

    let collaborators = pipeline::offline::offline_collaborators(&config);
    let app_state = AppState::new(config.clone(), collaborators);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    let sweeper = tokio::spawn(sweep_inactive_connections(app_state.clone()));

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config)),
            )
            .route("/health", web::get().to(health::health_check))
            .route("/readiness", web::get().to(health::readiness))
            .route("/ws/audio", web::get().to(websocket::raw::raw_audio_socket_anonymous))
            .route(
                "/ws/audio/{client_id}",
                web::get().to(websocket::raw::raw_audio_socket),
            )
            .route(
                "/streams/{call_sid}",
                web::get().to(websocket::media_stream::media_stream_socket),
            )
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    sweeper.abort();
    info!("Server stopped gracefully");
    Ok(())
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_call_agent=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Periodically close connections that have gone quiet.
///
/// Interval and timeout are re-read every round so runtime config updates apply.
async fn sweep_inactive_connections(state: AppState) {
    loop {
        let config = state.get_config();
        tokio::time::sleep(config.cleanup_interval()).await;

        let removed = state
            .registry
            .cleanup_inactive(config.inactivity_timeout())
            .await;
        if removed.is_empty() {
            debug!("Inactivity sweep found nothing to close");
        } else {
            info!(count = removed.len(), "Closed inactive connections: {:?}", removed);
        }
    }
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
        _ => {
            error!("Failed to install signal handlers, falling back to Ctrl+C");
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}
