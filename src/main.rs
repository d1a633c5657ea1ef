//! # Transcription Jobs Backend - Main Application Entry Point
//!
//! Actix-web server fronting the transcription job engine: a bounded
//! worker-pool queue, a staged pipeline runner with a shared model cache,
//! cooperative pause/cancel, and a background stall detector.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (TOML file + environment variables)
//! - **state**: shared state handed to HTTP handlers
//! - **error**: engine error taxonomy and HTTP error responses
//! - **job**: job records, lifecycle state machine, store
//! - **engine**: queue, stage runner, stall detector, control-surface facade
//! - **transcription**: backend seam, model cache, capability resolver
//! - **artifacts**: transcript + sidecar persistence
//! - **handlers / health**: the thin HTTP veneer

mod artifacts;
mod config;
mod engine;
mod error;
mod handlers;
mod health;
mod job;
mod state;
mod transcription;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use engine::stall::StallDetectorConfig;
use engine::Engine;
use job::store::InMemoryJobStore;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transcription::{
    BackendAvailability, CapabilitySnapshot, PlaceholderBackend, StaticAvailability,
};

/// Global shutdown flag flipped by the signal handler task.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!(
        "Starting transcribe-jobs-backend v{}",
        env!("CARGO_PKG_VERSION")
    );
    info!(
        "Configuration loaded: {}:{}, {} workers",
        config.server.host, config.server.port, config.engine.worker_concurrency
    );

    // Wire the engine: in-memory store, the built-in backend behind the
    // trait seam, and an availability snapshot seeded from configuration.
    let store = Arc::new(InMemoryJobStore::new());
    let backend = Arc::new(PlaceholderBackend);
    let availability = Arc::new(StaticAvailability::new(config_snapshot(&config)));
    let app_engine = Arc::new(Engine::new(
        store.clone(),
        backend,
        availability,
        &config,
    ));

    let stall_handle = engine::stall::spawn(
        store,
        StallDetectorConfig {
            poll_interval: Duration::from_secs(config.engine.stall_poll_seconds),
            grace_seconds: config.engine.stall_grace_seconds,
        },
    );

    let app_state = AppState::new(config.clone(), app_engine.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

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
            .wrap(Logger::default())
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/jobs", web::post().to(handlers::submit_job))
                    .route("/jobs/{id}", web::get().to(handlers::get_job))
                    .route("/jobs/{id}/cancel", web::post().to(handlers::cancel_job))
                    .route("/jobs/{id}/pause", web::post().to(handlers::pause_job))
                    .route("/jobs/{id}/resume", web::post().to(handlers::resume_job))
                    .route("/jobs/{id}/restart", web::post().to(handlers::restart_job))
                    .route(
                        "/queue/concurrency",
                        web::put().to(handlers::set_concurrency),
                    ),
            )
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    // Drain in-flight jobs before exiting; queued IDs stay on the channel.
    stall_handle.abort();
    app_engine.shutdown().await;

    info!("Server stopped gracefully");
    Ok(())
}

/// Availability snapshot derived from configuration: the admin-default ASR
/// model is assumed installed; diarization stays listed but unavailable
/// until a runtime is wired in.
fn config_snapshot(config: &AppConfig) -> CapabilitySnapshot {
    CapabilitySnapshot {
        asr: vec![BackendAvailability::available(
            &config.models.default_asr_model,
        )],
        diarizers: vec![BackendAvailability::unavailable(
            &config.models.default_diarizer,
        )],
    }
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "transcribe_jobs_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Install SIGTERM/SIGINT handlers that flip the global shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
