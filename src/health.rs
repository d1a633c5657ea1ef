use crate::error::EngineError;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> Result<HttpResponse, EngineError> {
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();
    let queue = state.engine.queue_stats().await?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": "transcribe-jobs-backend",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "queue": {
            "concurrency": queue.concurrency,
            "workers": queue.workers,
            "pending": queue.pending,
            "running": queue.running,
            "queued_jobs": queue.queued_jobs,
            "processing_jobs": queue.processing_jobs
        },
        "models": {
            "default_asr": config.models.default_asr_model,
            "default_diarizer": config.models.default_diarizer,
            "diarization_enabled": config.models.diarization_enabled,
            "loaded": state.engine.loaded_models()
        }
    })))
}
