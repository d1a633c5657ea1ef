//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_ENGINE_WORKER_CONCURRENCY, ...)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub storage: StorageConfig,
    pub models: ModelsConfig,
}

/// Server-specific configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Job-engine tuning configuration.
///
/// ## Fields:
/// - `worker_concurrency`: how many transcription jobs may run in parallel
/// - `stall_poll_seconds`: how often the stall detector scans processing jobs
/// - `stall_grace_seconds`: slack added on top of a job's estimated duration
///   before it is considered stalled
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub worker_concurrency: usize,
    pub stall_poll_seconds: u64,
    pub stall_grace_seconds: i64,
}

/// Where transcript artifacts land on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub transcript_dir: String,
}

/// Admin-side model defaults consumed by the capability resolver.
///
/// ## Fields:
/// - `default_asr_model`: model used when a job does not request one
/// - `default_diarizer`: diarization backend preferred by the operator
/// - `diarization_enabled`: admin kill-switch for the diarization feature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub default_asr_model: String,
    pub default_diarizer: String,
    pub diarization_enabled: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            engine: EngineConfig {
                worker_concurrency: 3,
                stall_poll_seconds: 30,
                stall_grace_seconds: 120,
            },
            storage: StorageConfig {
                transcript_dir: "data/transcripts".to_string(),
            },
            models: ModelsConfig {
                default_asr_model: "medium".to_string(),
                default_diarizer: "pyannote".to_string(),
                diarization_enabled: true,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml and environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER_PORT=3000`: override server port
    /// - `APP_ENGINE_WORKER_CONCURRENCY=5`: override worker pool size
    /// - `HOST` / `PORT`: deployment-platform overrides without the prefix
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - Worker concurrency is at least 1 (the queue rejects 0 as well)
    /// - The stall poll interval is non-zero
    /// - The transcript directory is non-empty
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.engine.worker_concurrency == 0 {
            return Err(anyhow::anyhow!("Worker concurrency must be at least 1"));
        }

        if self.engine.stall_poll_seconds == 0 {
            return Err(anyhow::anyhow!("Stall poll interval must be non-zero"));
        }

        if self.storage.transcript_dir.is_empty() {
            return Err(anyhow::anyhow!("Transcript directory cannot be empty"));
        }

        Ok(())
    }
}
