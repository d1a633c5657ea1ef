//! # Application State Management
//!
//! Shared state handed to every HTTP request handler. The engine does its
//! own internal locking, so the state itself only wraps the pieces that
//! handlers read directly.
//!
//! ## Thread Safety:
//! - `engine`: Arc-shared facade, internally synchronized
//! - `config`: Arc<RwLock<AppConfig>> so the snapshot handlers clone a
//!   consistent view without holding the lock across a response
//! - `start_time`: immutable after construction, safe to read directly

use crate::config::AppConfig;
use crate::engine::Engine;
use std::sync::{Arc, RwLock};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub config: Arc<RwLock<AppConfig>>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, engine: Arc<Engine>) -> Self {
        Self {
            engine,
            config: Arc::new(RwLock::new(config)),
            start_time: Instant::now(),
        }
    }

    /// Snapshot of the configuration; cloning releases the lock right away.
    pub fn get_config(&self) -> AppConfig {
        self.config
            .read()
            .map(|c| c.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
