//! # Application State Management
//!
//! Shared state handed to every HTTP handler and WebSocket actor.
//!
//! ## Arc<RwLock<T>> Pattern
//! - **Arc**: Multiple ownership (many handlers and actors hold a reference)
//! - **RwLock**: Many readers OR one writer
//!
//! The connection registry is not wrapped in a lock of its own: it does its own
//! fine-grained locking per connection.

use crate::audio::classifier::{SpeechDetector, WebRtcDetector};
use crate::config::AppConfig;
use crate::connection::{ConnectionRegistry, DetectorFactory};
use crate::pipeline::{Collaborators, PipelineStats};
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

/// The main application state that's shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Call counters, updated by call sessions as they start and end
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Every live client connection
    pub registry: Arc<ConnectionRegistry>,

    /// Services each new call's pipeline talks to
    pub collaborators: Collaborators,

    /// When the server started
    pub start_time: Instant,
}

/// Counters collected across all calls.
#[derive(Debug, Default, Clone, Serialize)]
pub struct AppMetrics {
    pub calls_started: u64,
    pub calls_ended: u64,

    /// Calls currently connected
    pub active_calls: u32,

    /// Upgrades refused because the server was at its connection limit
    pub calls_rejected: u64,

    /// Times a caller talked over the agent
    pub interruptions: u64,

    pub turns_completed: u64,
    pub turns_interrupted: u64,
    pub collaborator_failures: u64,
}

impl AppState {
    /// Create state whose connections are classified by the WebRTC detector.
    ///
    /// The detector factory reads the live configuration, so aggressiveness or sample
    /// rate changes apply to the next connection.
    pub fn new(config: AppConfig, collaborators: Collaborators) -> Self {
        let config = Arc::new(RwLock::new(config));
        let factory_config = config.clone();
        let detector_factory: DetectorFactory = Arc::new(move || {
            let config = factory_config.read().unwrap_or_else(PoisonError::into_inner);
            let detector = WebRtcDetector::new(config.audio.sample_rate, config.vad.aggressiveness)?;
            Ok(Box::new(detector) as Box<dyn SpeechDetector>)
        });

        Self::with_shared_config(config, collaborators, detector_factory)
    }

    /// Create state with a custom detector factory.
    pub fn with_detector_factory(
        config: AppConfig,
        collaborators: Collaborators,
        detector_factory: DetectorFactory,
    ) -> Self {
        Self::with_shared_config(Arc::new(RwLock::new(config)), collaborators, detector_factory)
    }

    fn with_shared_config(
        config: Arc<RwLock<AppConfig>>,
        collaborators: Collaborators,
        detector_factory: DetectorFactory,
    ) -> Self {
        let registry = {
            let config = config.read().unwrap_or_else(PoisonError::into_inner);
            ConnectionRegistry::new(
                detector_factory,
                config.classifier_config(),
                config.audio.buffer_max_size_bytes,
            )
        };

        Self {
            config,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            registry: Arc::new(registry),
            collaborators,
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the lock immediately, so other threads aren't blocked.
    pub fn get_config(&self) -> AppConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Validate and install a new configuration.
    ///
    /// Connections that are already open keep the settings they started with.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        new_config.validate().map_err(|e| e.to_string())?;

        self.registry.update_settings(
            new_config.classifier_config(),
            new_config.audio.buffer_max_size_bytes,
        );
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = new_config;
        Ok(())
    }

    fn with_metrics(&self, update: impl FnOnce(&mut AppMetrics)) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        update(&mut metrics);
    }

    pub fn record_call_started(&self) {
        self.with_metrics(|m| {
            m.calls_started += 1;
            m.active_calls += 1;
        });
    }

    /// Fold a finished call's pipeline counters into the totals.
    pub fn record_call_ended(&self, stats: PipelineStats) {
        self.with_metrics(|m| {
            m.calls_ended += 1;
            m.active_calls = m.active_calls.saturating_sub(1);
            m.turns_completed += stats.turns_completed;
            m.turns_interrupted += stats.turns_interrupted;
            m.collaborator_failures += stats.collaborator_failures;
        });
    }

    pub fn record_call_rejected(&self) {
        self.with_metrics(|m| m.calls_rejected += 1);
    }

    pub fn record_interruption(&self) {
        self.with_metrics(|m| m.interruptions += 1);
    }

    /// Get a snapshot of current metrics (used for the /metrics endpoint).
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Whether another call can be accepted.
    pub fn has_capacity(&self) -> bool {
        let limit = self
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .connections
            .max_concurrent_connections;
        self.registry.len() < limit
    }
}
