//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` environment variables (deployment platforms)
//! 2. Environment variables (APP_SERVER__PORT, APP_VAD__AGGRESSIVENESS, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! ## Sections:
//! - **server**: where to listen
//! - **audio**: PCM format and buffering of caller audio
//! - **vad**: voice activity detection and interruption tuning
//! - **connections**: limits, heartbeat and the inactivity sweep
//! - **agent**: what the agent says when it has nothing better to say

use crate::audio::classifier::ClassifierConfig;
use crate::audio::pcm;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Sample rates the WebRTC voice activity detector accepts.
pub const SUPPORTED_SAMPLE_RATES: [u32; 4] = [8000, 16000, 32000, 48000];

/// Frame durations the WebRTC voice activity detector accepts.
pub const SUPPORTED_FRAME_DURATIONS_MS: [u32; 3] = [10, 20, 30];

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Each section maps to one part of the call path, so a `PUT /api/v1/config`
/// body or a `config.toml` table only has to mention the part it changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub vad: VadConfig,
    pub connections: ConnectionsConfig,
    pub agent: AgentConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Format and buffering of caller audio.
///
/// Audio is always 16-bit little-endian PCM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,

    /// Duration of one classification frame
    pub frame_duration_ms: u32,

    /// Cap on buffered caller audio per connection; oldest chunks are evicted
    pub buffer_max_size_bytes: usize,

    /// Buffered bytes that trigger a transcription
    pub transcription_trigger_bytes: usize,
}

/// Voice activity detection and barge-in tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VadConfig {
    /// 0 (least aggressive) to 3 (most aggressive about filtering out non-speech)
    pub aggressiveness: u8,

    /// Frames in the sliding speech window
    pub speech_window: usize,

    /// Consecutive non-speech frames that end a speech period
    pub silence_window: usize,

    /// Fraction of speech frames in the window that counts as speech
    pub speech_threshold: f32,

    /// Sustained speech needed before the agent is interrupted
    pub interruption_duration_ms: u32,
}

/// Connection limits and housekeeping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionsConfig {
    pub max_concurrent_connections: usize,
    pub inactivity_timeout_seconds: u64,
    pub cleanup_interval_seconds: u64,
    pub heartbeat_interval_seconds: u64,
    pub client_timeout_seconds: u64,
}

/// Agent prompts and the offline collaborators' behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    pub welcome_message: String,
    pub system_prompt: String,

    /// Spoken when a collaborator fails mid-turn
    pub fallback_message: String,

    /// What the offline transcriber "hears" for any loud enough utterance
    pub canned_transcript: String,

    /// Normalized RMS level (0.0 to 1.0) below which the offline transcriber hears silence
    pub speech_rms_threshold: f32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            audio: AudioConfig {
                sample_rate: 16000,
                channels: 1,
                frame_duration_ms: 30,
                buffer_max_size_bytes: 320_000, // 10 seconds at 16kHz
                transcription_trigger_bytes: 16_000,
            },
            vad: VadConfig {
                aggressiveness: 3,
                speech_window: 5,
                silence_window: 10,
                speech_threshold: 0.5,
                interruption_duration_ms: 300,
            },
            connections: ConnectionsConfig {
                max_concurrent_connections: 100,
                inactivity_timeout_seconds: 300,
                cleanup_interval_seconds: 60,
                heartbeat_interval_seconds: 30,
                client_timeout_seconds: 60,
            },
            agent: AgentConfig {
                welcome_message: "Thank you for calling. How may I help you today?".to_string(),
                system_prompt: "You are a friendly phone agent. Keep answers short and natural, \
                    the caller cannot see you."
                    .to_string(),
                fallback_message: "I'm sorry, I encountered an error. Could you say that again?"
                    .to_string(),
                canned_transcript: "What are your opening hours?".to_string(),
                speech_rms_threshold: 0.02,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=0.0.0.0`: Override server host
    /// - `APP_VAD__INTERRUPTION_DURATION_MS=450`: Override barge-in delay
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special case for deployment platforms
    ///
    /// Nested keys are separated by a double underscore so that field names
    /// containing underscores survive.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config: AppConfig = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// The audio format checks mirror what the WebRTC detector accepts, so a bad
    /// value fails here instead of on the first call.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if !SUPPORTED_SAMPLE_RATES.contains(&self.audio.sample_rate) {
            return Err(anyhow::anyhow!(
                "Sample rate must be one of {:?}, got {}",
                SUPPORTED_SAMPLE_RATES,
                self.audio.sample_rate
            ));
        }

        if self.audio.channels != 1 {
            return Err(anyhow::anyhow!("Only mono audio is supported"));
        }

        if !SUPPORTED_FRAME_DURATIONS_MS.contains(&self.audio.frame_duration_ms) {
            return Err(anyhow::anyhow!(
                "Frame duration must be one of {:?} ms, got {}",
                SUPPORTED_FRAME_DURATIONS_MS,
                self.audio.frame_duration_ms
            ));
        }

        if self.audio.buffer_max_size_bytes == 0 {
            return Err(anyhow::anyhow!("Audio buffer size must be greater than 0"));
        }

        if self.audio.transcription_trigger_bytes > self.audio.buffer_max_size_bytes {
            return Err(anyhow::anyhow!(
                "Transcription trigger ({} bytes) cannot exceed the audio buffer size ({} bytes)",
                self.audio.transcription_trigger_bytes,
                self.audio.buffer_max_size_bytes
            ));
        }

        if self.vad.aggressiveness > 3 {
            return Err(anyhow::anyhow!("VAD aggressiveness must be between 0 and 3"));
        }

        if self.vad.speech_window == 0 || self.vad.silence_window == 0 {
            return Err(anyhow::anyhow!("VAD windows must be at least one frame"));
        }

        if !(0.0..=1.0).contains(&self.vad.speech_threshold) {
            return Err(anyhow::anyhow!("VAD speech threshold must be between 0.0 and 1.0"));
        }

        if self.connections.max_concurrent_connections == 0 {
            return Err(anyhow::anyhow!("Max concurrent connections must be greater than 0"));
        }

        if self.connections.cleanup_interval_seconds == 0 {
            return Err(anyhow::anyhow!("Cleanup interval must be greater than 0"));
        }

        if self.connections.heartbeat_interval_seconds == 0
            || self.connections.client_timeout_seconds <= self.connections.heartbeat_interval_seconds
        {
            return Err(anyhow::anyhow!(
                "Client timeout must be longer than a non-zero heartbeat interval"
            ));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// ## Partial updates:
    /// Only the fields present in the JSON change. For example, sending
    /// `{"vad": {"aggressiveness": 2}}` leaves every other setting alone.
    /// The update is all-or-nothing: if the result does not validate, `self`
    /// is left untouched.
    ///
    /// Changes apply to connections opened afterwards.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;
        if !partial_config.is_object() {
            return Err(anyhow::anyhow!("Configuration update must be a JSON object"));
        }

        let mut merged = serde_json::to_value(&*self)?;
        merge_json(&mut merged, partial_config);

        let updated: AppConfig = serde_json::from_value(merged)?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Classifier tuning for new connections.
    pub fn classifier_config(&self) -> ClassifierConfig {
        ClassifierConfig {
            sample_rate: self.audio.sample_rate,
            frame_duration_ms: self.audio.frame_duration_ms,
            speech_window: self.vad.speech_window,
            silence_window: self.vad.silence_window,
            speech_threshold: self.vad.speech_threshold,
            interruption_duration_ms: self.vad.interruption_duration_ms,
        }
    }

    /// Bytes in one classification frame.
    pub fn frame_bytes(&self) -> usize {
        pcm::frame_bytes(self.audio.sample_rate, self.audio.frame_duration_ms)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.connections.inactivity_timeout_seconds)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.connections.cleanup_interval_seconds)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.connections.heartbeat_interval_seconds)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.connections.client_timeout_seconds)
    }
}

/// Recursively overlay `patch` onto `target`. Objects merge key by key; anything
/// else replaces the target value.
fn merge_json(target: &mut serde_json::Value, patch: serde_json::Value) {
    match (target, patch) {
        (serde_json::Value::Object(target), serde_json::Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.frame_bytes(), 960);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.sample_rate = 44100;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.frame_duration_ms = 25;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.vad.aggressiveness = 4;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.vad.speech_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.transcription_trigger_bytes = config.audio.buffer_max_size_bytes + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"server": {"port": 9090}, "vad": {"interruption_duration_ms": 450}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.vad.interruption_duration_ms, 450);
        // Other fields should remain unchanged
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.vad.speech_window, 5);
    }

    #[test]
    fn test_invalid_update_leaves_config_untouched() {
        let mut config = AppConfig::default();
        let json = r#"{"server": {"port": 9090}, "vad": {"aggressiveness": 9}}"#;
        assert!(config.update_from_json(json).is_err());
        assert_eq!(config, AppConfig::default());

        assert!(config.update_from_json("[1, 2]").is_err());
        assert!(config.update_from_json(r#"{"audio": {"sample_rate": "fast"}}"#).is_err());
    }

    #[test]
    fn test_classifier_config_follows_settings() {
        let mut config = AppConfig::default();
        config.audio.frame_duration_ms = 20;
        config.vad.interruption_duration_ms = 200;

        let classifier = config.classifier_config();
        assert_eq!(classifier.frame_bytes(), 640);
        assert_eq!(classifier.interruption_frames(), 10);
    }
}
