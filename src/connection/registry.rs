//! # Connection Registry
//!
//! Owns everything the server knows about each live client connection: its
//! transport, its classifier, its inbound audio buffer and the handle used to
//! interrupt whatever the agent is currently saying.
//!
//! ## Registrations:
//! Every `connect` creates a new [`Registration`] epoch. A call that reconnects with
//! the same id replaces the old state, and the old call's [`Registration`] stops
//! matching: its audio, sends and disconnect no longer touch the new connection.
//! Plain `&str` ids always address whichever registration is current.
//!
//! ## Locking:
//! The id map sits behind an `RwLock`; each connection's state sits behind its own
//! `Mutex`. Neither lock is ever held across an `.await`: transport writes clone the
//! transport handle out of the state first and release the lock before sending.
//!
//! ## Why a std lock and not an async one:
//! Every critical section is short and synchronous. A `std::sync::MutexGuard` is not
//! `Send`, so the compiler rejects any attempt to keep one alive across an `.await`.

use crate::audio::buffer::AudioBuffer;
use crate::audio::classifier::{AudioFrameClassifier, ClassifierConfig, SpeechDetector};
use crate::connection::transport::{AudioTransport, TransportError};
use crate::pipeline::InterruptHandle;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Builds a fresh speech detector for every new connection.
pub type DetectorFactory =
    Arc<dyn Fn() -> Result<Box<dyn SpeechDetector>, String> + Send + Sync>;

/// One `connect` of a connection id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub connection_id: String,
    pub epoch: u64,
}

/// Addresses a connection in the registry.
///
/// ## Rust Concepts:
/// - **?Sized**: Lets the registry methods take `&str` as well as `&Registration`
/// - **Option<u64>**: `None` matches any epoch, `Some` only the one registration
pub trait ConnectionKey {
    fn connection_id(&self) -> &str;
    fn epoch(&self) -> Option<u64>;
}

impl ConnectionKey for str {
    fn connection_id(&self) -> &str {
        self
    }

    fn epoch(&self) -> Option<u64> {
        None
    }
}

impl ConnectionKey for String {
    fn connection_id(&self) -> &str {
        self
    }

    fn epoch(&self) -> Option<u64> {
        None
    }
}

impl ConnectionKey for Registration {
    fn connection_id(&self) -> &str {
        &self.connection_id
    }

    fn epoch(&self) -> Option<u64> {
        Some(self.epoch)
    }
}

/// Per-connection state.
pub struct ConnectionState {
    pub connection_id: String,
    transport: Arc<dyn AudioTransport>,
    classifier: AudioFrameClassifier,
    buffer: AudioBuffer,
    interrupt: Option<InterruptHandle>,
    connected_at: DateTime<Utc>,
    last_activity: Instant,
}

impl ConnectionState {
    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

/// What happened to a piece of inbound audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveOutcome {
    pub is_speech: bool,

    /// An interruption edge was detected in this audio
    pub interrupted: bool,

    /// Bytes now waiting in the connection's input buffer
    pub buffered_bytes: usize,
}

/// Result of writing to a connection's transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    UnknownConnection,
    /// The transport reported a disconnect and the connection was removed
    Disconnected,
    /// The write failed but the connection stays registered
    Failed(String),
}

/// Health view of one connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    pub connection_id: String,
    pub connected_at: DateTime<Utc>,
    pub idle_seconds: u64,
    pub buffered_bytes: usize,
    pub speaking: bool,
}

/// Registry entry: the state plus the epoch of the registration that owns it.
struct Slot {
    epoch: u64,
    state: Arc<Mutex<ConnectionState>>,
}

impl Slot {
    fn matches<K: ConnectionKey + ?Sized>(&self, key: &K) -> bool {
        key.epoch().map_or(true, |epoch| epoch == self.epoch)
    }
}

/// Thread-safe map of live connections.
///
/// ## Rust Concepts:
/// - **RwLock<HashMap<..>>**: Many lookups in parallel, one writer on connect/disconnect
/// - **Arc<Mutex<ConnectionState>>**: A lookup clones the `Arc` and drops the map lock,
///   so one busy connection never blocks the others
/// - **AtomicU64**: Hands out registration epochs without taking a lock
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Slot>>,
    detector_factory: DetectorFactory,
    settings: RwLock<ConnectionSettings>,
    next_epoch: AtomicU64,
}

/// Settings applied to connections as they are created.
#[derive(Debug, Clone)]
struct ConnectionSettings {
    classifier_config: ClassifierConfig,
    buffer_max_size: usize,
}

fn lock_state(state: &Mutex<ConnectionState>) -> MutexGuard<'_, ConnectionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ConnectionRegistry {
    pub fn new(
        detector_factory: DetectorFactory,
        classifier_config: ClassifierConfig,
        buffer_max_size: usize,
    ) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            detector_factory,
            settings: RwLock::new(ConnectionSettings {
                classifier_config,
                buffer_max_size,
            }),
            next_epoch: AtomicU64::new(1),
        }
    }

    /// Change the settings used for connections opened from now on.
    pub fn update_settings(&self, classifier_config: ClassifierConfig, buffer_max_size: usize) {
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = ConnectionSettings {
            classifier_config,
            buffer_max_size,
        };
    }

    fn get<K: ConnectionKey + ?Sized>(&self, key: &K) -> Option<Arc<Mutex<ConnectionState>>> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key.connection_id())
            .filter(|slot| slot.matches(key))
            .map(|slot| slot.state.clone())
    }

    /// Register a connection with a fresh classifier and an empty buffer.
    ///
    /// A duplicate id replaces the previous entry: whatever the old registration was
    /// saying is interrupted, and the old [`Registration`] stops matching.
    pub fn connect(
        &self,
        transport: Arc<dyn AudioTransport>,
        connection_id: &str,
    ) -> Result<Registration, String> {
        let detector = (self.detector_factory)()?;
        let settings = self
            .settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let state = ConnectionState {
            connection_id: connection_id.to_string(),
            transport,
            classifier: AudioFrameClassifier::new(detector, settings.classifier_config),
            buffer: AudioBuffer::new(settings.buffer_max_size),
            interrupt: None,
            connected_at: Utc::now(),
            last_activity: Instant::now(),
        };

        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        let previous = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                connection_id.to_string(),
                Slot {
                    epoch,
                    state: Arc::new(Mutex::new(state)),
                },
            );

        match previous {
            Some(previous) => {
                warn!(connection_id = %connection_id, "Connection id already registered, replacing it");
                if let Some(handle) = lock_state(&previous.state).interrupt.take() {
                    handle.interrupt();
                }
            }
            None => info!(connection_id = %connection_id, "Client connected"),
        }

        Ok(Registration {
            connection_id: connection_id.to_string(),
            epoch,
        })
    }

    /// Remove all state for a connection. Returns whether anything was removed.
    ///
    /// A stale [`Registration`] removes nothing.
    pub fn disconnect<K: ConnectionKey + ?Sized>(&self, key: &K) -> bool {
        let connection_id = key.connection_id();
        let removed = {
            let mut connections = self.connections.write().unwrap_or_else(PoisonError::into_inner);
            let current = connections
                .get(connection_id)
                .is_some_and(|slot| slot.matches(key));
            if current {
                connections.remove(connection_id)
            } else {
                None
            }
        };

        match removed {
            Some(Slot { state, .. }) => {
                // Anything still speaking for this connection has nowhere to go
                if let Some(handle) = lock_state(&state).interrupt.take() {
                    handle.interrupt();
                }
                info!(connection_id = %connection_id, "Client disconnected");
                true
            }
            None => false,
        }
    }

    /// Buffer and classify inbound audio.
    ///
    /// An interruption edge signals the connection's interrupt handle, if any.
    pub fn receive_audio<K: ConnectionKey + ?Sized>(
        &self,
        key: &K,
        data: &[u8],
    ) -> Option<ReceiveOutcome> {
        let connection_id = key.connection_id();
        let Some(state) = self.get(key) else {
            warn!(connection_id = %connection_id, "Received audio for unknown connection");
            return None;
        };

        let mut state = lock_state(&state);
        state.touch();
        state.buffer.add(data);
        let verdict = state.classifier.process_audio(data);

        if verdict.is_interruption {
            match &state.interrupt {
                Some(handle) => {
                    if handle.interrupt() {
                        info!(connection_id = %connection_id, "Caller interrupted the agent");
                    } else {
                        debug!(connection_id = %connection_id, "Caller started speaking");
                    }
                }
                None => debug!(connection_id = %connection_id, "Speech onset with no interrupt handler"),
            }
        }

        Some(ReceiveOutcome {
            is_speech: verdict.is_speech,
            interrupted: verdict.is_interruption,
            buffered_bytes: state.buffer.len(),
        })
    }

    /// Drain the input buffer if it holds at least `min_bytes`.
    pub fn take_buffered<K: ConnectionKey + ?Sized>(
        &self,
        key: &K,
        min_bytes: usize,
    ) -> Option<Vec<u8>> {
        let state = self.get(key)?;
        let mut state = lock_state(&state);
        if state.buffer.is_empty() || state.buffer.len() < min_bytes {
            return None;
        }
        Some(state.buffer.get_all())
    }

    /// Drain whatever the input buffer holds.
    pub fn flush_buffer<K: ConnectionKey + ?Sized>(&self, key: &K) -> Option<Vec<u8>> {
        self.take_buffered(key, 0)
    }

    /// Reset the connection's classifier, discarding carry-over bytes.
    pub fn reset_classifier<K: ConnectionKey + ?Sized>(&self, key: &K) {
        if let Some(state) = self.get(key) {
            lock_state(&state).classifier.reset();
        }
    }

    /// Install the handle interruption edges are delivered to. Replaces any previous one.
    pub fn register_interrupt_handler<K: ConnectionKey + ?Sized>(
        &self,
        key: &K,
        handle: InterruptHandle,
    ) -> bool {
        let connection_id = key.connection_id();
        match self.get(key) {
            Some(state) => {
                lock_state(&state).interrupt = Some(handle);
                true
            }
            None => {
                warn!(connection_id = %connection_id, "Cannot register interrupt handler for unknown connection");
                false
            }
        }
    }

    fn transport<K: ConnectionKey + ?Sized>(&self, key: &K) -> Option<Arc<dyn AudioTransport>> {
        self.get(key).map(|state| lock_state(&state).transport.clone())
    }

    fn finish_send<K: ConnectionKey + ?Sized>(
        &self,
        key: &K,
        result: Result<(), TransportError>,
    ) -> SendOutcome {
        let connection_id = key.connection_id();
        match result {
            Ok(()) => {
                if let Some(state) = self.get(key) {
                    lock_state(&state).touch();
                }
                SendOutcome::Sent
            }
            Err(TransportError::Disconnected) => {
                warn!(connection_id = %connection_id, "Transport disconnected, removing connection");
                self.disconnect(key);
                SendOutcome::Disconnected
            }
            Err(TransportError::Send(msg)) => {
                warn!(connection_id = %connection_id, "Failed to send to client: {}", msg);
                SendOutcome::Failed(msg)
            }
        }
    }

    /// Send one chunk of audio to the client.
    pub async fn send_audio<K: ConnectionKey + ?Sized>(&self, key: &K, audio: Vec<u8>) -> SendOutcome {
        let connection_id = key.connection_id();
        let Some(transport) = self.transport(key) else {
            warn!(connection_id = %connection_id, "Cannot send audio to unknown connection");
            return SendOutcome::UnknownConnection;
        };

        let result = transport.send_audio(audio).await;
        self.finish_send(key, result)
    }

    /// Send the end-of-turn mark to the client.
    pub async fn send_end_of_turn<K: ConnectionKey + ?Sized>(&self, key: &K) -> SendOutcome {
        let connection_id = key.connection_id();
        let Some(transport) = self.transport(key) else {
            warn!(connection_id = %connection_id, "Cannot send end of turn to unknown connection");
            return SendOutcome::UnknownConnection;
        };

        let result = transport.send_end_of_turn().await;
        self.finish_send(key, result)
    }

    /// Close and remove every connection idle for longer than `timeout`.
    pub async fn cleanup_inactive(&self, timeout: Duration) -> Vec<String> {
        let expired: Vec<(Registration, Arc<dyn AudioTransport>)> = {
            let connections = self.connections.read().unwrap_or_else(PoisonError::into_inner);
            connections
                .iter()
                .filter_map(|(id, slot)| {
                    let state = lock_state(&slot.state);
                    (state.last_activity.elapsed() > timeout).then(|| {
                        let registration = Registration {
                            connection_id: id.clone(),
                            epoch: slot.epoch,
                        };
                        (registration, state.transport.clone())
                    })
                })
                .collect()
        };

        let mut removed = Vec::with_capacity(expired.len());
        for (registration, transport) in expired {
            info!(connection_id = %registration.connection_id, "Closing inactive connection");
            if let Err(e) = transport.close().await {
                debug!(connection_id = %registration.connection_id, "Error closing inactive connection: {}", e);
            }
            // The transport may already have torn the connection down while closing
            self.disconnect(&registration);
            removed.push(registration.connection_id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.connections.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains<K: ConnectionKey + ?Sized>(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    pub fn connection_ids(&self) -> Vec<String> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Per-connection view used by the health endpoints.
    pub fn snapshot(&self) -> Vec<ConnectionSnapshot> {
        let states: Vec<Arc<Mutex<ConnectionState>>> = self
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|slot| slot.state.clone())
            .collect();

        let mut snapshot: Vec<ConnectionSnapshot> = states
            .iter()
            .map(|state| {
                let state = lock_state(state);
                ConnectionSnapshot {
                    connection_id: state.connection_id.clone(),
                    connected_at: state.connected_at,
                    idle_seconds: state.last_activity.elapsed().as_secs(),
                    buffered_bytes: state.buffer.len(),
                    speaking: state.classifier.is_speaking(),
                }
            })
            .collect();
        snapshot.sort_by(|a, b| a.connected_at.cmp(&b.connected_at));
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::classifier::tests::{silent_frame, speech_frame, LevelDetector};
    use crate::connection::transport::tests::{RecordingTransport, Sent};

    fn registry() -> ConnectionRegistry {
        let factory: DetectorFactory =
            Arc::new(|| Ok(Box::new(LevelDetector) as Box<dyn SpeechDetector>));
        ConnectionRegistry::new(factory, ClassifierConfig::default(), 320_000)
    }

    #[test]
    fn test_connect_and_disconnect() {
        let registry = registry();
        registry.connect(Arc::new(RecordingTransport::default()), "a").unwrap();
        registry.connect(Arc::new(RecordingTransport::default()), "b").unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("a"));

        assert!(registry.disconnect("a"));
        assert!(!registry.disconnect("a"));
        assert!(!registry.contains("a"));
        assert_eq!(registry.connection_ids(), vec!["b".to_string()]);
    }

    #[test]
    fn test_duplicate_connect_replaces_state() {
        let registry = registry();
        registry.connect(Arc::new(RecordingTransport::default()), "a").unwrap();
        registry.receive_audio("a", &silent_frame()).unwrap();

        registry.connect(Arc::new(RecordingTransport::default()), "a").unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.flush_buffer("a").is_none());
    }

    #[tokio::test]
    async fn test_stale_registration_cannot_touch_replacement() {
        let registry = registry();
        let old_transport = Arc::new(RecordingTransport::default());
        let old = registry.connect(old_transport.clone(), "a").unwrap();
        let old_handle = InterruptHandle::new();
        let old_token = old_handle.arm();
        assert!(registry.register_interrupt_handler(&old, old_handle));

        let new_transport = Arc::new(RecordingTransport::default());
        let new = registry.connect(new_transport.clone(), "a").unwrap();
        assert_ne!(old, new);
        assert!(old_token.load(Ordering::SeqCst));

        assert!(registry.receive_audio(&old, &silent_frame()).is_none());
        assert_eq!(
            registry.send_audio(&old, vec![1]).await,
            SendOutcome::UnknownConnection
        );
        assert_eq!(
            registry.send_end_of_turn(&old).await,
            SendOutcome::UnknownConnection
        );
        assert!(!registry.disconnect(&old));
        assert!(old_transport.sent().is_empty());
        assert!(new_transport.sent().is_empty());

        assert!(registry.contains(&new));
        assert!(!registry.contains(&old));
        assert!(registry.receive_audio(&new, &silent_frame()).is_some());
        assert!(registry.disconnect(&new));
        assert!(!registry.contains("a"));
    }

    #[test]
    fn test_plain_id_addresses_current_registration() {
        let registry = registry();
        registry.connect(Arc::new(RecordingTransport::default()), "a").unwrap();
        let current = registry.connect(Arc::new(RecordingTransport::default()), "a").unwrap();

        assert!(registry.receive_audio("a", &silent_frame()).is_some());
        assert_eq!(registry.flush_buffer(&current).map(|b| b.len()), Some(960));
        assert!(registry.disconnect("a"));
        assert!(!registry.contains(&current));
    }

    #[test]
    fn test_failing_detector_factory_rejects_connection() {
        let factory: DetectorFactory = Arc::new(|| Err("no detector".to_string()));
        let registry = ConnectionRegistry::new(factory, ClassifierConfig::default(), 1000);
        assert!(registry.connect(Arc::new(RecordingTransport::default()), "a").is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_receive_audio_unknown_connection() {
        let registry = registry();
        assert!(registry.receive_audio("ghost", &speech_frame()).is_none());
    }

    #[test]
    fn test_receive_audio_buffers_and_takes_at_threshold() {
        let registry = registry();
        registry.connect(Arc::new(RecordingTransport::default()), "a").unwrap();

        let outcome = registry.receive_audio("a", &silent_frame()).unwrap();
        assert_eq!(outcome.buffered_bytes, 960);
        assert!(!outcome.is_speech);

        assert!(registry.take_buffered("a", 1920).is_none());
        registry.receive_audio("a", &silent_frame()).unwrap();
        let drained = registry.take_buffered("a", 1920).unwrap();
        assert_eq!(drained.len(), 1920);
        assert!(registry.flush_buffer("a").is_none());
    }

    #[test]
    fn test_interruption_signals_handler_once() {
        let registry = registry();
        registry.connect(Arc::new(RecordingTransport::default()), "a").unwrap();

        let handle = InterruptHandle::new();
        let token = handle.arm();
        assert!(registry.register_interrupt_handler("a", handle.clone()));

        let mut edges = 0;
        for _ in 0..30 {
            if registry.receive_audio("a", &speech_frame()).unwrap().interrupted {
                edges += 1;
            }
        }
        assert_eq!(edges, 1);
        assert!(token.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn test_register_interrupt_handler_unknown_connection() {
        let registry = registry();
        assert!(!registry.register_interrupt_handler("ghost", InterruptHandle::new()));
    }

    #[test]
    fn test_reset_classifier_drops_carry_over() {
        let registry = registry();
        registry.connect(Arc::new(RecordingTransport::default()), "a").unwrap();
        registry.receive_audio("a", &speech_frame()[..100]).unwrap();
        registry.reset_classifier("a");

        // With the partial frame discarded, one full frame classifies exactly one frame
        let outcome = registry.receive_audio("a", &speech_frame()).unwrap();
        assert!(outcome.is_speech);
    }

    #[tokio::test]
    async fn test_send_audio_reaches_transport() {
        let registry = registry();
        let transport = Arc::new(RecordingTransport::default());
        registry.connect(transport.clone(), "a").unwrap();

        assert_eq!(registry.send_audio("a", vec![1, 2]).await, SendOutcome::Sent);
        assert_eq!(registry.send_end_of_turn("a").await, SendOutcome::Sent);
        assert_eq!(transport.sent(), vec![Sent::Audio(vec![1, 2]), Sent::EndOfTurn]);
    }

    #[tokio::test]
    async fn test_send_to_unknown_connection() {
        let registry = registry();
        assert_eq!(
            registry.send_audio("ghost", vec![1]).await,
            SendOutcome::UnknownConnection
        );
        assert_eq!(
            registry.send_end_of_turn("ghost").await,
            SendOutcome::UnknownConnection
        );
    }

    #[tokio::test]
    async fn test_disconnect_error_tears_down_connection() {
        let registry = registry();
        let transport = Arc::new(RecordingTransport::failing(TransportError::Disconnected));
        registry.connect(transport, "a").unwrap();

        assert_eq!(registry.send_audio("a", vec![1]).await, SendOutcome::Disconnected);
        assert!(!registry.contains("a"));
    }

    #[tokio::test]
    async fn test_send_error_keeps_connection() {
        let registry = registry();
        let transport = Arc::new(RecordingTransport::failing(TransportError::Send(
            "busy".to_string(),
        )));
        registry.connect(transport, "a").unwrap();

        assert_eq!(
            registry.send_audio("a", vec![1]).await,
            SendOutcome::Failed("busy".to_string())
        );
        assert!(registry.contains("a"));
    }

    #[tokio::test]
    async fn test_cleanup_inactive_closes_idle_connections() {
        let registry = registry();
        let idle = Arc::new(RecordingTransport::default());
        registry.connect(idle.clone(), "idle").unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        registry.connect(Arc::new(RecordingTransport::default()), "fresh").unwrap();

        let removed = registry.cleanup_inactive(Duration::from_millis(20)).await;
        assert_eq!(removed, vec!["idle".to_string()]);
        assert_eq!(idle.sent(), vec![Sent::Close]);
        assert!(registry.contains("fresh"));
        assert!(!registry.contains("idle"));
    }

    #[test]
    fn test_updated_settings_apply_to_new_connections() {
        let registry = registry();
        registry.connect(Arc::new(RecordingTransport::default()), "old").unwrap();

        let mut classifier_config = ClassifierConfig::default();
        classifier_config.frame_duration_ms = 20;
        registry.update_settings(classifier_config, 320_000);
        registry.connect(Arc::new(RecordingTransport::default()), "new").unwrap();

        // 960 bytes is one 30 ms frame but one and a half 20 ms frames
        registry.receive_audio("old", &silent_frame()).unwrap();
        registry.receive_audio("new", &silent_frame()).unwrap();
        let old = registry.get("old").unwrap();
        let new = registry.get("new").unwrap();
        assert_eq!(lock_state(&old).classifier.pending_bytes(), 0);
        assert_eq!(lock_state(&new).classifier.pending_bytes(), 320);
    }

    #[test]
    fn test_snapshot_reports_connections() {
        let registry = registry();
        registry.connect(Arc::new(RecordingTransport::default()), "a").unwrap();
        registry.receive_audio("a", &silent_frame()).unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].connection_id, "a");
        assert_eq!(snapshot[0].buffered_bytes, 960);
        assert!(!snapshot[0].speaking);
    }
}
