//! # Response Pipeline
//!
//! Turns a caller's utterance into spoken agent audio for one connection.
//!
//! ## Turn Lifecycle:
//! 1. **Transcribing**: the utterance is sent to the [`Transcriber`](super::collaborators::Transcriber)
//! 2. **Generating**: a turn task streams the reply, cuts it into sentences and
//!    synthesizes each one into the delivery queue
//! 3. **Idle**: the turn finished, was interrupted, or there was nothing to say
//!
//! ## Guarantees:
//! - Every turn ends with exactly one [`Delivery::EndOfTurn`], including failed and
//!   aborted turns.
//! - Turns never interleave: a new turn waits for the previous task to finish
//!   before it produces anything.
//! - Interruption is cooperative. The turn checks its flag before each segment is
//!   synthesized and again before its chunks are enqueued; chunks already in the
//!   queue are never retracted.
//!
//! ## Key Rust Concepts:
//!
//! ### tokio::spawn + JoinHandle
//! - **Purpose**: Each turn runs as its own task, so the socket keeps reading caller
//!   audio while the agent talks
//! - **Ordering**: The next turn holds the previous `JoinHandle` and awaits it first
//! - **Cancellation**: `JoinHandle::abort` stops a turn at its next `.await`
//!
//! ### Arc<AtomicBool> tokens
//! - **Purpose**: One flag per turn, shared by the turn task and the [`InterruptHandle`]
//! - **Lock-free**: The receive path can set it without waiting on the turn
//!
//! ### Drop guards
//! - **Purpose**: [`Delivery::EndOfTurn`] is sent from `Drop`, so even an aborted task
//!   closes its turn

use crate::pipeline::collaborators::{
    CollaboratorError, Collaborators, ConversationTurn, Role,
};
use crate::pipeline::segmenter::SentenceSegmenter;
use futures_util::StreamExt;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Direction of a chunk of audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioRole {
    /// Caller audio
    Input,
    /// Agent audio
    Output,
}

/// Immutable piece of PCM16 audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub bytes: Vec<u8>,
    pub role: AudioRole,
}

impl AudioChunk {
    pub fn input(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            role: AudioRole::Input,
        }
    }

    pub fn output(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            role: AudioRole::Output,
        }
    }
}

/// Item of a connection's outbound delivery queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Audio(AudioChunk),
    /// The current turn has nothing more to say
    EndOfTurn,
}

/// Ordered outbound queue of one pipeline, consumed by the connection's player.
pub type DeliveryQueue = UnboundedReceiverStream<Delivery>;

/// Observable pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Idle,
    Transcribing,
    Generating,
}

/// Cancellation handle for the turn currently being spoken.
///
/// Each turn arms a fresh token; [`InterruptHandle::interrupt`] sets the token of
/// whichever turn is current. Cloning shares the same slot, so the registry can hold
/// one clone and the pipeline another.
///
/// ## Rust Concepts:
/// - **#[derive(Clone, Default)]**: Clones share one `Arc`, `Default` starts unarmed
/// - **AtomicBool::swap**: Tells the caller whether it was the one that interrupted
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle {
    current: Arc<Mutex<Option<Arc<AtomicBool>>>>,
}

impl InterruptHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a fresh token for a new turn and return it.
    pub fn arm(&self) -> Arc<AtomicBool> {
        let token = Arc::new(AtomicBool::new(false));
        *lock(&self.current) = Some(token.clone());
        token
    }

    /// Signal the current turn. Returns false if no turn was running or it had
    /// already been signalled.
    pub fn interrupt(&self) -> bool {
        match lock(&self.current).as_ref() {
            Some(token) => !token.swap(true, Ordering::SeqCst),
            None => false,
        }
    }

    /// Clear `token` if it is still the current one. Returns whether it was.
    pub fn disarm(&self, token: &Arc<AtomicBool>) -> bool {
        let mut current = lock(&self.current);
        let is_current = current
            .as_ref()
            .is_some_and(|active| Arc::ptr_eq(active, token));
        if is_current {
            *current = None;
        }
        is_current
    }

    /// A turn is running and has not been interrupted.
    pub fn is_active(&self) -> bool {
        lock(&self.current)
            .as_ref()
            .is_some_and(|token| !token.load(Ordering::SeqCst))
    }
}

#[derive(Debug, Default)]
struct PipelineCounters {
    turns_started: AtomicU64,
    turns_completed: AtomicU64,
    turns_interrupted: AtomicU64,
    collaborator_failures: AtomicU64,
}

/// Counters reported by [`ResponsePipeline::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub turns_started: u64,
    pub turns_completed: u64,
    pub turns_interrupted: u64,
    pub collaborator_failures: u64,
}

enum TurnSource {
    /// Record what the caller said, then ask the reply generator about it
    Reply(String),
    /// Speak fixed text
    Fixed(String),
}

/// Write side of the delivery queue for one turn.
///
/// Dropping it enqueues the end-of-turn marker, so the marker goes out however the
/// turn ends, including when its task is aborted.
struct TurnOutput {
    sender: mpsc::UnboundedSender<Delivery>,
}

impl TurnOutput {
    fn audio(&self, bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }
        // A closed queue means the call is over; nothing left to do with the audio
        let _ = self.sender.send(Delivery::Audio(AudioChunk::output(bytes)));
    }
}

impl Drop for TurnOutput {
    fn drop(&mut self) {
        let _ = self.sender.send(Delivery::EndOfTurn);
    }
}

/// Everything one turn task needs, moved into the task.
struct Turn {
    connection_id: String,
    collaborators: Collaborators,
    fallback_message: String,
    conversation: Arc<Mutex<Vec<ConversationTurn>>>,
    state: Arc<Mutex<PipelineState>>,
    interrupt: InterruptHandle,
    token: Arc<AtomicBool>,
    counters: Arc<PipelineCounters>,
    /// Set once the pipeline is shut down; history is no longer written
    closed: Arc<AtomicBool>,
    output: TurnOutput,
    spoken: Vec<String>,
}

impl Turn {
    fn interrupted(&self) -> bool {
        self.token.load(Ordering::SeqCst)
    }

    async fn run(mut self, source: TurnSource) {
        match source {
            TurnSource::Fixed(text) => {
                let mut segmenter = SentenceSegmenter::new();
                let mut segments: Vec<String> = segmenter.push(&text).into_iter().collect();
                segments.extend(segmenter.finish());
                for segment in segments {
                    self.speak_segment(&segment).await;
                }
            }
            TurnSource::Reply(transcript) => {
                if self.closed.load(Ordering::SeqCst) {
                    return;
                }
                // The previous turn has finished by now, so its reply is already recorded
                lock(&self.conversation).push(ConversationTurn::new(Role::User, transcript));
                self.generate().await;
            }
        }
        self.finish();
    }

    async fn generate(&mut self) {
        let conversation = lock(&self.conversation).clone();
        let mut stream = match self.collaborators.generator.generate_reply(&conversation).await {
            Ok(stream) => stream,
            Err(e) => {
                self.collaborator_failed(&e);
                self.speak_fallback().await;
                return;
            }
        };

        let mut segmenter = SentenceSegmenter::new();
        while let Some(delta) = stream.next().await {
            if self.interrupted() {
                debug!(connection_id = %self.connection_id, "Generation interrupted");
                return;
            }
            match delta {
                Ok(text) => {
                    if let Some(segment) = segmenter.push(&text) {
                        self.speak_segment(&segment).await;
                    }
                }
                Err(e) => {
                    self.collaborator_failed(&e);
                    self.speak_fallback().await;
                    return;
                }
            }
        }

        if let Some(tail) = segmenter.finish() {
            self.speak_segment(&tail).await;
        }
    }

    async fn speak_segment(&mut self, text: &str) {
        if self.interrupted() {
            return;
        }

        match self.collaborators.synthesizer.synthesize(text).await {
            Ok(chunks) => {
                if self.interrupted() {
                    debug!(connection_id = %self.connection_id, "Dropping synthesized segment after interruption");
                    return;
                }
                for chunk in chunks {
                    self.output.audio(chunk);
                }
                self.spoken.push(text.to_string());
            }
            Err(e) => {
                self.collaborator_failed(&e);
                self.speak_fallback().await;
            }
        }
    }

    async fn speak_fallback(&mut self) {
        if self.interrupted() || self.fallback_message.is_empty() {
            return;
        }

        match self
            .collaborators
            .synthesizer
            .synthesize(&self.fallback_message)
            .await
        {
            Ok(chunks) => {
                if self.interrupted() {
                    return;
                }
                for chunk in chunks {
                    self.output.audio(chunk);
                }
            }
            Err(e) => {
                warn!(connection_id = %self.connection_id, "Fallback message could not be synthesized: {}", e);
            }
        }
    }

    fn collaborator_failed(&self, error: &CollaboratorError) {
        warn!(connection_id = %self.connection_id, "{}", error);
        self.counters
            .collaborator_failures
            .fetch_add(1, Ordering::Relaxed);
    }

    fn finish(self) {
        let text = self.spoken.join(" ");
        if !text.is_empty() && !self.closed.load(Ordering::SeqCst) {
            lock(&self.conversation).push(ConversationTurn::new(Role::Assistant, text));
        }

        if self.interrupted() {
            self.counters.turns_interrupted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.turns_completed.fetch_add(1, Ordering::Relaxed);
        }

        if self.interrupt.disarm(&self.token) {
            let mut state = lock(&self.state);
            if *state == PipelineState::Generating {
                *state = PipelineState::Idle;
            }
        }
        debug!(connection_id = %self.connection_id, "Turn finished");
    }
}

/// Per-connection utterance → reply → audio state machine.
///
/// ## Rust Concepts:
/// - **Arc<Mutex<..>>** fields: shared with the running turn task, which outlives
///   any single call into the pipeline
/// - **Mutex<Option<JoinHandle<()>>>**: The newest turn; taking it out hands the
///   handle to the turn that replaces it
/// - **mpsc::UnboundedSender**: Producers never block on a slow client
///
/// ## Why the `closed` flag:
/// Only the newest turn is aborted on shutdown. An older turn that is still waiting
/// for its successor sees the flag and leaves the conversation alone.
pub struct ResponsePipeline {
    connection_id: String,
    collaborators: Collaborators,
    welcome_message: String,
    fallback_message: String,
    conversation: Arc<Mutex<Vec<ConversationTurn>>>,
    state: Arc<Mutex<PipelineState>>,
    interrupt: InterruptHandle,
    active_turn: Mutex<Option<JoinHandle<()>>>,
    deliveries: mpsc::UnboundedSender<Delivery>,
    counters: Arc<PipelineCounters>,
    closed: Arc<AtomicBool>,
}

impl ResponsePipeline {
    /// Create a pipeline and the queue its audio is delivered through.
    ///
    /// Prompts are read from the collaborators once, here.
    pub fn new(
        connection_id: &str,
        collaborators: Collaborators,
        fallback_message: &str,
    ) -> (Self, DeliveryQueue) {
        let (sender, receiver) = mpsc::unbounded_channel();

        let system_prompt = collaborators.prompts.system_prompt();
        let mut conversation = Vec::new();
        if !system_prompt.trim().is_empty() {
            conversation.push(ConversationTurn::new(Role::System, system_prompt));
        }

        let pipeline = Self {
            connection_id: connection_id.to_string(),
            welcome_message: collaborators.prompts.welcome_message(),
            collaborators,
            fallback_message: fallback_message.to_string(),
            conversation: Arc::new(Mutex::new(conversation)),
            state: Arc::new(Mutex::new(PipelineState::Idle)),
            interrupt: InterruptHandle::new(),
            active_turn: Mutex::new(None),
            deliveries: sender,
            counters: Arc::new(PipelineCounters::default()),
            closed: Arc::new(AtomicBool::new(false)),
        };

        (pipeline, UnboundedReceiverStream::new(receiver))
    }

    /// Transcribe an utterance and, if anything was said, start replying to it.
    ///
    /// Returns the transcript, or `None` when transcription failed or was empty.
    pub async fn process_audio(&self, audio: &[u8]) -> Option<String> {
        self.set_state(PipelineState::Transcribing);

        let transcript = match self.collaborators.transcriber.transcribe(audio).await {
            Ok(transcript) => transcript,
            Err(e) => {
                warn!(connection_id = %self.connection_id, "{}", e);
                self.counters
                    .collaborator_failures
                    .fetch_add(1, Ordering::Relaxed);
                self.settle_state();
                return None;
            }
        };

        let transcript = transcript.trim();
        if transcript.is_empty() {
            debug!(connection_id = %self.connection_id, "Empty transcript, nothing to answer");
            self.settle_state();
            return None;
        }

        info!(connection_id = %self.connection_id, transcript = %transcript, "Caller said");
        self.start_turn(TurnSource::Reply(transcript.to_string()));
        Some(transcript.to_string())
    }

    /// Speak fixed text as its own turn.
    pub fn speak(&self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        self.start_turn(TurnSource::Fixed(text.to_string()));
    }

    /// Speak the welcome message read at construction.
    pub fn speak_welcome(&self) {
        let welcome = self.welcome_message.clone();
        self.speak(&welcome);
    }

    fn start_turn(&self, source: TurnSource) {
        let previous = lock(&self.active_turn).take();
        if self.interrupt.interrupt() {
            info!(connection_id = %self.connection_id, "Interrupting the current turn for a new one");
        }

        let token = self.interrupt.arm();
        self.set_state(PipelineState::Generating);
        self.counters.turns_started.fetch_add(1, Ordering::Relaxed);

        let turn = Turn {
            connection_id: self.connection_id.clone(),
            collaborators: self.collaborators.clone(),
            fallback_message: self.fallback_message.clone(),
            conversation: self.conversation.clone(),
            state: self.state.clone(),
            interrupt: self.interrupt.clone(),
            token,
            counters: self.counters.clone(),
            closed: self.closed.clone(),
            output: TurnOutput {
                sender: self.deliveries.clone(),
            },
            spoken: Vec::new(),
        };

        let handle = tokio::spawn(async move {
            if let Some(previous) = previous {
                if let Err(e) = previous.await {
                    debug!("Previous turn ended abnormally: {}", e);
                }
            }
            turn.run(source).await;
        });
        *lock(&self.active_turn) = Some(handle);
    }

    /// Ask the current turn to stop at its next segment boundary.
    pub fn handle_interruption(&self) -> bool {
        self.interrupt.interrupt()
    }

    /// Handle the connection registry signals on interruption edges.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Interrupt and abort the active turn, then forget the conversation.
    ///
    /// An older turn the active one was waiting on is only interrupted, not aborted;
    /// the closed flag keeps it from writing to the cleared history.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.interrupt.interrupt();
        if let Some(handle) = lock(&self.active_turn).take() {
            handle.abort();
        }
        lock(&self.conversation).clear();
        self.set_state(PipelineState::Idle);
        debug!(connection_id = %self.connection_id, "Pipeline shut down");
    }

    fn set_state(&self, state: PipelineState) {
        *lock(&self.state) = state;
    }

    /// Leave Transcribing for whatever the turn task is doing.
    fn settle_state(&self) {
        let state = if self.interrupt.is_active() {
            PipelineState::Generating
        } else {
            PipelineState::Idle
        };
        self.set_state(state);
    }

    pub fn state(&self) -> PipelineState {
        *lock(&self.state)
    }

    pub fn is_generating(&self) -> bool {
        self.interrupt.is_active()
    }

    pub fn conversation(&self) -> Vec<ConversationTurn> {
        lock(&self.conversation).clone()
    }

    pub fn welcome_message(&self) -> &str {
        &self.welcome_message
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            turns_started: self.counters.turns_started.load(Ordering::Relaxed),
            turns_completed: self.counters.turns_completed.load(Ordering::Relaxed),
            turns_interrupted: self.counters.turns_interrupted.load(Ordering::Relaxed),
            collaborator_failures: self.counters.collaborator_failures.load(Ordering::Relaxed),
        }
    }
}
