//! # Call Session
//!
//! Transport-independent wiring of one call. Both socket adapters create a
//! `CallSession` when the client connects and forward decoded caller audio to it.
//!
//! ## Tasks per call:
//! - **turn worker**: takes buffered utterances one at a time and hands them to the
//!   response pipeline, so transcriptions of the same call never overlap
//! - **player**: drains the pipeline's delivery queue into the connection's transport
//!   in order
//!
//! ## Rust Concepts:
//! - **Registration**: The session talks to the registry through its own registration,
//!   so a newer call that reuses the id is never touched by this one
//! - **JoinHandle::abort**: Both tasks are cancelled when the call closes
//! - **Drop**: Dropping the session closes it, so an actor that stops without an
//!   explicit hang-up still releases the call

use crate::connection::{
    AudioTransport, ConnectionRegistry, ReceiveOutcome, Registration, SendOutcome,
};
use crate::pipeline::{AudioChunk, Delivery, DeliveryQueue, ResponsePipeline};
use crate::state::AppState;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct CallSession {
    registration: Registration,
    state: AppState,
    pipeline: Arc<ResponsePipeline>,
    utterances: mpsc::UnboundedSender<AudioChunk>,
    worker: JoinHandle<()>,
    player: JoinHandle<()>,
    transcription_trigger_bytes: usize,
    closed: bool,
}

impl CallSession {
    /// Register the connection, start the call's tasks and speak the welcome message.
    pub fn start(
        connection_id: &str,
        transport: Arc<dyn AudioTransport>,
        state: &AppState,
    ) -> Result<Self, String> {
        let config = state.get_config();
        let registration = state.registry.connect(transport, connection_id)?;

        let (pipeline, deliveries) = ResponsePipeline::new(
            connection_id,
            state.collaborators.clone(),
            &config.agent.fallback_message,
        );
        let pipeline = Arc::new(pipeline);
        state
            .registry
            .register_interrupt_handler(&registration, pipeline.interrupt_handle());

        let (utterances, receiver) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_turn_worker(pipeline.clone(), receiver));
        let player = tokio::spawn(run_player(
            registration.clone(),
            state.registry.clone(),
            deliveries,
        ));

        state.record_call_started();
        info!(connection_id = %connection_id, "Call started");
        pipeline.speak_welcome();

        Ok(Self {
            registration,
            state: state.clone(),
            pipeline,
            utterances,
            worker,
            player,
            transcription_trigger_bytes: config.audio.transcription_trigger_bytes,
            closed: false,
        })
    }

    /// Feed decoded caller audio.
    ///
    /// Once enough audio is buffered it is handed to the turn worker as one utterance.
    /// Returns `None` once the call is closed or another call took over its id.
    pub fn on_audio(&mut self, data: &[u8]) -> Option<ReceiveOutcome> {
        if self.closed {
            return None;
        }

        let agent_was_speaking = self.pipeline.is_generating();
        let Some(outcome) = self.state.registry.receive_audio(&self.registration, data) else {
            warn!(connection_id = %self.registration.connection_id, "Call was replaced by a newer connection");
            return None;
        };
        if outcome.interrupted && agent_was_speaking {
            self.state.record_interruption();
        }

        if let Some(utterance) = self
            .state
            .registry
            .take_buffered(&self.registration, self.transcription_trigger_bytes)
        {
            self.submit(utterance);
        }
        Some(outcome)
    }

    /// The client signalled the end of its audio: flush what is buffered and reset
    /// voice activity tracking.
    pub fn end_of_stream(&mut self) {
        if self.closed {
            return;
        }

        if let Some(remainder) = self.state.registry.flush_buffer(&self.registration) {
            debug!(connection_id = %self.registration.connection_id, bytes = remainder.len(), "Flushing buffered audio");
            self.submit(remainder);
        }
        self.state.registry.reset_classifier(&self.registration);
    }

    fn submit(&self, utterance: Vec<u8>) {
        if self.utterances.send(AudioChunk::input(utterance)).is_err() {
            debug!(connection_id = %self.registration.connection_id, "Turn worker is gone, dropping utterance");
        }
    }

    /// Tear the call down. Safe to call more than once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.state.registry.disconnect(&self.registration);
        self.pipeline.shutdown();
        self.worker.abort();
        self.player.abort();
        self.state.record_call_ended(self.pipeline.stats());
        info!(connection_id = %self.registration.connection_id, "Call ended");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The registry no longer knows this call, because a newer connection took over
    /// its id or the inactivity sweep removed it.
    pub fn is_detached(&self) -> bool {
        !self.closed && !self.state.registry.contains(&self.registration)
    }

    pub fn pipeline(&self) -> &ResponsePipeline {
        &self.pipeline
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_turn_worker(
    pipeline: Arc<ResponsePipeline>,
    mut utterances: mpsc::UnboundedReceiver<AudioChunk>,
) {
    while let Some(utterance) = utterances.recv().await {
        debug!(role = ?utterance.role, bytes = utterance.bytes.len(), "Processing utterance");
        pipeline.process_audio(&utterance.bytes).await;
    }
}

async fn run_player(
    registration: Registration,
    registry: Arc<ConnectionRegistry>,
    mut deliveries: DeliveryQueue,
) {
    while let Some(delivery) = deliveries.next().await {
        let outcome = match delivery {
            Delivery::Audio(chunk) => registry.send_audio(&registration, chunk.bytes).await,
            Delivery::EndOfTurn => registry.send_end_of_turn(&registration).await,
        };

        match outcome {
            SendOutcome::Sent | SendOutcome::Failed(_) => {}
            SendOutcome::UnknownConnection | SendOutcome::Disconnected => {
                debug!(connection_id = %registration.connection_id, "Connection gone, stopping playback");
                break;
            }
        }
    }
}
