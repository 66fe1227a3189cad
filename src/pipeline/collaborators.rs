//! # Collaborator Contracts
//!
//! The response pipeline does not know how speech is recognised, how replies are
//! written or how text becomes audio. It talks to those services through the
//! traits in this module, which keeps the turn logic testable with scripted fakes.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Failure reported by one of the external collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    /// Speech-to-text failed
    Transcription(String),

    /// The language model failed to start or broke mid-stream
    Generation(String),

    /// Text-to-speech failed
    Synthesis(String),
}

impl fmt::Display for CollaboratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollaboratorError::Transcription(msg) => write!(f, "Transcription failed: {}", msg),
            CollaboratorError::Generation(msg) => write!(f, "Reply generation failed: {}", msg),
            CollaboratorError::Synthesis(msg) => write!(f, "Speech synthesis failed: {}", msg),
        }
    }
}

impl std::error::Error for CollaboratorError {}

/// Who said a line of the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One line of the conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Incremental text deltas of one generated reply.
pub type ReplyStream = BoxStream<'static, Result<String, CollaboratorError>>;

/// Speech-to-text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe PCM16 mono audio. An empty string means nothing was said.
    async fn transcribe(&self, audio: &[u8]) -> Result<String, CollaboratorError>;
}

/// Language model producing the agent's replies.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    /// Start generating a reply to `conversation`, streamed as text deltas.
    async fn generate_reply(
        &self,
        conversation: &[ConversationTurn],
    ) -> Result<ReplyStream, CollaboratorError>;
}

/// Text-to-speech.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Render `text` as PCM16 audio, split into chunks of roughly 4 KiB.
    async fn synthesize(&self, text: &str) -> Result<Vec<Vec<u8>>, CollaboratorError>;
}

/// Fixed prompts, read once when a pipeline is created.
pub trait PromptSource: Send + Sync {
    fn welcome_message(&self) -> String;
    fn system_prompt(&self) -> String;
}

/// The set of services one call talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub transcriber: Arc<dyn Transcriber>,
    pub generator: Arc<dyn ReplyGenerator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub prompts: Arc<dyn PromptSource>,
}
