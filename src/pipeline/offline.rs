//! # Offline Collaborators
//!
//! Stand-ins for the speech-to-text, language model and text-to-speech services so
//! the server can take calls end to end without any external account. They are
//! wired in by `main`:
//!
//! - [`LevelTranscriber`]: any utterance loud enough is "heard" as a fixed transcript
//! - [`KeywordReplyGenerator`]: picks a canned answer by keyword and streams it word by word
//! - [`ToneSynthesizer`]: renders text as a sine tone, about one second per 15 characters
//! - [`StaticPrompts`]: welcome message and system prompt from configuration

use crate::audio::pcm;
use crate::config::AppConfig;
use crate::pipeline::collaborators::{
    CollaboratorError, Collaborators, ConversationTurn, PromptSource, ReplyGenerator,
    ReplyStream, Role, SpeechSynthesizer, Transcriber,
};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::f32::consts::PI;
use std::sync::Arc;

/// Size of the chunks produced by [`ToneSynthesizer`].
pub const SYNTHESIS_CHUNK_BYTES: usize = 4096;

const CHARACTERS_PER_SECOND: f32 = 15.0;

/// Reports a fixed transcript for any audio above a normalized RMS level, and silence otherwise.
pub struct LevelTranscriber {
    transcript: String,
    min_rms: f32,
}

impl LevelTranscriber {
    pub fn new(transcript: impl Into<String>, min_rms: f32) -> Self {
        Self {
            transcript: transcript.into(),
            min_rms,
        }
    }
}

#[async_trait]
impl Transcriber for LevelTranscriber {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, CollaboratorError> {
        // A flushed remainder can end mid-sample; the odd byte is not decoded
        let level = pcm::rms_level(&pcm::bytes_to_samples(audio));
        if level < self.min_rms {
            return Ok(String::new());
        }
        Ok(self.transcript.clone())
    }
}

/// Canned replies chosen by keywords in the caller's last message.
pub struct KeywordReplyGenerator {
    replies: Vec<(Vec<&'static str>, &'static str)>,
    default_reply: &'static str,
}

impl Default for KeywordReplyGenerator {
    fn default() -> Self {
        Self {
            replies: vec![
                (
                    vec!["menu", "food", "dish"],
                    "We have starters, curries, breads and desserts. What would you like to hear more about?",
                ),
                (
                    vec!["reservation", "book", "table"],
                    "I can help with a reservation. For how many people, and at what time?",
                ),
                (
                    vec!["hours", "open", "close"],
                    "We are open every day from eleven in the morning until ten at night.",
                ),
                (
                    vec!["bye", "thank"],
                    "Thank you for calling. Goodbye!",
                ),
            ],
            default_reply: "I've made a note of that. Is there anything else I can help you with?",
        }
    }
}

impl KeywordReplyGenerator {
    /// Reply text for a caller message.
    pub fn reply_for(&self, message: &str) -> &'static str {
        let message = message.to_lowercase();
        self.replies
            .iter()
            .find(|(keywords, _)| keywords.iter().any(|k| message.contains(k)))
            .map(|(_, reply)| *reply)
            .unwrap_or(self.default_reply)
    }
}

#[async_trait]
impl ReplyGenerator for KeywordReplyGenerator {
    async fn generate_reply(
        &self,
        conversation: &[ConversationTurn],
    ) -> Result<ReplyStream, CollaboratorError> {
        let last_user = conversation
            .iter()
            .rev()
            .find(|turn| turn.role == Role::User)
            .map(|turn| turn.content.as_str())
            .unwrap_or_default();

        // One delta per word, keeping the separating space like a streamed model would
        let deltas: Vec<Result<String, CollaboratorError>> = self
            .reply_for(last_user)
            .split_inclusive(' ')
            .map(|word| Ok(word.to_string()))
            .collect();

        Ok(stream::iter(deltas).boxed())
    }
}

/// Renders text as a PCM16 sine tone.
pub struct ToneSynthesizer {
    sample_rate: u32,
    frequency_hz: f32,
    amplitude: f32,
}

impl ToneSynthesizer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frequency_hz: 440.0,
            amplitude: 0.3,
        }
    }

    /// Duration of the tone for `text`.
    pub fn duration_seconds(text: &str) -> f32 {
        text.chars().count() as f32 / CHARACTERS_PER_SECOND
    }

    fn render(&self, text: &str) -> Vec<u8> {
        let sample_count = (Self::duration_seconds(text) * self.sample_rate as f32) as usize;
        let peak = self.amplitude * i16::MAX as f32;
        let step = 2.0 * PI * self.frequency_hz / self.sample_rate as f32;

        let samples: Vec<i16> = (0..sample_count)
            .map(|n| (peak * (step * n as f32).sin()) as i16)
            .collect();
        pcm::samples_to_bytes(&samples)
    }
}

#[async_trait]
impl SpeechSynthesizer for ToneSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<Vec<u8>>, CollaboratorError> {
        if text.trim().is_empty() {
            return Err(CollaboratorError::Synthesis("Nothing to synthesize".to_string()));
        }

        let audio = self.render(text);
        Ok(audio
            .chunks(SYNTHESIS_CHUNK_BYTES)
            .map(|chunk| chunk.to_vec())
            .collect())
    }
}

/// Prompts taken verbatim from configuration.
pub struct StaticPrompts {
    pub welcome_message: String,
    pub system_prompt: String,
}

impl PromptSource for StaticPrompts {
    fn welcome_message(&self) -> String {
        self.welcome_message.clone()
    }

    fn system_prompt(&self) -> String {
        self.system_prompt.clone()
    }
}

/// Build the offline collaborator set described by `config`.
pub fn offline_collaborators(config: &AppConfig) -> Collaborators {
    Collaborators {
        transcriber: Arc::new(LevelTranscriber::new(
            config.agent.canned_transcript.clone(),
            config.agent.speech_rms_threshold,
        )),
        generator: Arc::new(KeywordReplyGenerator::default()),
        synthesizer: Arc::new(ToneSynthesizer::new(config.audio.sample_rate)),
        prompts: Arc::new(StaticPrompts {
            welcome_message: config.agent.welcome_message.clone(),
            system_prompt: config.agent.system_prompt.clone(),
        }),
    }
}
