//! # Audio Processing Module
//!
//! Caller audio handling shared by every transport.
//!
//! ## Key Components:
//! - **PCM helpers**: little-endian PCM16 conversion and signal level
//! - **Audio Buffer**: bounded FIFO that collects an utterance before transcription
//! - **Frame Classifier**: voice activity detection with interruption hysteresis
//!
//! ## Audio Format Requirements:
//! - **Sample Rate**: 16kHz by default (8, 16, 32 or 48 kHz supported)
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers

pub mod buffer;
pub mod classifier;
pub mod pcm;
