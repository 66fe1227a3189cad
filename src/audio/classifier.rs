//! # Audio Frame Classifier
//!
//! Per-connection voice activity and interruption ("barge-in") detection.
//!
//! Each standard frame is classified as speech or non-speech by a
//! [`SpeechDetector`]. Results go into a sliding window; once the window is full
//! the speech ratio decides whether the caller is currently talking, and two
//! hysteresis counters drive the Silent/Speaking state machine:
//!
//! ```text
//!   Silent --(consecutive_speech >= interruption_frames)--> Speaking   [interruption edge]
//!   Speaking --(consecutive_silence >= silence_window)--> Silent        [no signal]
//! ```
//!
//! Inputs of any size are accepted by [`AudioFrameClassifier::process_audio`]:
//! they are re-framed through a carry-over buffer that only [`AudioFrameClassifier::reset`]
//! ever discards.

use crate::audio::pcm;
use std::collections::VecDeque;
use tracing::{debug, error, warn};
use webrtc_vad::{SampleRate, Vad, VadMode};

/// Underlying single-frame speech detector.
///
/// Implementations receive exactly one standard frame of samples per call.
///
/// ## Rust Concepts:
/// - **trait object**: Stored as `Box<dyn SpeechDetector>`, so tests can swap in a
///   level-based detector for the WebRTC one
/// - **Send**: The classifier lives inside the registry and moves between threads
pub trait SpeechDetector: Send {
    /// Classify one frame. Errors are treated as "not speech" by the classifier.
    fn is_speech(&mut self, frame: &[i16]) -> Result<bool, String>;
}

/// [`SpeechDetector`] backed by the WebRTC VAD.
pub struct WebRtcDetector {
    vad: Vad,
}

// SAFETY: `Vad` owns a heap-allocated libfvad instance with no thread affinity
// and no shared references. The detector is only ever used through `&mut self`
// by the connection that owns it, so moving it between threads is sound.
unsafe impl Send for WebRtcDetector {}

impl WebRtcDetector {
    /// Create a detector for `sample_rate` with the given aggressiveness (0-3).
    ///
    /// ## Supported values:
    /// - **sample_rate**: 8000, 16000, 32000 or 48000 Hz
    /// - **aggressiveness**: 0 (quality) to 3 (very aggressive)
    pub fn new(sample_rate: u32, aggressiveness: u8) -> Result<Self, String> {
        let rate = match sample_rate {
            8000 => SampleRate::Rate8kHz,
            16000 => SampleRate::Rate16kHz,
            32000 => SampleRate::Rate32kHz,
            48000 => SampleRate::Rate48kHz,
            other => return Err(format!("Unsupported VAD sample rate: {}", other)),
        };

        let mode = match aggressiveness {
            0 => VadMode::Quality,
            1 => VadMode::LowBitrate,
            2 => VadMode::Aggressive,
            3 => VadMode::VeryAggressive,
            other => return Err(format!("VAD aggressiveness must be 0-3, got {}", other)),
        };

        Ok(Self {
            vad: Vad::new_with_rate_and_mode(rate, mode),
        })
    }
}

impl SpeechDetector for WebRtcDetector {
    fn is_speech(&mut self, frame: &[i16]) -> Result<bool, String> {
        self.vad
            .is_voice_segment(frame)
            .map_err(|_| format!("WebRTC VAD rejected a frame of {} samples", frame.len()))
    }
}

/// Tuning for the classifier.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Audio sample rate in Hz
    pub sample_rate: u32,

    /// Duration of one standard frame (10, 20 or 30 ms for WebRTC VAD)
    pub frame_duration_ms: u32,

    /// Number of frames in the sliding speech window
    pub speech_window: usize,

    /// Consecutive non-speech frames needed to return to Silent
    pub silence_window: usize,

    /// Ratio of speech frames in the window needed to count as speech
    pub speech_threshold: f32,

    /// Minimum speech duration before an interruption fires
    pub interruption_duration_ms: u32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            frame_duration_ms: 30,
            speech_window: 5,
            silence_window: 10,
            speech_threshold: 0.5,
            interruption_duration_ms: 300,
        }
    }
}

impl ClassifierConfig {
    /// Bytes in one standard frame.
    pub fn frame_bytes(&self) -> usize {
        pcm::frame_bytes(self.sample_rate, self.frame_duration_ms)
    }

    /// Number of qualifying frames that make an interruption (at least 1).
    pub fn interruption_frames(&self) -> usize {
        if self.frame_duration_ms == 0 {
            return 1;
        }
        ((self.interruption_duration_ms / self.frame_duration_ms) as usize).max(1)
    }
}

/// Whether the caller is currently considered to be talking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechState {
    Silent,
    Speaking,
}

/// Result of feeding audio to the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameVerdict {
    /// Speech flag of the most recently classified frame
    pub is_speech: bool,

    /// True if any classified frame produced a Silent -> Speaking edge
    pub is_interruption: bool,

    /// Number of standard frames classified by this call
    pub frames: usize,
}

/// Voice activity / interruption state machine for one connection.
///
/// ## Rust Concepts:
/// - **VecDeque<bool>**: The sliding window; old frames fall out the front
/// - **Vec<u8> carry-over**: Holds the bytes of a partial frame between calls
/// - **&mut self**: One owner at a time, guarded by the registry's per-connection lock
pub struct AudioFrameClassifier {
    detector: Box<dyn SpeechDetector>,
    config: ClassifierConfig,
    frame_bytes: usize,
    interruption_frames: usize,

    state: SpeechState,
    window: VecDeque<bool>,
    consecutive_speech: usize,
    consecutive_silence: usize,

    /// Bytes waiting for the rest of their frame
    carry_over: Vec<u8>,
}

impl AudioFrameClassifier {
    /// Wrap `detector` with the hysteresis described by `config`.
    pub fn new(detector: Box<dyn SpeechDetector>, config: ClassifierConfig) -> Self {
        let frame_bytes = config.frame_bytes();
        let interruption_frames = config.interruption_frames();
        let window_len = config.speech_window.max(1);

        Self {
            detector,
            frame_bytes,
            interruption_frames,
            state: SpeechState::Silent,
            window: VecDeque::with_capacity(window_len),
            consecutive_speech: 0,
            consecutive_silence: 0,
            carry_over: Vec::with_capacity(frame_bytes),
            config,
        }
    }

    /// Classify audio of any length.
    ///
    /// Bytes are re-framed into standard frames; a trailing partial frame is kept
    /// for the next call. See [`FrameVerdict`] for how sub-frame results combine.
    pub fn process_audio(&mut self, data: &[u8]) -> FrameVerdict {
        let mut verdict = FrameVerdict::default();
        if self.frame_bytes == 0 {
            return verdict;
        }

        self.carry_over.extend_from_slice(data);

        let mut offset = 0;
        while self.carry_over.len() - offset >= self.frame_bytes {
            let end = offset + self.frame_bytes;
            let samples = pcm::bytes_to_samples(&self.carry_over[offset..end]);
            let (is_speech, is_interruption) = self.classify(&samples);
            verdict.is_speech = is_speech;
            verdict.is_interruption |= is_interruption;
            verdict.frames += 1;
            offset = end;
        }

        if offset > 0 {
            self.carry_over.drain(..offset);
        }

        verdict
    }

    /// Classify exactly one standard frame.
    ///
    /// Frames of the wrong size are dropped: `(false, false)` and a warning.
    pub fn process_frame(&mut self, frame: &[u8]) -> (bool, bool) {
        if frame.len() != self.frame_bytes {
            warn!(
                "Invalid frame size: {} bytes, expected {} bytes",
                frame.len(),
                self.frame_bytes
            );
            return (false, false);
        }

        let samples = pcm::bytes_to_samples(frame);
        self.classify(&samples)
    }

    fn classify(&mut self, samples: &[i16]) -> (bool, bool) {
        let is_speech = match self.detector.is_speech(samples) {
            Ok(flag) => flag,
            Err(err) => {
                error!("VAD processing error: {}", err);
                false
            }
        };

        if self.window.len() == self.config.speech_window.max(1) {
            self.window.pop_front();
        }
        self.window.push_back(is_speech);

        if self.window.len() < self.config.speech_window.max(1) {
            return (is_speech, false);
        }

        let speech_count = self.window.iter().filter(|&&flag| flag).count();
        let speech_ratio = speech_count as f32 / self.window.len() as f32;
        let current_speech = speech_ratio >= self.config.speech_threshold;

        if current_speech {
            self.consecutive_speech += 1;
            self.consecutive_silence = 0;
        } else {
            self.consecutive_silence += 1;
            self.consecutive_speech = 0;
        }

        let mut interruption = false;
        match self.state {
            SpeechState::Silent if self.consecutive_speech >= self.interruption_frames => {
                debug!("Interruption detected");
                self.state = SpeechState::Speaking;
                interruption = true;
            }
            SpeechState::Speaking if self.consecutive_silence >= self.config.silence_window => {
                debug!("End of speech detected");
                self.state = SpeechState::Silent;
            }
            _ => {}
        }

        (current_speech, interruption)
    }

    /// Clear window, counters, state and carry-over bytes.
    pub fn reset(&mut self) {
        self.state = SpeechState::Silent;
        self.window.clear();
        self.consecutive_speech = 0;
        self.consecutive_silence = 0;
        self.carry_over.clear();
    }

    pub fn state(&self) -> SpeechState {
        self.state
    }

    pub fn is_speaking(&self) -> bool {
        self.state == SpeechState::Speaking
    }

    pub fn consecutive_speech(&self) -> usize {
        self.consecutive_speech
    }

    pub fn consecutive_silence(&self) -> usize {
        self.consecutive_silence
    }

    /// Bytes held back waiting for a full frame.
    pub fn pending_bytes(&self) -> usize {
        self.carry_over.len()
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    pub fn interruption_frames(&self) -> usize {
        self.interruption_frames
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Treats any frame whose first sample is non-zero as speech.
    pub(crate) struct LevelDetector;

    impl SpeechDetector for LevelDetector {
        fn is_speech(&mut self, frame: &[i16]) -> Result<bool, String> {
            Ok(frame.first().copied().unwrap_or(0) != 0)
        }
    }

    /// Always errors.
    struct BrokenDetector;

    impl SpeechDetector for BrokenDetector {
        fn is_speech(&mut self, _frame: &[i16]) -> Result<bool, String> {
            Err("detector exploded".to_string())
        }
    }

    pub(crate) fn speech_frame() -> Vec<u8> {
        pcm::samples_to_bytes(&[1000i16; 480])
    }

    pub(crate) fn silent_frame() -> Vec<u8> {
        vec![0u8; 960]
    }

    fn classifier() -> AudioFrameClassifier {
        AudioFrameClassifier::new(Box::new(LevelDetector), ClassifierConfig::default())
    }

    #[test]
    fn test_default_geometry() {
        let c = classifier();
        assert_eq!(c.frame_bytes(), 960);
        assert_eq!(c.interruption_frames(), 10);
    }

    #[test]
    fn test_silence_then_speech_scenario() {
        let mut c = classifier();

        for _ in 0..5 {
            let (is_speech, is_interruption) = c.process_frame(&silent_frame());
            assert!(!is_speech);
            assert!(!is_interruption);
        }

        let mut results = Vec::new();
        for _ in 0..12 {
            results.push(c.process_frame(&speech_frame()));
        }

        // Window of 5 needs 3 speech frames before the ratio reaches 0.5
        assert!(!results[0].0);
        assert!(!results[1].0);
        assert!(results[2..].iter().all(|(is_speech, _)| *is_speech));

        // The 10th consecutive qualifying frame is the 12th speech frame
        let edges: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, (_, edge))| *edge)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(edges, vec![11]);
        assert!(c.is_speaking());
    }

    #[test]
    fn test_no_second_edge_while_speaking() {
        let mut c = classifier();
        let mut edges = 0;
        for _ in 0..100 {
            if c.process_frame(&speech_frame()).1 {
                edges += 1;
            }
        }
        assert_eq!(edges, 1);
    }

    #[test]
    fn test_edge_fires_again_after_returning_to_silence() {
        let mut c = classifier();
        let mut edges = 0;
        for _ in 0..2 {
            for _ in 0..20 {
                if c.process_frame(&speech_frame()).1 {
                    edges += 1;
                }
            }
            for _ in 0..20 {
                assert!(!c.process_frame(&silent_frame()).1);
            }
            assert_eq!(c.state(), SpeechState::Silent);
        }
        assert_eq!(edges, 2);
    }

    #[test]
    fn test_short_silence_does_not_end_speech() {
        let mut c = classifier();
        for _ in 0..20 {
            c.process_frame(&speech_frame());
        }
        assert!(c.is_speaking());

        // Fewer than silence_window non-speech decisions
        for _ in 0..8 {
            c.process_frame(&silent_frame());
        }
        assert!(c.is_speaking());
        for _ in 0..20 {
            assert!(!c.process_frame(&speech_frame()).1);
        }
    }

    #[test]
    fn test_wrong_size_frame_is_dropped() {
        let mut c = classifier();
        assert_eq!(c.process_frame(&[1u8; 100]), (false, false));
        assert_eq!(c.consecutive_speech(), 0);
    }

    #[test]
    fn test_detector_error_counts_as_silence() {
        let mut c = AudioFrameClassifier::new(Box::new(BrokenDetector), ClassifierConfig::default());
        for _ in 0..30 {
            assert_eq!(c.process_frame(&speech_frame()), (false, false));
        }
        assert_eq!(c.consecutive_speech(), 0);
        assert!(c.consecutive_silence() > 0);
    }

    #[test]
    fn test_small_inputs_accumulate_in_carry_over() {
        let mut c = classifier();
        let frame = speech_frame();

        let verdict = c.process_audio(&frame[..500]);
        assert_eq!(verdict.frames, 0);
        assert_eq!(c.pending_bytes(), 500);

        let verdict = c.process_audio(&frame[500..]);
        assert_eq!(verdict.frames, 1);
        assert!(verdict.is_speech);
        assert_eq!(c.pending_bytes(), 0);
    }

    #[test]
    fn test_large_input_is_split_and_edges_are_ored() {
        let mut c = classifier();
        let mut block = Vec::new();
        // The window fills at frame 5, so the 10th qualifying decision is frame 14
        for _ in 0..14 {
            block.extend_from_slice(&speech_frame());
        }
        // Plus half a frame that must wait
        block.extend_from_slice(&speech_frame()[..480]);

        let verdict = c.process_audio(&block);
        assert_eq!(verdict.frames, 14);
        assert!(verdict.is_speech);
        assert!(verdict.is_interruption);
        assert_eq!(c.pending_bytes(), 480);
    }

    #[test]
    fn test_edge_in_middle_sub_frame_is_reported() {
        let mut c = classifier();
        let mut block = Vec::new();
        for _ in 0..16 {
            block.extend_from_slice(&speech_frame());
        }

        // Edge on sub-frame 13; sub-frames 14 and 15 are plain speech
        let verdict = c.process_audio(&block);
        assert_eq!(verdict.frames, 16);
        assert!(verdict.is_interruption);
        assert!(verdict.is_speech);

        // The next block carries no edge of its own
        let mut block = speech_frame();
        block.extend_from_slice(&speech_frame());
        assert!(!c.process_audio(&block).is_interruption);
    }

    #[test]
    fn test_verdict_speech_flag_is_last_sub_frame() {
        let mut c = classifier();
        for _ in 0..20 {
            c.process_frame(&speech_frame());
        }

        // Speech window still majority speech after one silent frame
        let mut block = speech_frame();
        block.extend_from_slice(&silent_frame());
        let verdict = c.process_audio(&block);
        assert_eq!(verdict.frames, 2);
        assert!(verdict.is_speech);

        for _ in 0..3 {
            c.process_frame(&silent_frame());
        }
        let mut block = silent_frame();
        block.extend_from_slice(&silent_frame());
        assert!(!c.process_audio(&block).is_speech);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut c = classifier();
        for _ in 0..15 {
            c.process_frame(&speech_frame());
        }
        c.process_audio(&[1u8; 10]);
        assert!(c.is_speaking());

        c.reset();
        assert_eq!(c.state(), SpeechState::Silent);
        assert_eq!(c.consecutive_speech(), 0);
        assert_eq!(c.consecutive_silence(), 0);
        assert_eq!(c.pending_bytes(), 0);

        // Window must refill before another decision is made
        for _ in 0..4 {
            assert!(!c.process_frame(&speech_frame()).1);
        }
        assert_eq!(c.consecutive_speech(), 0);
    }

    #[test]
    fn test_webrtc_detector_validates_settings() {
        assert!(WebRtcDetector::new(16000, 3).is_ok());
        assert!(WebRtcDetector::new(44100, 3).is_err());
        assert!(WebRtcDetector::new(16000, 4).is_err());
    }

    #[test]
    fn test_webrtc_detector_hears_silence_as_silence() {
        let detector = WebRtcDetector::new(16000, 3).unwrap();
        let mut c = AudioFrameClassifier::new(Box::new(detector), ClassifierConfig::default());
        for _ in 0..10 {
            assert_eq!(c.process_frame(&silent_frame()), (false, false));
        }
    }
}
