//! Sentence segmentation of streamed reply text.

const SENTENCE_TERMINATORS: [char; 3] = ['.', '?', '!'];

/// Accumulates text deltas and releases complete sentences.
///
/// Everything up to and including the last terminator seen is released as one
/// segment; the remainder waits for more text or for [`SentenceSegmenter::finish`].
#[derive(Debug, Default)]
pub struct SentenceSegmenter {
    pending: String,
}

impl SentenceSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a delta. Returns a segment ready for synthesis, if any.
    pub fn push(&mut self, delta: &str) -> Option<String> {
        self.pending.push_str(delta);

        let cut = self.pending.rfind(|c: char| SENTENCE_TERMINATORS.contains(&c))?;
        // Terminators are single-byte ASCII
        let rest = self.pending.split_off(cut + 1);
        let segment = std::mem::replace(&mut self.pending, rest);

        let segment = segment.trim();
        (!segment.is_empty()).then(|| segment.to_string())
    }

    /// Release whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        let tail = std::mem::take(&mut self.pending);
        let tail = tail.trim();
        (!tail.is_empty()).then(|| tail.to_string())
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waits_for_terminator() {
        let mut seg = SentenceSegmenter::new();
        assert_eq!(seg.push("Hello"), None);
        assert_eq!(seg.push(" there"), None);
        assert_eq!(seg.push(". How"), Some("Hello there.".to_string()));
        assert_eq!(seg.pending(), " How");
    }

    #[test]
    fn test_cuts_at_last_terminator() {
        let mut seg = SentenceSegmenter::new();
        assert_eq!(
            seg.push("Yes! Of course. And"),
            Some("Yes! Of course.".to_string())
        );
        assert_eq!(seg.finish(), Some("And".to_string()));
        assert_eq!(seg.finish(), None);
    }

    #[test]
    fn test_question_mark_and_whitespace_only() {
        let mut seg = SentenceSegmenter::new();
        assert_eq!(seg.push("Ready?"), Some("Ready?".to_string()));
        assert_eq!(seg.push("   "), None);
        assert_eq!(seg.finish(), None);
    }
}
