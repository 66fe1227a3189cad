//! # PCM16 Helpers
//!
//! Conversions between raw little-endian PCM16 bytes (the wire format on both
//! transports) and `i16` samples, plus a simple level measurement.
//!
//! ## Audio Format:
//! - **Bit Depth**: 16-bit signed integers
//! - **Channels**: Mono
//! - **Encoding**: Little-endian, 2 bytes per sample

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Number of bytes in one PCM16 sample.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Decode little-endian PCM16 bytes into samples.
///
/// A trailing odd byte cannot form a sample and is ignored.
pub fn bytes_to_samples(data: &[u8]) -> Vec<i16> {
    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / BYTES_PER_SAMPLE);

    // Read each 16-bit sample (little-endian format)
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample);
    }

    samples
}

/// Encode samples as little-endian PCM16 bytes.
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for &sample in samples {
        // Writing into a Vec cannot fail
        let _ = out.write_i16::<LittleEndian>(sample);
    }
    out
}

/// Number of bytes in one frame of `frame_duration_ms` at `sample_rate`.
///
/// ## Example:
/// 30ms at 16kHz: 16000 * 30 / 1000 = 480 samples = 960 bytes
pub fn frame_bytes(sample_rate: u32, frame_duration_ms: u32) -> usize {
    (sample_rate as usize * frame_duration_ms as usize / 1000) * BYTES_PER_SAMPLE
}

/// Root-mean-square level of the samples, normalized to `[0.0, 1.0]`.
pub fn rms_level(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let normalized = s as f64 / 32768.0;
            normalized * normalized
        })
        .sum();

    (sum_squares / samples.len() as f64).sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_conversion_preserves_values() {
        let samples = vec![0i16, 1, -1, 12345, i16::MAX, i16::MIN];
        let bytes = samples_to_bytes(&samples);
        assert_eq!(bytes.len(), samples.len() * 2);
        assert_eq!(bytes_to_samples(&bytes), samples);
    }

    #[test]
    fn test_odd_trailing_byte_is_ignored() {
        let bytes = vec![0x01, 0x00, 0xFF];
        assert_eq!(bytes_to_samples(&bytes), vec![1]);
    }

    #[test]
    fn test_frame_bytes_for_default_format() {
        assert_eq!(frame_bytes(16000, 30), 960);
        assert_eq!(frame_bytes(8000, 20), 320);
    }

    #[test]
    fn test_rms_level() {
        assert_eq!(rms_level(&[]), 0.0);
        assert_eq!(rms_level(&[0; 100]), 0.0);
        let loud = rms_level(&[i16::MIN; 100]);
        assert!((loud - 1.0).abs() < 1e-6);
    }
}
