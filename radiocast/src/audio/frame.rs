//! s32le framing of captured sample frames.

use bytes::{BufMut, Bytes, BytesMut};

/// Bytes per serialized sample
pub const BYTES_PER_SAMPLE: usize = 4;

/// Serialize one frame of interleaved samples as little-endian i32
///
/// The result is exactly `samples.len() * 4` bytes long.
pub fn encode_frame(samples: &[i32]) -> Bytes {
    let mut bytes = BytesMut::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for &sample in samples {
        bytes.put_i32_le(sample);
    }
    bytes.freeze()
}

/// Convert a normalized float sample to full-scale i32
pub(crate) fn f32_to_i32(sample: f32) -> i32 {
    let clamped = sample.clamp(-1.0, 1.0) as f64;
    (clamped * i32::MAX as f64) as i32
}

/// Widen an i16 sample to full-scale i32
pub(crate) fn i16_to_i32(sample: i16) -> i32 {
    (sample as i32) << 16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_length() {
        for (buffer_size, channels) in [(1usize, 1usize), (256, 2), (8192, 2), (480, 6)] {
            let samples = vec![0i32; buffer_size * channels];
            let bytes = encode_frame(&samples);
            assert_eq!(bytes.len(), buffer_size * channels * 4);
        }
    }

    #[test]
    fn test_little_endian_layout() {
        let bytes = encode_frame(&[0x1234_5678, -1, i32::MIN]);

        assert_eq!(&bytes[0..4], &[0x78, 0x56, 0x34, 0x12]);
        assert_eq!(&bytes[4..8], &[0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(&bytes[8..12], &[0x00, 0x00, 0x00, 0x80]);
    }

    #[test]
    fn test_empty_frame() {
        assert!(encode_frame(&[]).is_empty());
    }

    #[test]
    fn test_f32_conversion() {
        assert_eq!(f32_to_i32(0.0), 0);
        assert_eq!(f32_to_i32(1.0), i32::MAX);
        assert_eq!(f32_to_i32(-1.0), -i32::MAX);
        // Out of range values are clamped
        assert_eq!(f32_to_i32(2.5), i32::MAX);
        assert_eq!(f32_to_i32(-3.0), -i32::MAX);
    }

    #[test]
    fn test_i16_conversion() {
        assert_eq!(i16_to_i32(0), 0);
        assert_eq!(i16_to_i32(1), 1 << 16);
        assert_eq!(i16_to_i32(i16::MIN), i32::MIN);
        assert_eq!(i16_to_i32(-1), -(1 << 16));
    }
}
