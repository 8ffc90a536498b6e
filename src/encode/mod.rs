//! Encoder seam
//!
//! Jobs decode through an [`AudioStream`](crate::audio::AudioStream) and hand
//! interleaved signed 16-bit samples to an [`Encoder`] built by the
//! configured [`EncoderFactory`]. The encoder owns the destination file.

pub mod wav;

pub use wav::WavEncoderFactory;

use crate::audio::TagStore;
use crate::error::EncodeError;
use std::fs::File;
use std::path::Path;

/// Highest output rate any built-in encoder accepts
pub const MAX_FREQUENCY: u32 = 384_000;

/// Shape of the audio an encoder will receive
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodeParams {
    pub channels: u16,
    pub frequency: u32,
    /// Quality in `[-0.1, 1.0]`
    pub quality: f32,
}

impl EncodeParams {
    /// Reject parameters no built-in encoder can represent
    pub fn validate(&self) -> Result<(), EncodeError> {
        if !(1..=MAX_FREQUENCY).contains(&self.frequency) {
            return Err(EncodeError::Parameters(format!(
                "sample rate {}Hz outside 1..={}Hz",
                self.frequency, MAX_FREQUENCY
            )));
        }
        if !(-0.1..=1.0).contains(&self.quality) {
            return Err(EncodeError::Parameters(format!(
                "quality {} outside [-0.1, 1.0]",
                self.quality
            )));
        }
        if self.channels == 0 || self.channels > 2 {
            return Err(EncodeError::Parameters(format!("{} channels", self.channels)));
        }
        Ok(())
    }
}

/// Builds encoders for one output format
pub trait EncoderFactory: Send + Sync {
    /// Human-readable output format name
    fn name(&self) -> &'static str;

    /// Lower-case extension for destination files
    fn extension(&self) -> &'static str;

    /// Start encoding into an already created destination file
    fn create(
        &self,
        file: File,
        destination: &Path,
        params: &EncodeParams,
        tags: &TagStore,
    ) -> Result<Box<dyn Encoder>, EncodeError>;
}

/// One in-progress encode
pub trait Encoder: Send {
    /// Append interleaved samples
    fn write_samples(&mut self, samples: &[i16]) -> Result<(), EncodeError>;

    /// Flush and close the destination
    fn finish(self: Box<Self>) -> Result<(), EncodeError>;
}

/// Convert little-endian PCM bytes to signed 16-bit samples
///
/// 8-bit input is unsigned and is widened; 24- and 32-bit input keeps the
/// most significant 16 bits. `bytes` must hold whole samples.
pub fn widen_samples(bytes: &[u8], bits_per_sample: u16, out: &mut Vec<i16>) {
    out.clear();
    match bits_per_sample {
        8 => out.extend(bytes.iter().map(|&b| (i16::from(b) - 128) << 8)),
        16 => out.extend(
            bytes
                .chunks_exact(2)
                .map(|s| i16::from_le_bytes([s[0], s[1]])),
        ),
        bits => {
            let width = usize::from(bits / 8);
            out.extend(
                bytes
                    .chunks_exact(width)
                    .map(|s| i16::from_le_bytes([s[width - 2], s[width - 1]])),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(frequency: u32, quality: f32) -> EncodeParams {
        EncodeParams {
            channels: 2,
            frequency,
            quality,
        }
    }

    #[test]
    fn test_validate_bounds() {
        assert!(params(44100, 0.4).validate().is_ok());
        assert!(params(MAX_FREQUENCY, -0.1).validate().is_ok());
        assert!(params(1, 1.0).validate().is_ok());
        assert!(matches!(params(0, 0.4).validate(), Err(EncodeError::Parameters(_))));
        assert!(matches!(params(400_000, 0.4).validate(), Err(EncodeError::Parameters(_))));
        assert!(matches!(params(44100, 1.5).validate(), Err(EncodeError::Parameters(_))));
        assert!(matches!(params(44100, -0.2).validate(), Err(EncodeError::Parameters(_))));
    }

    #[test]
    fn test_widen_unsigned_8_bit() {
        let mut out = Vec::new();
        widen_samples(&[0x00, 0x80, 0xFF], 8, &mut out);
        assert_eq!(out, vec![i16::MIN, 0, 127 << 8]);
    }

    #[test]
    fn test_widen_16_and_24_bit() {
        let mut out = Vec::new();
        widen_samples(&[0x34, 0x12, 0xFF, 0xFF], 16, &mut out);
        assert_eq!(out, vec![0x1234, -1]);

        widen_samples(&[0x00, 0x34, 0x12], 24, &mut out);
        assert_eq!(out, vec![0x1234]);
    }
}
