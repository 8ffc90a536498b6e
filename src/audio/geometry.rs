//! Byte/sample arithmetic for interleaved PCM
//!
//! A "sample" here is one instant across all channels (a sample chunk),
//! matching how streams report `total_samples` and positions.

use std::fmt;

/// Channel count and bit depth of an interleaved PCM stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SampleGeometry {
    channels: u16,
    bits_per_sample: u16,
}

impl SampleGeometry {
    /// Create a geometry, rejecting zero channels and bit depths that are
    /// not a whole number of bytes
    pub fn new(channels: u16, bits_per_sample: u16) -> Option<Self> {
        if channels == 0 || bits_per_sample == 0 || bits_per_sample % 8 != 0 {
            return None;
        }
        Some(Self {
            channels,
            bits_per_sample,
        })
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.bits_per_sample
    }

    pub fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample / 8) as usize
    }

    /// Bytes per sample chunk: `channels * bytes_per_sample`
    pub fn chunk_size(&self) -> usize {
        self.channels as usize * self.bytes_per_sample()
    }

    /// Round `size` down to a whole number of sample chunks
    pub fn truncated_size(&self, size: usize) -> usize {
        size - size % self.chunk_size()
    }

    /// Convert a byte offset to a sample offset
    ///
    /// `bytes` must be chunk-aligned; a trailing partial chunk is dropped.
    pub fn bytes_to_samples(&self, bytes: u64) -> u64 {
        debug_assert!(
            bytes % self.chunk_size() as u64 == 0,
            "byte offset {} is not aligned to {}",
            bytes,
            self.chunk_size()
        );
        bytes / self.chunk_size() as u64
    }

    pub fn samples_to_bytes(&self, samples: u64) -> u64 {
        samples * self.chunk_size() as u64
    }

    pub fn is_aligned(&self, bytes: u64) -> bool {
        bytes % self.chunk_size() as u64 == 0
    }
}

impl fmt::Display for SampleGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ch/{}bit", self.channels, self.bits_per_sample)
    }
}
