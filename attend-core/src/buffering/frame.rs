//! Captured PCM frame with its arrival timestamp.

use std::time::Duration;

use super::chunk::AudioChunk;

/// One fixed-size block of interleaved signed 16-bit PCM, stamped with the
/// wall-clock offset (from capture start) at which it arrived.
///
/// Immutable once built: the rolling buffer owns frames after append and
/// extraction hands out clones.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<i16>,
    captured_at: Duration,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, captured_at: Duration) -> Self {
        Self {
            samples,
            captured_at,
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn captured_at(&self) -> Duration {
        self.captured_at
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Normalized mono copy for the VAD. Interleaved channels are averaged.
    pub fn to_chunk(&self, sample_rate: u32, channels: u16) -> AudioChunk {
        if channels <= 1 {
            return AudioChunk::from_pcm(&self.samples, sample_rate);
        }
        let mono: Vec<i16> = self
            .samples
            .chunks(channels as usize)
            .map(|c| (c.iter().map(|&s| s as i32).sum::<i32>() / c.len() as i32) as i16)
            .collect();
        AudioChunk::from_pcm(&mono, sample_rate)
    }
}
