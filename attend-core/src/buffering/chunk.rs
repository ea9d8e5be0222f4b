//! Normalized audio chunk handed to the voice activity detector.

/// A contiguous block of f32 samples in [-1.0, 1.0] at a known sample rate.
///
/// Built from an [`AudioFrame`](super::frame::AudioFrame) once per captured
/// frame, on the capture thread.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    /// Sample rate in Hz (e.g. 16000).
    pub sample_rate: u32,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Convert signed 16-bit PCM into normalized floats (divide by 32768).
    pub fn from_pcm(pcm: &[i16], sample_rate: u32) -> Self {
        let samples = pcm.iter().map(|&s| s as f32 / 32768.0).collect();
        Self::new(samples, sample_rate)
    }

    /// Returns the duration of this chunk in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn pcm_is_scaled_into_unit_range() {
        let chunk = AudioChunk::from_pcm(&[i16::MIN, 0, 16384], 16_000);
        assert_relative_eq!(chunk.samples[0], -1.0);
        assert_relative_eq!(chunk.samples[1], 0.0);
        assert_relative_eq!(chunk.samples[2], 0.5);
    }

    #[test]
    fn duration_follows_sample_rate() {
        let chunk = AudioChunk::new(vec![0.0; 8_000], 16_000);
        assert_relative_eq!(chunk.duration_secs(), 0.5);
        assert!(AudioChunk::new(vec![], 0).duration_secs() == 0.0);
    }
}
