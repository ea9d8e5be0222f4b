//! Energy-based VAD using RMS threshold + hangover counter.
//!
//! ## Algorithm
//!
//! 1. Compute RMS of the incoming chunk.
//! 2. Outside speech: RMS ≥ `threshold` → `Start` at the chunk's stream position.
//! 3. Inside speech: RMS ≥ `threshold` re-arms the hangover counter.
//! 4. Inside speech: RMS < `threshold` counts the hangover down; when it is
//!    exhausted → `End` (prevents clipping syllable endings).

use super::{VadDecision, VoiceActivityDetector};
use crate::buffering::chunk::AudioChunk;

/// A simple energy-based voice activity detector.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    /// RMS amplitude threshold. Frames above this are considered speech.
    threshold: f32,
    /// How many consecutive below-threshold frames may pass before an `End`.
    hangover_frames: u32,
    hangover_counter: u32,
    in_speech: bool,
    /// Samples seen since the last reset, for boundary timestamps.
    position: u64,
}

impl EnergyVad {
    /// Create a new `EnergyVad`.
    ///
    /// # Parameters
    /// - `threshold`: RMS level above which a frame is considered speech.
    ///   Default: `0.02`.
    /// - `hangover_frames`: silent frames tolerated before speech ends.
    ///   Default: `8` (≈ 256 ms at a 32 ms frame).
    pub fn new(threshold: f32, hangover_frames: u32) -> Self {
        Self {
            threshold,
            hangover_frames,
            hangover_counter: 0,
            in_speech: false,
            position: 0,
        }
    }

    fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
        (sum_sq / samples.len() as f32).sqrt()
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(0.02, 8)
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn classify(&mut self, chunk: &AudioChunk) -> VadDecision {
        let at = if chunk.sample_rate == 0 {
            0.0
        } else {
            self.position as f64 / chunk.sample_rate as f64
        };
        self.position += chunk.samples.len() as u64;

        let loud = Self::rms(&chunk.samples) >= self.threshold;
        match (self.in_speech, loud) {
            (false, true) => {
                self.in_speech = true;
                self.hangover_counter = self.hangover_frames;
                VadDecision::Start { at }
            }
            (true, true) => {
                self.hangover_counter = self.hangover_frames;
                VadDecision::NoChange
            }
            (true, false) if self.hangover_counter > 0 => {
                self.hangover_counter -= 1;
                VadDecision::NoChange
            }
            (true, false) => {
                self.in_speech = false;
                VadDecision::End { at }
            }
            (false, false) => VadDecision::NoChange,
        }
    }

    fn reset(&mut self) {
        self.hangover_counter = 0;
        self.in_speech = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn silent_chunk(len: usize) -> AudioChunk {
        AudioChunk::new(vec![0.0f32; len], 16000)
    }

    fn loud_chunk(amplitude: f32, len: usize) -> AudioChunk {
        AudioChunk::new(vec![amplitude; len], 16000)
    }

    #[test]
    fn silence_produces_no_boundary() {
        let mut vad = EnergyVad::new(0.02, 0);
        assert_eq!(vad.classify(&silent_chunk(160)), VadDecision::NoChange);
    }

    #[test]
    fn rising_edge_is_a_start_at_stream_position() {
        let mut vad = EnergyVad::new(0.02, 0);
        vad.classify(&silent_chunk(8000));
        match vad.classify(&loud_chunk(0.5, 160)) {
            VadDecision::Start { at } => assert_relative_eq!(at, 0.5),
            other => panic!("expected start, got {other:?}"),
        }
        assert_eq!(vad.classify(&loud_chunk(0.5, 160)), VadDecision::NoChange);
    }

    #[test]
    fn hangover_delays_the_end() {
        let mut vad = EnergyVad::new(0.02, 3);

        assert!(vad.classify(&loud_chunk(0.5, 160)).has_start());

        // Next 3 silent frames are still inside the hangover window
        for _ in 0..3 {
            assert_eq!(vad.classify(&silent_chunk(160)), VadDecision::NoChange);
        }

        // 4th silent frame: hangover exhausted → End
        assert!(vad.classify(&silent_chunk(160)).has_end());
        assert_eq!(vad.classify(&silent_chunk(160)), VadDecision::NoChange);
    }

    #[test]
    fn reset_leaves_speech_without_an_end() {
        let mut vad = EnergyVad::new(0.02, 5);
        vad.classify(&loud_chunk(0.5, 160));
        vad.reset();
        assert_eq!(vad.classify(&silent_chunk(160)), VadDecision::NoChange);
        assert!(vad.classify(&loud_chunk(0.5, 160)).has_start());
    }

    #[test]
    fn empty_chunk_is_silence() {
        let mut vad = EnergyVad::default();
        let chunk = AudioChunk::new(vec![], 16000);
        assert_eq!(vad.classify(&chunk), VadDecision::NoChange);
    }

    #[test]
    fn rms_of_square_wave() {
        let samples: Vec<f32> = (0..256)
            .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        assert_relative_eq!(EnergyVad::rms(&samples), 0.5, epsilon = 1e-5);
    }
}
