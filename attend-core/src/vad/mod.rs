//! Voice Activity Detection (VAD) abstraction.
//!
//! The acoustic model is supplied from outside; the capture loop only sees
//! boundary classifications. `EnergyVad` is a dependency-free reference
//! detector so the pipeline can run end to end without a neural model.

pub mod energy;

use crate::buffering::chunk::AudioChunk;

/// Speech boundaries observed in one frame.
///
/// Times are stream positions in seconds as reported by the detector. The
/// speech state machine does not use them for timing; it measures elapsed
/// time on frame arrival.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VadDecision {
    /// No boundary in this frame.
    NoChange,
    /// Speech began.
    Start { at: f64 },
    /// Speech stopped.
    End { at: f64 },
    /// A blip: speech began and stopped within the same frame.
    StartEnd { start: f64, end: f64 },
}

impl VadDecision {
    pub fn has_start(self) -> bool {
        matches!(self, Self::Start { .. } | Self::StartEnd { .. })
    }

    pub fn has_end(self) -> bool {
        matches!(self, Self::End { .. } | Self::StartEnd { .. })
    }
}

/// Trait for all VAD implementations.
///
/// Implementors may be stateful (hangover counters, RNN hidden states, etc.).
pub trait VoiceActivityDetector: Send + 'static {
    /// Classify one normalized frame.
    fn classify(&mut self, chunk: &AudioChunk) -> VadDecision;

    /// Reset any internal state. Called after each confirmed speech end.
    fn reset(&mut self);
}
