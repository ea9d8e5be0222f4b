//! Audio input collaborator.
//!
//! The device layer itself lives outside this crate. The capture loop only
//! needs something that yields fixed-size PCM frames and can report whether
//! it is still alive; `FrameSource` is that seam. [`wav::WavFileSource`] is
//! the in-tree implementation used by the replay binary and tests.
//!
//! # Threading note
//!
//! A source is moved into the capture thread and never shared, so it only
//! needs `Send`.

pub mod wav;

use crate::error::Result;

/// Outcome of one read from a [`FrameSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameRead {
    /// A full frame of interleaved signed 16-bit samples.
    Frame(Vec<i16>),
    /// No frame is available yet; the caller should back off briefly.
    Pending,
    /// The source has no more audio (e.g. end of file). Capture stops.
    Exhausted,
}

/// Contract for anything that produces captured audio frames.
pub trait FrameSource: Send + 'static {
    /// Read the next frame.
    ///
    /// # Errors
    /// Transient device failures. The capture loop logs them and retries on
    /// the next cycle.
    fn read_frame(&mut self) -> Result<FrameRead>;

    /// Whether the underlying stream is still open.
    fn is_active(&self) -> bool;
}
