//! Timestamped rolling history of captured audio.
//!
//! Uses `ringbuf::HeapRb<AudioFrame>` with `push_overwrite`, so the oldest
//! frame is evicted once `capacity` frames are held. A single
//! `parking_lot::Mutex` serialises append (capture thread) against segment
//! extraction; extraction holds the lock only while cloning the slice.

pub mod chunk;
pub mod frame;

use std::time::Duration;

use parking_lot::Mutex;
use ringbuf::{
    traits::{Consumer, Observer, RingBuffer},
    HeapRb,
};
use tracing::warn;

use crate::audio::wav;
use crate::error::Result;
use frame::AudioFrame;

struct Frames {
    ring: HeapRb<AudioFrame>,
    last_at: Option<Duration>,
}

/// Bounded, timestamp-ordered audio history.
pub struct RollingAudioBuffer {
    inner: Mutex<Frames>,
    capacity: usize,
}

impl RollingAudioBuffer {
    /// Create a buffer holding at most `capacity` frames (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Frames {
                ring: HeapRb::new(capacity),
                last_at: None,
            }),
            capacity,
        }
    }

    /// Append a frame, evicting the oldest one when full.
    ///
    /// Frames older than the newest held frame are dropped so timestamps stay
    /// non-decreasing. Returns `false` when the frame was dropped.
    pub fn append(&self, frame: AudioFrame) -> bool {
        let mut inner = self.inner.lock();
        if let Some(last) = inner.last_at {
            if frame.captured_at() < last {
                warn!(
                    frame_at = ?frame.captured_at(),
                    last_at = ?last,
                    "dropping out-of-order audio frame"
                );
                return false;
            }
        }
        inner.last_at = Some(frame.captured_at());
        inner.ring.push_overwrite(frame);
        true
    }

    pub fn len(&self) -> usize {
        self.inner.lock().ring.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Clone of the most recent frame.
    pub fn latest(&self) -> Option<AudioFrame> {
        self.inner.lock().ring.iter().last().cloned()
    }

    /// Recover the audio for a speech segment.
    ///
    /// The slice starts `lead_in_frames` before the first frame captured at or
    /// after `start`, and ends with the first frame captured strictly after
    /// `end` (inclusive). If no frame is newer than `end` yet, the slice runs
    /// to the newest frame.
    pub fn extract(&self, start: Duration, end: Duration, lead_in_frames: usize) -> SegmentAudio {
        let inner = self.inner.lock();
        let ring = &inner.ring;
        let len = ring.occupied_len();

        let start_idx = ring
            .iter()
            .position(|f| f.captured_at() >= start)
            .map(|i| i.saturating_sub(lead_in_frames))
            .unwrap_or(0);

        let end_idx = ring
            .iter()
            .enumerate()
            .skip(start_idx)
            .find(|(_, f)| f.captured_at() > end)
            .map(|(i, _)| (i + 1).min(len))
            .unwrap_or(len);

        let frames: Vec<AudioFrame> = ring
            .iter()
            .skip(start_idx)
            .take(end_idx.saturating_sub(start_idx))
            .cloned()
            .collect();
        drop(inner);

        SegmentAudio::from_frames(frames)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.ring.clear();
        inner.last_at = None;
    }
}

/// Audio recovered for one speech segment.
#[derive(Debug, Clone, Default)]
pub struct SegmentAudio {
    /// Concatenated interleaved PCM of every extracted frame.
    pub samples: Vec<i16>,
    pub frame_count: usize,
    pub first_frame_at: Option<Duration>,
    pub last_frame_at: Option<Duration>,
}

impl SegmentAudio {
    fn from_frames(frames: Vec<AudioFrame>) -> Self {
        let first_frame_at = frames.first().map(AudioFrame::captured_at);
        let last_frame_at = frames.last().map(AudioFrame::captured_at);
        let frame_count = frames.len();
        let samples = frames
            .iter()
            .flat_map(|f| f.samples().iter().copied())
            .collect();
        Self {
            samples,
            frame_count,
            first_frame_at,
            last_frame_at,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Encode as a 16-bit PCM WAV file image.
    pub fn to_wav_bytes(&self, sample_rate: u32, channels: u16) -> Result<Vec<u8>> {
        wav::encode_pcm16(&self.samples, sample_rate, channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn frame(at_ms: u64, value: i16) -> AudioFrame {
        AudioFrame::new(vec![value; 4], ms(at_ms))
    }

    fn filled(count: u64, step_ms: u64) -> RollingAudioBuffer {
        let buffer = RollingAudioBuffer::new(64);
        for i in 0..count {
            buffer.append(frame(i * step_ms, i as i16));
        }
        buffer
    }

    #[test]
    fn evicts_oldest_frames_when_full() {
        let buffer = RollingAudioBuffer::new(3);
        for i in 0..5 {
            buffer.append(frame(i * 10, i as i16));
        }
        assert_eq!(buffer.len(), 3);
        let segment = buffer.extract(ms(0), ms(1_000), 0);
        assert_eq!(segment.first_frame_at, Some(ms(20)));
        assert_eq!(segment.last_frame_at, Some(ms(40)));
    }

    #[test]
    fn rejects_out_of_order_frames() {
        let buffer = RollingAudioBuffer::new(8);
        assert!(buffer.append(frame(50, 1)));
        assert!(!buffer.append(frame(40, 2)));
        assert!(buffer.append(frame(50, 3)));
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.latest().map(|f| f.samples()[0]), Some(3));
    }

    #[test]
    fn extraction_backs_off_lead_in_and_keeps_one_tail_frame() {
        // frames at 0, 32, 64, ... 608 ms
        let buffer = filled(20, 32);
        let segment = buffer.extract(ms(320), ms(480), 2);

        // first frame >= 320 is index 10, backed off by two frames
        assert_eq!(segment.first_frame_at, Some(ms(256)));
        // first frame > 480 is 512 ms, included as the tail
        assert_eq!(segment.last_frame_at, Some(ms(512)));
        assert_eq!(segment.frame_count, 9);
        assert_eq!(segment.samples.len(), 9 * 4);
    }

    #[test]
    fn extraction_covers_the_segment_bounds() {
        let buffer = filled(40, 20);
        let (start, end) = (ms(210), ms(530));
        let segment = buffer.extract(start, end, 3);
        assert!(segment.first_frame_at.is_some_and(|t| t <= start));
        assert!(segment.last_frame_at.is_some_and(|t| t > end));
    }

    #[test]
    fn extraction_runs_to_newest_frame_when_end_is_current() {
        let buffer = filled(10, 10);
        let segment = buffer.extract(ms(50), ms(90), 0);
        assert_eq!(segment.first_frame_at, Some(ms(50)));
        assert_eq!(segment.last_frame_at, Some(ms(90)));
    }

    #[test]
    fn extraction_does_not_underflow_at_buffer_start() {
        let buffer = filled(5, 10);
        let segment = buffer.extract(ms(10), ms(20), 10);
        assert_eq!(segment.first_frame_at, Some(ms(0)));
        assert_eq!(segment.last_frame_at, Some(ms(30)));
    }

    #[test]
    fn empty_buffer_extracts_nothing() {
        let buffer = RollingAudioBuffer::new(4);
        let segment = buffer.extract(ms(0), ms(10), 1);
        assert!(segment.is_empty());
        assert_eq!(segment.first_frame_at, None);
    }
}
