//! WAV encoding for the STT hand-off, and a WAV-backed frame source.

use std::io::Cursor;
use std::path::Path;
use std::time::{Duration, Instant};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use tracing::debug;

use super::{FrameRead, FrameSource};
use crate::error::{AttendError, Result};

fn pcm16_spec(sample_rate: u32, channels: u16) -> WavSpec {
    WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Encode interleaved 16-bit PCM into an in-memory WAV image.
pub fn encode_pcm16(samples: &[i16], sample_rate: u32, channels: u16) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, pcm16_spec(sample_rate, channels))?;
        for &s in samples {
            writer.write_sample(s)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Frames read from a WAV file, optionally released at real-time pace.
pub struct WavFileSource {
    samples: Vec<i16>,
    position: usize,
    frame_len: usize,
    sample_rate: u32,
    channels: u16,
    pace: Option<Duration>,
    next_due: Option<Instant>,
}

impl WavFileSource {
    /// Load a 16-bit integer or 32-bit float WAV file.
    ///
    /// `frame_samples` is per channel; each frame carries
    /// `frame_samples * channels` interleaved samples.
    pub fn open(path: &Path, frame_samples: usize) -> Result<Self> {
        let mut reader = WavReader::open(path)?;
        let spec = reader.spec();
        let samples: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Int, 16) => reader
                .samples::<i16>()
                .collect::<std::result::Result<_, _>>()?,
            (SampleFormat::Float, 32) => reader
                .samples::<f32>()
                .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
                .collect::<std::result::Result<_, _>>()?,
            (format, bits) => {
                return Err(AttendError::AudioSource(format!(
                    "unsupported WAV sample format: {format:?} {bits}-bit"
                )))
            }
        };
        debug!(
            path = %path.display(),
            samples = samples.len(),
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            "loaded WAV source"
        );
        Ok(Self::from_samples(
            samples,
            spec.sample_rate,
            spec.channels,
            frame_samples,
        ))
    }

    pub fn from_samples(
        samples: Vec<i16>,
        sample_rate: u32,
        channels: u16,
        frame_samples: usize,
    ) -> Self {
        let channels = channels.max(1);
        Self {
            samples,
            position: 0,
            frame_len: frame_samples.max(1) * channels as usize,
            sample_rate,
            channels,
            pace: None,
            next_due: None,
        }
    }

    /// Release one frame per frame-duration of wall-clock time.
    pub fn paced(mut self) -> Self {
        let per_frame = self.frame_len as f64 / self.channels as f64 / self.sample_rate.max(1) as f64;
        self.pace = Some(Duration::from_secs_f64(per_frame));
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

impl FrameSource for WavFileSource {
    fn read_frame(&mut self) -> Result<FrameRead> {
        if self.position >= self.samples.len() {
            return Ok(FrameRead::Exhausted);
        }
        if let Some(pace) = self.pace {
            let now = Instant::now();
            let due = *self.next_due.get_or_insert(now);
            if now < due {
                return Ok(FrameRead::Pending);
            }
            self.next_due = Some(due + pace);
        }

        let end = (self.position + self.frame_len).min(self.samples.len());
        let mut frame = self.samples[self.position..end].to_vec();
        // Pad the final partial frame so every frame has the same length.
        frame.resize(self.frame_len, 0);
        self.position = end;
        Ok(FrameRead::Frame(frame))
    }

    fn is_active(&self) -> bool {
        self.position < self.samples.len()
    }
}
