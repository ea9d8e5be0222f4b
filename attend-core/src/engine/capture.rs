//! Blocking capture loop.
//!
//! ## Per-frame stages
//!
//! ```text
//! 1. Read one frame from the FrameSource (back off on Pending / errors)
//! 2. Stamp it with its arrival offset and append it to the RollingAudioBuffer
//! 3. If a finished segment is waiting for its tail frame, extract it and
//!    hand it to the interaction loop
//! 4. VAD classify → SpeechStateMachine::advance
//! 5. Apply the transition to the PipelineTracker, then emit the SpeechEvent
//! ```
//!
//! Nothing here blocks on the network or the output device: extraction copies
//! a slice under the buffer lock and everything slower is sent over a channel.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use tracing::{debug, info, warn};

use super::interaction::TurnMessage;
use super::TurnConfig;
use crate::audio::{FrameRead, FrameSource};
use crate::buffering::{frame::AudioFrame, RollingAudioBuffer};
use crate::events::{bus::EventBus, SpeechEvent};
use crate::speech::tracker::{PipelineId, PipelineTracker};
use crate::speech::{SpeechSegment, SpeechStateMachine, Transition};
use crate::vad::VoiceActivityDetector;

#[derive(Debug, Default)]
pub struct CaptureDiagnostics {
    pub frames_in: AtomicUsize,
    pub vad_starts: AtomicUsize,
    pub false_starts: AtomicUsize,
    pub false_ends: AtomicUsize,
    pub turns_confirmed: AtomicUsize,
    pub segments_extracted: AtomicUsize,
    pub source_errors: AtomicUsize,
}

impl CaptureDiagnostics {
    pub fn reset(&self) {
        for counter in self.counters() {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            vad_starts: self.vad_starts.load(Ordering::Relaxed),
            false_starts: self.false_starts.load(Ordering::Relaxed),
            false_ends: self.false_ends.load(Ordering::Relaxed),
            turns_confirmed: self.turns_confirmed.load(Ordering::Relaxed),
            segments_extracted: self.segments_extracted.load(Ordering::Relaxed),
            source_errors: self.source_errors.load(Ordering::Relaxed),
        }
    }

    fn counters(&self) -> [&AtomicUsize; 7] {
        [
            &self.frames_in,
            &self.vad_starts,
            &self.false_starts,
            &self.false_ends,
            &self.turns_confirmed,
            &self.segments_extracted,
            &self.source_errors,
        ]
    }

    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub frames_in: usize,
    pub vad_starts: usize,
    pub false_starts: usize,
    pub false_ends: usize,
    pub turns_confirmed: usize,
    pub segments_extracted: usize,
    pub source_errors: usize,
}

/// Everything the capture loop needs, passed as one struct so the thread
/// closure stays tidy.
pub struct CaptureContext {
    pub config: TurnConfig,
    pub vad: Box<dyn VoiceActivityDetector>,
    pub buffer: Arc<RollingAudioBuffer>,
    pub tracker: Arc<PipelineTracker>,
    pub bus: Arc<EventBus>,
    pub turns: Sender<TurnMessage>,
    pub running: Arc<AtomicBool>,
    pub diagnostics: Arc<CaptureDiagnostics>,
}

/// A finished segment waiting for the first frame past its end.
#[derive(Debug, Clone, Copy)]
struct PendingSegment {
    pipeline: PipelineId,
    segment: SpeechSegment,
}

pub struct CaptureLoop {
    ctx: CaptureContext,
    machine: SpeechStateMachine,
    pending: Option<PendingSegment>,
    lead_in_frames: usize,
}

/// Idle back-off when the source has nothing ready.
const DEFAULT_SLEEP_EMPTY_MS: u64 = 5;

fn empty_sleep_ms() -> u64 {
    static EMPTY_SLEEP_MS: OnceLock<u64> = OnceLock::new();
    *EMPTY_SLEEP_MS.get_or_init(|| {
        std::env::var("ATTEND_CAPTURE_EMPTY_SLEEP_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(|v| v.clamp(1, 20))
            .unwrap_or(DEFAULT_SLEEP_EMPTY_MS)
    })
}

impl CaptureLoop {
    pub fn new(ctx: CaptureContext) -> Self {
        let machine = SpeechStateMachine::new(ctx.config.thresholds());
        let lead_in_frames = ctx.config.lead_in_frames();
        Self {
            ctx,
            machine,
            pending: None,
            lead_in_frames,
        }
    }

    /// Read frames from `source` until it is exhausted or `running` clears.
    pub fn run(mut self, mut source: Box<dyn FrameSource>) {
        info!(
            sample_rate = self.ctx.config.sample_rate,
            frame_samples = self.ctx.config.frame_samples,
            "capture started"
        );
        let started = Instant::now();

        while self.ctx.running.load(Ordering::Relaxed) {
            match source.read_frame() {
                Ok(FrameRead::Frame(samples)) => {
                    self.process_frame(samples, started.elapsed());
                }
                Ok(FrameRead::Pending) => {
                    std::thread::sleep(Duration::from_millis(empty_sleep_ms()));
                }
                Ok(FrameRead::Exhausted) => {
                    info!("audio source exhausted");
                    break;
                }
                Err(e) => {
                    CaptureDiagnostics::bump(&self.ctx.diagnostics.source_errors);
                    warn!(error = %e, active = source.is_active(), "audio source read failed");
                    std::thread::sleep(Duration::from_millis(empty_sleep_ms()));
                }
            }
        }

        let snap = self.ctx.diagnostics.snapshot();
        info!(
            frames_in = snap.frames_in,
            vad_starts = snap.vad_starts,
            false_starts = snap.false_starts,
            false_ends = snap.false_ends,
            turns_confirmed = snap.turns_confirmed,
            segments_extracted = snap.segments_extracted,
            source_errors = snap.source_errors,
            "capture stopped, diagnostics"
        );
    }

    /// Run one frame through buffer, extraction and the state machine.
    pub fn process_frame(&mut self, samples: Vec<i16>, now: Duration) {
        CaptureDiagnostics::bump(&self.ctx.diagnostics.frames_in);

        let frame = AudioFrame::new(samples, now);
        let chunk = frame.to_chunk(self.ctx.config.sample_rate, self.ctx.config.channels);
        if !self.ctx.buffer.append(frame) {
            return;
        }

        self.extract_if_ready(now);

        let decision = self.ctx.vad.classify(&chunk);
        if let Some(transition) = self.machine.advance(decision, now) {
            self.apply(transition, now);
        }
    }

    pub fn machine(&self) -> &SpeechStateMachine {
        &self.machine
    }

    fn apply(&mut self, transition: Transition, now: Duration) {
        let pipeline = self.ctx.tracker.apply(&transition, now);
        let diagnostics = Arc::clone(&self.ctx.diagnostics);

        let event = match transition {
            Transition::StartPotential => {
                CaptureDiagnostics::bump(&diagnostics.vad_starts);
                SpeechEvent::SpeechStartPotential
            }
            Transition::Started => SpeechEvent::SpeechStarted,
            Transition::EndPotential { segment } => {
                match pipeline {
                    Some(id) => {
                        self.pending = Some(PendingSegment {
                            pipeline: id,
                            segment,
                        })
                    }
                    None => debug!("confirmed turn still processing, utterance dropped"),
                }
                SpeechEvent::SpeechEndPotential { pipeline }
            }
            Transition::Ended => {
                if pipeline.is_some() {
                    CaptureDiagnostics::bump(&diagnostics.turns_confirmed);
                }
                self.ctx.vad.reset();
                SpeechEvent::SpeechEnded { pipeline }
            }
            Transition::FalseStart => {
                CaptureDiagnostics::bump(&diagnostics.false_starts);
                SpeechEvent::FalseStart
            }
            Transition::FalseEnd => {
                CaptureDiagnostics::bump(&diagnostics.false_ends);
                self.pending = None;
                SpeechEvent::FalseEnd { pipeline }
            }
        };

        debug!(?event, "speech transition");
        self.ctx.bus.emit(event);
    }

    fn extract_if_ready(&mut self, now: Duration) {
        let Some(pending) = self.pending else {
            return;
        };
        let Some(end) = pending.segment.end else {
            self.pending = None;
            return;
        };
        if now <= end {
            return;
        }
        self.pending = None;

        if !self.ctx.tracker.is_valid_for(pending.pipeline) {
            debug!(pipeline = %pending.pipeline, "turn invalidated before extraction");
            return;
        }

        let audio = self
            .ctx
            .buffer
            .extract(pending.segment.start, end, self.lead_in_frames);
        if audio.is_empty() {
            warn!(pipeline = %pending.pipeline, "segment extraction returned no audio");
            return;
        }

        CaptureDiagnostics::bump(&self.ctx.diagnostics.segments_extracted);
        self.ctx.tracker.mark_processing(pending.pipeline);
        debug!(
            pipeline = %pending.pipeline,
            frames = audio.frame_count,
            "segment extracted"
        );
        if self
            .ctx
            .turns
            .send(TurnMessage::Segment {
                pipeline: pending.pipeline,
                audio,
            })
            .is_err()
        {
            warn!("interaction loop gone, segment discarded");
            self.ctx.tracker.finish_processing(pending.pipeline);
        }
    }
}
