//! Ordered playback of synthesized sentence audio.
//!
//! Audio is queued as soon as it is synthesized but only reaches the output
//! sink once its turn is confirmed. The sink is a single shared device: a
//! flush holds the output lock for its whole drain, so a second flush waits
//! for the first to finish instead of interleaving writes.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::assembler::SentenceUnit;
use crate::error::SinkError;
use crate::services::{AudioSink, SinkFactory};
use crate::speech::tracker::{PipelineId, PipelineState, PipelineTracker};

/// Bytes handed to the sink per write call.
const WRITE_CHUNK: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedAudio {
    pub pipeline: PipelineId,
    pub sentence: SentenceUnit,
    pub audio: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub played: usize,
    pub bytes_written: usize,
    /// Entries of superseded, false or cancelled turns, dropped unplayed.
    pub dropped: usize,
    /// Entries left queued because their turn is still pending.
    pub deferred: usize,
    /// Entries lost to a sink failure.
    pub failed: usize,
    /// Set when no sink could be opened.
    pub sink_unavailable: Option<String>,
}

pub struct PlaybackQueue {
    entries: Mutex<VecDeque<QueuedAudio>>,
    output: Mutex<Option<Box<dyn AudioSink>>>,
    factory: Box<dyn SinkFactory>,
}

impl PlaybackQueue {
    pub fn new(factory: impl SinkFactory) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            output: Mutex::new(None),
            factory: Box::new(factory),
        }
    }

    pub fn enqueue(&self, entry: QueuedAudio) {
        debug!(
            pipeline = %entry.pipeline,
            sentence = entry.sentence.index,
            bytes = entry.audio.len(),
            "audio queued"
        );
        self.entries.lock().push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop every unplayed entry. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let n = entries.len();
        entries.clear();
        if n > 0 {
            debug!(dropped = n, "playback queue cleared");
        }
        n
    }

    /// Play queued entries in order while their turn is confirmed.
    ///
    /// Stops at the first entry whose turn is still pending; entries of any
    /// other non-confirmed turn are dropped.
    pub fn flush(&self, tracker: &PipelineTracker) -> FlushReport {
        let mut output = self.output.lock();
        let mut report = FlushReport::default();

        loop {
            let entry = {
                let mut entries = self.entries.lock();
                let Some(front) = entries.front() else {
                    break;
                };
                match tracker.state_of(front.pipeline) {
                    Some(PipelineState::Confirmed) => entries.pop_front(),
                    Some(PipelineState::Pending) => {
                        report.deferred = entries.len();
                        break;
                    }
                    _ => {
                        entries.pop_front();
                        report.dropped += 1;
                        continue;
                    }
                }
            };
            let Some(entry) = entry else {
                break;
            };

            match self.play_locked(&mut output, &entry.audio) {
                Ok(n) => {
                    report.played += 1;
                    report.bytes_written += n;
                }
                Err(e) => {
                    warn!(
                        pipeline = %entry.pipeline,
                        sentence = entry.sentence.index,
                        error = %e,
                        "playback failed, sink will be reopened"
                    );
                    report.failed += 1;
                    if matches!(e, SinkError::Open(_)) {
                        report.sink_unavailable = Some(e.to_string());
                    }
                }
            }
        }

        if report.played > 0 || report.dropped > 0 {
            debug!(
                played = report.played,
                dropped = report.dropped,
                deferred = report.deferred,
                "playback flushed"
            );
        }
        report
    }

    /// Play `audio` immediately, outside the queue, once any running flush
    /// has finished.
    pub fn play_now(&self, audio: &[u8]) -> Result<usize, SinkError> {
        let mut output = self.output.lock();
        self.play_locked(&mut output, audio)
    }

    fn play_locked(
        &self,
        output: &mut Option<Box<dyn AudioSink>>,
        audio: &[u8],
    ) -> Result<usize, SinkError> {
        if output.as_ref().map_or(true, |sink| !sink.is_active()) {
            *output = None;
            *output = Some(self.factory.create()?);
            debug!("output sink opened");
        }
        let Some(sink) = output.as_mut() else {
            return Err(SinkError::Inactive);
        };

        let written = audio
            .chunks(WRITE_CHUNK)
            .try_for_each(|chunk| sink.write(chunk));
        if let Err(e) = written {
            *output = None;
            return Err(e);
        }
        Ok(audio.len())
    }
}

impl std::fmt::Debug for PlaybackQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackQueue")
            .field("queued", &self.entries.lock().len())
            .field("sink_open", &self.output.lock().is_some())
            .finish_non_exhaustive()
    }
}
