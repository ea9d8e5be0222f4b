//! Streaming response assembly.
//!
//! ```text
//! deltas ─► ShapeScanner ─► spoken text ─► split_sentences ─► synthesize ─► PlaybackQueue
//!                │                                                 ▲
//!                └─ other field: nothing spoken          is_valid_for(turn) gate
//! ```
//!
//! The most recent sentence is held back until a later one completes or the
//! spoken field closes, so a sentence is never synthesized from a prefix.
//! Validity is checked before every delta and every dispatch; a turn that
//! has gone false or cancelled abandons the stream without draining it.

pub mod decision;
pub mod scanner;
pub mod sentences;

use tracing::{debug, warn};

use crate::error::CompletionError;
use crate::playback::{PlaybackQueue, QueuedAudio};
use crate::services::SpeechSynthesizer;
use crate::speech::tracker::{PipelineId, PipelineTracker};

use scanner::{ScanState, ShapeScanner};
use sentences::split_sentences;

/// One dispatched sentence. `index` is its position in the reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentenceUnit {
    pub index: usize,
    pub text: String,
}

#[derive(Debug)]
pub enum AssemblyStatus {
    /// The stream ended normally.
    Completed,
    /// The turn stopped being valid mid-stream.
    Abandoned,
    /// The model stream failed.
    Failed(CompletionError),
}

#[derive(Debug)]
pub struct AssemblyOutcome {
    pub status: AssemblyStatus,
    /// Raw reply text received before the stream ended or was abandoned.
    pub raw: String,
    /// Decoded spoken text.
    pub spoken: String,
    pub dispatched: Vec<SentenceUnit>,
}

pub struct ResponseAssembler<'a> {
    pipeline: PipelineId,
    tracker: &'a PipelineTracker,
    synthesizer: &'a dyn SpeechSynthesizer,
    playback: &'a PlaybackQueue,
    scanner: ShapeScanner,
    dispatched: Vec<SentenceUnit>,
}

impl<'a> ResponseAssembler<'a> {
    pub fn new(
        pipeline: PipelineId,
        tracker: &'a PipelineTracker,
        synthesizer: &'a dyn SpeechSynthesizer,
        playback: &'a PlaybackQueue,
    ) -> Self {
        Self {
            pipeline,
            tracker,
            synthesizer,
            playback,
            scanner: ShapeScanner::new(),
            dispatched: Vec::new(),
        }
    }

    /// Consume `deltas` until they end, fail, or the turn is invalidated.
    pub fn run<I>(mut self, deltas: I) -> AssemblyOutcome
    where
        I: IntoIterator<Item = Result<String, CompletionError>>,
    {
        for delta in deltas {
            if !self.tracker.is_valid_for(self.pipeline) {
                return self.finish(AssemblyStatus::Abandoned);
            }
            let text = match delta {
                Ok(text) => text,
                Err(e) => {
                    warn!(pipeline = %self.pipeline, error = %e, "response stream failed");
                    return self.finish(AssemblyStatus::Failed(e));
                }
            };

            let closed = match self.scanner.push(&text) {
                ScanState::InSpokenField => Some(false),
                ScanState::FieldClosed => Some(true),
                ScanState::Unknown | ScanState::OtherField(_) => None,
            };
            if let Some(closed) = closed {
                if !self.dispatch_ready(closed) {
                    return self.finish(AssemblyStatus::Abandoned);
                }
            }
            // The turn may have been confirmed since audio was last queued.
            self.flush_if_confirmed();
        }

        if !self.tracker.is_valid_for(self.pipeline) || !self.dispatch_ready(true) {
            return self.finish(AssemblyStatus::Abandoned);
        }
        self.finish(AssemblyStatus::Completed)
    }

    /// Dispatch every completed, not yet dispatched sentence. With
    /// `include_last` the trailing sentence counts as complete. Returns
    /// `false` if the turn was invalidated.
    fn dispatch_ready(&mut self, include_last: bool) -> bool {
        let sentences = split_sentences(self.scanner.spoken());
        let ready = if include_last {
            sentences.len()
        } else {
            sentences.len().saturating_sub(1)
        };

        for (index, text) in sentences
            .into_iter()
            .enumerate()
            .take(ready)
            .skip(self.dispatched.len())
        {
            if !self.tracker.is_valid_for(self.pipeline) {
                debug!(pipeline = %self.pipeline, index, "turn invalidated, abandoning reply");
                return false;
            }
            self.dispatch(SentenceUnit { index, text });
        }
        true
    }

    fn dispatch(&mut self, sentence: SentenceUnit) {
        match self.synthesizer.synthesize(&sentence.text) {
            Some(audio) => self.playback.enqueue(QueuedAudio {
                pipeline: self.pipeline,
                sentence: sentence.clone(),
                audio,
            }),
            None => warn!(
                pipeline = %self.pipeline,
                index = sentence.index,
                "synthesis failed, sentence will not be spoken"
            ),
        }
        self.dispatched.push(sentence);
        self.flush_if_confirmed();
    }

    fn flush_if_confirmed(&self) {
        if !self.playback.is_empty() && self.tracker.is_confirmed(self.pipeline) {
            self.playback.flush(self.tracker);
        }
    }

    fn finish(self, status: AssemblyStatus) -> AssemblyOutcome {
        let (raw, spoken) = self.scanner.into_parts();
        debug!(
            pipeline = %self.pipeline,
            status = ?status,
            sentences = self.dispatched.len(),
            "reply assembled"
        );
        AssemblyOutcome {
            status,
            raw,
            spoken,
            dispatched: self.dispatched,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;
    use crate::error::SinkError;
    use crate::services::stub::MemorySink;
    use crate::services::AudioSink;
    use crate::speech::tracker::InvalidationReason;

    /// Records every sentence and runs a hook before returning audio.
    struct RecordingSynth<F: Fn(usize) + Send + Sync + 'static> {
        calls: Arc<Mutex<Vec<String>>>,
        on_call: F,
    }

    impl<F: Fn(usize) + Send + Sync + 'static> SpeechSynthesizer for RecordingSynth<F> {
        fn synthesize(&self, sentence: &str) -> Option<Vec<u8>> {
            let n = {
                let mut calls = self.calls.lock();
                calls.push(sentence.to_owned());
                calls.len()
            };
            (self.on_call)(n);
            Some(sentence.as_bytes().to_vec())
        }
    }

    fn queue() -> (PlaybackQueue, Arc<Mutex<Vec<u8>>>) {
        let sink = MemorySink::new();
        let written = sink.written();
        let queue = PlaybackQueue::new(move || -> Result<Box<dyn AudioSink>, SinkError> {
            Ok(Box::new(sink.clone()))
        });
        (queue, written)
    }

    fn deltas(parts: &[&str]) -> Vec<Result<String, CompletionError>> {
        parts.iter().map(|p| Ok((*p).to_owned())).collect()
    }

    #[test]
    fn two_sentences_across_two_deltas() {
        let tracker = PipelineTracker::new();
        let id = tracker.begin(Duration::ZERO).expect("turn");
        let calls = Arc::new(Mutex::new(Vec::new()));
        let synth = RecordingSynth {
            calls: Arc::clone(&calls),
            on_call: |_: usize| {},
        };
        let (playback, _) = queue();

        let outcome = ResponseAssembler::new(id, &tracker, &synth, &playback).run(deltas(&[
            r#"{"outputs":{"assistant_response":"Hi there. "#,
            r#"How are you?"}}"#,
        ]));

        assert!(matches!(outcome.status, AssemblyStatus::Completed));
        assert_eq!(&*calls.lock(), &["Hi there.", "How are you?"]);
        assert_eq!(
            outcome.dispatched,
            vec![
                SentenceUnit {
                    index: 0,
                    text: "Hi there.".into()
                },
                SentenceUnit {
                    index: 1,
                    text: "How are you?".into()
                },
            ]
        );
        // Pending turn: nothing played yet.
        assert_eq!(playback.len(), 2);
    }

    #[test]
    fn last_sentence_waits_for_the_stream() {
        let tracker = PipelineTracker::new();
        let id = tracker.begin(Duration::ZERO).expect("turn");
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&calls);
        let synth = RecordingSynth {
            calls: Arc::clone(&calls),
            on_call: |_: usize| {},
        };
        let (playback, _) = queue();

        let stream = deltas(&[
            r#"{"outputs":{"assistant_response":"One. Tw"#,
            r#"o. Three"#,
        ]);
        let mut stream = stream.into_iter().inspect(move |_| {
            // Before each delta is consumed the trailing sentence is never out.
            let calls = seen.lock();
            assert!(!calls.iter().any(|c| c == "Three"));
        });
        let outcome = ResponseAssembler::new(id, &tracker, &synth, &playback).run(&mut stream);

        assert!(matches!(outcome.status, AssemblyStatus::Completed));
        assert_eq!(&*calls.lock(), &["One.", "Two.", "Three"]);
    }

    #[test]
    fn invalidation_between_dispatches_stops_synthesis() {
        let tracker = Arc::new(PipelineTracker::new());
        let id = tracker.begin(Duration::ZERO).expect("turn");
        let calls = Arc::new(Mutex::new(Vec::new()));
        let t = Arc::clone(&tracker);
        let synth = RecordingSynth {
            calls: Arc::clone(&calls),
            on_call: move |n: usize| {
                if n == 1 {
                    t.invalidate(InvalidationReason::FalseEnd);
                }
            },
        };
        let (playback, written) = queue();

        let outcome = ResponseAssembler::new(id, &tracker, &synth, &playback).run(deltas(&[
            r#"{"outputs":{"assistant_response":"Hi there. How are you? "#,
            r#"Fine."}}"#,
        ]));

        assert!(matches!(outcome.status, AssemblyStatus::Abandoned));
        assert_eq!(&*calls.lock(), &["Hi there."]);
        playback.flush(&tracker);
        assert!(written.lock().is_empty());
    }

    #[test]
    fn confirmed_turn_plays_each_sentence_as_it_is_dispatched() {
        let tracker = PipelineTracker::new();
        let id = tracker.begin(Duration::ZERO).expect("turn");
        tracker.confirm();
        let synth = RecordingSynth {
            calls: Arc::new(Mutex::new(Vec::new())),
            on_call: |_: usize| {},
        };
        let (playback, written) = queue();

        let outcome = ResponseAssembler::new(id, &tracker, &synth, &playback).run(deltas(&[
            r#"{"outputs":{"assistant_response":"Go. Now"#,
            r#"!"}}"#,
        ]));

        assert!(matches!(outcome.status, AssemblyStatus::Completed));
        assert!(playback.is_empty());
        assert_eq!(&*written.lock(), b"Go.Now!");
    }

    #[test]
    fn sentence_queued_while_pending_plays_once_the_turn_is_confirmed() {
        let tracker = Arc::new(PipelineTracker::new());
        let id = tracker.begin(Duration::ZERO).expect("turn");
        let synth = RecordingSynth {
            calls: Arc::new(Mutex::new(Vec::new())),
            on_call: |_: usize| {},
        };
        let (playback, written) = queue();

        let confirmer = Arc::clone(&tracker);
        let sink = Arc::clone(&written);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let before_each = Arc::clone(&seen);
        let stream = deltas(&[
            r#"{"outputs":{"assistant_response":"Hi there. How"#,
            " are",
            " you",
            " doing",
            r#" today?"}}"#,
        ])
        .into_iter()
        .enumerate()
        .map(move |(i, delta)| {
            before_each.lock().push(sink.lock().len());
            if i == 1 {
                confirmer.confirm();
            }
            delta
        });

        let outcome = ResponseAssembler::new(id, &tracker, &synth, &playback).run(stream);

        assert!(matches!(outcome.status, AssemblyStatus::Completed));
        let hi = "Hi there.".len();
        assert_eq!(&*seen.lock(), &[0, 0, hi, hi, hi]);
        assert_eq!(written.lock().len(), hi + "How are you doing today?".len());
    }

    #[test]
    fn mode_switch_reply_speaks_nothing() {
        let tracker = PipelineTracker::new();
        let id = tracker.begin(Duration::ZERO).expect("turn");
        let calls = Arc::new(Mutex::new(Vec::new()));
        let synth = RecordingSynth {
            calls: Arc::clone(&calls),
            on_call: |_: usize| {},
        };
        let (playback, _) = queue();

        let raw = r#"{"outputs":{"next_mode":"perform_activity","activity_description":"taxes"}}"#;
        let outcome = ResponseAssembler::new(id, &tracker, &synth, &playback).run(deltas(&[raw]));

        assert!(matches!(outcome.status, AssemblyStatus::Completed));
        assert!(calls.lock().is_empty());
        assert_eq!(outcome.raw, raw);
    }

    #[test]
    fn stream_error_fails_the_assembly() {
        let tracker = PipelineTracker::new();
        let id = tracker.begin(Duration::ZERO).expect("turn");
        let synth = RecordingSynth {
            calls: Arc::new(Mutex::new(Vec::new())),
            on_call: |_: usize| {},
        };
        let (playback, _) = queue();

        let stream = vec![
            Ok(r#"{"outputs":{"assistant_response":"Hel"#.to_owned()),
            Err(CompletionError("connection reset".into())),
        ];
        let outcome = ResponseAssembler::new(id, &tracker, &synth, &playback).run(stream);
        assert!(matches!(outcome.status, AssemblyStatus::Failed(_)));
        assert_eq!(outcome.spoken, "Hel");
    }

    #[test]
    fn superseded_turn_abandons_before_reading() {
        let tracker = PipelineTracker::new();
        let old = tracker.begin(Duration::ZERO).expect("turn");
        tracker.begin(Duration::from_secs(1));
        let synth = RecordingSynth {
            calls: Arc::new(Mutex::new(Vec::new())),
            on_call: |_: usize| {},
        };
        let (playback, _) = queue();

        let outcome = ResponseAssembler::new(old, &tracker, &synth, &playback)
            .run(deltas(&[r#"{"outputs":{"assistant_response":"Hi."}}"#]));
        assert!(matches!(outcome.status, AssemblyStatus::Abandoned));
        assert!(outcome.raw.is_empty());
    }
}
