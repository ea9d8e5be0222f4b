//! Interaction loop: everything that may block.
//!
//! Receives extracted segments and turn lifecycle messages from the capture
//! side over a channel and runs, per turn:
//!
//! ```text
//! SegmentAudio → WAV hand-off → Transcriber → NewTranscription event
//!     → LanguageModel stream → ResponseAssembler → PlaybackQueue
//!     → (once confirmed) flush, promote history, apply decision
//! ```
//!
//! The loop polls the tracker before every network call. It never aborts a
//! call in flight; results of a turn that went false meanwhile are dropped.

use std::fs;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use tracing::{debug, info, info_span, warn};

use super::{StatusHandle, TurnConfig};
use crate::assembler::decision::{parse_decision, Decision};
use crate::assembler::{AssemblyStatus, ResponseAssembler};
use crate::buffering::SegmentAudio;
use crate::conversation::{Conversation, ConversationMessage};
use crate::events::{bus::EventBus, EngineStatus, SpeechEvent};
use crate::mode::Mode;
use crate::playback::{FlushReport, PlaybackQueue};
use crate::services::{LanguageModel, SpeechSynthesizer, Transcriber};
use crate::speech::tracker::{PipelineId, PipelineTracker};

/// Messages from the capture side and the engine.
#[derive(Debug)]
pub enum TurnMessage {
    /// Audio of a finished utterance, ready for STT.
    Segment {
        pipeline: PipelineId,
        audio: SegmentAudio,
    },
    /// The speech end was confirmed.
    Ended { pipeline: Option<PipelineId> },
    /// Speech resumed before the end was confirmed.
    FalseEnd { pipeline: Option<PipelineId> },
    /// The turn was cancelled from outside.
    Aborted { pipeline: PipelineId },
    Shutdown,
}

/// External services the interaction loop calls.
#[derive(Clone)]
pub struct Collaborators {
    pub transcriber: Arc<dyn Transcriber>,
    pub model: Arc<dyn LanguageModel>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// A reply that finished streaming before its turn was confirmed.
#[derive(Debug)]
struct AwaitingTurn {
    pipeline: PipelineId,
    raw: String,
}

pub struct Interaction {
    config: TurnConfig,
    services: Collaborators,
    tracker: Arc<PipelineTracker>,
    bus: Arc<EventBus>,
    playback: Arc<PlaybackQueue>,
    status: StatusHandle,
    conversation: Conversation,
    mode: Mode,
    awaiting: Option<AwaitingTurn>,
    history: Option<Arc<Mutex<Vec<ConversationMessage>>>>,
}

impl Interaction {
    pub fn new(
        config: TurnConfig,
        services: Collaborators,
        tracker: Arc<PipelineTracker>,
        bus: Arc<EventBus>,
        playback: Arc<PlaybackQueue>,
        status: StatusHandle,
    ) -> Self {
        Self {
            config,
            services,
            tracker,
            bus,
            playback,
            status,
            conversation: Conversation::new(),
            mode: Mode::default(),
            awaiting: None,
            history: None,
        }
    }

    /// Mirror the committed history into `history` after every change.
    pub fn with_history(mut self, history: Arc<Mutex<Vec<ConversationMessage>>>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    /// Enter the initial mode, then handle messages until `Shutdown` or
    /// until every sender is gone.
    pub fn run(mut self, rx: Receiver<TurnMessage>) {
        info!("interaction loop started");
        let initial = Mode::from_name(&self.config.initial_mode, "").unwrap_or_default();
        let greet = self.config.greet_on_start;
        self.enter_mode(initial, greet);

        for message in rx.iter() {
            if !self.handle(message) {
                break;
            }
        }
        info!(
            committed = self.conversation.committed().len(),
            "interaction loop stopped"
        );
    }

    /// Handle one message. Returns `false` on shutdown.
    pub fn handle(&mut self, message: TurnMessage) -> bool {
        match message {
            TurnMessage::Segment { pipeline, audio } => {
                let span = info_span!("turn", pipeline = %pipeline);
                let _enter = span.enter();
                self.on_segment(pipeline, audio);
            }
            TurnMessage::Ended { pipeline } => self.on_ended(pipeline),
            TurnMessage::FalseEnd {
                pipeline: Some(pipeline),
            }
            | TurnMessage::Aborted { pipeline } => {
                debug!(pipeline = %pipeline, "turn withdrawn");
                self.playback.clear();
                if self.awaiting.as_ref().is_some_and(|a| a.pipeline == pipeline) {
                    self.abandon(pipeline);
                }
            }
            // A false end after confirmation leaves the turn alone.
            TurnMessage::FalseEnd { pipeline: None } => {}
            TurnMessage::Shutdown => return false,
        }
        true
    }

    fn on_segment(&mut self, pipeline: PipelineId, audio: SegmentAudio) {
        if let Some(stale) = self.awaiting.take() {
            debug!(pipeline = %stale.pipeline, "superseded before confirmation");
            self.conversation.discard();
        }
        if !self.tracker.is_valid_for(pipeline) {
            debug!("turn invalidated before transcription");
            self.tracker.finish_processing(pipeline);
            return;
        }

        let Some(text) = self.transcribe(&audio) else {
            self.tracker.finish_processing(pipeline);
            return;
        };
        info!(chars = text.len(), "transcribed");
        self.bus.emit(SpeechEvent::NewTranscription {
            pipeline,
            text: text.clone(),
        });

        if !self.tracker.is_valid_for(pipeline) {
            debug!("turn invalidated before completion request");
            self.tracker.finish_processing(pipeline);
            return;
        }

        let messages = self.conversation.begin_tentative(text);
        let schema = self.mode.response_schema();
        let stream = match self.services.model.stream_chat(&messages, &schema) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "completion request failed");
                self.abandon(pipeline);
                return;
            }
        };

        let outcome = ResponseAssembler::new(
            pipeline,
            &self.tracker,
            self.services.synthesizer.as_ref(),
            &self.playback,
        )
        .run(stream);

        match outcome.status {
            AssemblyStatus::Completed => {
                if !outcome.spoken.is_empty() {
                    self.conversation.push_assistant(outcome.spoken.clone());
                }
                if self.tracker.is_confirmed(pipeline) {
                    self.finalize(pipeline, &outcome.raw);
                } else if self.tracker.is_valid_for(pipeline) {
                    debug!("reply ready, waiting for the speech end to be confirmed");
                    self.awaiting = Some(AwaitingTurn {
                        pipeline,
                        raw: outcome.raw,
                    });
                } else {
                    self.abandon(pipeline);
                }
            }
            AssemblyStatus::Abandoned => {
                debug!(sentences = outcome.dispatched.len(), "reply abandoned");
                self.abandon(pipeline);
            }
            AssemblyStatus::Failed(_) => self.abandon(pipeline),
        }
    }

    fn transcribe(&self, audio: &SegmentAudio) -> Option<String> {
        let wav = match audio.to_wav_bytes(self.config.sample_rate, self.config.channels) {
            Ok(wav) => wav,
            Err(e) => {
                warn!(error = %e, "could not encode segment");
                return None;
            }
        };

        if let Some(path) = self.config.handoff_path() {
            let written = path
                .parent()
                .map_or(Ok(()), fs::create_dir_all)
                .and_then(|()| fs::write(&path, &wav));
            if let Err(e) = written {
                warn!(path = %path.display(), error = %e, "could not write STT hand-off file");
            }
        }

        match self.services.transcriber.transcribe(&wav) {
            Ok(text) if text.trim().is_empty() => {
                debug!("empty transcript");
                None
            }
            Ok(text) => Some(text.trim().to_owned()),
            Err(e) => {
                warn!(error = %e, "transcription failed, turn skipped");
                None
            }
        }
    }

    fn on_ended(&mut self, pipeline: Option<PipelineId>) {
        match (pipeline, self.awaiting.take()) {
            (Some(id), Some(awaiting)) if awaiting.pipeline == id => {
                let span = info_span!("turn", pipeline = %id);
                let _enter = span.enter();
                self.finalize(id, &awaiting.raw);
            }
            (_, awaiting) => {
                self.awaiting = awaiting;
                let report = self.playback.flush(&self.tracker);
                self.report_sink(&report);
            }
        }
    }

    /// Play what is queued, commit the turn and apply its decision.
    fn finalize(&mut self, pipeline: PipelineId, raw: &str) {
        let report = self.playback.flush(&self.tracker);
        self.report_sink(&report);

        let committed = self.conversation.promote();
        debug!(committed, played = report.played, "turn committed");
        self.publish_history();

        match parse_decision(raw) {
            Some(Decision::SwitchMode {
                next_mode,
                activity_description,
            }) => match Mode::from_name(&next_mode, &activity_description) {
                Some(mode) => self.enter_mode(mode, true),
                None => warn!(next_mode, "reply named an unknown mode"),
            },
            Some(Decision::Respond(_)) | None => {}
        }
        self.mode.on_turn_end();
        self.tracker.finish_processing(pipeline);
    }

    fn abandon(&mut self, pipeline: PipelineId) {
        let dropped = self.playback.clear();
        let discarded = self.conversation.discard();
        self.awaiting = None;
        self.tracker.finish_processing(pipeline);
        debug!(pipeline = %pipeline, dropped, discarded, "turn abandoned");
    }

    fn enter_mode(&mut self, mode: Mode, speak: bool) {
        self.mode = mode;
        let (messages, greeting) = self.mode.on_enter();
        self.conversation.start_context(messages);
        self.publish_history();
        info!(mode = self.mode.name(), "mode entered");

        if !speak {
            return;
        }
        let Some(audio) = self.services.synthesizer.synthesize(&greeting.text) else {
            warn!("greeting synthesis failed");
            return;
        };
        debug!(speed = greeting.speed, bytes = audio.len(), "speaking greeting");
        if let Err(e) = self.playback.play_now(&audio) {
            warn!(error = %e, "greeting playback failed");
            self.status.set(EngineStatus::Error, Some(e.to_string()));
        }
    }

    fn publish_history(&self) {
        if let Some(history) = &self.history {
            *history.lock() = self.conversation.committed().to_vec();
        }
    }

    fn report_sink(&self, report: &FlushReport) {
        if let Some(detail) = &report.sink_unavailable {
            self.status.set(EngineStatus::Error, Some(detail.clone()));
        }
    }
}
