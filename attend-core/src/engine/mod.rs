//! `TurnEngine`: top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! TurnEngine::new(config, services, sink)   status = Idle
//!     └─► start(source, vad)  → capture + interaction threads, status = Listening
//!         ├─► abort_turn()    → current turn cancelled, queued audio dropped
//!         └─► stop()          → running=false, Shutdown sent, status = Stopped
//!             └─► join()      → both threads finished
//! ```
//!
//! `start()`/`stop()` return an error in the wrong state rather than panicking.
//! When the frame source runs dry the capture thread shuts the interaction
//! loop down behind any turn still queued, so `join()` returns once the last
//! turn is handled.
//!
//! ## Threading
//!
//! ```text
//! capture thread:      FrameSource → buffer → VAD → state machine → tracker → EventBus
//!                                            │ Segment                       │ Ended / FalseEnd
//!                                            ▼                               ▼
//! interaction thread:  crossbeam channel ◄───────────────────────────────────┘
//!                      STT → LLM stream → ResponseAssembler → PlaybackQueue
//! ```
//!
//! The capture thread never blocks on a collaborator.

pub mod capture;
pub mod config;
pub mod interaction;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{info, warn};

pub use config::TurnConfig;

use crate::{
    audio::FrameSource,
    buffering::RollingAudioBuffer,
    conversation::ConversationMessage,
    error::{AttendError, Result},
    events::{
        bus::{EventBus, HandlerId},
        EngineStatus, EngineStatusEvent, EventEnvelope, SpeechEvent, SpeechEventKind,
    },
    playback::PlaybackQueue,
    services::SinkFactory,
    speech::tracker::{InvalidationReason, PipelineId, PipelineTracker},
    vad::VoiceActivityDetector,
};
use capture::{CaptureContext, CaptureDiagnostics, CaptureLoop, DiagnosticsSnapshot};
use interaction::{Collaborators, Interaction, TurnMessage};

/// Broadcast channel capacity: 256 status events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// Shared engine status plus its broadcast channel.
#[derive(Clone)]
pub struct StatusHandle {
    current: Arc<Mutex<EngineStatus>>,
    tx: broadcast::Sender<EngineStatusEvent>,
}

impl StatusHandle {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            current: Arc::new(Mutex::new(EngineStatus::Idle)),
            tx,
        }
    }

    pub fn get(&self) -> EngineStatus {
        *self.current.lock()
    }

    pub fn set(&self, status: EngineStatus, detail: Option<String>) {
        *self.current.lock() = status;
        let _ = self.tx.send(EngineStatusEvent { status, detail });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.tx.subscribe()
    }
}

impl Default for StatusHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// State that only exists while the loops run.
struct Session {
    turns: Sender<TurnMessage>,
    handlers: Vec<HandlerId>,
}

/// The top-level engine handle.
///
/// `TurnEngine` is `Send + Sync`; all fields use interior mutability.
pub struct TurnEngine {
    config: TurnConfig,
    services: Collaborators,
    tracker: Arc<PipelineTracker>,
    bus: Arc<EventBus>,
    playback: Arc<PlaybackQueue>,
    /// `true` while the capture loop is active.
    running: Arc<AtomicBool>,
    status: StatusHandle,
    diagnostics: Arc<CaptureDiagnostics>,
    history: Arc<Mutex<Vec<ConversationMessage>>>,
    session: Mutex<Option<Session>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl TurnEngine {
    /// Create an idle engine. Nothing runs until `start()`.
    ///
    /// # Errors
    /// `InvalidConfig` when `config` cannot be used even after clamping.
    pub fn new(config: TurnConfig, services: Collaborators, sink: impl SinkFactory) -> Result<Self> {
        let config = config.normalize();
        config.validate()?;
        Ok(Self {
            config,
            services,
            tracker: Arc::new(PipelineTracker::new()),
            bus: Arc::new(EventBus::new()),
            playback: Arc::new(PlaybackQueue::new(sink)),
            running: Arc::new(AtomicBool::new(false)),
            status: StatusHandle::new(),
            diagnostics: Arc::new(CaptureDiagnostics::default()),
            history: Arc::new(Mutex::new(Vec::new())),
            session: Mutex::new(None),
            threads: Mutex::new(Vec::new()),
        })
    }

    /// Start capture from `source` with `vad` and spawn the interaction loop.
    ///
    /// # Errors
    /// - `AlreadyRunning` if started twice.
    /// - `Io` if a thread cannot be spawned.
    pub fn start(
        &self,
        source: Box<dyn FrameSource>,
        vad: Box<dyn VoiceActivityDetector>,
    ) -> Result<()> {
        let mut session = self.session.lock();
        if self.running.load(Ordering::SeqCst) {
            return Err(AttendError::AlreadyRunning);
        }
        if let Some(stale) = session.take() {
            self.detach(&stale.handlers);
        }
        self.join_finished();

        self.diagnostics.reset();
        self.running.store(true, Ordering::SeqCst);
        self.status.set(EngineStatus::Listening, None);

        let (turns_tx, turns_rx) = crossbeam_channel::unbounded();
        let handlers = self.forward_lifecycle(&turns_tx);

        let interaction = Interaction::new(
            self.config.clone(),
            self.services.clone(),
            Arc::clone(&self.tracker),
            Arc::clone(&self.bus),
            Arc::clone(&self.playback),
            self.status.clone(),
        )
        .with_history(Arc::clone(&self.history));

        let spawned = thread::Builder::new()
            .name("attend-interaction".into())
            .spawn(move || interaction.run(turns_rx));
        let interaction_thread = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.abandon_start(&handlers, &e);
                return Err(e.into());
            }
        };

        let ctx = CaptureContext {
            buffer: Arc::new(RollingAudioBuffer::new(self.config.buffer_capacity_frames())),
            config: self.config.clone(),
            vad,
            tracker: Arc::clone(&self.tracker),
            bus: Arc::clone(&self.bus),
            turns: turns_tx.clone(),
            running: Arc::clone(&self.running),
            diagnostics: Arc::clone(&self.diagnostics),
        };
        let running = Arc::clone(&self.running);
        let status = self.status.clone();
        let shutdown = turns_tx.clone();
        let spawned = thread::Builder::new()
            .name("attend-capture".into())
            .spawn(move || {
                CaptureLoop::new(ctx).run(source);
                if running.swap(false, Ordering::SeqCst) {
                    let _ = shutdown.send(TurnMessage::Shutdown);
                    status.set(EngineStatus::Stopped, Some("audio source exhausted".into()));
                }
            });
        let capture_thread = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                let _ = turns_tx.send(TurnMessage::Shutdown);
                self.abandon_start(&handlers, &e);
                return Err(e.into());
            }
        };

        self.threads.lock().extend([capture_thread, interaction_thread]);
        *session = Some(Session {
            turns: turns_tx,
            handlers,
        });
        info!("engine started, listening");
        Ok(())
    }

    /// Stop capture and shut the interaction loop down after the message it
    /// is handling. Does not wait; see [`join`](Self::join).
    ///
    /// # Errors
    /// `NotRunning` if not started.
    pub fn stop(&self) -> Result<()> {
        let Some(session) = self.session.lock().take() else {
            return Err(AttendError::NotRunning);
        };

        let was_running = self.running.swap(false, Ordering::SeqCst);
        self.detach(&session.handlers);
        let _ = session.turns.send(TurnMessage::Shutdown);
        if was_running {
            self.status.set(EngineStatus::Stopped, None);
        }
        info!("engine stop requested");
        Ok(())
    }

    /// Block until both loops have exited.
    ///
    /// With a live source this only returns after `stop()` from another
    /// thread; a finite source ends the loops on its own.
    pub fn join(&self) -> Result<()> {
        let threads: Vec<_> = self.threads.lock().drain(..).collect();
        let mut panicked = false;
        for handle in threads {
            panicked |= handle.join().is_err();
        }
        if let Some(session) = self.session.lock().take() {
            self.detach(&session.handlers);
        }
        if panicked {
            self.status.set(EngineStatus::Error, Some("engine thread panicked".into()));
            return Err(AttendError::Other(anyhow::anyhow!("engine thread panicked")));
        }
        Ok(())
    }

    /// Cancel the current turn: nothing more of it is transcribed, generated
    /// or played, and it is never committed to the conversation.
    ///
    /// Returns the cancelled turn, or `None` if there was nothing to cancel.
    pub fn abort_turn(&self) -> Option<PipelineId> {
        let id = self.tracker.invalidate(InvalidationReason::Aborted)?;
        let dropped = self.playback.clear();
        if let Some(session) = self.session.lock().as_ref() {
            let _ = session.turns.send(TurnMessage::Aborted { pipeline: id });
        }
        info!(pipeline = %id, dropped, "turn aborted");
        Some(id)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current engine status (snapshot).
    pub fn status(&self) -> EngineStatus {
        self.status.get()
    }

    /// Subscribe to status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.status.subscribe()
    }

    /// Subscribe to every speech event, numbered in emission order.
    pub fn subscribe_events(&self) -> broadcast::Receiver<EventEnvelope> {
        self.bus.subscribe()
    }

    /// The event bus, for registering synchronous handlers.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn tracker(&self) -> &Arc<PipelineTracker> {
        &self.tracker
    }

    pub fn config(&self) -> &TurnConfig {
        &self.config
    }

    /// Committed conversation history as of the last finished turn.
    pub fn conversation(&self) -> Vec<ConversationMessage> {
        self.history.lock().clone()
    }

    /// Snapshot of capture counters for observability.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    /// Relay end confirmations and false ends to the interaction loop.
    fn forward_lifecycle(&self, turns: &Sender<TurnMessage>) -> Vec<HandlerId> {
        let ended = turns.clone();
        let on_ended = self.bus.on(SpeechEventKind::SpeechEnded, move |event| {
            if let SpeechEvent::SpeechEnded { pipeline } = event {
                let _ = ended.send(TurnMessage::Ended { pipeline: *pipeline });
            }
        });
        let false_end = turns.clone();
        let on_false_end = self.bus.on(SpeechEventKind::FalseEnd, move |event| {
            if let SpeechEvent::FalseEnd { pipeline } = event {
                let _ = false_end.send(TurnMessage::FalseEnd { pipeline: *pipeline });
            }
        });
        vec![on_ended, on_false_end]
    }

    fn detach(&self, handlers: &[HandlerId]) {
        for id in handlers {
            self.bus.off(*id);
        }
    }

    fn abandon_start(&self, handlers: &[HandlerId], error: &std::io::Error) {
        warn!(error = %error, "could not spawn engine thread");
        self.running.store(false, Ordering::SeqCst);
        self.detach(handlers);
        self.status.set(EngineStatus::Error, Some(error.to_string()));
    }

    /// Reap threads left over from a previous run that has already ended.
    fn join_finished(&self) {
        let mut threads = self.threads.lock();
        let (done, live): (Vec<_>, Vec<_>) = threads.drain(..).partition(JoinHandle::is_finished);
        *threads = live;
        for handle in done {
            let _ = handle.join();
        }
    }
}

impl Drop for TurnEngine {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(session) = self.session.get_mut().take() {
            let _ = session.turns.send(TurnMessage::Shutdown);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav::WavFileSource;
    use crate::error::SinkError;
    use crate::services::stub::{MemorySink, ScriptedLanguageModel, SilentSynthesizer, StubTranscriber};
    use crate::services::AudioSink;
    use crate::vad::energy::EnergyVad;

    fn engine() -> TurnEngine {
        let services = Collaborators {
            transcriber: Arc::new(StubTranscriber),
            model: Arc::new(ScriptedLanguageModel::speaking("Okay.")),
            synthesizer: Arc::new(SilentSynthesizer),
        };
        let sink = MemorySink::new();
        TurnEngine::new(
            TurnConfig {
                greet_on_start: false,
                ..TurnConfig::default()
            },
            services,
            move || -> std::result::Result<Box<dyn AudioSink>, SinkError> { Ok(Box::new(sink.clone())) },
        )
        .expect("valid config")
    }

    fn silent_source(frames: usize) -> Box<dyn FrameSource> {
        Box::new(WavFileSource::from_samples(vec![0; 512 * frames], 16_000, 1, 512).paced())
    }

    #[test]
    fn invalid_config_is_rejected() {
        let services = Collaborators {
            transcriber: Arc::new(StubTranscriber),
            model: Arc::new(ScriptedLanguageModel::speaking("Okay.")),
            synthesizer: Arc::new(SilentSynthesizer),
        };
        let result = TurnEngine::new(
            TurnConfig {
                sample_rate: 0,
                ..TurnConfig::default()
            },
            services,
            || -> std::result::Result<Box<dyn AudioSink>, SinkError> { Err(SinkError::Inactive) },
        );
        assert!(matches!(result, Err(AttendError::InvalidConfig(_))));
    }

    #[test]
    fn stop_before_start_is_an_error() {
        let engine = engine();
        assert_eq!(engine.status(), EngineStatus::Idle);
        assert!(matches!(engine.stop(), Err(AttendError::NotRunning)));
    }

    #[test]
    fn exhausted_source_stops_the_engine() {
        let engine = engine();
        engine
            .start(silent_source(20), Box::new(EnergyVad::default()))
            .expect("start");
        assert!(matches!(
            engine.start(silent_source(1), Box::new(EnergyVad::default())),
            Err(AttendError::AlreadyRunning)
        ));

        engine.join().expect("threads exit");
        assert!(!engine.is_running());
        assert_eq!(engine.status(), EngineStatus::Stopped);
        assert_eq!(engine.diagnostics_snapshot().frames_in, 20);
        assert_eq!(engine.events().handler_count(SpeechEventKind::SpeechEnded), 0);
        // Initial mode entry is committed even without a spoken greeting.
        assert_eq!(engine.conversation().len(), 3);
    }

    #[test]
    fn abort_without_a_turn_is_a_no_op() {
        let engine = engine();
        assert_eq!(engine.abort_turn(), None);
    }
}
