//! # attend
//!
//! Speech turn pipeline for a spoken assistant: decides when the user has
//! finished a turn, recovers the audio of that turn, streams a reply from a
//! language model and speaks it sentence by sentence, dropping everything a
//! false end or an abort invalidates.
//!
//! ## Architecture
//!
//! ```text
//! FrameSource → RollingAudioBuffer ─────────────┐ extract(start, end)
//!      │                                         │
//!   VAD decision                                 ▼
//!      │                                   SegmentAudio ──► Transcriber
//! SpeechStateMachine ── Transition ──► PipelineTracker          │
//!      │                                    ▲ validity          ▼
//!   EventBus ◄─ SpeechEvent                 │            LanguageModel stream
//!                                           │                   │
//!                                    ResponseAssembler ◄────────┘
//!                                           │ sentence audio
//!                                           ▼
//!                                     PlaybackQueue → AudioSink
//! ```
//!
//! Capture and VAD run on their own thread and never wait on a collaborator;
//! transcription, completion and playback run on the interaction thread.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod assembler;
pub mod audio;
pub mod buffering;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod events;
pub mod mode;
pub mod playback;
pub mod services;
pub mod speech;
pub mod vad;

// Convenience re-exports for downstream crates
pub use assembler::{AssemblyOutcome, AssemblyStatus, ResponseAssembler, SentenceUnit};
pub use buffering::{RollingAudioBuffer, SegmentAudio};
pub use conversation::{Conversation, ConversationMessage, Role};
pub use engine::{interaction::Collaborators, TurnConfig, TurnEngine};
pub use error::{AttendError, CompletionError, SinkError, TranscriptionError};
pub use events::{
    bus::EventBus, EngineStatus, EngineStatusEvent, EventEnvelope, SpeechEvent, SpeechEventKind,
};
pub use mode::Mode;
pub use playback::PlaybackQueue;
pub use services::{AudioSink, LanguageModel, SinkFactory, SpeechSynthesizer, Transcriber};
pub use speech::tracker::{PipelineId, PipelineState, PipelineTracker};
pub use speech::{SpeechPhase, SpeechSegment, SpeechStateMachine, Transition};
pub use vad::{VadDecision, VoiceActivityDetector};
