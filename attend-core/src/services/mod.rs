//! External collaborator contracts.
//!
//! The turn pipeline never talks to a network or a device directly. Speech
//! recognition, the language model, speech synthesis and the output device
//! are all supplied by the host behind these traits. `&self` receivers let
//! one collaborator serve the interaction thread and tests concurrently;
//! implementations with mutable state guard it themselves.

pub mod stub;

use crate::conversation::ConversationMessage;
use crate::error::{CompletionError, SinkError, TranscriptionError};

/// Lazy, finite, ordered sequence of response text deltas.
pub type DeltaStream = Box<dyn Iterator<Item = Result<String, CompletionError>> + Send>;

/// Speech-to-text.
pub trait Transcriber: Send + Sync + 'static {
    /// Transcribe one WAV-encoded utterance.
    ///
    /// # Errors
    /// Transport or format failure. The turn continues without a transcript.
    fn transcribe(&self, wav: &[u8]) -> Result<String, TranscriptionError>;
}

/// Streaming chat completion constrained to a JSON response schema.
pub trait LanguageModel: Send + Sync + 'static {
    /// # Errors
    /// Failure to open the stream. Mid-stream failures arrive as `Err` items.
    fn stream_chat(
        &self,
        messages: &[ConversationMessage],
        response_schema: &serde_json::Value,
    ) -> Result<DeltaStream, CompletionError>;
}

/// Text-to-speech. `None` means this sentence is simply not spoken.
pub trait SpeechSynthesizer: Send + Sync + 'static {
    fn synthesize(&self, sentence: &str) -> Option<Vec<u8>>;
}

/// The single audio output device.
pub trait AudioSink: Send + 'static {
    /// # Errors
    /// Any write failure. The playback queue tears the sink down and opens a
    /// fresh one on next use.
    fn write(&mut self, bytes: &[u8]) -> Result<(), SinkError>;

    fn is_active(&self) -> bool;
}

/// Opens output sinks on demand.
pub trait SinkFactory: Send + Sync + 'static {
    /// # Errors
    /// The device could not be opened.
    fn create(&self) -> Result<Box<dyn AudioSink>, SinkError>;
}

impl<F> SinkFactory for F
where
    F: Fn() -> Result<Box<dyn AudioSink>, SinkError> + Send + Sync + 'static,
{
    fn create(&self) -> Result<Box<dyn AudioSink>, SinkError> {
        self()
    }
}
