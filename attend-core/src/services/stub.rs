//! Placeholder collaborators.
//!
//! Deterministic stand-ins for STT, the language model, TTS and the output
//! device, so the full capture → response → playback path can be exercised
//! without any network service or sound card.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::{AudioSink, DeltaStream, LanguageModel, SpeechSynthesizer, Transcriber};
use crate::conversation::ConversationMessage;
use crate::error::{CompletionError, SinkError, TranscriptionError};

/// Echoes the hand-off size: `"[stub: <N> bytes of audio]"`.
#[derive(Debug, Default)]
pub struct StubTranscriber;

impl Transcriber for StubTranscriber {
    fn transcribe(&self, wav: &[u8]) -> Result<String, TranscriptionError> {
        if wav.is_empty() {
            return Err(TranscriptionError("empty audio".into()));
        }
        Ok(format!("[stub: {} bytes of audio]", wav.len()))
    }
}

/// Streams a fixed reply, split into deltas of `chunk_chars` characters.
#[derive(Debug, Clone)]
pub struct ScriptedLanguageModel {
    reply: String,
    chunk_chars: usize,
}

impl ScriptedLanguageModel {
    pub fn new(reply: impl Into<String>, chunk_chars: usize) -> Self {
        Self {
            reply: reply.into(),
            chunk_chars: chunk_chars.max(1),
        }
    }

    /// A spoken reply wrapped in the `assistant_response` output shape.
    pub fn speaking(text: &str) -> Self {
        let reply = serde_json::json!({ "outputs": { "assistant_response": text } });
        Self::new(reply.to_string(), 12)
    }
}

impl LanguageModel for ScriptedLanguageModel {
    fn stream_chat(
        &self,
        messages: &[ConversationMessage],
        _response_schema: &serde_json::Value,
    ) -> Result<DeltaStream, CompletionError> {
        debug!(messages = messages.len(), "ScriptedLanguageModel::stream_chat");
        let chars: Vec<char> = self.reply.chars().collect();
        let deltas: Vec<Result<String, CompletionError>> = chars
            .chunks(self.chunk_chars)
            .map(|c| Ok(c.iter().collect()))
            .collect();
        Ok(Box::new(deltas.into_iter()))
    }
}

/// Produces 10 ms of 16-bit silence per character, so longer sentences yield
/// longer audio.
#[derive(Debug, Default)]
pub struct SilentSynthesizer;

impl SpeechSynthesizer for SilentSynthesizer {
    fn synthesize(&self, sentence: &str) -> Option<Vec<u8>> {
        let text = sentence.trim();
        if text.is_empty() {
            return None;
        }
        Some(vec![0u8; text.chars().count() * 320])
    }
}

/// Sink that appends every write into a shared buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    written: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the bytes written so far, shared with every clone.
    pub fn written(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.written)
    }
}

impl AudioSink for MemorySink {
    fn write(&mut self, bytes: &[u8]) -> Result<(), SinkError> {
        self.written.lock().extend_from_slice(bytes);
        Ok(())
    }

    fn is_active(&self) -> bool {
        true
    }
}
