use thiserror::Error;

/// All errors produced by attend-core.
#[derive(Debug, Error)]
pub enum AttendError {
    #[error("audio source error: {0}")]
    AudioSource(String),

    #[error("audio source is not active")]
    SourceInactive,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("WAV encoding error: {0}")]
    Wav(#[from] hound::Error),

    #[error(transparent)]
    Transcription(#[from] TranscriptionError),

    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Raised by the speech-to-text collaborator on transport or format failure.
#[derive(Debug, Error)]
#[error("transcription failed: {0}")]
pub struct TranscriptionError(pub String);

/// Raised by the language-model collaborator, either when opening the stream
/// or mid-stream.
#[derive(Debug, Error)]
#[error("completion failed: {0}")]
pub struct CompletionError(pub String);

/// Output sink failures. `Inactive` means the sink must be recreated.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("output sink is not active")]
    Inactive,

    #[error("output sink could not be opened: {0}")]
    Open(String),

    #[error("output sink write failed: {0}")]
    Write(String),
}

pub type Result<T> = std::result::Result<T, AttendError>;
