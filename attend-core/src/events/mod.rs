//! Speech lifecycle and engine status events.
//!
//! | Event | Emitted by | When |
//! |-------|------------|------|
//! | `SpeechStartPotential` | capture loop | VAD reported a start outside speech |
//! | `SpeechStarted` | capture loop | start held for `speech_start_threshold` |
//! | `SpeechEndPotential` | capture loop | VAD reported an end during speech |
//! | `SpeechEnded` | capture loop | end held for `speech_end_threshold` |
//! | `FalseStart` | capture loop | speech stopped before it was confirmed |
//! | `FalseEnd` | capture loop | speech resumed before the end was confirmed |
//! | `NewTranscription` | interaction loop | STT returned text for a turn |

pub mod bus;

use serde::{Deserialize, Serialize};

use crate::speech::tracker::PipelineId;

/// One speech lifecycle signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SpeechEvent {
    SpeechStartPotential,
    SpeechStarted,
    /// `pipeline` is the turn created for this end, or `None` when a confirmed
    /// turn was still processing and no new one could be created.
    SpeechEndPotential { pipeline: Option<PipelineId> },
    SpeechEnded { pipeline: Option<PipelineId> },
    FalseStart,
    FalseEnd { pipeline: Option<PipelineId> },
    NewTranscription { pipeline: PipelineId, text: String },
}

impl SpeechEvent {
    pub fn kind(&self) -> SpeechEventKind {
        match self {
            Self::SpeechStartPotential => SpeechEventKind::SpeechStartPotential,
            Self::SpeechStarted => SpeechEventKind::SpeechStarted,
            Self::SpeechEndPotential { .. } => SpeechEventKind::SpeechEndPotential,
            Self::SpeechEnded { .. } => SpeechEventKind::SpeechEnded,
            Self::FalseStart => SpeechEventKind::FalseStart,
            Self::FalseEnd { .. } => SpeechEventKind::FalseEnd,
            Self::NewTranscription { .. } => SpeechEventKind::NewTranscription,
        }
    }
}

/// Payload-free discriminant used to register handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeechEventKind {
    SpeechStartPotential,
    SpeechStarted,
    SpeechEndPotential,
    SpeechEnded,
    FalseStart,
    FalseEnd,
    NewTranscription,
}

/// Broadcast form of a [`SpeechEvent`], numbered in emission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub seq: u64,
    pub event: SpeechEvent,
}

/// Emitted when the engine state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Current state of the turn engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Engine created but `start()` not yet called.
    Idle,
    /// Capture and interaction loops running.
    Listening,
    /// Loops stopped; engine may be restarted.
    Stopped,
    /// A resource needs operator attention (e.g. the output sink cannot be reopened).
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speech_event_serializes_with_snake_case_tag() {
        let event = SpeechEvent::SpeechEndPotential {
            pipeline: Some(PipelineId(4)),
        };
        let json = serde_json::to_value(&event).expect("serialize speech event");
        assert_eq!(json["event"], "speech_end_potential");
        assert_eq!(json["pipeline"], 4);

        let round_trip: SpeechEvent = serde_json::from_value(json).expect("deserialize");
        assert_eq!(round_trip, event);
    }

    #[test]
    fn transcription_event_carries_text() {
        let envelope = EventEnvelope {
            seq: 9,
            event: SpeechEvent::NewTranscription {
                pipeline: PipelineId(2),
                text: "hello".into(),
            },
        };
        let json = serde_json::to_value(&envelope).expect("serialize envelope");
        assert_eq!(json["seq"], 9);
        assert_eq!(json["event"]["event"], "new_transcription");
        assert_eq!(json["event"]["text"], "hello");
        assert_eq!(envelope.event.kind(), SpeechEventKind::NewTranscription);
    }

    #[test]
    fn engine_status_event_serializes_with_lowercase_status() {
        let event = EngineStatusEvent {
            status: EngineStatus::Listening,
            detail: None,
        };
        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "listening");
        assert!(json["detail"].is_null());
    }

    #[test]
    fn event_kind_rejects_unknown_names() {
        let err = serde_json::from_str::<SpeechEventKind>(r#""SpeechStarted""#);
        assert!(err.is_err(), "expected camel-cased name to fail");
    }
}
