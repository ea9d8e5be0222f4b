//! Final structured decision carried by a completed reply.

use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Keep talking in the current mode.
    Respond(String),
    /// Enter another mode.
    SwitchMode {
        next_mode: String,
        activity_description: String,
    },
}

#[derive(Deserialize)]
struct Envelope {
    outputs: Outputs,
}

// Switch is tried first: a reply naming a next mode is a switch even if it
// also carries text.
#[derive(Deserialize)]
#[serde(untagged)]
enum Outputs {
    Switch {
        next_mode: String,
        activity_description: String,
    },
    Respond {
        assistant_response: String,
    },
}

/// Parse the complete raw reply. Malformed replies are logged and yield
/// `None`; whatever was already spoken stands.
pub fn parse_decision(raw: &str) -> Option<Decision> {
    match serde_json::from_str::<Envelope>(raw.trim()) {
        Ok(Envelope {
            outputs:
                Outputs::Switch {
                    next_mode,
                    activity_description,
                },
        }) => Some(Decision::SwitchMode {
            next_mode,
            activity_description,
        }),
        Ok(Envelope {
            outputs: Outputs::Respond { assistant_response },
        }) => Some(Decision::Respond(assistant_response)),
        Err(e) => {
            warn!(error = %e, raw_len = raw.len(), "reply is not a valid structured decision");
            None
        }
    }
}
