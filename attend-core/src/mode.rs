//! Conversation modes.
//!
//! A mode decides what the model is told (`system_prompt`), what shape its
//! answer must take (`response_schema`), what the assistant says on entry
//! (`on_enter`) and what bookkeeping follows each completed turn
//! (`on_turn_end`). The set of modes is closed; a `switch_mode` decision
//! names the next one.

use std::time::Instant;

use serde_json::{json, Value};

use crate::conversation::ConversationMessage;

/// User line inserted after a mode's system prompt on entry.
pub const KICKOFF_LINE: &str = "Let's get to it.";

/// Spoken on entering a mode.
#[derive(Debug, Clone, PartialEq)]
pub struct Greeting {
    pub text: String,
    /// Playback speed multiplier passed to the synthesizer host.
    pub speed: f32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Mode {
    /// Work out with the user what to spend their time on.
    #[default]
    DiscussActivities,
    /// Keep the user on one chosen activity.
    PerformActivity {
        activity_description: String,
        last_turn_at: Option<Instant>,
    },
}

impl Mode {
    pub const DISCUSS_ACTIVITIES: &'static str = "discuss_activities";
    pub const PERFORM_ACTIVITY: &'static str = "perform_activity";

    pub fn name(&self) -> &'static str {
        match self {
            Self::DiscussActivities => Self::DISCUSS_ACTIVITIES,
            Self::PerformActivity { .. } => Self::PERFORM_ACTIVITY,
        }
    }

    /// Resolve a mode by name. `description` is the activity the model chose
    /// when switching. Unknown names return `None`.
    pub fn from_name(name: &str, description: &str) -> Option<Self> {
        match name {
            Self::DISCUSS_ACTIVITIES => Some(Self::DiscussActivities),
            Self::PERFORM_ACTIVITY => Some(Self::PerformActivity {
                activity_description: description.to_owned(),
                last_turn_at: None,
            }),
            _ => None,
        }
    }

    /// Names this mode may switch to.
    pub fn switch_targets(&self) -> &'static [&'static str] {
        match self {
            Self::DiscussActivities => &[Self::PERFORM_ACTIVITY],
            Self::PerformActivity { .. } => &[],
        }
    }

    /// JSON schema the model's structured output must satisfy.
    pub fn response_schema(&self) -> Value {
        let spoken = json!({
            "type": "object",
            "properties": {
                "assistant_response": {
                    "type": "string",
                    "description": "The assistant's response to the user"
                }
            },
            "required": ["assistant_response"],
            "additionalProperties": false
        });

        let outputs = match self.switch_targets() {
            [] => spoken,
            targets => json!({
                "type": "object",
                "anyOf": [
                    spoken,
                    {
                        "type": "object",
                        "properties": {
                            "next_mode": {
                                "type": "string",
                                "enum": targets,
                                "description": "The mode to switch to"
                            },
                            "activity_description": {
                                "type": "string",
                                "description": "A concise description of the activity to perform"
                            }
                        },
                        "required": ["next_mode", "activity_description"],
                        "additionalProperties": false
                    }
                ]
            }),
        };

        json!({
            "name": "conversation_response",
            "strict": true,
            "schema": {
                "type": "object",
                "properties": { "outputs": outputs },
                "required": ["outputs"],
                "additionalProperties": false
            }
        })
    }

    pub fn system_prompt(&self) -> String {
        match self {
            Self::DiscussActivities => format!(
                "You are Attend, a voice assistant that helps people decide how to spend \
                 their time.\n\n\
                 Answer with JSON of the form {{\"outputs\": {{\"assistant_response\": \"...\"}}}} \
                 or, once the user has settled on one activity, \
                 {{\"outputs\": {{\"next_mode\": \"{}\", \"activity_description\": \"...\"}}}}. \
                 Never include both.\n\n\
                 Replies are spoken aloud: keep them short and ask at most one question.",
                Self::PERFORM_ACTIVITY
            ),
            Self::PerformActivity {
                activity_description,
                ..
            } => format!(
                "You are Attend, a voice assistant. The user's priority right now is: \
                 {activity_description}.\n\n\
                 Help them stay focused on it. Answer with JSON of the form \
                 {{\"outputs\": {{\"assistant_response\": \"...\"}}}}.\n\n\
                 Replies are spoken aloud: keep them brief. If the user is getting back \
                 on track, just acknowledge it."
            ),
        }
    }

    pub fn greeting(&self) -> Greeting {
        let text = match self {
            Self::DiscussActivities => "What do you want to do today?",
            Self::PerformActivity { .. } => {
                "I'll help keep you on track with your activity. Let me know if you need any assistance."
            }
        };
        Greeting {
            text: text.to_owned(),
            speed: 1.0,
        }
    }

    /// Messages appended to the committed history on entering this mode,
    /// and the greeting to speak.
    pub fn on_enter(&mut self) -> (Vec<ConversationMessage>, Greeting) {
        let greeting = self.greeting();
        let messages = vec![
            ConversationMessage::system(self.system_prompt()),
            ConversationMessage::user(KICKOFF_LINE),
            ConversationMessage::assistant(greeting.text.clone()),
        ];
        self.on_turn_end();
        (messages, greeting)
    }

    /// Called after the assistant finishes a turn.
    pub fn on_turn_end(&mut self) {
        if let Self::PerformActivity { last_turn_at, .. } = self {
            *last_turn_at = Some(Instant::now());
        }
    }
}
