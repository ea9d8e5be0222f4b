//! Committed and tentative conversation histories.
//!
//! The committed history is authoritative and only ever grows. While a turn
//! is in flight its user message and assistant reply live in a tentative
//! copy; confirmation promotes them, a false end or cancellation discards
//! them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
}

impl ConversationMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Conversation {
    committed: Vec<ConversationMessage>,
    /// Index in `committed` where the model context starts.
    context_start: usize,
    /// Messages added since the last promotion, on top of `committed`.
    tentative: Option<Vec<ConversationMessage>>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn committed(&self) -> &[ConversationMessage] {
        &self.committed
    }

    pub fn has_tentative(&self) -> bool {
        self.tentative.is_some()
    }

    /// Start a tentative turn with the user's words, replacing any
    /// unpromoted one. Returns the full history to send to the model.
    pub fn begin_tentative(&mut self, user: impl Into<String>) -> Vec<ConversationMessage> {
        self.tentative = Some(vec![ConversationMessage::user(user)]);
        self.view()
    }

    /// Record the assistant's raw reply on the tentative turn.
    pub fn push_assistant(&mut self, content: impl Into<String>) {
        if let Some(tentative) = self.tentative.as_mut() {
            tentative.push(ConversationMessage::assistant(content));
        }
    }

    /// Committed history from the current context start, followed by the
    /// tentative turn.
    pub fn view(&self) -> Vec<ConversationMessage> {
        let mut all = self.context().to_vec();
        if let Some(tentative) = &self.tentative {
            all.extend(tentative.iter().cloned());
        }
        all
    }

    /// Append the tentative turn to the committed history. Returns how many
    /// messages were committed.
    pub fn promote(&mut self) -> usize {
        match self.tentative.take() {
            Some(tentative) => {
                let n = tentative.len();
                self.committed.extend(tentative);
                n
            }
            None => 0,
        }
    }

    /// Drop the tentative turn. Committed history is untouched.
    pub fn discard(&mut self) -> bool {
        self.tentative.take().is_some()
    }

    pub fn append_committed(&mut self, messages: impl IntoIterator<Item = ConversationMessage>) {
        self.committed.extend(messages);
    }

    /// Append `messages` and make them the start of what the model sees.
    /// Earlier history stays committed but is no longer sent.
    pub fn start_context(&mut self, messages: impl IntoIterator<Item = ConversationMessage>) {
        self.context_start = self.committed.len();
        self.committed.extend(messages);
    }

    /// Committed messages the model currently sees.
    pub fn context(&self) -> &[ConversationMessage] {
        &self.committed[self.context_start.min(self.committed.len())..]
    }
}
