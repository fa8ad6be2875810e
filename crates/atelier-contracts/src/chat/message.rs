use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Source record from search grounding.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Citation {
    pub uri: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConciergeMessage {
    pub id: MessageId,
    pub role: Role,
    pub text: String,
    /// Image the user attached to their turn.
    pub image: Option<String>,
    /// Image produced by a visual-prompt follow-up.
    pub generated_image: Option<String>,
    pub generating_visual: bool,
    pub sources: Vec<Citation>,
}

impl ConciergeMessage {
    pub fn user(text: impl Into<String>, image: Option<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::User,
            text: text.into(),
            image,
            generated_image: None,
            generating_visual: false,
            sources: Vec::new(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::Assistant,
            text: text.into(),
            image: None,
            generated_image: None,
            generating_visual: false,
            sources: Vec::new(),
        }
    }
}

/// Append-only conversation for one session. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<ConciergeMessage>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ConciergeMessage) -> MessageId {
        let id = message.id;
        self.messages.push(message);
        id
    }

    pub fn get(&self, id: MessageId) -> Option<&ConciergeMessage> {
        self.messages.iter().find(|message| message.id == id)
    }

    pub fn get_mut(&mut self, id: MessageId) -> Option<&mut ConciergeMessage> {
        self.messages.iter_mut().find(|message| message.id == id)
    }

    pub fn messages(&self) -> &[ConciergeMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{ConciergeMessage, Role, Transcript};

    #[test]
    fn transcript_updates_by_identity() {
        let mut transcript = Transcript::new();
        let first = transcript.push(ConciergeMessage::user("hello", None));
        let second = transcript.push(ConciergeMessage::assistant("welcome"));

        if let Some(message) = transcript.get_mut(first) {
            message.text = "hello again".to_string();
        }

        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.messages()[0].text, "hello again");
        assert_eq!(transcript.get(second).map(|m| m.role), Some(Role::Assistant));
        assert_ne!(first, second);
    }
}
