//! Role-tagged LLM messages.
//!
//! These are what personas hand to the LLM client: a list of messages, each
//! carrying text and/or image parts.

use serde::{Deserialize, Serialize};

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions
    System,
    /// The end user (and environment feedback)
    User,
    /// The model
    Assistant,
}

/// One part of a message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: String },
}

/// A single message sent to the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentPart::Text { text: text.into() }],
        }
    }

    /// Create a new system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    /// Create a new user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    /// Create a new assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    /// Attach image parts after the text.
    pub fn with_images(mut self, urls: impl IntoIterator<Item = String>) -> Self {
        self.content
            .extend(urls.into_iter().map(|image_url| ContentPart::ImageUrl { image_url }));
        self
    }

    /// All text parts joined by newlines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                ContentPart::ImageUrl { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Rough token estimate (4 chars ≈ 1 token).
    pub fn estimated_tokens(&self) -> usize {
        self.text().len() / 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_message() {
        let msg = Message::user("Hello, agent!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.text(), "Hello, agent!");
    }

    #[test]
    fn images_follow_text() {
        let msg = Message::user("look").with_images(vec!["data:image/png;base64,AAA".into()]);
        assert_eq!(msg.content.len(), 2);
        assert_eq!(msg.text(), "look");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["content"][1]["type"], "image_url");
    }

    #[test]
    fn token_estimate() {
        assert_eq!(Message::user("12345678901234567890").estimated_tokens(), 5);
    }
}
