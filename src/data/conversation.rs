// ABOUTME: In-memory conversation store holding the ordered message history
// Serializes to a persisted record without the ephemeral system prompt

use crate::app::settings::RequestSettings;
use crate::data::client::{Completion, CompletionClient};
use crate::utils::error::{ChatMeterError, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

const NAMING_PROMPT: &str =
    "Come up with a simple name for this conversation, no more than 4 words: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Persisted form of a conversation, one record per file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    pub display_name: String,
    pub created_at: DateTime<Local>,
    pub updated_at: DateTime<Local>,
    pub messages: Vec<Message>,
}

/// One logical dialogue.
///
/// A system message, when present, is always the first message and appears
/// at most once. The store does no locking; a single writer owns it.
#[derive(Debug, Clone)]
pub struct Conversation {
    id: String,
    display_name: String,
    created_at: DateTime<Local>,
    updated_at: DateTime<Local>,
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new(system_prompt: Option<&str>) -> Self {
        let now = Local::now();
        let id = Uuid::new_v4().to_string();
        let messages = system_prompt
            .filter(|p| !p.trim().is_empty())
            .map(|p| vec![Message::new(MessageRole::System, p)])
            .unwrap_or_default();

        Self {
            display_name: id.clone(),
            id,
            created_at: now,
            updated_at: now,
            messages,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn created_at(&self) -> DateTime<Local> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Local> {
        self.updated_at
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn has_system_prompt(&self) -> bool {
        matches!(self.messages.first(), Some(m) if m.role == MessageRole::System)
    }

    /// Messages excluding the leading system prompt
    pub fn history(&self) -> &[Message] {
        if self.has_system_prompt() {
            &self.messages[1..]
        } else {
            &self.messages
        }
    }

    /// Number of completed user/assistant exchanges
    pub fn exchange_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role == MessageRole::Assistant)
            .count()
    }

    /// Append a message; a system message is only accepted as the first entry
    pub fn append(&mut self, role: MessageRole, content: impl Into<String>) -> Result<()> {
        if role == MessageRole::System && !self.messages.is_empty() {
            return Err(ChatMeterError::InvalidMessage(
                "a system message must be the first message".to_string(),
            ));
        }
        self.messages.push(Message::new(role, content));
        self.updated_at = Local::now();
        Ok(())
    }

    /// Remove a trailing user message left without a reply
    pub fn rollback_pending_prompt(&mut self) -> Option<Message> {
        match self.messages.last() {
            Some(m) if m.role == MessageRole::User => self.messages.pop(),
            _ => None,
        }
    }

    /// Seed the leading system message, replacing any present one.
    /// A blank or missing prompt leaves the conversation without one.
    pub fn with_system_prompt(mut self, prompt: Option<&str>) -> Self {
        if self.has_system_prompt() {
            self.messages.remove(0);
        }
        if let Some(prompt) = prompt.filter(|p| !p.trim().is_empty()) {
            self.messages.insert(0, Message::new(MessageRole::System, prompt));
        }
        self
    }

    pub fn set_display_name(&mut self, name: impl Into<String>) {
        self.display_name = name.into();
        self.updated_at = Local::now();
    }

    pub fn to_persisted_form(&self) -> ConversationRecord {
        ConversationRecord {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            messages: self.history().to_vec(),
        }
    }

    /// Rebuild a conversation, keeping its original identifier and timestamps
    pub fn from_persisted_form(record: ConversationRecord) -> Self {
        let mut messages = record.messages;
        if matches!(messages.first(), Some(m) if m.role == MessageRole::System) {
            messages.remove(0);
        }

        Self {
            id: record.id,
            display_name: record.display_name,
            created_at: record.created_at,
            updated_at: record.updated_at,
            messages,
        }
    }

    /// Ask the completion API for a short label and adopt it as the display name.
    ///
    /// Every call is a network request and may produce a different label.
    /// The naming instruction is sent on a copy; the history is not touched.
    pub async fn derive_display_name(
        &mut self,
        client: &dyn CompletionClient,
        settings: &RequestSettings,
    ) -> Result<Completion> {
        let mut request = self.history().to_vec();
        request.push(Message::new(MessageRole::User, NAMING_PROMPT));

        let naming_settings = RequestSettings {
            max_tokens: 16,
            ..settings.clone()
        };
        let completion = client.complete(&naming_settings, &request).await?;

        let label = sanitize_label(&completion.reply);
        if label.is_empty() {
            return Err(ChatMeterError::RemoteCall(format!(
                "unusable conversation name: {:?}",
                completion.reply
            )));
        }

        tracing::debug!(id = %self.id, name = %label, "derived conversation name");
        self.set_display_name(label);
        Ok(completion)
    }
}

/// Reduce a model-produced label to words safe for a file name
pub fn sanitize_label(raw: &str) -> String {
    raw.split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
                .collect::<String>()
        })
        .filter(|word| !word.is_empty())
        .take(6)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::client::{FinishReason, MockCompletionClient};
    use crate::utils::cost_calculator::TokenUsage;

    fn sample() -> Conversation {
        let mut conversation = Conversation::new(Some("You are a helpful assistant!"));
        conversation.append(MessageRole::User, "Hello").unwrap();
        conversation.append(MessageRole::Assistant, "Hi there").unwrap();
        conversation
    }

    #[test]
    fn test_new_seeds_system_prompt() {
        let conversation = Conversation::new(Some("Be brief"));
        assert!(conversation.has_system_prompt());
        assert_eq!(conversation.len(), 1);
        assert!(conversation.history().is_empty());

        let empty = Conversation::new(Some("   "));
        assert!(empty.is_empty());
    }

    #[test]
    fn test_second_system_message_rejected() {
        let mut conversation = Conversation::new(Some("Be brief"));
        assert!(conversation.append(MessageRole::System, "Be verbose").is_err());

        let mut fresh = Conversation::new(None);
        fresh.append(MessageRole::System, "Be brief").unwrap();
        assert!(fresh.has_system_prompt());
    }

    #[test]
    fn test_append_updates_timestamp() {
        let mut conversation = Conversation::new(None);
        let before = conversation.updated_at();
        conversation.append(MessageRole::User, "Hello").unwrap();
        assert!(conversation.updated_at() >= before);
        assert_eq!(conversation.created_at(), before);
    }

    #[test]
    fn test_rollback_only_removes_trailing_user() {
        let mut conversation = sample();
        assert!(conversation.rollback_pending_prompt().is_none());
        assert_eq!(conversation.len(), 3);

        conversation.append(MessageRole::User, "Again").unwrap();
        let removed = conversation.rollback_pending_prompt().unwrap();
        assert_eq!(removed.content, "Again");
        assert_eq!(conversation.len(), 3);
    }

    #[test]
    fn test_persisted_form_strips_system_prompt() {
        let conversation = sample();
        let record = conversation.to_persisted_form();
        assert_eq!(record.messages.len(), 2);
        assert_eq!(record.messages[0].role, MessageRole::User);
    }

    #[test]
    fn test_round_trip_keeps_identity() {
        let mut conversation = sample();
        conversation.set_display_name("Greeting");
        let record = conversation.to_persisted_form();
        let json = serde_json::to_string(&record).unwrap();
        let restored =
            Conversation::from_persisted_form(serde_json::from_str(&json).unwrap());

        assert_eq!(restored.id(), conversation.id());
        assert_eq!(restored.created_at(), conversation.created_at());
        assert_eq!(restored.display_name(), "Greeting");
        assert_eq!(restored.messages(), conversation.history());
    }

    #[test]
    fn test_reloaded_conversation_gets_system_prompt_back() {
        let conversation = sample();
        let restored = Conversation::from_persisted_form(conversation.to_persisted_form())
            .with_system_prompt(Some("You are a helpful assistant!"));

        assert!(restored.has_system_prompt());
        assert_eq!(restored.messages(), conversation.messages());
        assert_eq!(restored.to_persisted_form().messages.len(), 2);
    }

    #[test]
    fn test_with_system_prompt_replaces_existing() {
        let conversation = sample().with_system_prompt(Some("Be brief"));
        assert_eq!(conversation.messages()[0].content, "Be brief");
        assert_eq!(conversation.len(), 3);

        let cleared = conversation.with_system_prompt(None);
        assert!(!cleared.has_system_prompt());
        assert_eq!(cleared.len(), 2);
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::new(MessageRole::Assistant, "ok")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"ok"}"#);
    }

    #[test]
    fn test_sanitize_label() {
        assert_eq!(sanitize_label("\"Rust Ownership Basics.\""), "Rust Ownership Basics");
        assert_eq!(sanitize_label("  a/b  c:d "), "ab cd");
        assert_eq!(sanitize_label("?!"), "");
    }

    #[tokio::test]
    async fn test_derive_display_name_leaves_history_untouched() {
        let mut client = MockCompletionClient::new();
        client
            .expect_complete()
            .withf(|settings, messages| {
                settings.max_tokens == 16
                    && messages.len() == 3
                    && messages[2].content.starts_with("Come up with a simple name")
            })
            .times(1)
            .returning(|settings, _| {
                Ok(Completion {
                    model: settings.model.clone(),
                    reply: "Friendly Greeting".to_string(),
                    usage: TokenUsage {
                        prompt_tokens: 20,
                        completion_tokens: 2,
                    },
                    finish_reason: FinishReason::Stop,
                })
            });

        let mut conversation = sample();
        let before = conversation.messages().to_vec();
        conversation
            .derive_display_name(&client, &RequestSettings::default())
            .await
            .unwrap();

        assert_eq!(conversation.display_name(), "Friendly Greeting");
        assert_eq!(conversation.messages(), before.as_slice());
    }
}
