// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Conversations and their storage boundary

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chat::wire::WsMessageRequest;
use crate::error::{Result, TxingError};
use crate::llm::chat_config::ChatConfig;
use crate::llm::message::Message;

pub const ANONYMOUS_USER_ID: i64 = -1;
pub const NEW_CONVERSATION_ID: i64 = -1;
pub const DEFAULT_CONVERSATION_NAME: &str = "new chat";
pub const DEFAULT_MODEL: &str = "deepseek-v3-250324";

/// Characters of the first message used as the conversation name
const NAME_PREVIEW_CHARS: usize = 20;

/// Stores the message list as a JSON string column.
mod messages_as_json {
    use serde::de::Error as _;
    use serde::ser::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::llm::message::Message;

    pub fn serialize<S: Serializer>(messages: &[Message], serializer: S) -> Result<S::Ok, S::Error> {
        let encoded = serde_json::to_string(messages).map_err(S::Error::custom)?;
        serializer.serialize_str(&encoded)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Message>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        if encoded.is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&encoded).map_err(D::Error::custom)
    }
}

/// One conversation and its chat settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub model: String,
    #[serde(default)]
    pub enable_web: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f32>,
    #[serde(with = "messages_as_json", default)]
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(id: i64, user_id: i64, model: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id,
            name: DEFAULT_CONVERSATION_NAME.to_string(),
            model: model.into(),
            enable_web: false,
            max_tokens: None,
            temperature: None,
            top_p: None,
            top_k: None,
            presence_penalty: None,
            frequency_penalty: None,
            repetition_penalty: None,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id == ANONYMOUS_USER_ID
    }

    /// Apply a chat request: take over its model and parameters and append
    /// the user message.
    pub fn handle_message(&mut self, request: &WsMessageRequest) -> Result<()> {
        let content = request.content.trim();
        if content.is_empty() {
            return Err(TxingError::InvalidInput("message content is empty".to_string()));
        }

        if !request.model.is_empty() {
            self.model = request.model.clone();
        }
        self.enable_web = request.enable_web;
        self.max_tokens = request.max_tokens;
        self.temperature = request.temperature;
        self.top_p = request.top_p;
        self.top_k = request.top_k;
        self.presence_penalty = request.presence_penalty;
        self.frequency_penalty = request.frequency_penalty;
        self.repetition_penalty = request.repetition_penalty;

        if self.name == DEFAULT_CONVERSATION_NAME && self.messages.is_empty() {
            self.name = content.chars().take(NAME_PREVIEW_CHARS).collect();
        }

        self.messages.push(Message::user(request.content.clone()));
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Chat request for the conversation so far
    pub fn chat_config(&self) -> ChatConfig {
        let mut config = ChatConfig::new(self.model.clone(), self.messages.clone())
            .with_enable_web(self.enable_web);
        config.max_tokens = self.max_tokens;
        config.temperature = self.temperature;
        config.top_p = self.top_p;
        config.top_k = self.top_k;
        config.presence_penalty = self.presence_penalty;
        config.frequency_penalty = self.frequency_penalty;
        config.repetition_penalty = self.repetition_penalty;
        config
    }

    /// Append the assistant reply. Empty replies are not stored.
    pub fn save_response(&mut self, content: &str, reasoning: &str) {
        if content.is_empty() && reasoning.is_empty() {
            return;
        }
        self.messages
            .push(Message::assistant(content).with_reasoning(reasoning));
        self.updated_at = Utc::now();
    }
}

/// Persistence for conversations
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn load(&self, id: i64) -> Result<Option<Conversation>>;

    /// Create and store an empty conversation for `user_id`
    async fn create(&self, user_id: i64) -> Result<Conversation>;

    async fn save(&self, conversation: &Conversation) -> Result<()>;

    /// Model given to new conversations
    fn default_model(&self) -> String {
        DEFAULT_MODEL.to_string()
    }
}

/// Resolve the conversation a message belongs to.
///
/// Anonymous users get a fresh conversation that is never stored. A missing
/// id, an unknown id, or one owned by another user starts a new stored
/// conversation.
pub async fn extract_conversation(
    store: &dyn ConversationStore,
    id: i64,
    user_id: i64,
) -> Result<Conversation> {
    if user_id == ANONYMOUS_USER_ID {
        return Ok(Conversation::new(NEW_CONVERSATION_ID, ANONYMOUS_USER_ID, store.default_model()));
    }

    if id == NEW_CONVERSATION_ID {
        return store.create(user_id).await;
    }

    match store.load(id).await? {
        Some(conversation) if conversation.user_id == user_id => Ok(conversation),
        Some(_) => {
            tracing::warn!(
                target: "txing.chat.conversation",
                conversation_id = id,
                user_id,
                "conversation belongs to another user, starting a new one"
            );
            store.create(user_id).await
        }
        None => {
            tracing::debug!(target: "txing.chat.conversation", conversation_id = id, "unknown conversation, starting a new one");
            store.create(user_id).await
        }
    }
}

/// Conversations kept in process, stored in their serialized form
#[derive(Debug)]
pub struct InMemoryConversationStore {
    default_model: String,
    next_id: AtomicI64,
    rows: Mutex<HashMap<i64, String>>,
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL)
    }
}

impl InMemoryConversationStore {
    pub fn new(default_model: impl Into<String>) -> Self {
        Self {
            default_model: default_model.into(),
            next_id: AtomicI64::new(1),
            rows: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.rows().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn rows(&self) -> std::sync::MutexGuard<'_, HashMap<i64, String>> {
        match self.rows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!(target: "txing.chat.conversation", "conversation store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn load(&self, id: i64) -> Result<Option<Conversation>> {
        let row = self.rows().get(&id).cloned();
        match row {
            Some(encoded) => Ok(Some(serde_json::from_str(&encoded)?)),
            None => Ok(None),
        }
    }

    async fn create(&self, user_id: i64) -> Result<Conversation> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let conversation = Conversation::new(id, user_id, self.default_model.clone());
        self.rows().insert(id, serde_json::to_string(&conversation)?);
        Ok(conversation)
    }

    async fn save(&self, conversation: &Conversation) -> Result<()> {
        if conversation.id == NEW_CONVERSATION_ID {
            return Err(TxingError::InvalidInput(
                "cannot save a conversation without an id".to_string(),
            ));
        }
        let encoded = serde_json::to_string(conversation)?;
        self.rows().insert(conversation.id, encoded);
        Ok(())
    }

    fn default_model(&self) -> String {
        self.default_model.clone()
    }
}
