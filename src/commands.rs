// User-facing chat operations, called by whatever front end drives the session

use crate::api::ChatService;
use crate::conversation::MessageStore;
use crate::error::ChatError;
use crate::models::{ConversationTurn, UserContext};
use std::sync::Arc;

/// Stored in place of the user's text when only a photo was sent.
pub const IMAGE_ONLY_TURN_TEXT: &str = "Please analyze this image";
/// Sent to the model in place of the user's text when only a photo was sent.
pub const IMAGE_ONLY_PROMPT: &str =
    "Please analyze this image for nutritional content and suggest meals I can make.";

/// Chat orchestrator: records each user turn, asks the chat service for a
/// reply, and records the reply. One service call per submission.
///
/// Callers must not submit again while a previous `send_message` is pending.
pub struct ChatSession {
    store: Arc<MessageStore>,
    chat: Arc<dyn ChatService>,
}

impl ChatSession {
    pub fn new(store: Arc<MessageStore>, chat: Arc<dyn ChatService>) -> Self {
        Self { store, chat }
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    /// Sends one user submission and returns the recorded assistant turn.
    /// On failure no assistant turn is recorded.
    pub async fn send_message(
        &self,
        text: &str,
        image: Option<Vec<u8>>,
        profile: &UserContext,
    ) -> Result<ConversationTurn, ChatError> {
        let text = text.trim();
        if text.is_empty() && image.is_none() {
            return Err(ChatError::EmptyInput);
        }

        let stored_text = if text.is_empty() { IMAGE_ONLY_TURN_TEXT } else { text };
        let prompt = if text.is_empty() { IMAGE_ONLY_PROMPT } else { text };

        let user_turn = ConversationTurn::user(stored_text, image);
        log::info!("User submitted message {}", user_turn.id);
        let image = user_turn.image_bytes.clone();
        self.store.append(user_turn).await;

        let preamble = profile.preamble();
        match self.chat.send(prompt, image.as_deref(), preamble.as_deref()).await {
            Ok(reply) => {
                let assistant_turn = ConversationTurn::assistant(reply);
                log::info!("Assistant replied with message {}", assistant_turn.id);
                self.store.append(assistant_turn.clone()).await;
                Ok(assistant_turn)
            }
            Err(e) => {
                if e.is_local_failure() {
                    log::warn!("Chat request did not reach the server: {}", e);
                } else {
                    log::error!("Chat request failed: {}", e);
                }
                Err(e)
            }
        }
    }

    pub async fn clear_history(&self) {
        self.store.clear().await;
    }

    pub async fn export_history(&self) -> String {
        self.store.export().await
    }

    pub async fn history(&self) -> Vec<ConversationTurn> {
        self.store.turns().await
    }
}
