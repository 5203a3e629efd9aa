use crate::models::ConversationTurn;
use crate::storage::{StorageManager, MESSAGES_KEY};
use anyhow::Context;
use chrono::{DateTime, Local, Utc};
use tokio::sync::{watch, Mutex};

pub const WELCOME_MESSAGE: &str = "👋 Welcome to FitTrck! I'm your personal AI nutritionist and kitchen helper.

I can help you with:
• 📸 Analyzing your pantry/fridge contents from photos
• 🍽️ Creating personalized meal plans
• 📊 Tracking nutrition and macros
• 🥗 Suggesting healthy recipe modifications
• 🛒 Planning grocery lists and budget-friendly meals

Try taking a photo of your pantry or fridge, or just ask me about nutrition!";

const EXPORT_DATE_FORMAT: &str = "%b %-d, %Y at %-I:%M %p";

/// Conversation log for one session.
///
/// The in-memory log is never truncated; only the most recent `cap` turns are
/// written to storage. Every mutation holds the log lock until its save has
/// finished, so writes to the stored blob never interleave.
pub struct MessageStore {
    storage: StorageManager,
    cap: usize,
    turns: Mutex<Vec<ConversationTurn>>,
    errors: watch::Sender<Option<String>>,
}

impl MessageStore {
    /// Creates the store and loads whatever the previous session saved.
    pub async fn open(storage: StorageManager, cap: usize) -> Self {
        let (errors, _rx) = watch::channel(None);
        let store = Self {
            storage,
            cap,
            turns: Mutex::new(Vec::new()),
            errors,
        };
        store.load().await;
        store
    }

    /// Replaces the in-memory log with the stored one. Missing or corrupt data
    /// starts a fresh log; an empty log gets the welcome turn.
    pub async fn load(&self) {
        let mut turns = self.turns.lock().await;

        *turns = match self.read_saved().await {
            Ok(Some(saved)) => {
                log::info!("Loaded {} saved messages", saved.len());
                saved
            }
            Ok(None) => {
                log::info!("No saved messages, starting a new conversation");
                Vec::new()
            }
            Err(e) => {
                self.report(format!("Failed to load messages: {:#}", e));
                Vec::new()
            }
        };

        if turns.is_empty() {
            turns.push(ConversationTurn::assistant(WELCOME_MESSAGE));
            self.persist(&turns).await;
        }
    }

    pub async fn append(&self, turn: ConversationTurn) {
        let mut turns = self.turns.lock().await;
        log::debug!("Appending message {} (from user: {})", turn.id, turn.is_from_user);
        turns.push(turn);
        self.persist(&turns).await;
    }

    pub async fn clear(&self) {
        let mut turns = self.turns.lock().await;
        log::warn!("Clearing {} messages", turns.len());
        turns.clear();
        self.persist(&turns).await;
    }

    /// Snapshot of the full in-memory log.
    pub async fn turns(&self) -> Vec<ConversationTurn> {
        self.turns.lock().await.clone()
    }

    pub async fn message_count(&self) -> usize {
        self.turns.lock().await.len()
    }

    pub async fn last_message_at(&self) -> Option<DateTime<Utc>> {
        self.turns.lock().await.last().map(|turn| turn.timestamp)
    }

    /// Renders the whole in-memory log as plain text.
    pub async fn export(&self) -> String {
        let turns = self.turns.lock().await;

        let mut text = String::from("FitTrck Conversation Export\n");
        text.push_str(&format!(
            "Generated: {}\n\n",
            Local::now().format(EXPORT_DATE_FORMAT)
        ));

        for turn in turns.iter() {
            let sender = if turn.is_from_user { "You" } else { "FitTrck" };
            let timestamp = turn.timestamp.with_timezone(&Local).format(EXPORT_DATE_FORMAT);
            text.push_str(&format!("[{}] {}:\n", timestamp, sender));
            text.push_str(&turn.content);
            text.push('\n');
            if turn.has_image() {
                text.push_str("[Image attached]\n");
            }
            text.push('\n');
        }

        text
    }

    /// Latest persistence error, for surfacing in the UI.
    pub fn errors(&self) -> watch::Receiver<Option<String>> {
        self.errors.subscribe()
    }

    async fn read_saved(&self) -> Result<Option<Vec<ConversationTurn>>, anyhow::Error> {
        let Some(raw) = self.storage.get_value(MESSAGES_KEY).await? else {
            return Ok(None);
        };
        let saved = serde_json::from_str(&raw).context("Saved messages are corrupt")?;
        Ok(Some(saved))
    }

    // Writes the most recent `cap` turns. Failures are reported, never propagated.
    async fn persist(&self, turns: &[ConversationTurn]) {
        let tail = &turns[turns.len().saturating_sub(self.cap)..];
        let result = match serde_json::to_string(tail) {
            Ok(raw) => self.storage.set_value(MESSAGES_KEY, &raw).await,
            Err(e) => Err(anyhow::Error::from(e).context("Failed to encode messages")),
        };
        match result {
            Ok(()) => log::debug!("Saved {} of {} messages", tail.len(), turns.len()),
            Err(e) => self.report(format!("Failed to save messages: {:#}", e)),
        }
    }

    fn report(&self, message: String) {
        log::error!("{}", message);
        self.errors.send_replace(Some(message));
    }
}
