use crate::api::{ChatService, OpenAIChatClient};
use crate::commands::ChatSession;
use crate::config::ChatConfig;
use crate::connectivity::{probe_address, proxy_in_use, reachability_probe, ConnectivityMonitor};
use crate::conversation::MessageStore;
use crate::error::ChatError;
use crate::models::{ConversationTurn, UserContext};
use crate::storage::StorageManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

const PROBE_INTERVAL: Duration = Duration::from_secs(15);

// Everything one app session needs, passed explicitly to whoever drives it
#[derive(Clone)]
pub struct AppState {
    pub config: ChatConfig,
    pub storage: StorageManager,
    pub connectivity: Arc<ConnectivityMonitor>,
    pub session: Arc<ChatSession>,
    // Owned by the profile screen; the chat core only reads it
    pub profile: Arc<Mutex<UserContext>>,
}

impl AppState {
    pub fn new(
        config: ChatConfig,
        storage: StorageManager,
        connectivity: Arc<ConnectivityMonitor>,
        store: Arc<MessageStore>,
        chat: Arc<dyn ChatService>,
        profile: UserContext,
    ) -> Self {
        Self {
            config,
            storage,
            connectivity,
            session: Arc::new(ChatSession::new(store, chat)),
            profile: Arc::new(Mutex::new(profile)),
        }
    }

    /// Opens storage, starts connectivity monitoring, and loads the saved
    /// conversation and profile.
    pub async fn initialize(config: ChatConfig) -> Result<Self, anyhow::Error> {
        let storage = StorageManager::new(&config.database_path).await?;

        let connectivity = Arc::new(ConnectivityMonitor::new(true));
        start_reachability_probe(&connectivity, &config.endpoint, proxy_in_use(&config.endpoint));

        let chat: Arc<dyn ChatService> = Arc::new(OpenAIChatClient::from_config(
            config.clone(),
            Arc::clone(&connectivity),
        ));
        let store = Arc::new(MessageStore::open(storage.clone(), config.history_cap).await);
        let profile = storage.load_profile().await?.unwrap_or_default();

        Ok(Self::new(config, storage, connectivity, store, chat, profile))
    }

    /// Replaces the profile and persists it.
    pub async fn update_profile(&self, profile: UserContext) -> Result<(), anyhow::Error> {
        self.storage.save_profile(&profile).await?;
        *self.profile.lock().await = profile;
        Ok(())
    }

    pub async fn send_message(
        &self,
        text: &str,
        image: Option<Vec<u8>>,
    ) -> Result<ConversationTurn, ChatError> {
        let profile = self.profile.lock().await.clone();
        self.session.send_message(text, image, &profile).await
    }
}

/// Feeds the monitor from a TCP probe of the endpoint. Behind a proxy the
/// probe is skipped and the monitor keeps its current state.
fn start_reachability_probe(
    connectivity: &Arc<ConnectivityMonitor>,
    endpoint: &str,
    proxied: bool,
) -> Option<JoinHandle<()>> {
    if proxied {
        log::info!("Requests go through a proxy; skipping reachability probe");
        return None;
    }
    match probe_address(endpoint) {
        Some(address) => Some(connectivity.watch(reachability_probe(address, PROBE_INTERVAL))),
        None => {
            log::warn!("Cannot derive a reachability probe from endpoint '{}'", endpoint);
            None
        }
    }
}
