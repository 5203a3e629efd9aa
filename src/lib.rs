// Declare the modules
pub mod api;
pub mod commands;
pub mod config;
pub mod connectivity;
pub mod conversation;
pub mod error;
pub mod models;
pub mod state;
pub mod storage;

use anyhow::Context;
use config::{ChatConfig, SecretStore};
use state::AppState;
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "Commands:
  /image <path> [message]  send a photo, optionally with a message
  /clear                   clear the conversation
  /export                  print the conversation as text
  /history                 show the number of stored messages
  /setkey <key>            store the API key in the OS keyring
  /quit                    exit";

/// Runs an interactive chat session on the terminal.
pub fn run() -> Result<(), anyhow::Error> {
    // Initialize logging
    env_logger::init();

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(async {
        let config = ChatConfig::from_env()?;
        let state = AppState::initialize(config).await?;

        // Storage problems never stop the chat, but the user should see them.
        let mut errors = state.session.store().errors();
        tokio::spawn(async move {
            while errors.changed().await.is_ok() {
                if let Some(error) = errors.borrow_and_update().clone() {
                    eprintln!("warning: {}", error);
                }
            }
        });

        if let Some(last) = state.session.history().await.last() {
            println!("{}\n", last.content);
        }
        println!("{}\n", HELP);

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await.context("Failed to read input")? {
            if !handle_line(&state, line.trim()).await? {
                break;
            }
        }
        Ok::<(), anyhow::Error>(())
    })
}

// Returns false when the user asked to quit.
async fn handle_line(state: &AppState, line: &str) -> Result<bool, anyhow::Error> {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    match command {
        "" => {}
        "/quit" => return Ok(false),
        "/clear" => {
            state.session.clear_history().await;
            println!("Conversation cleared.");
        }
        "/export" => println!("{}", state.session.export_history().await),
        "/history" => {
            let store = state.session.store();
            let count = store.message_count().await;
            match store.last_message_at().await {
                Some(at) => println!("{} messages, last at {}", count, at.to_rfc3339()),
                None => println!("{} messages", count),
            }
        }
        "/setkey" => println!("{}", set_key(&config::OsKeyring, rest)),
        "/image" => {
            let (path, text) = rest.trim().split_once(' ').unwrap_or((rest.trim(), ""));
            match tokio::fs::read(path).await {
                Ok(bytes) => send(state, text, Some(bytes)).await,
                Err(e) => println!("Could not read image '{}': {}", path, e),
            }
        }
        "/help" => println!("{}", HELP),
        _ => send(state, line, None).await,
    }
    Ok(true)
}

// Keyring failures are reported to the user; they never end the session.
fn set_key(secrets: &dyn SecretStore, key: &str) -> String {
    match config::store_api_key(secrets, key) {
        Ok(()) => "API key saved to keyring. Set FITTRCK_API_KEY_REF=keyring and restart to use it."
            .to_string(),
        Err(e) => {
            log::error!("Failed to store API key: {:#}", e);
            format!("Could not save API key: {:#}", e)
        }
    }
}

async fn send(state: &AppState, text: &str, image: Option<Vec<u8>>) {
    println!("FitTrck is thinking...");
    match state.send_message(text, image).await {
        Ok(reply) => println!("\n{}\n", reply.content),
        Err(e) => println!("\n{}\n({})\n", e.description(), e.recovery_suggestion()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct LockedKeychain;

    impl SecretStore for LockedKeychain {
        fn get_secret(&self) -> anyhow::Result<String> {
            Err(anyhow::anyhow!("keychain is locked"))
        }

        fn set_secret(&self, _secret: &str) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("keychain is locked"))
        }
    }

    #[derive(Default)]
    struct RecordingSecrets {
        stored: Mutex<Vec<String>>,
    }

    impl SecretStore for RecordingSecrets {
        fn get_secret(&self) -> anyhow::Result<String> {
            self.stored
                .lock()
                .unwrap()
                .last()
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("nothing stored"))
        }

        fn set_secret(&self, secret: &str) -> anyhow::Result<()> {
            self.stored.lock().unwrap().push(secret.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_set_key_reports_store_failure() {
        let message = set_key(&LockedKeychain, "sk-new");
        assert!(message.starts_with("Could not save API key"));
        assert!(message.contains("keychain is locked"));
    }

    #[test]
    fn test_set_key_rejects_blank_key() {
        let secrets = RecordingSecrets::default();
        assert!(set_key(&secrets, "   ").starts_with("Could not save API key"));
        assert!(secrets.stored.lock().unwrap().is_empty());

        assert!(set_key(&secrets, " sk-new ").starts_with("API key saved"));
        assert_eq!(*secrets.stored.lock().unwrap(), vec!["sk-new".to_string()]);
    }

    #[tokio::test]
    async fn test_setkey_without_argument_keeps_session_running() {
        let dir = TempDir::new().unwrap();
        let config = ChatConfig {
            endpoint: "http://127.0.0.1:9/v1/chat/completions".to_string(),
            api_key_ref: Some("sk-test".to_string()),
            database_path: dir.path().join("app.sqlite"),
            ..ChatConfig::default()
        };
        let state = AppState::initialize(config).await.unwrap();

        assert!(handle_line(&state, "/setkey").await.unwrap());
        assert!(!handle_line(&state, "/quit").await.unwrap());
    }
}
