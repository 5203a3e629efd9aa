use anyhow::{Context, Result};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// The value shipped in sample configs. A key equal to it was never filled in.
pub const PLACEHOLDER_API_KEY: &str = "YOUR_OPENAI_API_KEY_HERE";

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_HISTORY_CAP: usize = 100;

const KEYRING_SERVICE: &str = "fittrck_api_key";
const KEYRING_USER: &str = "default";

/// Retry schedule for the chat pipeline.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries allowed after a 429 before giving up with `RateLimited`
    pub rate_limit_retries: u32,
    /// Delay before the first 429 retry; doubles on every following attempt
    pub rate_limit_base_delay: Duration,
    /// Retries allowed after a 5xx before giving up with `ServerError`
    pub server_error_retries: u32,
    /// Fixed delay before a 5xx retry
    pub server_error_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            rate_limit_retries: 3,
            rate_limit_base_delay: Duration::from_secs(1),
            server_error_retries: 1,
            server_error_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retrying a 429 seen on `attempt` (0-based): 1s, 2s, 4s with the defaults.
    pub fn rate_limit_delay(&self, attempt: u32) -> Duration {
        self.rate_limit_base_delay
            .saturating_mul(2_u32.saturating_pow(attempt))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ChatConfig {
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    // 'env:VAR_NAME', 'keyring', or the key itself
    pub api_key_ref: Option<String>,
    pub max_image_bytes: Option<usize>,
    pub retry: RetryPolicy,
    pub history_cap: usize,
    pub database_path: PathBuf,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 1000,
            temperature: 0.7,
            api_key_ref: Some("env:OPENAI_API_KEY".to_string()),
            max_image_bytes: None,
            retry: RetryPolicy::default(),
            history_cap: DEFAULT_HISTORY_CAP,
            database_path: PathBuf::from("fittrck.sqlite"),
        }
    }
}

impl ChatConfig {
    /// Builds the default config and applies any `FITTRCK_*` environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(endpoint) = std::env::var("FITTRCK_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Ok(model) = std::env::var("FITTRCK_MODEL") {
            config.model = model;
        }
        if let Ok(key_ref) = std::env::var("FITTRCK_API_KEY_REF") {
            config.api_key_ref = Some(key_ref);
        }
        if let Ok(path) = std::env::var("FITTRCK_DATABASE") {
            config.database_path = PathBuf::from(path);
        }
        if let Ok(cap) = std::env::var("FITTRCK_HISTORY_CAP") {
            config.history_cap = cap
                .parse()
                .context(format!("Invalid FITTRCK_HISTORY_CAP value '{}'", cap))?;
        }
        if let Ok(limit) = std::env::var("FITTRCK_MAX_IMAGE_BYTES") {
            config.max_image_bytes = Some(
                limit
                    .parse()
                    .context(format!("Invalid FITTRCK_MAX_IMAGE_BYTES value '{}'", limit))?,
            );
        }

        log::debug!("Loaded chat config: endpoint={} model={}", config.endpoint, config.model);
        Ok(config)
    }
}

// --- API Key Retrieval ---

/// Where `keyring` refs read and write the API key.
pub trait SecretStore: Send + Sync {
    fn get_secret(&self) -> Result<String>;
    fn set_secret(&self, secret: &str) -> Result<()>;
}

/// The platform credential store (Keychain, Windows Credential Manager, Linux keyutils).
pub struct OsKeyring;

impl OsKeyring {
    fn entry(&self) -> Result<Entry> {
        Entry::new(KEYRING_SERVICE, KEYRING_USER).context("Failed to create keyring entry")
    }
}

impl SecretStore for OsKeyring {
    fn get_secret(&self) -> Result<String> {
        log::debug!("Retrieving API key from keyring for service: {}", KEYRING_SERVICE);
        self.entry()?
            .get_password()
            .context("Failed to get API key from keyring. Please set it in settings.")
    }

    fn set_secret(&self, secret: &str) -> Result<()> {
        log::info!("Setting API key in keyring for service: {}", KEYRING_SERVICE);
        self.entry()?
            .set_password(secret)
            .context("Failed to set API key in keyring")
    }
}

/// Retrieves the API key named by `api_key_ref`.
/// `env:NAME` reads an environment variable, `keyring` reads the OS keyring,
/// anything else is taken as the key itself.
pub fn get_api_key(config: &ChatConfig) -> Result<String> {
    get_api_key_from(config, &OsKeyring)
}

pub fn get_api_key_from(config: &ChatConfig, secrets: &dyn SecretStore) -> Result<String> {
    match config.api_key_ref.as_deref() {
        Some(ref_str) if ref_str.starts_with("env:") => {
            let env_var_name = ref_str.trim_start_matches("env:");
            log::debug!("Retrieving API key from environment variable: {}", env_var_name);
            std::env::var(env_var_name).context(format!(
                "Failed to get API key from environment variable '{}'",
                env_var_name
            ))
        }
        Some("keyring") => secrets.get_secret(),
        Some(literal) => Ok(literal.to_string()),
        None => Err(anyhow::anyhow!("API key reference not set")),
    }
}

/// Stores an API key in the OS keyring under the service `keyring` refs read from.
pub fn set_api_key_in_keyring(api_key: &str) -> Result<()> {
    store_api_key(&OsKeyring, api_key)
}

/// Stores `api_key` in `secrets`. Blank and placeholder keys are refused.
pub fn store_api_key(secrets: &dyn SecretStore, api_key: &str) -> Result<()> {
    let api_key = api_key.trim();
    if !is_usable_key(api_key) {
        return Err(anyhow::anyhow!("Refusing to store a blank or placeholder API key"));
    }
    secrets.set_secret(api_key)
}

/// Resolves the credential for the pipeline. Missing, blank, and placeholder keys
/// all come back as `None`.
pub fn resolve_credential(config: &ChatConfig) -> Option<String> {
    match get_api_key(config) {
        Ok(key) if is_usable_key(&key) => Some(key),
        Ok(_) => {
            log::warn!("Configured API key is blank or still the placeholder");
            None
        }
        Err(e) => {
            log::warn!("No API key available: {:#}", e);
            None
        }
    }
}

pub fn is_usable_key(key: &str) -> bool {
    let key = key.trim();
    !key.is_empty() && key != PLACEHOLDER_API_KEY
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemorySecrets {
        secret: Mutex<Option<String>>,
    }

    impl SecretStore for MemorySecrets {
        fn get_secret(&self) -> Result<String> {
            self.secret
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| anyhow::anyhow!("no secret stored"))
        }

        fn set_secret(&self, secret: &str) -> Result<()> {
            *self.secret.lock().unwrap() = Some(secret.to_string());
            Ok(())
        }
    }

    fn keyring_config() -> ChatConfig {
        ChatConfig {
            api_key_ref: Some("keyring".to_string()),
            ..ChatConfig::default()
        }
    }

    #[test]
    fn test_stored_key_is_read_back_through_keyring_ref() {
        let secrets = MemorySecrets::default();
        assert!(get_api_key_from(&keyring_config(), &secrets).is_err());

        store_api_key(&secrets, "  sk-stored \n").unwrap();
        assert_eq!(get_api_key_from(&keyring_config(), &secrets).unwrap(), "sk-stored");
    }

    #[test]
    fn test_blank_and_placeholder_keys_are_not_stored() {
        let secrets = MemorySecrets::default();
        assert!(store_api_key(&secrets, "").is_err());
        assert!(store_api_key(&secrets, "   ").is_err());
        assert!(store_api_key(&secrets, PLACEHOLDER_API_KEY).is_err());
        assert!(secrets.secret.lock().unwrap().is_none());
    }

    // Needs a reachable platform credential store, so it only runs on request.
    #[test]
    #[ignore]
    fn test_os_keyring_round_trip_through_fresh_entry() {
        set_api_key_in_keyring("sk-keyring-round-trip").unwrap();
        let fresh = Entry::new(KEYRING_SERVICE, KEYRING_USER).unwrap();
        assert_eq!(fresh.get_password().unwrap(), "sk-keyring-round-trip");
        assert_eq!(
            resolve_credential(&keyring_config()).as_deref(),
            Some("sk-keyring-round-trip")
        );
        fresh.delete_credential().unwrap();
    }

    #[test]
    fn test_partial_config_json_uses_defaults() {
        let config: ChatConfig = serde_json::from_str(
            r#"{ "model": "gpt-4o-mini", "max_image_bytes": 2048, "retry": { "rate_limit_retries": 5 } }"#,
        )
        .unwrap();
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.max_image_bytes, Some(2048));
        assert_eq!(config.retry.rate_limit_retries, 5);
        assert_eq!(config.retry.server_error_delay, Duration::from_secs(2));
        assert_eq!(config.history_cap, DEFAULT_HISTORY_CAP);
    }

    #[test]
    fn test_default_retry_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.rate_limit_delay(0), Duration::from_secs(1));
        assert_eq!(policy.rate_limit_delay(1), Duration::from_secs(2));
        assert_eq!(policy.rate_limit_delay(2), Duration::from_secs(4));
        assert_eq!(policy.rate_limit_retries, 3);
        assert_eq!(policy.server_error_retries, 1);
        assert_eq!(policy.server_error_delay, Duration::from_secs(2));
    }

    #[test]
    fn test_default_config_values() {
        let config = ChatConfig::default();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.max_tokens, 1000);
        assert!((config.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.history_cap, 100);
        assert!(config.max_image_bytes.is_none());
    }

    #[test]
    fn test_placeholder_and_blank_keys_are_unusable() {
        assert!(!is_usable_key(""));
        assert!(!is_usable_key("   "));
        assert!(!is_usable_key(PLACEHOLDER_API_KEY));
        assert!(is_usable_key("sk-test"));
    }

    #[test]
    fn test_literal_key_ref() {
        let config = ChatConfig {
            api_key_ref: Some("sk-literal".to_string()),
            ..ChatConfig::default()
        };
        assert_eq!(get_api_key(&config).unwrap(), "sk-literal");
        assert_eq!(resolve_credential(&config).as_deref(), Some("sk-literal"));
    }

    #[test]
    fn test_env_key_ref() {
        std::env::set_var("FITTRCK_TEST_KEY_FOR_CONFIG", "sk-from-env");
        let config = ChatConfig {
            api_key_ref: Some("env:FITTRCK_TEST_KEY_FOR_CONFIG".to_string()),
            ..ChatConfig::default()
        };
        assert_eq!(resolve_credential(&config).as_deref(), Some("sk-from-env"));
    }

    #[test]
    fn test_missing_env_and_placeholder_resolve_to_none() {
        let missing = ChatConfig {
            api_key_ref: Some("env:FITTRCK_TEST_KEY_THAT_IS_NEVER_SET".to_string()),
            ..ChatConfig::default()
        };
        assert!(resolve_credential(&missing).is_none());

        let placeholder = ChatConfig {
            api_key_ref: Some(PLACEHOLDER_API_KEY.to_string()),
            ..ChatConfig::default()
        };
        assert!(resolve_credential(&placeholder).is_none());

        let unset = ChatConfig {
            api_key_ref: None,
            ..ChatConfig::default()
        };
        assert!(resolve_credential(&unset).is_none());
    }
}
