use crate::config::{self, ChatConfig, RetryPolicy};
use crate::connectivity::ConnectivityMonitor;
use crate::error::{ChatError, ChatOutcome};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const SYSTEM_PROMPT: &str = "You are FitTrck, a personal AI nutritionist and kitchen helper. You help users with:
- Analyzing pantry/fridge contents from photos
- Creating personalized meal plans based on available ingredients
- Providing nutrition advice and macro tracking
- Suggesting recipe modifications based on dietary preferences
- Helping with grocery planning and budget-friendly meals

Always be helpful, encouraging, and focus on practical, actionable advice. When users share photos of their pantry or fridge, analyze the visible ingredients and suggest specific meals they can make.";

// Trait defining the chat pipeline seen by the orchestrator
#[async_trait]
pub trait ChatService: Send + Sync {
    /// Sends one user turn and returns the assistant's reply text.
    async fn send(
        &self,
        user_text: &str,
        image: Option<&[u8]>,
        context_preamble: Option<&str>,
    ) -> ChatOutcome;
}

// --- Wire schema ---

#[derive(Serialize, Debug)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<RequestMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize, Debug)]
struct RequestMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Serialize, Debug)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize, Debug)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize, Debug)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChoiceMessage {
    content: String,
}

/// What to do with the response to attempt number `attempt`.
#[derive(Debug, Clone, PartialEq)]
pub enum NextStep {
    Accept,
    Retry(Duration),
    Fail(ChatError),
}

/// Status-code state machine. `attempt` is shared by both retry budgets, so a
/// 5xx after a 429 retry has already used up the single server-error retry.
pub fn next_step(status: u16, attempt: u32, policy: &RetryPolicy) -> NextStep {
    match status {
        200 => NextStep::Accept,
        401 => NextStep::Fail(ChatError::InvalidCredential),
        429 if attempt < policy.rate_limit_retries => {
            NextStep::Retry(policy.rate_limit_delay(attempt))
        }
        429 => NextStep::Fail(ChatError::RateLimited),
        500..=599 if attempt < policy.server_error_retries => {
            NextStep::Retry(policy.server_error_delay)
        }
        500..=599 => NextStep::Fail(ChatError::ServerError(status)),
        other => NextStep::Fail(ChatError::HttpError(other)),
    }
}

/// Joins the profile preamble and the user's text into the outbound user text.
pub fn compose_user_text(user_text: &str, context_preamble: Option<&str>) -> String {
    match context_preamble {
        Some(preamble) if !preamble.trim().is_empty() => {
            format!("{}\n\nUser message: {}", preamble, user_text)
        }
        _ => user_text.to_string(),
    }
}

pub fn image_data_uri(image: &[u8]) -> String {
    format!("data:image/jpeg;base64,{}", STANDARD.encode(image))
}

// --- OpenAI Compatible Pipeline ---

pub struct OpenAIChatClient {
    client: Client,
    config: ChatConfig,
    api_key: Option<String>,
    connectivity: Arc<ConnectivityMonitor>,
}

impl OpenAIChatClient {
    pub fn new(config: ChatConfig, api_key: Option<String>, connectivity: Arc<ConnectivityMonitor>) -> Self {
        Self::with_client(Client::new(), config, api_key, connectivity)
    }

    pub fn with_client(
        client: Client,
        config: ChatConfig,
        api_key: Option<String>,
        connectivity: Arc<ConnectivityMonitor>,
    ) -> Self {
        Self {
            client,
            config,
            api_key,
            connectivity,
        }
    }

    /// Builds a client whose credential is resolved from `config.api_key_ref`.
    pub fn from_config(config: ChatConfig, connectivity: Arc<ConnectivityMonitor>) -> Self {
        let api_key = config::resolve_credential(&config);
        Self::new(config, api_key, connectivity)
    }

    fn build_request(&self, user_text: &str, image: Option<&[u8]>, context_preamble: Option<&str>) -> ChatCompletionRequest<'_> {
        let text = compose_user_text(user_text, context_preamble);

        let user_message = match image {
            Some(image) => RequestMessage {
                role: "user",
                content: MessageContent::Parts(vec![
                    ContentPart::Text { text },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: image_data_uri(image),
                        },
                    },
                ]),
            },
            None => RequestMessage {
                role: "user",
                content: MessageContent::Text(text),
            },
        };

        ChatCompletionRequest {
            model: &self.config.model,
            messages: vec![
                RequestMessage {
                    role: "system",
                    content: MessageContent::Text(SYSTEM_PROMPT.to_string()),
                },
                user_message,
            ],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        }
    }

    // Checks that must pass before anything is sent, in order.
    fn validate(&self, user_text: &str, image: Option<&[u8]>) -> Result<&str, ChatError> {
        if !self.connectivity.is_available() {
            return Err(ChatError::NetworkUnavailable);
        }
        let api_key = self
            .api_key
            .as_deref()
            .filter(|key| config::is_usable_key(key))
            .ok_or(ChatError::InvalidCredential)?;
        if user_text.trim().is_empty() && image.is_none() {
            return Err(ChatError::EmptyInput);
        }
        if let (Some(image), Some(limit)) = (image, self.config.max_image_bytes) {
            if image.len() > limit {
                return Err(ChatError::ImageTooLarge {
                    size: image.len(),
                    limit,
                });
            }
        }
        Ok(api_key)
    }
}

fn map_transport_error(error: reqwest::Error) -> ChatError {
    if error.is_connect() || error.is_timeout() {
        ChatError::NetworkUnavailable
    } else {
        ChatError::InvalidServerResponse
    }
}

fn decode_reply(body: &[u8]) -> ChatOutcome {
    let response: ChatCompletionResponse = serde_json::from_slice(body).map_err(|e| {
        log::error!("Failed to parse chat completion response: {}", e);
        ChatError::Decoding
    })?;
    response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .ok_or_else(|| {
            log::error!("Chat completion response contained no choices");
            ChatError::Decoding
        })
}

#[async_trait]
impl ChatService for OpenAIChatClient {
    async fn send(
        &self,
        user_text: &str,
        image: Option<&[u8]>,
        context_preamble: Option<&str>,
    ) -> ChatOutcome {
        let api_key = self.validate(user_text, image).map_err(|e| {
            log::warn!("Chat request rejected before sending: {:?}", e);
            e
        })?;

        let url = Url::parse(&self.config.endpoint).map_err(|e| {
            log::error!("Invalid chat endpoint '{}': {}", self.config.endpoint, e);
            ChatError::InvalidUrlConfiguration
        })?;

        let request_body = self.build_request(user_text, image, context_preamble);
        let body = serde_json::to_vec(&request_body).map_err(|e| {
            log::error!("Failed to encode chat request: {}", e);
            ChatError::RequestEncoding
        })?;

        log::info!(
            "Sending chat request to {} using model: {} (image: {})",
            url,
            self.config.model,
            image.is_some()
        );

        let mut attempt: u32 = 0;
        loop {
            // Each retry re-enters through the connectivity gate.
            if attempt > 0 && !self.connectivity.is_available() {
                log::warn!("Network went away before retry {}", attempt);
                return Err(ChatError::NetworkUnavailable);
            }

            let response = self
                .client
                .post(url.clone())
                .bearer_auth(api_key)
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone())
                .send()
                .await
                .map_err(|e| {
                    log::error!("Failed to send chat request: {}", e);
                    map_transport_error(e)
                })?;

            let status = response.status().as_u16();
            log::info!("Chat request attempt {} returned status {}", attempt, status);

            match next_step(status, attempt, &self.config.retry) {
                NextStep::Accept => {
                    let bytes = response.bytes().await.map_err(|e| {
                        log::error!("Failed to read chat response body: {}", e);
                        ChatError::InvalidServerResponse
                    })?;
                    return decode_reply(&bytes);
                }
                NextStep::Retry(delay) => {
                    log::warn!(
                        "Chat request got status {}, retrying in {:?} (attempt {})",
                        status,
                        delay,
                        attempt + 1
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                NextStep::Fail(error) => {
                    log::error!("Chat request failed with status {}: {:?}", status, error);
                    return Err(error);
                }
            }
        }
    }
}
