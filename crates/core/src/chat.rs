use anyhow::{Context, Result};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "openai/gpt-3.5-turbo";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// The persona every request is constrained to.
pub const PERSONA_PROMPT: &str = "You are a very intelligent psychiatrist ai and only answer to question regarding mental health only and provide the best answer for the user as psychiatrist. Don't answer anything that have nothing to do with mental health";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Body of a chat-completion POST.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

impl ChatRequest {
    /// Builds the two-message conversation: the persona prompt followed by the user's text.
    pub fn new(model: &str, system_prompt: &str, user_text: &str) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![
                ChatMessage {
                    role: Role::System,
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: Role::User,
                    content: user_text.to_string(),
                },
            ],
        }
    }
}

/// Reads `choices[0].message.content` out of a completion body.
///
/// Any other shape (missing `choices`, empty array, non-string content, an
/// error object) yields `None` rather than an error.
pub fn extract_content(body: &serde_json::Value) -> Option<String> {
    body.pointer("/choices/0/message/content")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

// `ChatApi` is the seam between the request lifecycle and the remote model.
// The lifecycle controller only ever depends on this trait, so tests swap in
// `MockChatApi` and never touch the network.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Sends `user_text` under the persona prompt and returns the first
    /// choice's content, or `None` when the response has an unexpected shape.
    async fn complete(&self, user_text: &str) -> Result<Option<String>>;
}

pub struct ChatClientConfig {
    endpoint: String,
    model: String,
    api_key: Option<SecretString>,
    system_prompt: String,
    timeout: Duration,
}

pub struct ChatClientConfigBuilder {
    config: ChatClientConfig,
}

impl ChatClientConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ChatClientConfig::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.config.endpoint = endpoint.to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.config.model = model.to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: Option<&str>) -> Self {
        self.config.api_key = api_key.map(|key| SecretString::from(key.to_string()));
        self
    }

    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.config.system_prompt = prompt.to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn build(self) -> ChatClientConfig {
        self.config
    }
}

impl Default for ChatClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatClientConfig {
    pub fn new() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            system_prompt: PERSONA_PROMPT.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn builder() -> ChatClientConfigBuilder {
        ChatClientConfigBuilder::new()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn api_key(&self) -> Option<&SecretString> {
        self.api_key.as_ref()
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }
}

impl Default for ChatClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ChatClient {
    client: Client,
    config: ChatClientConfig,
}

impl ChatClient {
    pub fn new(config: ChatClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ChatClientConfig {
        &self.config
    }
}

#[async_trait]
impl ChatApi for ChatClient {
    async fn complete(&self, user_text: &str) -> Result<Option<String>> {
        let body = ChatRequest::new(&self.config.model, &self.config.system_prompt, user_text);

        let mut request = self.client.post(&self.config.endpoint).json(&body);
        // Without a key the request still goes out; the endpoint answers 401.
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request
            .send()
            .await
            .context("Chat completion request failed")?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!("Chat endpoint answered with status {}", status);
        }

        let json = response
            .json::<serde_json::Value>()
            .await
            .context("Failed to parse chat completion response")?;

        let content = extract_content(&json);
        if content.is_none() {
            tracing::debug!("Chat completion had no choices[0].message.content: {}", json);
        }
        Ok(content)
    }
}
