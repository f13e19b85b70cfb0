//! OpenAI-compatible chat completions client.

use feedloom_shared::{
    FeedloomError, Result, SummarizeTaskData, TransformerConfig, TranslateTaskData,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::prompts;
use crate::summary::SummaryPayload;
use crate::Transformer;

/// User-Agent string for transformer requests.
const USER_AGENT: &str = concat!("Feedloom/", env!("CARGO_PKG_VERSION"));

/// Transformer backed by an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiTransformer {
    client: Client,
    base_url: String,
    api_key: String,
    default_model: String,
}

/// Why a chat call produced no usable reply. Timeouts are separated out
/// because the summarize path reports them in-band rather than failing.
enum ChatFailure {
    Timeout,
    Failed(FeedloomError),
}

impl OpenAiTransformer {
    /// Build a transformer, reading the API key from the configured env var.
    pub fn new(config: &TransformerConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            FeedloomError::config(format!(
                "transformer API key not found. Set the {} environment variable.",
                config.api_key_env
            ))
        })?;
        Self::with_api_key(config, api_key)
    }

    /// Build a transformer with an explicit API key.
    pub fn with_api_key(config: &TransformerConfig, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| FeedloomError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            default_model: config.default_model.clone(),
        })
    }

    fn model<'a>(&'a self, override_model: Option<&'a str>) -> &'a str {
        override_model.unwrap_or(&self.default_model)
    }

    /// One chat completion round trip: system + user message in, the first
    /// choice's content out.
    async fn chat(
        &self,
        model: &str,
        system: &str,
        user: &str,
    ) -> std::result::Result<String, ChatFailure> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.0,
        };

        debug!(model, input_len = user.len(), "sending chat completion");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ChatFailure::Timeout
                } else {
                    ChatFailure::Failed(FeedloomError::Network(format!("{url}: {e}")))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatFailure::Failed(FeedloomError::Transform(format!(
                "chat completion failed: HTTP {status}: {}",
                body.chars().take(200).collect::<String>()
            ))));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            ChatFailure::Failed(FeedloomError::Transform(format!(
                "invalid chat completion response: {e}"
            )))
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| {
                ChatFailure::Failed(FeedloomError::Transform(
                    "chat completion returned no choices".into(),
                ))
            })
    }
}

#[async_trait::async_trait]
impl Transformer for OpenAiTransformer {
    async fn translate(&self, content: &str, data: &TranslateTaskData) -> Result<String> {
        let system = prompts::translate_system_prompt(data);
        let model = self.model(data.model.as_deref());

        match self.chat(model, &system, content).await {
            Ok(reply) => Ok(reply),
            Err(ChatFailure::Timeout) => Err(FeedloomError::Network(format!(
                "translation request timed out (model {model})"
            ))),
            Err(ChatFailure::Failed(e)) => Err(e),
        }
    }

    async fn summarize(&self, text: &str, data: &SummarizeTaskData) -> Result<SummaryPayload> {
        let system = prompts::summarize_system_prompt(&data.output_lang);
        let model = self.model(data.model.as_deref());

        match self.chat(model, &system, text).await {
            Ok(reply) => SummaryPayload::parse(&reply),
            Err(ChatFailure::Timeout) => {
                warn!(model, "summarization request timed out");
                Ok(SummaryPayload::timeout())
            }
            Err(ChatFailure::Failed(e)) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}
