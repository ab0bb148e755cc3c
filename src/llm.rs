use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error, info, instrument};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("API returned status={status} body={body}")]
    Status { status: u16, body: String },
    #[error("no content in completion response")]
    EmptyResponse,
    #[error("failed to parse JSON response: {source}")]
    Parse {
        raw: String,
        #[source]
        source: serde_json::Error,
    },
}

impl LlmError {
    /// True when the service answered but the content was not valid JSON.
    pub fn is_parse(&self) -> bool {
        matches!(self, LlmError::Parse { .. })
    }
}

/// Remote text completion. One attempt per call; callers decide what to do on error.
#[async_trait]
pub trait TextCompletion: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;

    /// Asks for a JSON answer and parses it.
    async fn generate_structured(&self, prompt: &str) -> Result<Value, LlmError>;
}

pub struct OpenAiTextClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiTextClient {
    pub fn new(client: Client, api_key: String, base_url: String, model: String) -> Self {
        Self { client, api_key, base_url: base_url.trim_end_matches('/').to_string(), model }
    }

    async fn chat(&self, body: Value) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        let status = response.status();
        let response_text = response.text().await.map_err(|e| LlmError::Http(e.to_string()))?;

        if !status.is_success() {
            error!("❌ Chat completion failed with status {}: {}", status, preview(&response_text, 300));
            return Err(LlmError::Status { status: status.as_u16(), body: response_text });
        }

        // An envelope we cannot read is still a transport-level failure, not a content parse failure.
        let parsed: ChatResponse = serde_json::from_str(&response_text)
            .map_err(|e| LlmError::Http(format!("unreadable completion envelope: {e}")))?;

        parsed
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)
    }
}

#[async_trait]
impl TextCompletion for OpenAiTextClient {
    #[instrument(skip(self, prompt), fields(model = %self.model, prompt_len = prompt.len()))]
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        debug!("📝 Prompt preview: {}", preview(prompt, 100));
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": 1000,
            "temperature": 0.7
        });
        let content = self.chat(body).await?;
        info!("✅ Text completion received ({} chars)", content.len());
        Ok(content)
    }

    #[instrument(skip(self, prompt), fields(model = %self.model, prompt_len = prompt.len()))]
    async fn generate_structured(&self, prompt: &str) -> Result<Value, LlmError> {
        debug!("📝 Structured prompt preview: {}", preview(prompt, 100));
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "You are a helpful assistant that returns valid JSON."},
                {"role": "user", "content": format!("{prompt}\n\nReturn the response as valid JSON.")}
            ],
            "max_tokens": 1000,
            "temperature": 0.3,
            "response_format": {"type": "json_object"}
        });
        let content = self.chat(body).await?;
        let value = parse_structured(&content)?;
        info!("✅ Structured completion parsed ({} chars)", content.len());
        Ok(value)
    }
}

/// Parses model output as JSON, tolerating a surrounding markdown code fence.
pub fn parse_structured(content: &str) -> Result<Value, LlmError> {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);

    serde_json::from_str(unfenced.trim()).map_err(|source| {
        error!("❌ JSON parsing error: {} (raw: {})", source, preview(content, 200));
        LlmError::Parse { raw: content.to_string(), source }
    })
}

pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...[{} chars total]", &text[..idx], text.chars().count()),
        None => text.to_string(),
    }
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}
