//! Azure OpenAI chat-completions client
//!
//! Used for structuring extracted report text into `ReportSchema` JSON and
//! for translating names and clause comments into Traditional Chinese.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SchemaMismatchError, StructuringError};
use crate::settings::AzureSettings;
use crate::utils::safe_truncate;

/// gpt-4o list price, USD per million tokens
const INPUT_COST_PER_M: f64 = 5.0;
const OUTPUT_COST_PER_M: f64 = 15.0;

static FENCED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:json)?\s*([\s\S]*?)\s*```").unwrap());
static TRAILING_COMMA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").unwrap());

/// Chat message format
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage { role: "user".to_string(), content: content.into() }
    }
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    messages: &'a [ChatMessage],
    temperature: f32,
    max_completion_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageContent,
}

#[derive(Debug, Deserialize)]
struct ChatMessageContent {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

/// Token usage accumulated over one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub calls: u32,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.calls += other.calls;
    }

    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Estimated cost in USD
    pub fn estimated_cost(&self) -> f64 {
        let input = self.prompt_tokens as f64 / 1_000_000.0 * INPUT_COST_PER_M;
        let output = self.completion_tokens as f64 / 1_000_000.0 * OUTPUT_COST_PER_M;
        ((input + output) * 10_000.0).round() / 10_000.0
    }
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub usage: TokenUsage,
}

/// One chat round trip. `temperature: None` uses the client default.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: Option<f32>,
    ) -> Result<Completion, StructuringError>;
}

pub struct AzureChatClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
    max_tokens: u32,
    temperature: f32,
}

impl AzureChatClient {
    pub fn from_settings(settings: &AzureSettings) -> Result<Self, StructuringError> {
        let endpoint = settings
            .endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| StructuringError::NotConfigured("AZURE_OPENAI_ENDPOINT is not set".into()))?;
        let api_key = settings
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| StructuringError::NotConfigured("AZURE_OPENAI_API_KEY is not set".into()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;

        Ok(AzureChatClient {
            client,
            url: chat_url(endpoint, &settings.deployment, &settings.api_version),
            api_key,
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        })
    }
}

fn chat_url(endpoint: &str, deployment: &str, api_version: &str) -> String {
    format!(
        "{}/openai/deployments/{}/chat/completions?api-version={}",
        endpoint.trim_end_matches('/'),
        deployment,
        api_version
    )
}

#[async_trait]
impl ChatClient for AzureChatClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: Option<f32>,
    ) -> Result<Completion, StructuringError> {
        let request = ChatRequest {
            messages,
            temperature: temperature.unwrap_or(self.temperature),
            max_completion_tokens: self.max_tokens,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let response = self
            .client
            .post(&self.url)
            .header("api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(StructuringError::Service { status, body: safe_truncate(&body, 500).to_string() });
        }

        let api_response: ChatResponse = response.json().await?;

        let usage = api_response
            .usage
            .map(|u| TokenUsage { prompt_tokens: u.prompt_tokens, completion_tokens: u.completion_tokens, calls: 1 })
            .unwrap_or(TokenUsage { calls: 1, ..TokenUsage::default() });

        let content = api_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        tracing::debug!(chars = content.len(), tokens = usage.total(), "chat completion received");

        Ok(Completion { content, usage })
    }
}

/// Parse a model reply as a JSON object.
///
/// Tries the reply as-is, then the first fenced code block, then the span
/// from the first `{` to the last `}` (with trailing commas removed).
pub fn parse_llm_json(text: &str) -> Result<Value, SchemaMismatchError> {
    let cleaned = text.trim();
    if cleaned.is_empty() {
        return Err(SchemaMismatchError::MalformedJson("empty response".into()));
    }

    let as_object = |s: &str| serde_json::from_str::<Value>(s).ok().filter(Value::is_object);

    if let Some(v) = as_object(cleaned) {
        return Ok(v);
    }
    if let Some(v) = FENCED_RE.captures(cleaned).and_then(|c| as_object(&c[1])) {
        return Ok(v);
    }
    if let (Some(start), Some(end)) = (cleaned.find('{'), cleaned.rfind('}')) {
        if end > start {
            let span = &cleaned[start..=end];
            if let Some(v) = as_object(span) {
                return Ok(v);
            }
            let fixed = TRAILING_COMMA_RE.replace_all(span, "$1");
            if let Some(v) = as_object(&fixed) {
                return Ok(v);
            }
        }
    }

    Err(SchemaMismatchError::MalformedJson(safe_truncate(cleaned, 100).to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_direct_json() {
        assert_eq!(parse_llm_json(r#" {"a": 1} "#).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_parse_fenced_block() {
        let text = "Here you go:\n```json\n{\"basic_info\": {\"cb_report_no\": \"X\"}}\n```\nDone.";
        assert_eq!(parse_llm_json(text).unwrap()["basic_info"]["cb_report_no"], "X");
    }

    #[test]
    fn test_parse_outer_braces_with_trailing_commas() {
        let text = "Result: {\"series_models\": [{\"model\": \"A\",},], } thanks";
        let v = parse_llm_json(text).unwrap();
        assert_eq!(v["series_models"][0]["model"], "A");
    }

    #[test]
    fn test_parse_failures() {
        assert!(matches!(parse_llm_json(""), Err(SchemaMismatchError::MalformedJson(_))));
        assert!(matches!(parse_llm_json("no json here"), Err(SchemaMismatchError::MalformedJson(_))));
        assert!(parse_llm_json("[1, 2]").is_err());
    }

    #[test]
    fn test_usage_cost() {
        let mut usage = TokenUsage::default();
        usage.add(TokenUsage { prompt_tokens: 1_000_000, completion_tokens: 0, calls: 1 });
        usage.add(TokenUsage { prompt_tokens: 0, completion_tokens: 100_000, calls: 1 });
        assert_eq!(usage.total(), 1_100_000);
        assert_eq!(usage.calls, 2);
        assert!((usage.estimated_cost() - 6.5).abs() < 1e-9);
    }

    #[test]
    fn test_chat_url() {
        assert_eq!(
            chat_url("https://x.openai.azure.com/", "gpt-4o", "2024-12-01-preview"),
            "https://x.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2024-12-01-preview"
        );
    }

    #[test]
    fn test_missing_endpoint_not_configured() {
        let settings = AzureSettings::default();
        assert!(matches!(
            AzureChatClient::from_settings(&settings),
            Err(StructuringError::NotConfigured(_))
        ));
    }
}
