//! Anthropic Claude client.

use super::{LlmHttpConfig, LlmProvider, build_http_client};
use crate::config::LlmConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Anthropic Claude LLM client.
pub struct AnthropicClient {
    /// API key.
    api_key: Option<String>,
    /// API endpoint.
    endpoint: String,
    /// Model to use.
    model: String,
    /// Maximum tokens per response.
    max_tokens: u32,
    /// HTTP client.
    client: reqwest::blocking::Client,
}

impl AnthropicClient {
    /// Default API endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.anthropic.com/v1";

    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "claude-3-5-haiku-20241022";

    /// Default response token budget.
    pub const DEFAULT_MAX_TOKENS: u32 = 4096;

    /// Creates a new Anthropic client reading `ANTHROPIC_API_KEY`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
            model: Self::DEFAULT_MODEL.to_string(),
            max_tokens: Self::DEFAULT_MAX_TOKENS,
            client: build_http_client(LlmHttpConfig::default()),
        }
    }

    /// Creates a client from configuration, falling back to the environment
    /// for the API key.
    #[must_use]
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut client = Self::new().with_http_config(LlmHttpConfig::from_config(config));
        if let Some(key) = &config.api_key {
            client.api_key = Some(key.clone());
        }
        if let Some(model) = &config.model {
            client.model.clone_from(model);
        }
        if let Some(base_url) = &config.base_url {
            client.endpoint.clone_from(base_url);
        }
        client
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the API endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets HTTP client timeouts for LLM requests.
    #[must_use]
    pub fn with_http_config(mut self, config: LlmHttpConfig) -> Self {
        self.client = build_http_client(config);
        self
    }

    /// Whether an API key is available.
    #[must_use]
    pub const fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Returns the configured key once it passes a shape check.
    fn api_key(&self) -> Result<&str> {
        match self.api_key.as_deref() {
            None => Err(Error::operation("anthropic_request", "ANTHROPIC_API_KEY not set")),
            Some(key) if !looks_like_api_key(key) => Err(Error::operation(
                "anthropic_request",
                "invalid API key: want an sk-ant- key of 40+ characters",
            )),
            Some(key) => Ok(key),
        }
    }

    /// Sends one Messages API call and concatenates the text blocks of the reply.
    fn send(&self, system: Option<&str>, user: &str) -> Result<String> {
        let key = self.api_key()?;
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system,
            messages: vec![Message { role: "user", content: user }],
        };
        tracing::debug!(provider = "anthropic", model = %self.model, "Sending completion");

        let response = self
            .client
            .post(format!("{}/messages", self.endpoint))
            .header("x-api-key", key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .map_err(|e| {
                let kind = transport_kind(&e);
                tracing::warn!(provider = "anthropic", kind, error = %e, "Completion transport failure");
                Error::operation("anthropic_request", format!("{kind} failure: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            tracing::warn!(provider = "anthropic", %status, "Completion rejected");
            return Err(Error::operation(
                "anthropic_request",
                format!("API returned status: {status} - {detail}"),
            ));
        }

        let reply: MessagesResponse = response
            .json()
            .map_err(|e| Error::operation("anthropic_response", format!("undecodable body: {e}")))?;
        let text = reply.text();
        if text.is_empty() {
            return Err(Error::operation("anthropic_response", "reply carried no text blocks"));
        }
        Ok(text)
    }
}

const API_VERSION: &str = "2023-06-01";

/// `sk-ant-` prefix, 40 or more characters of `[A-Za-z0-9_-]`.
fn looks_like_api_key(key: &str) -> bool {
    key.len() >= 40
        && key.starts_with("sk-ant-")
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_'))
}

fn transport_kind(e: &reqwest::Error) -> &'static str {
    if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connect"
    } else if e.is_request() {
        "request"
    } else {
        "transport"
    }
}

impl Default for AnthropicClient {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmProvider for AnthropicClient {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn complete(&self, prompt: &str) -> Result<String> {
        self.send(None, prompt)
    }

    fn complete_with_system(&self, system: &str, user: &str) -> Result<String> {
        self.send(Some(system), user)
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ReplyBlock>,
}

impl MessagesResponse {
    fn text(&self) -> String {
        self.content
            .iter()
            .filter(|b| b.kind == "text")
            .map(|b| b.text.as_str())
            .collect()
    }
}

#[derive(Deserialize)]
struct ReplyBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "sk-ant-REDACTED";

    #[test]
    fn test_builder_overrides_defaults() {
        let client = AnthropicClient::new()
            .with_api_key("k")
            .with_endpoint("http://127.0.0.1:1")
            .with_model("claude-test");

        assert_eq!(client.name(), "anthropic");
        assert!(client.has_api_key());
        assert_eq!(client.endpoint, "http://127.0.0.1:1");
        assert_eq!(client.model, "claude-test");
    }

    #[test]
    fn test_from_config_overrides() {
        let config = LlmConfig {
            api_key: Some(KEY.to_string()),
            model: Some("claude-custom".to_string()),
            base_url: Some("http://localhost:9999".to_string()),
            ..LlmConfig::default()
        };
        let client = AnthropicClient::from_config(&config);
        assert!(client.api_key().is_ok());
        assert_eq!(client.model, "claude-custom");
        assert_eq!(client.endpoint, "http://localhost:9999");
    }

    #[test]
    fn test_missing_key_fails_before_network() {
        let mut client = AnthropicClient::new().with_endpoint("http://127.0.0.1:1");
        client.api_key = None;
        let err = client.complete("hello").unwrap_err();
        assert!(err.to_string().contains("not set"));
    }

    #[test]
    fn test_key_shape() {
        assert!(looks_like_api_key(KEY));
        assert!(!looks_like_api_key(""));
        assert!(!looks_like_api_key("sk-ant-"));
        assert!(!looks_like_api_key(&KEY.replace("sk-ant-", "sk-xyz-")));
        assert!(!looks_like_api_key(&format!("{}!@#$", &KEY[..36])));
    }

    #[test]
    fn test_system_prompt_is_omitted_when_absent() {
        let mut request = MessagesRequest {
            model: "m",
            max_tokens: 10,
            system: Some("sys"),
            messages: vec![Message { role: "user", content: "hi" }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["system"], "sys");
        assert_eq!(json["messages"][0]["content"], "hi");

        request.system = None;
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("system").is_none());
    }

    #[test]
    fn test_reply_text_skips_non_text_blocks() {
        let reply: MessagesResponse = serde_json::from_str(
            r#"{"content":[{"type":"text","text":"a"},{"type":"tool_use","id":"x"},{"type":"text","text":"b"}]}"#,
        )
        .unwrap();
        assert_eq!(reply.text(), "ab");
    }
}
