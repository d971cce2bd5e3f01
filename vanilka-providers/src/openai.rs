//! OpenAI-compatible chat completion client

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::base::{LLMProvider, LLMResponse, Message, ProviderError, ProviderResult};
use vanilka_core::config::ProviderConfig;

/// Used when no base URL is configured
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: i64,
    #[serde(default)]
    completion_tokens: i64,
    #[serde(default)]
    total_tokens: i64,
}

/// Client for `/chat/completions` on OpenAI or any compatible gateway
pub struct OpenAIClient {
    client: Client,
    api_base: String,
    api_key: String,
    default_model: String,
    extra_headers: HashMap<String, String>,
}

impl OpenAIClient {
    pub fn new(
        api_key: impl Into<String>,
        api_base: Option<String>,
        default_model: impl Into<String>,
        extra_headers: Option<HashMap<String, String>>,
    ) -> Self {
        let api_base = api_base
            .map(|base| base.trim().trim_end_matches('/').to_string())
            .filter(|base| !base.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_else(|_| Client::new()),
            api_base,
            api_key: api_key.into(),
            default_model: default_model.into(),
            extra_headers: extra_headers.unwrap_or_default(),
        }
    }

    pub fn from_config(config: &ProviderConfig, default_model: impl Into<String>) -> Self {
        Self::new(
            config.api_key.clone(),
            config.api_base.clone(),
            default_model,
            config.extra_headers.clone(),
        )
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn apply_headers(&self, mut req_builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if !self.api_key.is_empty() {
            req_builder = req_builder.bearer_auth(&self.api_key);
        }
        for (key, value) in &self.extra_headers {
            req_builder = req_builder.header(key, value);
        }
        req_builder
    }

    fn parse_response(response: ChatCompletionResponse) -> ProviderResult<LLMResponse> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("No choices in response".to_string()))?;

        let mut usage = HashMap::new();
        usage.insert("prompt_tokens".to_string(), response.usage.prompt_tokens);
        usage.insert(
            "completion_tokens".to_string(),
            response.usage.completion_tokens,
        );
        usage.insert("total_tokens".to_string(), response.usage.total_tokens);

        Ok(LLMResponse {
            content: choice.message.content,
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
            usage,
        })
    }
}

#[async_trait]
impl LLMProvider for OpenAIClient {
    async fn chat(
        &self,
        messages: Vec<Message>,
        model: Option<String>,
        max_tokens: u32,
        temperature: f32,
    ) -> ProviderResult<LLMResponse> {
        let model = model.unwrap_or_else(|| self.default_model.clone());
        let request = ChatCompletionRequest {
            model: &model,
            messages: &messages,
            max_tokens,
            temperature,
        };

        debug!(
            "Sending chat request to {} with model {} ({} messages)",
            self.api_base,
            model,
            messages.len()
        );

        let url = format!("{}/chat/completions", self.api_base);
        let response = self
            .apply_headers(self.client.post(&url).json(&request))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::ApiError(format!(
                "HTTP {}: {}",
                status, error_text
            )));
        }

        let response_data: ChatCompletionResponse = response.json().await?;
        let parsed = Self::parse_response(response_data)?;
        debug!(
            "Chat completion finished ({}), total tokens: {}",
            parsed.finish_reason,
            parsed.usage.get("total_tokens").copied().unwrap_or_default()
        );
        Ok(parsed)
    }

    fn get_default_model(&self) -> String {
        self.default_model.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[test]
    fn test_default_base() {
        let client = OpenAIClient::new("sk", None, "gpt-4o-mini", None);
        assert_eq!(client.api_base(), DEFAULT_API_BASE);

        let client = OpenAIClient::new("sk", Some("https://openrouter.ai/api/v1/".into()), "m", None);
        assert_eq!(client.api_base(), "https://openrouter.ai/api/v1");

        let client = OpenAIClient::new("sk", Some("  ".into()), "m", None);
        assert_eq!(client.api_base(), DEFAULT_API_BASE);
    }

    #[tokio::test]
    async fn test_chat_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_header("x-title", "vanilka")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "model": "gpt-4o-mini",
                "max_tokens": 1000,
                "messages": [
                    {"role": "system", "content": "be nice"},
                    {"role": "user", "content": "hi"}
                ]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"choices":[{"message":{"role":"assistant","content":"Hello!"},"finish_reason":"stop"}],
                    "usage":{"prompt_tokens":5,"completion_tokens":2,"total_tokens":7}}"#,
            )
            .create_async()
            .await;

        let mut headers = HashMap::new();
        headers.insert("X-Title".to_string(), "vanilka".to_string());
        let client = OpenAIClient::new("sk-test", Some(server.url()), "gpt-4o-mini", Some(headers));
        let response = client
            .chat(
                vec![Message::system("be nice"), Message::user("hi")],
                None,
                1000,
                0.7,
            )
            .await
            .unwrap();

        assert_eq!(response.text(), Some("Hello!"));
        assert_eq!(response.usage.get("total_tokens"), Some(&7));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_chat_http_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body("rate limited")
            .create_async()
            .await;

        let client = OpenAIClient::new("sk-test", Some(server.url()), "gpt-4o-mini", None);
        let err = client
            .chat(vec![Message::user("hi")], None, 100, 0.7)
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::ApiError(ref msg) if msg.contains("429")));
    }

    #[tokio::test]
    async fn test_chat_without_choices() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[]}"#)
            .create_async()
            .await;

        let client = OpenAIClient::new("sk-test", Some(server.url()), "gpt-4o-mini", None);
        let err = client
            .chat(vec![Message::user("hi")], None, 100, 0.7)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }
}
