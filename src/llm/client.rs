//! OpenAI-compatible chat client for the local inference server

use std::time::Duration;

use async_trait::async_trait;
use backoff::{future::retry, Error as BackoffError, ExponentialBackoff};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::tool_use::{ChatMessage, Tool};
use super::{ChatError, Completion, CompletionBackend};

/// Connection settings for [`ChatClient`]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL including the `/v1` prefix (e.g. "http://localhost:8000/v1")
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub request_timeout: Duration,
    /// Give up retrying transient failures after this long
    pub retry_max_elapsed: Duration,
    /// Forwarded as `chat_template_kwargs.enable_thinking` when set
    pub enable_thinking: Option<bool>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [Tool],
    temperature: f64,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    chat_template_kwargs: Option<serde_json::Value>,
}

fn no_tools(tools: &&[Tool]) -> bool {
    tools.is_empty()
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

/// Model card returned by `GET /models`
#[derive(Debug, Clone, Deserialize)]
pub struct ModelCard {
    pub id: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub owned_by: String,
    #[serde(default)]
    pub max_model_len: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelCard>,
}

/// Client for the `/chat/completions` endpoint with tool support
#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl ChatClient {
    /// Create a new chat client
    pub fn new(config: ClientConfig) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ChatError::Unavailable(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(4),
            max_elapsed_time: Some(self.config.retry_max_elapsed),
            ..Default::default()
        }
    }

    /// List the models served by the backend
    pub async fn list_models(&self) -> Result<Vec<ModelCard>, ChatError> {
        let response = self
            .http
            .get(self.endpoint("models"))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| ChatError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ChatError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let list: ModelList = response
            .json()
            .await
            .map_err(|e| ChatError::InvalidResponse(e.to_string()))?;
        Ok(list.data)
    }

    /// Send a chat request with optional tools
    ///
    /// Connection failures, 429 and 5xx responses are retried with
    /// exponential backoff; a connection that never succeeds surfaces as
    /// [`ChatError::Unavailable`].
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[Tool],
    ) -> Result<Completion, ChatError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages,
            tools,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream: false,
            chat_template_kwargs: self
                .config
                .enable_thinking
                .map(|enabled| serde_json::json!({ "enable_thinking": enabled })),
        };
        let url = self.endpoint("chat/completions");

        let operation = || async {
            let response = self
                .http
                .post(&url)
                .bearer_auth(&self.config.api_key)
                .json(&request)
                .send()
                .await
                .map_err(|e| {
                    warn!(error = %e, "inference server request failed");
                    BackoffError::transient(ChatError::Unavailable(e.to_string()))
                })?;

            let status = response.status();
            if status.is_success() {
                return response
                    .json::<ChatResponse>()
                    .await
                    .map_err(|e| BackoffError::permanent(ChatError::InvalidResponse(e.to_string())));
            }

            let message = response.text().await.unwrap_or_default();
            let error = ChatError::Api {
                status: status.as_u16(),
                message,
            };
            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                Err(BackoffError::transient(error))
            } else {
                Err(BackoffError::permanent(error))
            }
        };

        let response = retry(self.backoff(), operation).await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or(ChatError::EmptyResponse)?;

        debug!(
            has_content = choice.message.content.is_some(),
            tool_calls = choice.message.tool_calls.as_ref().map_or(0, |c| c.len()),
            "chat completion received"
        );

        Ok(Completion {
            content: choice.message.content,
            tool_calls: choice.message.tool_calls.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl CompletionBackend for ChatClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[Tool],
    ) -> Result<Completion, ChatError> {
        self.chat(messages, tools).await
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClientConfig {
        ClientConfig {
            base_url: "http://localhost:8000/v1/".to_string(),
            model: "test-model".to_string(),
            api_key: "not-needed".to_string(),
            temperature: 0.7,
            max_tokens: 100,
            request_timeout: Duration::from_secs(5),
            retry_max_elapsed: Duration::from_secs(1),
            enable_thinking: Some(false),
        }
    }

    #[test]
    fn test_endpoint_joins_without_double_slash() {
        let client = ChatClient::new(config()).unwrap();
        assert_eq!(
            client.endpoint("chat/completions"),
            "http://localhost:8000/v1/chat/completions"
        );
    }

    #[test]
    fn test_request_omits_empty_tools() {
        let messages = vec![ChatMessage::user("hi")];
        let request = ChatRequest {
            model: "m",
            messages: &messages,
            tools: &[],
            temperature: 0.1,
            max_tokens: 10,
            stream: false,
            chat_template_kwargs: Some(serde_json::json!({"enable_thinking": false})),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("tools").is_none());
        assert_eq!(json["chat_template_kwargs"]["enable_thinking"], false);
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn test_response_parses_string_arguments() {
        let body = r#"{
            "id": "x", "model": "m",
            "choices": [{"index": 0, "finish_reason": "tool_calls", "message": {
                "role": "assistant", "content": null,
                "tool_calls": [{"id": "call_1", "type": "function",
                    "function": {"name": "calculator", "arguments": "{\"expression\": \"2+2\"}"}}]
            }}]
        }"#;
        let response: ChatResponse = serde_json::from_str(body).unwrap();
        let call = &response.choices[0].message.tool_calls.as_ref().unwrap()[0];
        assert_eq!(call.function.parsed_arguments().unwrap()["expression"], "2+2");
    }

    #[tokio::test]
    #[ignore = "Requires a running inference server on localhost:8000"]
    async fn test_live_chat() {
        let client = ChatClient::new(config()).unwrap();
        let result = client.chat(&[ChatMessage::user("Say hi")], &[]).await;
        assert!(result.is_ok());
    }
}
