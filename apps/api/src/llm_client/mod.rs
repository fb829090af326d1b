/// LLM client — the single point of entry for all model API calls.
///
/// ARCHITECTURAL RULE: No other module may call the completions API
/// directly. Pipeline stages depend on the `TextCompletionProvider` trait,
/// never on this client's concrete type, so tests can swap in a
/// deterministic stub.
use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
/// The model used for all completion calls.
/// Intentionally hardcoded to prevent accidental drift.
pub const MODEL: &str = "gpt-4o-mini";
const MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("LLM returned empty content")]
    EmptyContent,
}

/// A single completion call: system + user message plus sampling knobs.
#[derive(Debug, Clone)]
pub struct CompletionRequest<'a> {
    pub system: &'a str,
    pub prompt: &'a str,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// The capability every pipeline stage depends on: one prompt in, the
/// model's text out. Carried in `AppState` as `Arc<dyn TextCompletionProvider>`.
#[async_trait]
pub trait TextCompletionProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String, LlmError>;
}

/// Calls the provider and deserializes its text output as JSON against a
/// strict schema `T`. Markdown code fences are stripped first; any schema
/// violation surfaces as `LlmError::Parse`, never a panic.
pub async fn complete_json<T: DeserializeOwned>(
    provider: &dyn TextCompletionProvider,
    request: CompletionRequest<'_>,
) -> Result<T, LlmError> {
    let text = provider.complete(request).await?;
    let text = strip_json_fences(&text);
    serde_json::from_str(text).map_err(LlmError::Parse)
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// The production completions client. Wraps the chat-completions API with
/// per-call timeout and retry on transient failures.
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .expect("Failed to build HTTP client"),
            api_key,
        }
    }
}

#[async_trait]
impl TextCompletionProvider for OpenAiClient {
    /// Retries on 429 and 5xx with exponential backoff; 4xx (malformed
    /// prompt, bad key) returns immediately with the API's message.
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String, LlmError> {
        let request_body = ChatRequest {
            model: MODEL,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: request.system,
                },
                ChatMessage {
                    role: "user",
                    content: request.prompt,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let mut last_error: Option<LlmError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s
                let delay = std::time::Duration::from_millis(1000 * (1 << (attempt - 1)));
                warn!(
                    "LLM call attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(OPENAI_API_URL)
                .bearer_auth(&self.api_key)
                .header("content-type", "application/json")
                .json(&request_body)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(LlmError::Http(e));
                    continue;
                }
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                warn!("LLM API returned {}: {}", status, body);
                last_error = Some(LlmError::Api {
                    status: status.as_u16(),
                    message: body,
                });
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                // Try to parse the structured error message
                let message = serde_json::from_str::<ApiError>(&body)
                    .map(|e| e.error.message)
                    .unwrap_or(body);
                return Err(LlmError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            let chat_response: ChatResponse = response.json().await?;

            if let Some(usage) = &chat_response.usage {
                debug!(
                    "LLM call succeeded: prompt_tokens={}, completion_tokens={}",
                    usage.prompt_tokens, usage.completion_tokens
                );
            }

            return chat_response
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .filter(|c| !c.is_empty())
                .ok_or(LlmError::EmptyContent);
        }

        Err(last_error.unwrap_or(LlmError::RateLimited {
            retries: MAX_RETRIES,
        }))
    }
}

/// Strips ```json ... ``` or ``` ... ``` code fences from LLM output.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// A deterministic provider returning a fixed body, or a fixed error.
    pub struct StaticProvider {
        pub body: Result<String, String>,
    }

    impl StaticProvider {
        pub fn ok(body: &str) -> Self {
            Self {
                body: Ok(body.to_string()),
            }
        }

        pub fn failing(message: &str) -> Self {
            Self {
                body: Err(message.to_string()),
            }
        }
    }

    #[async_trait]
    impl TextCompletionProvider for StaticProvider {
        async fn complete(&self, _request: CompletionRequest<'_>) -> Result<String, LlmError> {
            match &self.body {
                Ok(s) => Ok(s.clone()),
                Err(m) => Err(LlmError::Api {
                    status: 500,
                    message: m.clone(),
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::StaticProvider;
    use super::*;

    #[test]
    fn test_strip_json_fences_with_json_tag() {
        let input = "```json\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_without_tag() {
        let input = "```\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_no_fences() {
        let input = "{\"key\": \"value\"}";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    fn request() -> CompletionRequest<'static> {
        CompletionRequest {
            system: "system",
            prompt: "prompt",
            temperature: 0.1,
            max_tokens: 256,
        }
    }

    #[tokio::test]
    async fn test_complete_json_deserializes_fenced_output() {
        #[derive(Debug, serde::Deserialize)]
        struct Out {
            score: u8,
        }
        let provider = StaticProvider::ok("```json\n{\"score\": 91}\n```");
        let out: Out = complete_json(&provider, request()).await.unwrap();
        assert_eq!(out.score, 91);
    }

    #[tokio::test]
    async fn test_complete_json_surfaces_parse_error() {
        #[derive(Debug, serde::Deserialize)]
        struct Out {
            #[allow(dead_code)]
            score: u8,
        }
        let provider = StaticProvider::ok("I am sorry, I cannot do that.");
        let err = complete_json::<Out>(&provider, request()).await.unwrap_err();
        assert!(matches!(err, LlmError::Parse(_)));
    }
}
