//! LLM integration for plan generation
//!
//! [`TextGenerator`] is the seam the plan generator calls through: prompt in,
//! text out. [`ClaudeClient`] implements it against the Anthropic Messages API
//! with bounded retries for transient failures.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::LlmConfig;

const API_VERSION: &str = "2023-06-01";

/// ---------------------------------------------------------------------------
/// Error Types
/// ---------------------------------------------------------------------------

#[derive(Error, Debug, Serialize)]
pub enum LlmError {
  #[error("API key not configured")]
  MissingApiKey,

  #[error("Request failed: {0}")]
  Request(String),

  /// 429 / 5xx / 529: worth another attempt
  #[error("Provider unavailable: {0}")]
  Unavailable(String),

  #[error("API error: {0}")]
  Api(String),

  #[error("Parse error: {0}")]
  Parse(String),
}

impl LlmError {
  pub fn is_retryable(&self) -> bool {
    matches!(self, Self::Request(_) | Self::Unavailable(_))
  }
}

/// ---------------------------------------------------------------------------
/// Generator Seam
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
  pub temperature: f32,
  pub max_tokens: u32,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
  /// Retries are the implementation's concern; an `Err` means attempts are
  /// exhausted or the failure is permanent.
  async fn generate(
    &self,
    system_prompt: &str,
    user_prompt: &str,
    options: GenerationOptions,
  ) -> Result<String, LlmError>;
}

/// ---------------------------------------------------------------------------
/// Claude API Types
/// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ClaudeRequest<'a> {
  model: &'a str,
  max_tokens: u32,
  temperature: f32,
  system: &'a str,
  messages: Vec<ClaudeMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ClaudeMessage<'a> {
  role: &'static str,
  content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
  content: Vec<ContentBlock>,
  stop_reason: Option<String>,
  usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
  #[serde(rename = "type")]
  content_type: String,
  text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
  pub input_tokens: u32,
  pub output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ClaudeErrorResponse {
  error: ClaudeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ClaudeErrorDetail {
  message: String,
}

/// ---------------------------------------------------------------------------
/// Claude Client
/// ---------------------------------------------------------------------------

pub struct ClaudeClient {
  client: Client,
  config: LlmConfig,
}

impl ClaudeClient {
  pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
    if config.api_key.trim().is_empty() {
      return Err(LlmError::MissingApiKey);
    }

    let client = Client::builder()
      .timeout(config.request_timeout)
      .build()
      .map_err(|e| LlmError::Request(e.to_string()))?;

    Ok(Self { client, config })
  }

  /// One request, no retries
  async fn complete_once(
    &self,
    system_prompt: &str,
    user_prompt: &str,
    options: GenerationOptions,
  ) -> Result<(String, Usage), LlmError> {
    let request = ClaudeRequest {
      model: &self.config.model,
      max_tokens: options.max_tokens,
      temperature: options.temperature,
      system: system_prompt,
      messages: vec![ClaudeMessage {
        role: "user",
        content: user_prompt,
      }],
    };

    let response = self
      .client
      .post(&self.config.api_url)
      .header("x-api-key", &self.config.api_key)
      .header("anthropic-version", API_VERSION)
      .header("content-type", "application/json")
      .json(&request)
      .send()
      .await
      .map_err(|e| LlmError::Request(e.to_string()))?;

    let status = response.status();
    let body = response
      .text()
      .await
      .map_err(|e| LlmError::Request(e.to_string()))?;

    if !status.is_success() {
      let message = serde_json::from_str::<ClaudeErrorResponse>(&body)
        .map(|r| r.error.message)
        .unwrap_or_else(|_| format!("HTTP {}: {}", status, body));

      return Err(if is_transient(status) {
        LlmError::Unavailable(message)
      } else {
        LlmError::Api(message)
      });
    }

    let claude_response: ClaudeResponse =
      serde_json::from_str(&body).map_err(|e| LlmError::Parse(e.to_string()))?;

    if claude_response.stop_reason.as_deref() == Some("max_tokens") {
      tracing::warn!(
        output_tokens = claude_response.usage.output_tokens,
        "generation hit the token limit; output may be truncated"
      );
    }

    // Extract text from the first text content block
    let text = claude_response
      .content
      .iter()
      .find(|c| c.content_type == "text")
      .and_then(|c| c.text.clone())
      .ok_or_else(|| LlmError::Parse("No text content in response".to_string()))?;

    Ok((text, claude_response.usage))
  }
}

#[async_trait]
impl TextGenerator for ClaudeClient {
  async fn generate(
    &self,
    system_prompt: &str,
    user_prompt: &str,
    options: GenerationOptions,
  ) -> Result<String, LlmError> {
    let mut attempt = 0;
    loop {
      match self.complete_once(system_prompt, user_prompt, options).await {
        Ok((text, usage)) => {
          tracing::debug!(
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "generation complete"
          );
          return Ok(text);
        }
        Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
          let delay = backoff_delay(self.config.retry_base_delay, attempt);
          attempt += 1;
          tracing::warn!(error = %e, attempt, delay_ms = delay.as_millis() as u64, "retrying generation");
          tokio::time::sleep(delay).await;
        }
        Err(e) => return Err(e),
      }
    }
  }
}

/// `base * 2^attempt`, saturating instead of overflowing
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
  base.saturating_mul(2u32.saturating_pow(attempt))
}

fn is_transient(status: StatusCode) -> bool {
  status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() || status.as_u16() == 529
}

/// ---------------------------------------------------------------------------
/// JSON Extraction
/// ---------------------------------------------------------------------------

/// Strip a markdown code fence around the response, if any. This is the
/// strict path: the result must parse as-is.
pub fn strip_code_fence(text: &str) -> &str {
  let trimmed = text.trim();
  let Some(rest) = trimmed.strip_prefix("```") else {
    return trimmed;
  };

  // Skip language identifier if present
  let body = rest.find('\n').map(|i| &rest[i + 1..]).unwrap_or(rest);
  body
    .trim_end()
    .strip_suffix("```")
    .unwrap_or(body)
    .trim()
}

/// Extract JSON from a chatty response (handles prose around code blocks)
pub fn extract_json(text: &str) -> Result<String, LlmError> {
  // Try direct parse first
  if text.trim().starts_with('{') {
    return Ok(text.trim().to_string());
  }

  // Look for JSON in code blocks
  if let Some(start) = text.find("```json") {
    let start = start + 7;
    if let Some(end) = text[start..].find("```") {
      return Ok(text[start..start + end].trim().to_string());
    }
  }

  // Look for plain code blocks
  if let Some(start) = text.find("```") {
    let start = start + 3;
    // Skip language identifier if present
    let content_start = text[start..]
      .find('\n')
      .map(|i| start + i + 1)
      .unwrap_or(start);
    if let Some(end) = text[content_start..].find("```") {
      return Ok(text[content_start..content_start + end].trim().to_string());
    }
  }

  // Last resort: find first { to last }
  if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
    if start < end {
      return Ok(text[start..=end].to_string());
    }
  }

  Err(LlmError::Parse("Could not extract JSON from response".to_string()))
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_backoff_doubles_and_saturates() {
    let base = Duration::from_millis(500);
    assert_eq!(backoff_delay(base, 0), base);
    assert_eq!(backoff_delay(base, 3), Duration::from_secs(4));
    // Large attempt counts must not overflow
    assert_eq!(backoff_delay(base, 40), base * u32::MAX);
    assert_eq!(backoff_delay(Duration::MAX, 2), Duration::MAX);
  }

  fn test_config(url: String) -> LlmConfig {
    LlmConfig {
      api_key: "test-key".to_string(),
      api_url: url,
      model: "test-model".to_string(),
      max_retries: 2,
      retry_base_delay: Duration::from_millis(1),
      request_timeout: Duration::from_secs(5),
    }
  }

  const OPTIONS: GenerationOptions = GenerationOptions {
    temperature: 0.7,
    max_tokens: 512,
  };

  #[test]
  fn test_strip_code_fence() {
    assert_eq!(strip_code_fence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
    assert_eq!(strip_code_fence("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
    assert_eq!(strip_code_fence("  {\"a\": 1}  "), "{\"a\": 1}");
  }

  #[test]
  fn test_extract_json_code_block() {
    let input = r#"Here's the plan:

```json
{"days": [], "notes": "Good week"}
```

Hope that helps!"#;
    let result = extract_json(input).unwrap();
    assert!(result.contains("Good week"));
  }

  #[test]
  fn test_extract_json_fallback() {
    let input = r#"The plan is {"days": []} as shown."#;
    assert_eq!(extract_json(input).unwrap(), r#"{"days": []}"#);
    assert!(extract_json("no json here").is_err());
  }

  #[test]
  fn test_missing_api_key_rejected() {
    let mut config = test_config("http://localhost".to_string());
    config.api_key = String::new();
    assert!(matches!(ClaudeClient::new(config), Err(LlmError::MissingApiKey)));
  }

  #[tokio::test]
  async fn test_generate_returns_first_text_block() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("POST", "/v1/messages")
      .match_header("x-api-key", "test-key")
      .with_status(200)
      .with_header("content-type", "application/json")
      .with_body(
        r#"{
          "content": [{"type": "text", "text": "{\"days\": []}"}],
          "model": "test-model",
          "stop_reason": "end_turn",
          "usage": {"input_tokens": 10, "output_tokens": 5}
        }"#,
      )
      .expect(1)
      .create_async()
      .await;

    let client = ClaudeClient::new(test_config(format!("{}/v1/messages", server.url()))).unwrap();
    let text = client.generate("system", "user", OPTIONS).await.unwrap();

    assert_eq!(text, r#"{"days": []}"#);
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn test_transient_errors_retry_until_exhausted() {
    let mut server = mockito::Server::new_async().await;
    // 1 attempt + 2 retries
    let mock = server
      .mock("POST", "/v1/messages")
      .with_status(529)
      .with_body(r#"{"error": {"message": "Overloaded"}}"#)
      .expect(3)
      .create_async()
      .await;

    let client = ClaudeClient::new(test_config(format!("{}/v1/messages", server.url()))).unwrap();
    let err = client.generate("system", "user", OPTIONS).await.unwrap_err();

    assert!(matches!(err, LlmError::Unavailable(ref m) if m == "Overloaded"));
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn test_client_errors_are_not_retried() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("POST", "/v1/messages")
      .with_status(400)
      .with_body(r#"{"error": {"message": "max_tokens too large"}}"#)
      .expect(1)
      .create_async()
      .await;

    let client = ClaudeClient::new(test_config(format!("{}/v1/messages", server.url()))).unwrap();
    let err = client.generate("system", "user", OPTIONS).await.unwrap_err();

    assert!(matches!(err, LlmError::Api(_)));
    assert!(!err.is_retryable());
    mock.assert_async().await;
  }
}
