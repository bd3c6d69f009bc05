//! Streaming chat-completion client for an OpenAI-compatible `/chat/completions`
//! endpoint, parsed directly off the server-sent-event byte stream.

use std::pin::Pin;

use async_trait::async_trait;
use dyn_clone::DynClone;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
  #[error("chat API misconfigured: {0}")]
  ApiConfig(String),
  #[error("chat API transport failure: {0}")]
  ApiTransport(String),
  #[error("chat API protocol violation: {0}")]
  ApiProtocol(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
  pub role: &'static str,
  pub content: String,
}

impl ChatMessage {
  pub fn system(content: impl Into<String>) -> Self {
    Self {
      role: "system",
      content: content.into(),
    }
  }
  pub fn user(content: impl Into<String>) -> Self {
    Self {
      role: "user",
      content: content.into(),
    }
  }
}

#[derive(Debug, Clone)]
pub enum ChatEvent {
  /// One incremental piece of assistant text.
  Delta(String),
  /// The stream completed normally.
  Done,
}

pub type ChatEventStream = Pin<Box<dyn Stream<Item = Result<ChatEvent, LlmError>> + Send>>;

#[async_trait]
pub trait ChatProvider: DynClone + Send + Sync {
  fn name(&self) -> &str;
  async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<ChatEventStream, LlmError>;
}
dyn_clone::clone_trait_object!(ChatProvider);

#[derive(Debug, Clone)]
pub struct OpenAiCompatibleChatProvider {
  http: reqwest::Client,
  base_url: String,
  api_key: String,
  model: String,
}

impl OpenAiCompatibleChatProvider {
  pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
    Self {
      http: reqwest::Client::new(),
      base_url: base_url.into(),
      api_key: api_key.into(),
      model: model.into(),
    }
  }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
  model: &'a str,
  messages: &'a [ChatMessage],
  stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
  choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
  #[serde(default)]
  delta: ChatDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChatDelta {
  #[serde(default)]
  content: Option<String>,
}

#[async_trait]
impl ChatProvider for OpenAiCompatibleChatProvider {
  fn name(&self) -> &str {
    "openai-compatible"
  }

  async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<ChatEventStream, LlmError> {
    let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
    let request = ChatRequest {
      model: &self.model,
      messages: &messages,
      stream: true,
    };

    let response = self
      .http
      .post(&url)
      .bearer_auth(&self.api_key)
      .json(&request)
      .send()
      .await
      .map_err(|err| LlmError::ApiTransport(err.to_string()))?;

    if !response.status().is_success() {
      let status = response.status();
      let body = response.text().await.unwrap_or_default();
      return Err(LlmError::ApiTransport(format!("chat completion request failed: {status} {body}")));
    }

    let byte_stream = response.bytes_stream();
    Ok(Box::pin(parse_sse(byte_stream)))
  }
}

/// Parses a newline/`\n\n`-delimited `data: ...` server-sent-event stream into
/// [`ChatEvent`]s, buffering across chunk boundaries since TCP reads don't
/// respect SSE event framing.
fn parse_sse<S>(byte_stream: S) -> impl Stream<Item = Result<ChatEvent, LlmError>>
where
  S: Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
{
  async_stream::stream! {
    let mut buffer = String::new();
    futures::pin_mut!(byte_stream);

    while let Some(next) = byte_stream.next().await {
      let bytes = match next {
        Ok(bytes) => bytes,
        Err(err) => {
          yield Err(LlmError::ApiTransport(err.to_string()));
          return;
        }
      };
      buffer.push_str(&String::from_utf8_lossy(&bytes));

      while let Some(pos) = buffer.find("\n\n") {
        let event = buffer[..pos].to_string();
        buffer.drain(..pos + 2);

        for line in event.lines() {
          let Some(data) = line.strip_prefix("data:") else { continue };
          let data = data.trim();
          if data == "[DONE]" {
            yield Ok(ChatEvent::Done);
            return;
          }
          match serde_json::from_str::<ChatChunk>(data) {
            Ok(chunk) => {
              if let Some(choice) = chunk.choices.into_iter().next() {
                if let Some(content) = choice.delta.content {
                  if !content.is_empty() {
                    yield Ok(ChatEvent::Delta(content));
                  }
                }
              }
            }
            Err(err) => {
              warn!(error = %err, line = data, "malformed chat completion SSE chunk");
              yield Err(LlmError::ApiProtocol(format!("malformed SSE payload: {err}")));
              return;
            }
          }
        }
      }
    }
    yield Ok(ChatEvent::Done);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  #[tokio::test]
  async fn streams_deltas_then_done() {
    let server = MockServer::start().await;
    let body = concat!(
      "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
      "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
      "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
      .and(path("/chat/completions"))
      .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
      .mount(&server)
      .await;

    let provider = OpenAiCompatibleChatProvider::new(server.uri(), "key", "qwen-flash");
    let mut stream = provider.stream_chat(vec![ChatMessage::user("hi")]).await.unwrap();

    let mut deltas = Vec::new();
    let mut saw_done = false;
    while let Some(event) = stream.next().await {
      match event.unwrap() {
        ChatEvent::Delta(text) => deltas.push(text),
        ChatEvent::Done => {
          saw_done = true;
          break;
        }
      }
    }
    assert_eq!(deltas, vec!["Hel".to_string(), "lo".to_string()]);
    assert!(saw_done);
  }

  #[tokio::test]
  async fn non_success_status_fails_fast() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/chat/completions"))
      .respond_with(ResponseTemplate::new(401))
      .mount(&server)
      .await;

    let provider = OpenAiCompatibleChatProvider::new(server.uri(), "bad-key", "model");
    let err = provider.stream_chat(vec![ChatMessage::user("hi")]).await.unwrap_err();
    assert!(matches!(err, LlmError::ApiTransport(_)));
  }
}
