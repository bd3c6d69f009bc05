//! HTTP client for an OpenAI-compatible `/embeddings` endpoint.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::retry::{RetryConfig, backoff_delay, is_retryable_status};
use crate::EmbeddingError;

const DEFAULT_MAX_BATCH_SIZE: usize = 64;

#[derive(Debug, Clone)]
pub struct EmbeddingClient {
  http: reqwest::Client,
  base_url: String,
  api_key: String,
  model: String,
  max_batch_size: usize,
  retry: RetryConfig,
}

impl EmbeddingClient {
  pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
    Self {
      http: reqwest::Client::new(),
      base_url: base_url.into(),
      api_key: api_key.into(),
      model: model.into(),
      max_batch_size: DEFAULT_MAX_BATCH_SIZE,
      retry: RetryConfig::default(),
    }
  }

  pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
    self.max_batch_size = max_batch_size.max(1);
    self
  }

  pub fn max_batch_size(&self) -> usize {
    self.max_batch_size
  }

  /// Embed a single batch of texts, retrying on 429/5xx with exponential backoff.
  /// Other 4xx responses fail fast.
  pub async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if texts.is_empty() {
      return Ok(Vec::new());
    }

    let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
    let request = EmbeddingRequest {
      model: &self.model,
      input: texts.to_vec(),
    };

    let mut attempt = 0u32;
    loop {
      let response = self
        .http
        .post(&url)
        .bearer_auth(&self.api_key)
        .json(&request)
        .send()
        .await
        .map_err(|err| EmbeddingError::ApiTransport(err.to_string()))?;

      let status = response.status();
      if status.is_success() {
        let body: EmbeddingResponse = response
          .json()
          .await
          .map_err(|err| EmbeddingError::ApiProtocol(format!("malformed embeddings response: {err}")))?;

        if body.data.len() != texts.len() {
          return Err(EmbeddingError::ApiProtocol(format!(
            "expected {} embeddings, got {}",
            texts.len(),
            body.data.len()
          )));
        }
        let mut ordered: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        for item in body.data {
          if item.index >= ordered.len() {
            return Err(EmbeddingError::ApiProtocol(format!("embedding index {} out of range", item.index)));
          }
          ordered[item.index] = Some(item.embedding);
        }
        let results = ordered
          .into_iter()
          .enumerate()
          .map(|(i, v)| v.ok_or_else(|| EmbeddingError::ApiProtocol(format!("missing embedding at index {i}"))))
          .collect::<Result<Vec<_>, _>>()?;
        return Ok(results);
      }

      if !is_retryable_status(status) || attempt + 1 >= self.retry.max_attempts {
        let body = response.text().await.unwrap_or_default();
        return Err(EmbeddingError::ApiTransport(format!("embeddings request failed: {status} {body}")));
      }

      let delay = backoff_delay(&self.retry, attempt);
      warn!(status = %status, attempt, delay_ms = delay.as_millis() as u64, "embedding request failed, retrying");
      tokio::time::sleep(delay).await;
      attempt += 1;
    }
  }

  /// Embed texts in concurrent sub-batches of `max_batch_size`, preserving order.
  pub async fn embed_many_uncached(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if texts.is_empty() {
      return Ok(Vec::new());
    }
    let chunks: Vec<&[&str]> = texts.chunks(self.max_batch_size).collect();
    debug!(texts = texts.len(), batches = chunks.len(), "embedding uncached texts");

    let futures = chunks.iter().map(|chunk| self.embed_batch(chunk));
    let results = futures::future::try_join_all(futures).await?;
    Ok(results.into_iter().flatten().collect())
  }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
  model: &'a str,
  input: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
  data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
  embedding: Vec<f32>,
  #[serde(default)]
  index: usize,
}
