//! Embedding client: content-hash cache in front of an OpenAI-compatible
//! `/embeddings` endpoint, with retry and batching.

pub mod cache;
pub mod provider;
pub mod retry;

pub use cache::EmbeddingCache;
pub use provider::EmbeddingClient;
pub use retry::RetryConfig;

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
  #[error("embedding API misconfigured: {0}")]
  ApiConfig(String),
  #[error("embedding API transport failure: {0}")]
  ApiTransport(String),
  #[error("embedding API protocol violation: {0}")]
  ApiProtocol(String),
}

/// Embed `texts` in original order, serving cache hits for free and only
/// calling the remote API for texts whose content hash isn't cached yet.
/// Populates the cache with any new results before returning.
pub async fn embed_many(client: &EmbeddingClient, cache: &EmbeddingCache, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
  let mut results: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
  let mut misses: Vec<&str> = Vec::new();
  let mut miss_positions: Vec<usize> = Vec::new();

  for (i, &text) in texts.iter().enumerate() {
    if let Some(vector) = cache.get(text) {
      results.push(Some(vector));
    } else {
      results.push(None);
      misses.push(text);
      miss_positions.push(i);
    }
  }

  if !misses.is_empty() {
    let embedded = client.embed_many_uncached(&misses).await?;
    for ((text, position), vector) in misses.iter().zip(miss_positions.iter()).zip(embedded.into_iter()) {
      cache.insert(text, vector.clone());
      results[*position] = Some(vector);
    }
  }

  Ok(
    results
      .into_iter()
      .enumerate()
      .map(|(i, v)| v.unwrap_or_else(|| unreachable!("slot {i} left unfilled")))
      .collect(),
  )
}

pub fn require_api_config(base_url: &str, api_key: &str) -> Result<(), EmbeddingError> {
  if base_url.trim().is_empty() {
    return Err(EmbeddingError::ApiConfig("api.base_url is missing".to_string()));
  }
  if api_key.trim().is_empty() {
    return Err(EmbeddingError::ApiConfig("api.api_key is missing".to_string()));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  #[test]
  fn require_api_config_rejects_blank_fields() {
    assert!(require_api_config("", "key").is_err());
    assert!(require_api_config("http://x", "").is_err());
    assert!(require_api_config("http://x", "key").is_ok());
  }

  #[tokio::test]
  async fn embed_many_uses_cache_and_fills_misses() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/embeddings"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "data": [
          {"embedding": [9.0, 9.0], "index": 0},
        ]
      })))
      .expect(1)
      .mount(&server)
      .await;

    let client = EmbeddingClient::new(server.uri(), "test-key", "text-embedding-3-small");
    let cache = EmbeddingCache::new();
    cache.insert("already cached", vec![1.0, 2.0]);

    let results = embed_many(&client, &cache, &["already cached", "needs embedding"]).await.unwrap();
    assert_eq!(results[0], vec![1.0, 2.0]);
    assert_eq!(results[1], vec![9.0, 9.0]);
    assert_eq!(cache.get("needs embedding"), Some(vec![9.0, 9.0]));
  }

  #[tokio::test]
  async fn retries_on_429_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/embeddings"))
      .respond_with(ResponseTemplate::new(429))
      .up_to_n_times(1)
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/embeddings"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "data": [{"embedding": [0.5], "index": 0}]
      })))
      .mount(&server)
      .await;

    let client = EmbeddingClient::new(server.uri(), "test-key", "model").with_max_batch_size(8);
    let cache = EmbeddingCache::new();
    let results = embed_many(&client, &cache, &["retry me"]).await.unwrap();
    assert_eq!(results[0], vec![0.5]);
  }

  #[tokio::test]
  async fn fails_fast_on_non_retryable_4xx() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/embeddings"))
      .respond_with(ResponseTemplate::new(401))
      .mount(&server)
      .await;

    let client = EmbeddingClient::new(server.uri(), "bad-key", "model");
    let cache = EmbeddingCache::new();
    let err = embed_many(&client, &cache, &["x"]).await.unwrap_err();
    assert!(matches!(err, EmbeddingError::ApiTransport(_)));
  }
}
