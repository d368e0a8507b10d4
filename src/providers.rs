//! Embedding and generation providers.
//!
//! Defines the [`EmbeddingProvider`] and [`GenerationProvider`] traits the
//! core depends on, plus two implementations:
//!
//! - **[`OpenAiProvider`]** — calls the OpenAI embeddings and chat APIs
//!   with timeout and exponential-backoff retry. In offline mode every
//!   call fails with a transport error, which the answer layer converts
//!   to a refusal.
//! - **[`HashProvider`]** — a deterministic offline stand-in that expands
//!   a SHA-256 digest of the text into an L2-normalized vector. Useful
//!   for tests and fully offline operation; it carries no semantics, so
//!   ranking degrades to the lexical signals.
//!
//! # Retry Strategy
//!
//! HTTP 429 and 5xx responses and network errors are retried with
//! exponential backoff (1s, 2s, 4s, ... capped at 32s). Other 4xx
//! responses fail immediately.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::{EmbeddingConfig, GenerationConfig};
use crate::error::{Error, Result};

/// Converts text to fixed-length numeric vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Vector dimensionality, constant across all calls.
    fn dims(&self) -> usize;
    /// Embed a batch of texts, one vector per input, same order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Phrases a final answer from already-gated citations. Never used to
/// decide what may be cited.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn complete(&self, prompt: &str, max_output_tokens: u32) -> Result<String>;
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors, mismatched lengths, or when either
/// vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

// ============ Deterministic offline provider ============

/// Hash-based embedding stand-in: deterministic, offline, dimension-fixed.
pub struct HashProvider {
    dims: usize,
}

impl HashProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

#[async_trait]
impl EmbeddingProvider for HashProvider {
    fn model_name(&self) -> &str {
        "hash"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_vector(t, self.dims)).collect())
    }
}

/// Expand a SHA-256 digest chain into `dims` floats in `[0, 1]`, then
/// L2-normalize. Identical text always yields the identical vector.
pub fn hash_vector(text: &str, dims: usize) -> Vec<f32> {
    let mut digest = Sha256::digest(text.as_bytes());
    let mut bytes: Vec<u8> = Vec::with_capacity(dims + 32);
    while bytes.len() < dims {
        digest = Sha256::digest(digest);
        bytes.extend_from_slice(&digest);
    }
    bytes.truncate(dims);

    let mut vec: Vec<f32> = bytes.iter().map(|&b| b as f32 / 255.0).collect();
    let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vec {
            *x /= norm;
        }
    }
    vec
}

// ============ OpenAI provider ============

/// Provider backed by the OpenAI embeddings and chat completion APIs.
pub struct OpenAiProvider {
    api_key: String,
    api_url: String,
    embedding_model: String,
    chat_model: String,
    dims: usize,
    timeout_secs: u64,
    max_retries: u32,
    offline: bool,
}

impl OpenAiProvider {
    /// Build a provider from config. The API key comes from the
    /// `OPENAI_API_KEY` environment variable.
    pub fn new(
        embedding: &EmbeddingConfig,
        generation: &GenerationConfig,
        offline: bool,
    ) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
        if api_key.is_empty() && !offline {
            return Err(Error::Transport(
                "OPENAI_API_KEY environment variable not set".to_string(),
            ));
        }
        Ok(Self {
            api_key,
            api_url: embedding.api_url.clone(),
            embedding_model: embedding
                .model
                .clone()
                .unwrap_or_else(|| "text-embedding-3-small".to_string()),
            chat_model: generation.model.clone(),
            dims: embedding.dims,
            timeout_secs: embedding.timeout_secs,
            max_retries: embedding.max_retries,
            offline,
        })
    }

    fn client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
            .map_err(|e| Error::Transport(e.to_string()))
    }

    /// POST a JSON body with the shared retry/backoff policy and return
    /// the parsed response body.
    async fn post_with_retry(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        if self.offline {
            return Err(Error::Transport(
                "offline mode: external providers unavailable".to_string(),
            ));
        }
        let client = self.client()?;
        let url = format!("{}/{}", self.api_url.trim_end_matches('/'), endpoint);

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response
                            .json()
                            .await
                            .map_err(|e| Error::Transport(e.to_string()));
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let message = format!("OpenAI API error {}: {}", status, body_text);

                    // Rate limited or server error: retry.
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(Error::Transport(message));
                        continue;
                    }

                    return Err(Error::Transport(message));
                }
                Err(e) => {
                    last_err = Some(Error::Transport(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| Error::Transport("request failed after retries".to_string())))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.embedding_model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.embedding_model,
            "input": texts,
        });
        let json = self.post_with_retry("embeddings", &body).await?;

        let data = json.get("data").and_then(|d| d.as_array()).ok_or_else(|| {
            Error::Transport("invalid embeddings response: missing data array".to_string())
        })?;

        let mut embeddings = Vec::with_capacity(data.len());
        for item in data {
            let embedding = item
                .get("embedding")
                .and_then(|e| e.as_array())
                .ok_or_else(|| {
                    Error::Transport("invalid embeddings response: missing embedding".to_string())
                })?;
            embeddings.push(
                embedding
                    .iter()
                    .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                    .collect(),
            );
        }
        Ok(embeddings)
    }
}

#[async_trait]
impl GenerationProvider for OpenAiProvider {
    async fn complete(&self, prompt: &str, max_output_tokens: u32) -> Result<String> {
        let body = serde_json::json!({
            "model": self.chat_model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": max_output_tokens,
            "temperature": 0.2,
        });
        let json = self.post_with_retry("chat/completions", &body).await?;

        json.get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| {
                Error::Transport("invalid chat response: missing message content".to_string())
            })
    }
}

/// Instantiate the embedding provider named in the configuration.
pub fn create_embedding_provider(
    embedding: &EmbeddingConfig,
    generation: &GenerationConfig,
    offline: bool,
) -> Result<Box<dyn EmbeddingProvider>> {
    match embedding.provider.as_str() {
        "hash" => Ok(Box::new(HashProvider::new(embedding.dims))),
        "openai" => Ok(Box::new(OpenAiProvider::new(embedding, generation, offline)?)),
        other => Err(Error::Precondition(format!(
            "unknown embedding provider: '{}' (expected hash or openai)",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector_is_zero() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 2.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_cosine_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_hash_vector_deterministic_and_normalized() {
        let a = hash_vector("некоторый текст", 64);
        let b = hash_vector("некоторый текст", 64);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hash_vector_differs_per_text() {
        assert_ne!(hash_vector("alpha", 32), hash_vector("beta", 32));
    }

    #[tokio::test]
    async fn test_hash_provider_batch_order() {
        let provider = HashProvider::new(16);
        let texts = vec!["one".to_string(), "two".to_string()];
        let vecs = provider.embed(&texts).await.unwrap();
        assert_eq!(vecs.len(), 2);
        assert_eq!(vecs[0], hash_vector("one", 16));
        assert_eq!(vecs[1], hash_vector("two", 16));
    }
}
