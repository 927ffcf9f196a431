use crate::error::EmbeddingError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-large";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Longest input, in characters, sent to the embedding API.
pub const MAX_EMBEDDING_INPUT_CHARS: usize = 8_000;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Vector width produced by a known embedding model.
pub fn dimensions_for_model(model: &str) -> usize {
    match model {
        "text-embedding-3-large" => 3_072,
        "text-embedding-3-small" => 1_536,
        _ => 1_536,
    }
}

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Deterministic hashed character-trigram embedder. Needs no network, so it
/// backs offline runs and tests.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = prepare_input(text).to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_sync(text))
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, EmbeddingError> {
        let base_url = base_url.into();
        url::Url::parse(&base_url)
            .map_err(|error| EmbeddingError::InvalidInput(format!("{base_url}: {error}")))?;

        let model = model.into();
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            dimensions: dimensions_for_model(&model),
            model,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let input = prepare_input(text);
        if input.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput(
                "cannot embed empty text".to_string(),
            ));
        }

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::BackendResponse {
                backend: "openai".to_string(),
                details: format!("{status}: {body}"),
            });
        }

        let parsed: EmbeddingResponse = response.json().await?;
        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|datum| datum.embedding)
            .ok_or(EmbeddingError::EmptyResponse)?;

        if vector.len() != self.dimensions {
            return Err(EmbeddingError::BackendResponse {
                backend: "openai".to_string(),
                details: format!(
                    "model {} returned {} dimensions, expected {}",
                    self.model,
                    vector.len(),
                    self.dimensions
                ),
            });
        }

        Ok(vector)
    }
}

/// Newlines flattened to spaces, capped at [`MAX_EMBEDDING_INPUT_CHARS`].
pub fn prepare_input(text: &str) -> String {
    text.replace('\n', " ")
        .chars()
        .take(MAX_EMBEDDING_INPUT_CHARS)
        .collect()
}

#[serde_as]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryPolicy {
    pub attempts: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn no_delay(attempts: u32) -> Self {
        Self {
            attempts,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before retrying after the given 1-based failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

pub async fn embed_with_retry<E>(
    embedder: &E,
    text: &str,
    policy: RetryPolicy,
) -> Result<Vec<f32>, EmbeddingError>
where
    E: Embedder + ?Sized,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        match embedder.embed(text).await {
            Ok(vector) => return Ok(vector),
            Err(error) if attempt < attempts => {
                let delay = policy.delay_after(attempt);
                warn!(attempt, ?delay, %error, "embedding attempt failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => {
                debug!(attempts, %error, "embedding failed after all attempts");
                return Err(error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed_sync("Rationalize the denominator");
        let second = embedder.embed_sync("Rationalize the denominator");
        assert_eq!(first, second);
    }

    #[test]
    fn embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        let vector = embedder.embed_sync("abc");
        assert_eq!(vector.len(), 32);
    }

    #[test]
    fn known_models_map_to_dimensions() {
        assert_eq!(dimensions_for_model("text-embedding-3-large"), 3_072);
        assert_eq!(dimensions_for_model("text-embedding-3-small"), 1_536);
        assert_eq!(dimensions_for_model("something-else"), 1_536);
    }

    #[test]
    fn input_is_flattened_and_truncated() {
        assert_eq!(prepare_input("a\nb"), "a b");
        let long = "z".repeat(MAX_EMBEDDING_INPUT_CHARS + 50);
        assert_eq!(prepare_input(&long).len(), MAX_EMBEDDING_INPUT_CHARS);
    }

    #[test]
    fn retry_delay_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
    }

    struct FlakyEmbedder {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        fn dimensions(&self) -> usize {
            2
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(EmbeddingError::BackendResponse {
                    backend: "fake".to_string(),
                    details: "rate limited".to_string(),
                })
            } else {
                Ok(vec![1.0, 0.0])
            }
        }
    }

    #[tokio::test]
    async fn retry_recovers_from_transient_failures() {
        let embedder = FlakyEmbedder {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let vector = embed_with_retry(&embedder, "text", RetryPolicy::no_delay(3))
            .await
            .expect("third attempt succeeds");
        assert_eq!(vector, vec![1.0, 0.0]);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_gives_up_after_attempts() {
        let embedder = FlakyEmbedder {
            failures: 5,
            calls: AtomicU32::new(0),
        };
        let result = embed_with_retry(&embedder, "text", RetryPolicy::no_delay(3)).await;
        assert!(result.is_err());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn openai_embedder_parses_response() {
        let server = MockServer::start().await;
        let vector: Vec<f32> = vec![0.5; 1_536];
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "data": [{ "embedding": vector }] })),
            )
            .mount(&server)
            .await;

        let embedder = OpenAiEmbedder::new(
            format!("{}/v1/", server.uri()),
            "test-key",
            "text-embedding-3-small",
        )
        .expect("valid base url");
        let embedding = embedder.embed("Simplify\nthe radical").await.expect("embedding");
        assert_eq!(embedding.len(), 1_536);
    }

    #[tokio::test]
    async fn openai_embedder_reports_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let embedder = OpenAiEmbedder::new(
            format!("{}/v1", server.uri()),
            "test-key",
            "text-embedding-3-small",
        )
        .expect("valid base url");
        let error = embedder.embed("query").await.expect_err("429 is an error");
        assert!(matches!(error, EmbeddingError::BackendResponse { .. }));
    }

    #[tokio::test]
    async fn openai_embedder_rejects_empty_input() {
        let embedder =
            OpenAiEmbedder::new("http://localhost:1", "key", "text-embedding-3-small").expect("url");
        let error = embedder.embed(" \n ").await.expect_err("empty input");
        assert!(matches!(error, EmbeddingError::InvalidInput(_)));
    }
}
