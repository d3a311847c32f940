//! Embedding Port: text in, fixed-length vector out.
//!
//! The dimension is configured once and must match the vector field of the
//! memory store; every implementation rejects a vector of the wrong length
//! instead of letting it reach the store.

use std::sync::Arc;

use cm_domain::config::{Config, EmbeddingKind};
use cm_domain::error::{Error, Result};
use cm_domain::retry::{retry, RetryPolicy};

use crate::openai_compat::OpenAiCompatProvider;
use crate::similarity::l2_normalize;
use crate::traits::{EmbeddingsRequest, LlmProvider};

#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Length of every vector this embedder returns.
    fn dimension(&self) -> usize;
}

/// Fail with a contract violation when a vector has the wrong length.
pub fn check_dimension(vector: &[f32], expected: usize) -> Result<()> {
    if vector.len() != expected {
        return Err(Error::ContractViolation(format!(
            "embedding has {} dimensions, store expects {expected}",
            vector.len()
        )));
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider-backed embedder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Calls an OpenAI-compatible `/embeddings` endpoint under bounded retry.
pub struct ProviderEmbedder {
    provider: Arc<dyn LlmProvider>,
    model: String,
    dimension: usize,
    policy: RetryPolicy,
}

impl ProviderEmbedder {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        model: impl Into<String>,
        dimension: usize,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            dimension,
            policy,
        }
    }
}

#[async_trait::async_trait]
impl Embedder for ProviderEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let req = EmbeddingsRequest {
            input: vec![text.to_owned()],
            model: Some(self.model.clone()),
        };
        let provider = self.provider.as_ref();
        let resp = retry(&self.policy, "embed", Error::is_transient, |_| {
            provider.embeddings(&req)
        })
        .await?;

        let vector = resp
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| Error::Generation {
                provider: self.provider.provider_id().to_owned(),
                status: None,
                message: "embeddings response contained no vectors".into(),
            })?;
        check_dimension(&vector, self.dimension)?;
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Offline hash embedder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Deterministic feature-hashing embedder: lowercase word unigrams and
/// bigrams are hashed (FNV-1a) into signed buckets, then L2-normalized.
/// Texts sharing vocabulary land close together; no network involved.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        let words: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();

        let mut add = |feature: &str, weight: f32| {
            let h = fnv1a(feature.as_bytes());
            let bucket = (h % self.dimension as u64) as usize;
            let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign * weight;
        };
        for w in &words {
            add(w, 1.0);
        }
        for pair in words.windows(2) {
            add(&format!("{} {}", pair[0], pair[1]), 0.5);
        }

        l2_normalize(&mut v);
        v
    }
}

#[async_trait::async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

/// Build the embedder selected by `[embedding]`.
pub fn create_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    match config.embedding.kind {
        EmbeddingKind::Hash => Ok(Arc::new(HashEmbedder::new(config.embedding.dimension))),
        EmbeddingKind::Provider => {
            let provider = OpenAiCompatProvider::for_embeddings(&config.llm, &config.embedding)?;
            Ok(Arc::new(ProviderEmbedder::new(
                Arc::new(provider),
                config.embedding.model.clone(),
                config.embedding.dimension,
                RetryPolicy::from_config(&config.retry),
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::cosine_similarity;
    use crate::traits::{ChatRequest, ChatResponse, EmbeddingsResponse};
    use cm_domain::capability::LlmCapabilities;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn hash_embedder_is_deterministic_and_sized() {
        let e = HashEmbedder::new(64);
        let a = e.embed("Prefers short answers in French").await.unwrap();
        let b = e.embed("Prefers short answers in French").await.unwrap();
        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
    }

    #[test]
    fn shared_vocabulary_scores_higher() {
        let e = HashEmbedder::new(256);
        let q = e.embed_sync("trip to Oslo in March");
        let near = e.embed_sync("user is planning a trip to Oslo");
        let far = e.embed_sync("rust borrow checker lifetimes");
        assert!(cosine_similarity(&q, &near) > cosine_similarity(&q, &far));
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let v = HashEmbedder::new(8).embed_sync("   ");
        assert!(v.iter().all(|x| *x == 0.0));
    }

    /// Fails once with a 503, then returns a vector of `len` elements.
    struct FlakyEmbeddings {
        calls: AtomicU32,
        len: usize,
        caps: LlmCapabilities,
    }

    #[async_trait::async_trait]
    impl LlmProvider for FlakyEmbeddings {
        async fn chat(&self, _req: &ChatRequest) -> Result<ChatResponse> {
            Err(Error::Other("unused".into()))
        }

        async fn embeddings(&self, _req: &EmbeddingsRequest) -> Result<EmbeddingsResponse> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(Error::Generation {
                    provider: "flaky".into(),
                    status: Some(503),
                    message: "unavailable".into(),
                });
            }
            Ok(EmbeddingsResponse {
                embeddings: vec![vec![0.1; self.len]],
            })
        }

        fn capabilities(&self) -> &LlmCapabilities {
            &self.caps
        }

        fn provider_id(&self) -> &str {
            "flaky"
        }

        fn default_model(&self) -> &str {
            "flaky"
        }
    }

    fn flaky(len: usize) -> Arc<FlakyEmbeddings> {
        Arc::new(FlakyEmbeddings {
            calls: AtomicU32::new(0),
            len,
            caps: LlmCapabilities::default(),
        })
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::once().with_attempts(3)
    }

    #[tokio::test]
    async fn provider_embedder_retries_transient_failure() {
        let provider = flaky(4);
        let e = ProviderEmbedder::new(provider.clone(), "m", 4, fast_policy());
        let v = e.embed("hello").await.unwrap();
        assert_eq!(v.len(), 4);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_contract_violation() {
        let e = ProviderEmbedder::new(flaky(3), "m", 4, fast_policy());
        let err = e.embed("hello").await.unwrap_err();
        assert!(matches!(err, Error::ContractViolation(_)));
    }

    #[test]
    fn hash_kind_needs_no_credentials() {
        let mut config = Config::default();
        config.embedding.kind = EmbeddingKind::Hash;
        config.embedding.dimension = 32;
        let e = create_embedder(&config).unwrap();
        assert_eq!(e.dimension(), 32);
    }
}
