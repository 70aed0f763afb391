//! In-process embedding.
//!
//! The `hashing` engine is a deterministic bag-of-words projection: each
//! lowercase alphanumeric token is hashed to a signed dimension and the
//! result is L2-normalised. Texts sharing words get positive cosine
//! similarity, and no model download is needed.
//!
//! With the `local-embeddings-fastembed` feature, `engine = "fastembed"`
//! runs an ONNX sentence-embedding model. The model is downloaded on first
//! use and kept loaded for the lifetime of the backend.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use docindex_core::backend::{BackendKind, ModelBackend};
use docindex_core::embedding::l2_normalize;
use docindex_core::error::{EmbedError, EmbedResult};

use crate::config::ModelConfig;

enum Engine {
    Hashing,
    #[cfg(feature = "local-embeddings-fastembed")]
    FastEmbed(fastembed_engine::FastEmbedEngine),
}

pub struct LocalBackend {
    model_id: String,
    dims: usize,
    max_batch: usize,
    engine: Engine,
}

impl LocalBackend {
    pub fn new(config: &ModelConfig) -> EmbedResult<Self> {
        let engine = match config.engine.as_str() {
            "hashing" => Engine::Hashing,
            #[cfg(feature = "local-embeddings-fastembed")]
            "fastembed" => Engine::FastEmbed(fastembed_engine::FastEmbedEngine::new(
                config.api_model(),
                config.dims,
            )?),
            #[cfg(not(feature = "local-embeddings-fastembed"))]
            "fastembed" => {
                return Err(EmbedError::Configuration(format!(
                    "model '{}': the fastembed engine requires the local-embeddings-fastembed feature",
                    config.id
                )))
            }
            other => {
                return Err(EmbedError::Configuration(format!(
                    "model '{}': unknown local engine '{}'",
                    config.id, other
                )))
            }
        };

        Ok(Self {
            model_id: config.id.clone(),
            dims: config.dims,
            max_batch: config.max_batch,
            engine,
        })
    }

    /// A hashing backend without a config entry, for tests and tooling.
    pub fn hashing(model_id: impl Into<String>, dims: usize) -> Self {
        Self {
            model_id: model_id.into(),
            dims,
            max_batch: 64,
            engine: Engine::Hashing,
        }
    }
}

#[async_trait]
impl ModelBackend for LocalBackend {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn max_batch(&self) -> usize {
        self.max_batch
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn embed(&self, batch: &[String]) -> EmbedResult<Vec<Vec<f32>>> {
        match &self.engine {
            Engine::Hashing => Ok(batch.iter().map(|t| hash_embed(t, self.dims)).collect()),
            #[cfg(feature = "local-embeddings-fastembed")]
            Engine::FastEmbed(engine) => engine.embed(batch, self.max_batch).await,
        }
    }
}

/// Signed feature hashing over lowercase alphanumeric tokens.
pub fn hash_embed(text: &str, dims: usize) -> Vec<f32> {
    let mut vec = vec![0.0f32; dims];
    if dims == 0 {
        return vec;
    }

    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let digest = Sha256::digest(token.to_lowercase().as_bytes());
        let mut idx_bytes = [0u8; 8];
        idx_bytes.copy_from_slice(&digest[..8]);
        let idx = (u64::from_le_bytes(idx_bytes) % dims as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vec[idx] += sign;
    }

    l2_normalize(&mut vec);
    vec
}

#[cfg(feature = "local-embeddings-fastembed")]
mod fastembed_engine {
    use std::sync::{Arc, Mutex};

    use docindex_core::error::{EmbedError, EmbedResult};

    pub struct FastEmbedEngine {
        model: fastembed::EmbeddingModel,
        loaded: Arc<Mutex<Option<fastembed::TextEmbedding>>>,
    }

    impl FastEmbedEngine {
        pub fn new(name: &str, dims: usize) -> EmbedResult<Self> {
            let (model, expected) = match name {
                "all-minilm-l6-v2" => (fastembed::EmbeddingModel::AllMiniLML6V2, 384),
                "bge-small-en-v1.5" => (fastembed::EmbeddingModel::BGESmallENV15, 384),
                "bge-base-en-v1.5" => (fastembed::EmbeddingModel::BGEBaseENV15, 768),
                "bge-large-en-v1.5" => (fastembed::EmbeddingModel::BGELargeENV15, 1024),
                "nomic-embed-text-v1.5" => (fastembed::EmbeddingModel::NomicEmbedTextV15, 768),
                "multilingual-e5-small" => (fastembed::EmbeddingModel::MultilingualE5Small, 384),
                other => {
                    return Err(EmbedError::Configuration(format!(
                        "unknown fastembed model '{}'",
                        other
                    )))
                }
            };
            if dims != expected {
                return Err(EmbedError::Configuration(format!(
                    "fastembed model '{}' produces {} dims, config says {}",
                    name, expected, dims
                )));
            }
            Ok(Self {
                model,
                loaded: Arc::new(Mutex::new(None)),
            })
        }

        pub async fn embed(&self, batch: &[String], max_batch: usize) -> EmbedResult<Vec<Vec<f32>>> {
            let loaded = Arc::clone(&self.loaded);
            let model = self.model.clone();
            let texts = batch.to_vec();

            tokio::task::spawn_blocking(move || {
                let mut guard = loaded
                    .lock()
                    .map_err(|_| EmbedError::Permanent("fastembed model lock poisoned".into()))?;
                if guard.is_none() {
                    let init = fastembed::TextEmbedding::try_new(
                        fastembed::InitOptions::new(model).with_show_download_progress(false),
                    )
                    .map_err(|e| EmbedError::Transient(format!("failed to load model: {}", e)))?;
                    *guard = Some(init);
                }
                let engine = guard
                    .as_mut()
                    .ok_or_else(|| EmbedError::Permanent("fastembed model not loaded".into()))?;
                engine
                    .embed(texts, Some(max_batch))
                    .map_err(|e| EmbedError::Permanent(format!("local embedding failed: {}", e)))
            })
            .await
            .map_err(|e| EmbedError::Transient(format!("embedding task failed: {}", e)))?
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docindex_core::embedding::dot;

    #[tokio::test]
    async fn test_hashing_is_deterministic_and_unit_length() {
        let backend = LocalBackend::hashing("mini", 384);
        let batch = vec!["the quick brown fox".to_string(), "lazy dog".to_string()];
        let a = backend.embed(&batch).await.unwrap();
        let b = backend.embed(&batch).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
        for v in &a {
            assert_eq!(v.len(), 384);
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_shared_words_score_higher() {
        let fox = hash_embed("the quick brown fox jumps", 384);
        let query = hash_embed("brown fox", 384);
        let other = hash_embed("stock market report", 384);
        // Unit length, so the dot product is the cosine.
        assert!(dot(&fox, &query) > dot(&other, &query));
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(hash_embed("Brown FOX", 64), hash_embed("brown fox", 64));
    }

    #[test]
    fn test_unknown_engine_is_configuration_error() {
        let config: ModelConfig = toml::from_str(
            r#"
id = "m"
backend = "local"
dims = 8
engine = "word2vec"
"#,
        )
        .unwrap();
        assert!(matches!(
            LocalBackend::new(&config),
            Err(EmbedError::Configuration(_))
        ));
    }
}
