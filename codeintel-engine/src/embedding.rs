//! Embedding Service: batched, retrying, normalized text→vector inference.
//!
//! Local BERT inference via candle is grounded on the teacher's semantic
//! indexing module (mean pooling + L2 normalization over a `BertModel`
//! loaded from the Hugging Face Hub). The batching/retry/backoff contract
//! and the model-identity mismatch handling are new: the teacher embeds
//! everything in one shot with no retry discipline at all.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::config::{Config, RetryConfig};
use crate::error::{EngineError, ErrorContext, Result};
use crate::types::ModelIdentity;

/// One text-to-vector call. Every returned vector is either L2-normalized to
/// unit length or its index is reported in `zero_norm_indices` and excluded
/// from `vectors`.
#[derive(Debug, Clone)]
pub struct EmbedBatchResult {
    pub vectors: Vec<Option<Vec<f32>>>,
    pub zero_norm_indices: Vec<usize>,
    pub model_identity: ModelIdentity,
}

/// Capability interface for an embedding backend (design note §9's "fixed
/// capability interface... populated at session construction").
pub trait EmbeddingProvider: Send + Sync {
    fn model_identity(&self) -> ModelIdentity;
    fn probe(&self) -> Result<()>;
    fn embed_raw(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, String>;
}

/// Wraps a provider with the batching, retry/backoff, and normalization
/// contract the spec requires independent of the backend.
pub struct EmbeddingService {
    provider: Option<Box<dyn EmbeddingProvider>>,
    batch_max_items: usize,
    batch_max_bytes: usize,
    retry: RetryConfig,
    last_identity: std::sync::Mutex<Option<ModelIdentity>>,
}

impl EmbeddingService {
    pub fn new(provider: Option<Box<dyn EmbeddingProvider>>, config: &Config) -> Self {
        Self {
            provider,
            batch_max_items: config.embedding_batch_max_items,
            batch_max_bytes: config.embedding_batch_max_bytes,
            retry: config.embedding_retry.clone(),
            last_identity: std::sync::Mutex::new(None),
        }
    }

    pub fn is_available(&self) -> bool {
        self.provider.as_ref().map(|p| p.probe().is_ok()).unwrap_or(false)
    }

    pub fn model_identity(&self) -> Option<ModelIdentity> {
        self.provider.as_ref().map(|p| p.model_identity())
    }

    /// `embed(texts, model_requirement) -> [vector]`. Output order always
    /// matches input order. A model-identity change from the last call in
    /// this service's lifetime is reported via the returned identity so
    /// callers can trigger re-embedding rather than mixing dimensions.
    pub fn embed(&self, texts: &[String]) -> Result<EmbedBatchResult> {
        let provider = self.provider.as_ref().ok_or_else(|| EngineError::ProviderUnavailable {
            reason: "no embedding provider registered".to_string(),
            context: ErrorContext::default(),
            remediation: vec![
                "configure embedding_model in .codeintel.toml".to_string(),
                "enable the `semantic` feature".to_string(),
            ],
        })?;

        if let Err(e) = provider.probe() {
            return Err(EngineError::ProviderUnavailable {
                reason: format!("embedding provider probe failed: {e}"),
                context: ErrorContext::default(),
                remediation: vec!["verify the local model cache is reachable".to_string()],
            });
        }

        let identity = provider.model_identity();
        {
            let mut last = self.last_identity.lock().unwrap();
            if let Some(prev) = last.as_ref() {
                if *prev != identity {
                    warn!(
                        prev = %prev.name,
                        new = %identity.name,
                        "embedding model identity changed mid-session; re-embedding required on next index cycle"
                    );
                }
            }
            *last = Some(identity.clone());
        }

        let mut vectors: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut zero_norm_indices = Vec::new();

        for chunk in self.batches(texts) {
            let raw = self.embed_with_retry(provider.as_ref(), &chunk.texts)?;
            for (local_idx, vec) in raw.into_iter().enumerate() {
                let global_idx = chunk.start + local_idx;
                let norm = l2_norm(&vec);
                if norm < 1e-9 {
                    zero_norm_indices.push(global_idx);
                    vectors.push(None);
                } else {
                    let normalized: Vec<f32> = vec.iter().map(|v| v / norm).collect();
                    if normalized.len() != identity.dim {
                        return Err(EngineError::DimensionMismatch {
                            expected: identity.dim,
                            actual: normalized.len(),
                            context: ErrorContext::default(),
                        });
                    }
                    vectors.push(Some(normalized));
                }
            }
        }

        Ok(EmbedBatchResult { vectors, zero_norm_indices, model_identity: identity })
    }

    fn embed_with_retry(
        &self,
        provider: &dyn EmbeddingProvider,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>> {
        let mut attempt = 0u32;
        loop {
            match provider.embed_raw(texts) {
                Ok(vectors) => return Ok(vectors),
                Err(reason) => {
                    attempt += 1;
                    if attempt >= self.retry.max_attempts {
                        return Err(EngineError::ProviderUnavailable {
                            reason,
                            context: ErrorContext::default(),
                            remediation: vec![format!(
                                "retried {} times with exponential backoff; check provider health",
                                attempt
                            )],
                        });
                    }
                    let delay = self.backoff_delay(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying embedding batch");
                    std::thread::sleep(delay);
                }
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.retry.base_delay_ms.saturating_mul(1u64 << attempt.min(16));
        let capped = base.min(self.retry.max_delay_ms);
        let delay_ms = if self.retry.jitter {
            let mut rng = rand::thread_rng();
            rng.gen_range(0..=capped.max(1))
        } else {
            capped
        };
        Duration::from_millis(delay_ms)
    }

    /// Split texts into batches respecting both the item count and total
    /// byte-size caps.
    fn batches(&self, texts: &[String]) -> Vec<Batch> {
        let mut out = Vec::new();
        let mut start = 0;
        while start < texts.len() {
            let mut end = start;
            let mut bytes = 0usize;
            while end < texts.len()
                && (end - start) < self.batch_max_items
                && bytes + texts[end].len() <= self.batch_max_bytes
            {
                bytes += texts[end].len();
                end += 1;
            }
            if end == start {
                // Single oversized text still needs to go out as its own batch.
                end = start + 1;
            }
            out.push(Batch { texts: texts[start..end].to_vec(), start });
            start = end;
        }
        out
    }
}

struct Batch {
    texts: Vec<String>,
    start: usize,
}

impl Batch {
    fn len(&self) -> usize {
        self.texts.len()
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[cfg(feature = "semantic")]
pub mod candle_provider {
    //! Local BERT-based provider, adapted from the teacher's semantic
    //! indexing module: same model resolution table, same mean-pooling +
    //! L2-normalization math, swapped from a one-shot batch call to the
    //! `EmbeddingProvider` capability trait so retries/backoff wrap it
    //! uniformly with any future provider.

    use candle_core::{DType, Device, Tensor};
    use candle_nn::VarBuilder;
    use candle_transformers::models::bert::{BertModel, Config as BertConfig};
    use hf_hub::{api::sync::Api, Repo, RepoType};
    use std::sync::Mutex;
    use tokenizers::Tokenizer;

    use super::EmbeddingProvider;
    use crate::types::ModelIdentity;

    pub struct CandleBertProvider {
        inner: Mutex<Option<(BertModel, Tokenizer, Device)>>,
        identity: ModelIdentity,
    }

    impl CandleBertProvider {
        pub fn new(identity: ModelIdentity) -> Self {
            Self { inner: Mutex::new(None), identity }
        }

        fn ensure_loaded(&self) -> std::result::Result<(), String> {
            let mut guard = self.inner.lock().unwrap();
            if guard.is_some() {
                return Ok(());
            }
            let device = Device::Cpu;
            let api = Api::new().map_err(|e| e.to_string())?;
            let revision = self.identity.revision.clone().unwrap_or_else(|| "main".to_string());
            let repo = api.repo(Repo::with_revision(self.identity.name.clone(), RepoType::Model, revision));
            let config_path = repo.get("config.json").map_err(|e| e.to_string())?;
            let tokenizer_path = repo.get("tokenizer.json").map_err(|e| e.to_string())?;
            let weights_path = repo.get("model.safetensors").map_err(|e| e.to_string())?;

            let config_str = std::fs::read_to_string(config_path).map_err(|e| e.to_string())?;
            let bert_config: BertConfig = serde_json::from_str(&config_str).map_err(|e| e.to_string())?;
            let tokenizer = Tokenizer::from_file(tokenizer_path).map_err(|e| e.to_string())?;

            let vb = unsafe {
                VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, &device)
                    .map_err(|e| e.to_string())?
            };
            let model = BertModel::load(vb, &bert_config).map_err(|e| e.to_string())?;

            *guard = Some((model, tokenizer, device));
            Ok(())
        }
    }

    impl EmbeddingProvider for CandleBertProvider {
        fn model_identity(&self) -> ModelIdentity {
            self.identity.clone()
        }

        fn probe(&self) -> crate::error::Result<()> {
            self.ensure_loaded().map_err(|reason| crate::error::EngineError::ProviderUnavailable {
                reason,
                context: crate::error::ErrorContext::default(),
                remediation: vec!["verify network access to the Hugging Face Hub".to_string()],
            })
        }

        fn embed_raw(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, String> {
            self.ensure_loaded()?;
            let guard = self.inner.lock().unwrap();
            let (model, tokenizer, device) = guard.as_ref().expect("loaded above");

            let encodings = tokenizer
                .encode_batch(texts.to_vec(), true)
                .map_err(|e| e.to_string())?;
            let max_len = encodings.iter().map(|e| e.len()).max().unwrap_or(0);

            let mut all_ids = Vec::new();
            let mut all_mask = Vec::new();
            let mut all_types = Vec::new();
            for enc in &encodings {
                let mut ids = enc.get_ids().to_vec();
                let mut mask = enc.get_attention_mask().to_vec();
                let mut types = enc.get_type_ids().to_vec();
                ids.resize(max_len, 0);
                mask.resize(max_len, 0);
                types.resize(max_len, 0);
                all_ids.extend(ids.iter().map(|&v| v as i64));
                all_mask.extend(mask.iter().map(|&v| v as f32));
                all_types.extend(types.iter().map(|&v| v as i64));
            }

            let n = texts.len();
            let ids_t = Tensor::from_vec(all_ids, (n, max_len), device).map_err(|e| e.to_string())?;
            let types_t = Tensor::from_vec(all_types, (n, max_len), device).map_err(|e| e.to_string())?;
            let mask_t =
                Tensor::from_vec(all_mask.clone(), (n, max_len), device).map_err(|e| e.to_string())?;

            let output = model.forward(&ids_t, &types_t, None).map_err(|e| e.to_string())?;

            let mask_expanded = mask_t
                .unsqueeze(2)
                .map_err(|e| e.to_string())?
                .broadcast_as(output.shape())
                .map_err(|e| e.to_string())?;
            let masked = output.mul(&mask_expanded).map_err(|e| e.to_string())?;
            let summed = masked.sum(1).map_err(|e| e.to_string())?;
            let counts = mask_t.sum(1).map_err(|e| e.to_string())?.clamp(1e-9f32, f32::MAX).map_err(|e| e.to_string())?;
            let pooled = summed
                .broadcast_div(&counts.unsqueeze(1).map_err(|e| e.to_string())?)
                .map_err(|e| e.to_string())?;

            let flat: Vec<f32> = pooled.flatten_all().map_err(|e| e.to_string())?.to_vec1().map_err(|e| e.to_string())?;
            let dim = self.identity.dim;
            Ok(flat.chunks(dim).map(|c| c.to_vec()).collect())
        }
    }
}
