//! Local ONNX Runtime embedding provider.
//!
//! Runs a sentence-transformer ONNX export via `ort`: tokenization,
//! inference, attention-masked mean pooling, and L2 normalization. The
//! embedding dimension is whatever the model produces; the sync engine
//! derives it from the first non-empty result.

use std::path::Path;
use std::sync::{Mutex, Once};

use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;

use super::EmbeddingProvider;
use crate::error::{Error, Result};

/// Maximum sequence length fed to the encoder.
const MAX_SEQ_LEN: usize = 256;

static RUNTIME_INIT: Once = Once::new();

#[derive(Debug)]
pub struct LocalProvider {
    /// The configured specifier, kept verbatim as the persisted model id.
    model: String,
    session: Mutex<Session>,
    tokenizer: Tokenizer,
}

impl LocalProvider {
    /// Load the model from `resolved_dir` (which holds `model.onnx` and
    /// `tokenizer.json`). `model` is the original opaque specifier.
    pub fn new(model: &str, resolved_dir: &Path) -> Result<Self> {
        let model_file = resolved_dir.join(super::download::MODEL_FILE);
        let tokenizer_file = resolved_dir.join(super::download::TOKENIZER_FILE);

        if !model_file.exists() {
            return Err(Error::EmbeddingsUnavailable(format!(
                "ONNX model not found at {}",
                model_file.display()
            )));
        }
        if !tokenizer_file.exists() {
            return Err(Error::EmbeddingsUnavailable(format!(
                "tokenizer not found at {}",
                tokenizer_file.display()
            )));
        }

        RUNTIME_INIT.call_once(super::record_runtime_init);

        let session = (|| -> std::result::Result<Session, ort::Error> {
            let b = Session::builder()?;
            let b = b.with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?;
            let mut b = b.with_intra_threads(4)?;
            b.commit_from_file(&model_file)
        })()
        .map_err(|e| Error::EmbeddingsUnavailable(format!("failed to load ONNX model: {e}")))?;
        super::record_model_load();
        tracing::info!(model = %model_file.display(), "ONNX model loaded");

        let mut tokenizer = Tokenizer::from_file(&tokenizer_file)
            .map_err(|e| Error::EmbeddingsUnavailable(format!("failed to load tokenizer: {e}")))?;
        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: MAX_SEQ_LEN,
                ..Default::default()
            }))
            .map_err(|e| Error::EmbeddingsUnavailable(format!("failed to set truncation: {e}")))?;
        tokenizer.with_padding(Some(tokenizers::PaddingParams {
            strategy: tokenizers::PaddingStrategy::BatchLongest,
            ..Default::default()
        }));
        super::record_context_create();

        Ok(Self {
            model: model.to_string(),
            session: Mutex::new(session),
            tokenizer,
        })
    }

    fn run_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts, true)
            .map_err(|e| Error::EmbeddingsUnavailable(format!("tokenization failed: {e}")))?;

        let batch_size = encodings.len();
        let seq_len = encodings[0].get_ids().len();

        let mut input_ids_flat = Vec::with_capacity(batch_size * seq_len);
        let mut attention_mask_flat = Vec::with_capacity(batch_size * seq_len);
        for encoding in &encodings {
            for &id in encoding.get_ids() {
                input_ids_flat.push(id as i64);
            }
            for &mask in encoding.get_attention_mask() {
                attention_mask_flat.push(mask as i64);
            }
        }

        let shape = vec![batch_size as i64, seq_len as i64];
        let input_ids = Tensor::from_array((shape.clone(), input_ids_flat.into_boxed_slice()))
            .map_err(ort_error)?;
        let attention_mask = Tensor::from_array((
            shape.clone(),
            attention_mask_flat.clone().into_boxed_slice(),
        ))
        .map_err(ort_error)?;
        // Single sentence, no segment B.
        let token_type_ids =
            Tensor::from_array((shape, vec![0i64; batch_size * seq_len].into_boxed_slice()))
                .map_err(ort_error)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| Error::EmbeddingsUnavailable("session lock poisoned".into()))?;

        let outputs = session
            .run(ort::inputs! {
                "input_ids" => input_ids,
                "attention_mask" => attention_mask,
                "token_type_ids" => token_type_ids,
            })
            .map_err(ort_error)?;

        // Output naming varies by export; try common names, then index 0.
        let token_embeddings = outputs
            .get("token_embeddings")
            .or_else(|| outputs.get("last_hidden_state"))
            .unwrap_or_else(|| &outputs[0]);

        let (out_shape, data) = token_embeddings
            .try_extract_tensor::<f32>()
            .map_err(ort_error)?;

        let dims: &[i64] = &out_shape;
        if dims.len() != 3 {
            return Err(Error::EmbeddingsUnavailable(format!(
                "unexpected token embedding shape: {dims:?}"
            )));
        }
        let actual_seq_len = dims[1] as usize;
        let hidden_dim = dims[2] as usize;

        // Attention-masked mean pooling, then L2 normalization.
        let mut results = Vec::with_capacity(batch_size);
        for b in 0..batch_size {
            let mut sum = vec![0.0f32; hidden_dim];
            let mut count = 0.0f32;
            for s in 0..actual_seq_len {
                let mask = attention_mask_flat[b * seq_len + s] as f32;
                if mask > 0.0 {
                    let offset = (b * actual_seq_len + s) * hidden_dim;
                    for d in 0..hidden_dim {
                        sum[d] += data[offset + d] * mask;
                    }
                    count += mask;
                }
            }
            if count > 0.0 {
                for value in &mut sum {
                    *value /= count;
                }
            }
            results.push(l2_normalize(&sum));
        }

        Ok(results)
    }
}

fn ort_error(e: ort::Error) -> Error {
    Error::EmbeddingsUnavailable(format!("onnx inference failed: {e}"))
}

impl EmbeddingProvider for LocalProvider {
    fn model_path(&self) -> &str {
        &self.model
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut results = self.run_batch(vec![text.to_string()])?;
        results
            .pop()
            .ok_or_else(|| Error::EmbeddingsUnavailable("no embedding returned".into()))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.run_batch(texts.to_vec())
    }
}

/// L2-normalize a vector. Returns a zero vector unchanged.
fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}
