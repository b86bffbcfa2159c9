//! In-process ONNX sentence embedder (all-MiniLM-L6-v2 by default).
//!
//! Runs a sentence-transformer directly via ONNX Runtime, no external
//! service. Produces 384-dimensional embeddings with mean pooling + L2
//! normalization. Inference is synchronous and runs on tokio's blocking pool.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use ndarray::{Array2, ArrayD};
use ort::session::Session;
use ort::value::Tensor;
use parking_lot::Mutex;
use tokenizers::Tokenizer;

use super::Embedder;
use crate::error::EmbeddingError;
use crate::index::normalize;

/// Default model directory: `~/.brilliant/models`
fn default_model_dir() -> PathBuf {
	dirs::home_dir()
		.unwrap_or_else(|| PathBuf::from("."))
		.join(".brilliant")
		.join("models")
}

/// Where to find the model and how wide its output is.
#[derive(Debug, Clone)]
pub struct OnnxModelConfig {
	/// Path to the ONNX model file
	pub model_path: PathBuf,
	/// Path to the tokenizer.json file
	pub tokenizer_path: PathBuf,
	/// Hidden size of the model
	pub dimensions: usize,
}

impl Default for OnnxModelConfig {
	fn default() -> Self {
		let dir = default_model_dir();
		Self {
			model_path: dir.join("all-MiniLM-L6-v2.onnx"),
			tokenizer_path: dir.join("all-MiniLM-L6-v2-tokenizer.json"),
			dimensions: 384,
		}
	}
}

impl OnnxModelConfig {
	/// Whether both model files exist.
	#[must_use]
	pub fn is_available(&self) -> bool {
		self.model_path.exists() && self.tokenizer_path.exists()
	}
}

struct OnnxModel {
	session: Mutex<Session>,
	tokenizer: Tokenizer,
	dimensions: usize,
}

/// Sentence embedder backed by ONNX Runtime.
///
/// Cheap to clone; the session is shared and locked only during inference.
#[derive(Clone)]
pub struct OnnxEmbedder {
	model: Arc<OnnxModel>,
}

impl OnnxEmbedder {
	/// Load the ONNX model and tokenizer from disk.
	///
	/// # Errors
	///
	/// Returns an error if the model or tokenizer files cannot be loaded.
	pub fn load(config: &OnnxModelConfig) -> Result<Self, EmbeddingError> {
		if !config.model_path.exists() {
			return Err(EmbeddingError::NotFound(format!(
				"ONNX model not found at {}",
				config.model_path.display()
			)));
		}
		if !config.tokenizer_path.exists() {
			return Err(EmbeddingError::NotFound(format!(
				"Tokenizer not found at {}",
				config.tokenizer_path.display()
			)));
		}

		let session = Session::builder()?.commit_from_file(&config.model_path)?;
		let tokenizer =
			Tokenizer::from_file(&config.tokenizer_path).map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;

		tracing::info!(model = %config.model_path.display(), dimensions = config.dimensions, "Loaded ONNX embedder");

		Ok(Self {
			model: Arc::new(OnnxModel {
				session: Mutex::new(session),
				tokenizer,
				dimensions: config.dimensions,
			}),
		})
	}
}

impl OnnxModel {
	fn embed_blocking(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
		let encoding = self
			.tokenizer
			.encode(text, true)
			.map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;

		let len = encoding.get_ids().len();
		let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| i64::from(id)).collect();
		let attention_mask: Vec<i64> = encoding.get_attention_mask().iter().map(|&m| i64::from(m)).collect();
		let token_type_ids = vec![0_i64; len];

		let input_ids = Tensor::from_array(Array2::from_shape_vec([1, len], input_ids)?)?;
		let mask_tensor = Tensor::from_array(Array2::from_shape_vec([1, len], attention_mask)?)?;
		let token_types = Tensor::from_array(Array2::from_shape_vec([1, len], token_type_ids)?)?;

		// Session lock is scoped to the run; owned output escapes it
		let hidden: ArrayD<f32> = {
			let mut session = self.session.lock();
			let outputs = session.run(ort::inputs![
				"input_ids" => input_ids,
				"attention_mask" => mask_tensor,
				"token_type_ids" => token_types,
			])?;
			outputs[0].try_extract_array::<f32>()?.into_owned()
		};

		let valid_tokens = encoding.get_attention_mask().iter().filter(|&&m| m == 1).count();
		let mut pooled = mean_pool(&hidden, valid_tokens, self.dimensions)?;
		normalize(&mut pooled)?;
		Ok(pooled)
	}
}

/// Mean of the first `tokens` rows of a `[1, seq, hidden]` output.
///
/// # Errors
///
/// Returns [`EmbeddingError::DimensionMismatch`] if the hidden size differs
/// from `dimensions`.
fn mean_pool(hidden: &ArrayD<f32>, tokens: usize, dimensions: usize) -> Result<Vec<f32>, EmbeddingError> {
	let shape = hidden.shape();
	let hidden_dim = shape.last().copied().unwrap_or(0);
	if shape.len() != 3 || hidden_dim != dimensions {
		return Err(EmbeddingError::DimensionMismatch {
			expected: dimensions,
			actual: hidden_dim,
		});
	}

	let tokens = tokens.min(shape[1]);
	let mut pooled = vec![0.0_f32; hidden_dim];
	for t in 0..tokens {
		for (d, slot) in pooled.iter_mut().enumerate() {
			*slot += hidden[[0, t, d]];
		}
	}
	if tokens > 0 {
		// Token counts fit in u16, and u16 -> f32 is exact
		let divisor = f32::from(u16::try_from(tokens).unwrap_or(u16::MAX));
		for v in &mut pooled {
			*v /= divisor;
		}
	}
	Ok(pooled)
}

#[async_trait]
impl Embedder for OnnxEmbedder {
	fn dimensions(&self) -> usize {
		self.model.dimensions
	}

	async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
		let model = Arc::clone(&self.model);
		let text = text.to_owned();
		tokio::task::spawn_blocking(move || model.embed_blocking(&text))
			.await
			.map_err(|e| EmbeddingError::Backend(format!("embedding task failed: {e}")))?
	}
}
