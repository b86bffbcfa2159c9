//! Embedding Adapter
//!
//! The engine never embeds by itself; it asks an [`Embedder`] for a vector
//! and then enforces the shape it needs: exactly `D` finite components,
//! L2-normalized.
//!
//! Two embedders ship with the crate:
//!
//! - [`HashingEmbedder`]: signed feature hashing over lower-cased tokens.
//!   Deterministic, dependency-free, good enough for demos and benches.
//! - `OnnxEmbedder` (feature `onnx`): a sentence-transformer model run
//!   in-process through ONNX Runtime.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::EmbeddingError;
use crate::index::normalize;

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "onnx")]
pub use onnx::{OnnxEmbedder, OnnxModelConfig};

/// Turns text into a fixed-length vector.
#[async_trait]
pub trait Embedder: Send + Sync {
	/// Length of every vector this embedder returns.
	fn dimensions(&self) -> usize;

	/// Embed one text.
	///
	/// The result does not need to be normalized; the engine does that.
	async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Check the length of `raw` and normalize it in place.
///
/// # Errors
///
/// [`EmbeddingError::DimensionMismatch`] for a wrong length,
/// [`EmbeddingError::Degenerate`] for a zero or non-finite vector.
pub fn prepare(mut raw: Vec<f32>, dimensions: usize) -> Result<Vec<f32>, EmbeddingError> {
	if raw.len() != dimensions {
		return Err(EmbeddingError::DimensionMismatch {
			expected: dimensions,
			actual: raw.len(),
		});
	}
	normalize(&mut raw)?;
	Ok(raw)
}

// ============================================================================
// Feature hashing
// ============================================================================

/// Deterministic bag-of-words embedder.
///
/// Each lower-cased alphanumeric token is hashed with SHA-256; the first eight
/// bytes pick a bucket and one bit of the ninth picks the sign. Texts sharing
/// vocabulary end up close together.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
	dimensions: usize,
}

impl HashingEmbedder {
	/// Create an embedder producing `dimensions`-length vectors.
	#[must_use]
	pub const fn new(dimensions: usize) -> Self {
		Self { dimensions }
	}

	/// Synchronous embedding, already normalized.
	///
	/// # Errors
	///
	/// Returns [`EmbeddingError::Degenerate`] only when `dimensions` is 0.
	pub fn embed_sync(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
		if self.dimensions == 0 {
			return Err(EmbeddingError::Degenerate);
		}

		let lowered = text.to_lowercase();
		let mut tokens = lowered
			.split(|c: char| !c.is_alphanumeric())
			.filter(|t| !t.is_empty())
			.peekable();

		let mut vector = vec![0.0_f32; self.dimensions];
		if tokens.peek().is_none() {
			// Punctuation-only text still gets a stable vector
			self.accumulate(&mut vector, lowered.trim());
		} else {
			for token in tokens {
				self.accumulate(&mut vector, token);
			}
		}

		normalize(&mut vector)?;
		Ok(vector)
	}

	#[allow(clippy::cast_possible_truncation)]
	fn accumulate(&self, vector: &mut [f32], token: &str) {
		let digest = Sha256::digest(token.as_bytes());
		let mut bucket_bytes = [0_u8; 8];
		bucket_bytes.copy_from_slice(&digest[..8]);
		let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimensions as u64) as usize;
		let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
		vector[bucket] += sign;
	}
}

#[async_trait]
impl Embedder for HashingEmbedder {
	fn dimensions(&self) -> usize {
		self.dimensions
	}

	async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
		self.embed_sync(text)
	}
}
