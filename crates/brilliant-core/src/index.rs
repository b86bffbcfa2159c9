//! Vector Index
//!
//! Exact nearest-neighbor search by inner product over unit-length vectors,
//! which makes the score the cosine similarity.
//!
//! Vectors live in one contiguous row-major arena. There is no removal
//! primitive: consolidation rebuilds the index from the surviving nodes.
//! Large scans are split across the rayon pool.

use std::cmp::Ordering;
use std::collections::HashMap;

use rayon::prelude::{IndexedParallelIterator, ParallelIterator, ParallelSlice};

use crate::content::NodeId;
use crate::error::EmbeddingError;

/// Row count above which scoring runs on the rayon pool.
const PARALLEL_MIN_ROWS: usize = 4096;

/// Tolerance on `‖v‖₂ == 1` for stored embeddings.
pub const UNIT_NORM_TOLERANCE: f32 = 1e-3;

// ============================================================================
// Vector Math
// ============================================================================

/// Inner product of two equal-length vectors (0 on length mismatch).
#[inline]
#[must_use]
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
	if a.len() != b.len() {
		return 0.0;
	}
	a.iter()
		.zip(b.iter())
		.fold(0.0, |dot, (&ai, &bi)| ai.mul_add(bi, dot))
}

/// Euclidean norm.
#[inline]
#[must_use]
pub fn l2_norm(v: &[f32]) -> f32 {
	v.iter().fold(0.0_f32, |acc, &x| x.mul_add(x, acc)).sqrt()
}

/// Scale a vector to unit length in place.
///
/// # Errors
///
/// Returns [`EmbeddingError::Degenerate`] for zero-norm or non-finite input.
pub fn normalize(v: &mut [f32]) -> Result<(), EmbeddingError> {
	let norm = l2_norm(v);
	if !norm.is_finite() || norm == 0.0 {
		return Err(EmbeddingError::Degenerate);
	}
	for x in v.iter_mut() {
		*x /= norm;
	}
	Ok(())
}

/// Whether a vector is unit length within [`UNIT_NORM_TOLERANCE`].
#[inline]
#[must_use]
pub fn is_unit(v: &[f32]) -> bool {
	(l2_norm(v) - 1.0).abs() <= UNIT_NORM_TOLERANCE
}

/// Descending score, ascending id.
#[inline]
pub(crate) fn by_score_then_id(a: (&NodeId, f32), b: (&NodeId, f32)) -> Ordering {
	b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0))
}

// ============================================================================
// Index
// ============================================================================

/// Flat inner-product index.
#[derive(Debug, Clone)]
pub struct VectorIndex {
	dimensions: usize,
	ids: Vec<NodeId>,
	rows: HashMap<NodeId, usize>,
	data: Vec<f32>,
}

impl VectorIndex {
	/// Create an empty index for `dimensions`-long vectors.
	#[must_use]
	pub fn new(dimensions: usize) -> Self {
		Self::with_capacity(dimensions, 0)
	}

	/// Create an empty index with room for `capacity` vectors.
	#[must_use]
	pub fn with_capacity(dimensions: usize, capacity: usize) -> Self {
		Self {
			dimensions,
			ids: Vec::with_capacity(capacity),
			rows: HashMap::with_capacity(capacity),
			data: Vec::with_capacity(capacity * dimensions),
		}
	}

	/// Build an index from `(id, vector)` pairs.
	///
	/// # Errors
	///
	/// Returns [`EmbeddingError::DimensionMismatch`] if any vector has the wrong length.
	pub fn from_entries<'a, I>(dimensions: usize, entries: I) -> Result<Self, EmbeddingError>
	where
		I: IntoIterator<Item = (NodeId, &'a [f32])>,
	{
		let entries = entries.into_iter();
		let mut index = Self::with_capacity(dimensions, entries.size_hint().0);
		for (id, vector) in entries {
			index.insert(id, vector)?;
		}
		Ok(index)
	}

	/// Replace the whole contents with `entries`.
	///
	/// # Errors
	///
	/// Returns [`EmbeddingError::DimensionMismatch`] if any vector has the wrong
	/// length; the index is left unchanged in that case.
	pub fn rebuild<'a, I>(&mut self, entries: I) -> Result<(), EmbeddingError>
	where
		I: IntoIterator<Item = (NodeId, &'a [f32])>,
	{
		*self = Self::from_entries(self.dimensions, entries)?;
		Ok(())
	}

	/// Add a vector, overwriting the row if `id` is already present.
	///
	/// # Errors
	///
	/// Returns [`EmbeddingError::DimensionMismatch`] if `vector` has the wrong length.
	pub fn insert(&mut self, id: NodeId, vector: &[f32]) -> Result<(), EmbeddingError> {
		if vector.len() != self.dimensions {
			return Err(EmbeddingError::DimensionMismatch {
				expected: self.dimensions,
				actual: vector.len(),
			});
		}

		if let Some(&row) = self.rows.get(&id) {
			let start = row * self.dimensions;
			self.data[start..start + self.dimensions].copy_from_slice(vector);
			return Ok(());
		}

		let _ = self.rows.insert(id, self.ids.len());
		self.ids.push(id);
		self.data.extend_from_slice(vector);
		Ok(())
	}

	/// The `k` best matches for `query`, best first, ties broken by smaller id.
	#[must_use]
	pub fn search(&self, query: &[f32], k: usize) -> Vec<(NodeId, f32)> {
		if k == 0 || self.ids.is_empty() || query.len() != self.dimensions {
			return Vec::new();
		}

		let scores = self.score_all(query);
		let mut scored: Vec<(NodeId, f32)> = self.ids.iter().copied().zip(scores).collect();

		let order = |a: &(NodeId, f32), b: &(NodeId, f32)| by_score_then_id((&a.0, a.1), (&b.0, b.1));
		if k < scored.len() {
			let _ = scored.select_nth_unstable_by(k - 1, order);
			scored.truncate(k);
		}
		scored.sort_by(order);
		scored
	}

	fn score_all(&self, query: &[f32]) -> Vec<f32> {
		if self.ids.len() >= PARALLEL_MIN_ROWS {
			self.data
				.par_chunks_exact(self.dimensions)
				.map(|row| inner_product(row, query))
				.collect()
		} else {
			self.data
				.chunks_exact(self.dimensions)
				.map(|row| inner_product(row, query))
				.collect()
		}
	}

	/// Stored vector for `id`.
	#[must_use]
	pub fn vector(&self, id: &NodeId) -> Option<&[f32]> {
		let row = *self.rows.get(id)?;
		let start = row * self.dimensions;
		Some(&self.data[start..start + self.dimensions])
	}

	/// Whether `id` has a row.
	#[must_use]
	pub fn contains(&self, id: &NodeId) -> bool {
		self.rows.contains_key(id)
	}

	/// Indexed ids in insertion order.
	#[must_use]
	pub fn ids(&self) -> &[NodeId] {
		&self.ids
	}

	/// Number of indexed vectors.
	#[must_use]
	pub fn len(&self) -> usize {
		self.ids.len()
	}

	/// Whether the index is empty.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.ids.is_empty()
	}

	/// Vector length.
	#[must_use]
	pub const fn dimensions(&self) -> usize {
		self.dimensions
	}
}
