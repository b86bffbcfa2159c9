//! Recall Pipeline
//!
//! Similarity recall with associative expansion:
//!
//! 1. Search the index for `2k` candidates (done by the caller, off-lock)
//! 2. Keep candidates scoring above the threshold; each one is an access, so
//!    its `access_count` grows and its importance is recomputed
//! 3. Follow associations one hop from the top 5 kept candidates, scoring
//!    newcomers at `seed_score × 0.7`
//! 4. Rank by `score × importance`, ties by smaller id, and keep `k`
//!
//! Step 2 is a write: reading a memory changes how important it is.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::content::NodeId;
use crate::graph::expand_one_hop;
use crate::importance::{recompute, ImportanceConfig};
use crate::index::by_score_then_id;
use crate::node::{MemoryNode, NodeStore};

/// Configuration for recall.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RecallConfig {
	/// Results returned when the caller does not choose
	pub default_k: usize,
	/// Similarity a direct match must exceed
	pub default_threshold: f32,
	/// Index candidates fetched per requested result
	pub candidate_multiplier: usize,
	/// Direct matches whose associations are followed
	pub expansion_seeds: usize,
	/// Score multiplier for associated nodes
	pub expansion_decay: f32,
}

impl Default for RecallConfig {
	fn default() -> Self {
		Self {
			default_k: 10,
			default_threshold: 0.7,
			candidate_multiplier: 2,
			expansion_seeds: 5,
			expansion_decay: 0.7,
		}
	}
}

/// A recalled memory with its similarity score.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecallHit {
	/// Snapshot of the node after this recall's updates
	pub node: MemoryNode,
	/// Cosine similarity, or the decayed seed score for associated nodes
	pub score: f32,
	/// `true` if reached through an association rather than by similarity
	pub associative: bool,
}

impl RecallHit {
	/// Ranking key: `score × importance`.
	#[inline]
	#[must_use]
	pub fn rank_key(&self) -> f32 {
		self.score * self.node.importance
	}
}

/// Parameters of one recall.
#[derive(Clone, Copy, Debug)]
pub struct RecallRequest<'a> {
	/// Similarity a direct match must exceed
	pub threshold: f32,
	/// Node never returned (the node being associated)
	pub exclude: Option<&'a NodeId>,
}

/// Number of index candidates to fetch for `k` results.
#[inline]
#[must_use]
pub const fn candidate_count(k: usize, config: &RecallConfig) -> usize {
	k.saturating_mul(config.candidate_multiplier)
}

/// Apply recall side effects for `candidates` and expand through associations.
///
/// `candidates` come from the index, best first. Ids no longer stored are
/// skipped. Returns unranked hits.
pub fn touch_and_expand(
	store: &mut NodeStore,
	candidates: &[(NodeId, f32)],
	request: &RecallRequest<'_>,
	now: DateTime<Utc>,
	config: &RecallConfig,
	importance: &ImportanceConfig,
) -> Vec<RecallHit> {
	let mut kept: SmallVec<[(NodeId, f32); 32]> = SmallVec::new();

	for &(id, score) in candidates {
		if score <= request.threshold || request.exclude == Some(&id) {
			continue;
		}
		let Some(node) = store.get_mut(&id) else {
			continue;
		};
		node.access_count = node.access_count.saturating_add(1);
		node.importance = recompute(node, now, importance);
		kept.push((id, score));
	}

	let mut seen: HashSet<NodeId> = kept.iter().map(|(id, _)| *id).collect();
	if let Some(excluded) = request.exclude {
		let _ = seen.insert(*excluded);
	}
	let expanded = expand_one_hop(store, &kept, config.expansion_seeds, config.expansion_decay, &mut seen);

	let direct = kept.iter().map(|&(id, score)| (id, score, false));
	let associated = expanded.into_iter().map(|(id, score)| (id, score, true));

	direct
		.chain(associated)
		.filter_map(|(id, score, associative)| {
			store.get(&id).map(|node| RecallHit {
				node: node.clone(),
				score,
				associative,
			})
		})
		.collect()
}

/// Rank hits by `score × importance` (ties by smaller id) and keep the first `k`.
pub fn rank(hits: &mut Vec<RecallHit>, k: usize) {
	hits.sort_by(|a, b| by_score_then_id((&a.node.id, a.rank_key()), (&b.node.id, b.rank_key())));
	hits.truncate(k);
}
