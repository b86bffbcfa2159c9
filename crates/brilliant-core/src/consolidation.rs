//! Consolidation
//!
//! Periodic maintenance in three phases so the write lock is never held for
//! the O(n·D) work:
//!
//! 1. [`evict`] (locked): persist recomputed importance for used nodes, remove
//!    every node whose consolidation importance is below the threshold, detach
//!    its edges. Detaching rescores neighbors, so eviction repeats until stable.
//! 2. [`rebuild`] (unlocked): fresh [`VectorIndex`] and k-means clusters from a
//!    copy of the survivors.
//! 3. [`reconcile`] (locked): fold in nodes stored during phase 2 and drop
//!    cluster members that are no longer live, then swap.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cluster::{cluster_embeddings, ClusteringConfig, MemoryCluster};
use crate::content::NodeId;
use crate::error::EmbeddingError;
use crate::graph::detach;
use crate::importance::{has_usage_evidence, recompute, refresh, ImportanceConfig};
use crate::index::VectorIndex;
use crate::node::NodeStore;

/// Configuration for consolidation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
	/// New nodes between automatic passes
	pub interval: usize,
	/// Nodes below this importance are evicted
	pub eviction_threshold: f32,
	/// Re-clustering parameters
	pub clustering: ClusteringConfig,
}

impl Default for ConsolidationConfig {
	fn default() -> Self {
		Self {
			interval: 100,
			eviction_threshold: 0.1,
			clustering: ClusteringConfig::default(),
		}
	}
}

/// Outcome of a consolidation pass.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationReport {
	/// Evicted node ids, in eviction order
	pub evicted: Vec<NodeId>,
	/// Live nodes after the pass
	pub survivors: usize,
	/// Clusters in the new table
	pub clusters: usize,
	/// Nodes stored while the index was being rebuilt
	pub folded_in: usize,
}

/// Replacement index and cluster table built off-lock.
#[derive(Debug)]
pub struct Rebuilt {
	/// Index over the survivor copy
	pub index: VectorIndex,
	/// Fresh clusters
	pub clusters: Vec<MemoryCluster>,
}

/// Phase 1: refresh importance and evict everything below `threshold`.
///
/// Returns evicted ids in eviction order (by id within each round).
pub fn evict(store: &mut NodeStore, threshold: f32, now: DateTime<Utc>, config: &ImportanceConfig) -> Vec<NodeId> {
	// Untouched nodes keep their seed; only the comparison below sees the decay
	for node in store.all_mut() {
		if has_usage_evidence(node) {
			node.importance = recompute(node, now, config);
		}
	}

	let mut evicted = Vec::new();
	loop {
		let doomed: Vec<NodeId> = store
			.sorted()
			.into_iter()
			.filter(|node| refresh(node, now, config) < threshold)
			.map(|node| node.id)
			.collect();
		if doomed.is_empty() {
			break;
		}

		for id in &doomed {
			detach(store, id, now, config);
			let _ = store.remove(id);
		}
		evicted.extend(doomed);
	}
	evicted
}

/// Phase 2: build the replacement index and clusters from `survivors`.
///
/// # Errors
///
/// Returns [`EmbeddingError::DimensionMismatch`] if a survivor has the wrong
/// embedding length.
pub fn rebuild(
	dimensions: usize,
	survivors: &[(NodeId, Vec<f32>)],
	clustering: &ClusteringConfig,
) -> Result<Rebuilt, EmbeddingError> {
	let points: Vec<(NodeId, &[f32])> = survivors.iter().map(|(id, v)| (*id, v.as_slice())).collect();
	let index = VectorIndex::from_entries(dimensions, points.iter().copied())?;
	let clusters = cluster_embeddings(&points, clustering);
	Ok(Rebuilt { index, clusters })
}

/// Phase 3: make `rebuilt` agree with the current store.
///
/// Returns the number of nodes folded into the index.
///
/// # Errors
///
/// Returns [`EmbeddingError::DimensionMismatch`] if a folded-in node has the
/// wrong embedding length.
pub fn reconcile(rebuilt: &mut Rebuilt, store: &NodeStore) -> Result<usize, EmbeddingError> {
	let mut folded_in = 0;
	for node in store.sorted() {
		if !rebuilt.index.contains(&node.id) {
			rebuilt.index.insert(node.id, &node.embedding)?;
			folded_in += 1;
		}
	}

	if rebuilt.index.len() != store.len() {
		// Survivors removed meanwhile; start over from the store
		rebuilt
			.index
			.rebuild(store.sorted().into_iter().map(|n| (n.id, n.embedding.as_slice())))?;
	}

	prune_clusters(&mut rebuilt.clusters, store);
	Ok(folded_in)
}

/// Drop members that are no longer stored, and clusters left empty.
pub fn prune_clusters(clusters: &mut Vec<MemoryCluster>, store: &NodeStore) {
	for cluster in clusters.iter_mut() {
		cluster.members.retain(|id| store.contains(id));
	}
	clusters.retain(|c| !c.members.is_empty());
}
