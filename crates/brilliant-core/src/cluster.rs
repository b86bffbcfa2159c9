//! Memory Clusters
//!
//! Consolidation partitions surviving embeddings into concept clusters with a
//! deterministic k-means:
//!
//! 1. Seed centroids by farthest-point selection: the smallest id first, then
//!    repeatedly the point least similar to every chosen centroid.
//! 2. Assign each point to the centroid with the largest inner product.
//! 3. Move each centroid to the arithmetic mean of its members.
//! 4. Repeat 2-3 until no assignment changes or the iteration cap is hit.
//!
//! Centroids are running means and are generally not unit length.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::content::NodeId;
use crate::index::inner_product;

/// A cluster of related memories forming a concept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryCluster {
	/// Stable label within one clustering pass (`cluster_<n>`)
	pub id: String,
	/// Human-readable name
	pub name: String,
	/// Mean of member embeddings
	pub centroid: Vec<f32>,
	/// Live member ids
	pub members: BTreeSet<NodeId>,
}

impl MemoryCluster {
	/// Create an empty cluster with a zero centroid.
	#[must_use]
	pub fn new(ordinal: usize, dimensions: usize) -> Self {
		Self {
			id: format!("cluster_{ordinal}"),
			name: format!("Cluster {ordinal}"),
			centroid: vec![0.0; dimensions],
			members: BTreeSet::new(),
		}
	}

	/// Add a member and fold its embedding into the running-mean centroid.
	#[allow(clippy::cast_precision_loss)]
	pub fn add_member(&mut self, id: NodeId, embedding: &[f32]) {
		if !self.members.insert(id) {
			return;
		}
		let n = self.members.len() as f32;
		for (c, &x) in self.centroid.iter_mut().zip(embedding) {
			*c = (*c).mul_add(n - 1.0, x) / n;
		}
	}

	/// Smallest member id, used as the cluster's representative.
	#[must_use]
	pub fn representative(&self) -> Option<&NodeId> {
		self.members.first()
	}
}

/// Configuration for re-clustering.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
	/// Below this many survivors, clustering is skipped
	pub min_population: usize,
	/// Upper bound on cluster count
	pub max_clusters: usize,
	/// Target members per cluster: `k = min(max_clusters, n / nodes_per_cluster)`
	pub nodes_per_cluster: usize,
	/// Assignment/update rounds before giving up on convergence
	pub max_iterations: usize,
}

impl Default for ClusteringConfig {
	fn default() -> Self {
		Self {
			min_population: 10,
			max_clusters: 10,
			nodes_per_cluster: 5,
			max_iterations: 25,
		}
	}
}

impl ClusteringConfig {
	/// Number of clusters for `n` points; 0 means skip clustering.
	#[must_use]
	pub fn cluster_count(&self, n: usize) -> usize {
		if n < self.min_population || self.nodes_per_cluster == 0 {
			return 0;
		}
		self.max_clusters.min(n / self.nodes_per_cluster)
	}
}

/// Partition `points` into at most `config.cluster_count(points.len())` clusters.
///
/// `points` may be in any order; results are deterministic for a given set.
/// Empty clusters are dropped, so the result can be shorter than
/// `cluster_count` when survivors share embeddings.
#[must_use]
pub fn cluster_embeddings(points: &[(NodeId, &[f32])], config: &ClusteringConfig) -> Vec<MemoryCluster> {
	let k = config.cluster_count(points.len());
	if k == 0 {
		return Vec::new();
	}
	let dimensions = points[0].1.len();

	let mut sorted: Vec<(NodeId, &[f32])> = points.to_vec();
	sorted.sort_by(|a, b| a.0.cmp(&b.0));

	let mut centroids = seed_centroids(&sorted, k);
	let mut assignment = vec![usize::MAX; sorted.len()];

	for _ in 0..config.max_iterations.max(1) {
		let mut changed = false;
		for (slot, (_, vector)) in assignment.iter_mut().zip(&sorted) {
			let nearest = nearest_centroid(&centroids, vector);
			if *slot != nearest {
				*slot = nearest;
				changed = true;
			}
		}
		if !changed {
			break;
		}
		update_centroids(&mut centroids, &sorted, &assignment, dimensions);
	}

	let mut clusters: Vec<MemoryCluster> = Vec::with_capacity(centroids.len());
	for c in 0..centroids.len() {
		let mut cluster = MemoryCluster::new(clusters.len(), dimensions);
		for ((id, vector), _) in sorted.iter().zip(&assignment).filter(|(_, &a)| a == c) {
			cluster.add_member(*id, vector);
		}
		if !cluster.members.is_empty() {
			clusters.push(cluster);
		}
	}
	clusters
}

fn seed_centroids(sorted: &[(NodeId, &[f32])], k: usize) -> Vec<Vec<f32>> {
	let mut chosen: Vec<usize> = vec![0];
	while chosen.len() < k.min(sorted.len()) {
		let next = (0..sorted.len())
			.filter(|i| !chosen.contains(i))
			.map(|i| {
				let closest = chosen
					.iter()
					.map(|&c| inner_product(sorted[i].1, sorted[c].1))
					.fold(f32::NEG_INFINITY, f32::max);
				(i, closest)
			})
			// Least similar first; index order (= id order) breaks ties
			.min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
		match next {
			Some((i, _)) => chosen.push(i),
			None => break,
		}
	}
	chosen.into_iter().map(|i| sorted[i].1.to_vec()).collect()
}

fn nearest_centroid(centroids: &[Vec<f32>], vector: &[f32]) -> usize {
	let mut best = 0;
	let mut best_score = f32::NEG_INFINITY;
	for (c, centroid) in centroids.iter().enumerate() {
		let score = inner_product(centroid, vector);
		if score > best_score {
			best = c;
			best_score = score;
		}
	}
	best
}

#[allow(clippy::cast_precision_loss)]
fn update_centroids(
	centroids: &mut [Vec<f32>],
	sorted: &[(NodeId, &[f32])],
	assignment: &[usize],
	dimensions: usize,
) {
	let mut sums = vec![vec![0.0_f32; dimensions]; centroids.len()];
	let mut counts = vec![0_usize; centroids.len()];

	for ((_, vector), &c) in sorted.iter().zip(assignment) {
		counts[c] += 1;
		for (s, &x) in sums[c].iter_mut().zip(vector.iter()) {
			*s += x;
		}
	}

	// Empty clusters keep their previous centroid
	for ((centroid, sum), count) in centroids.iter_mut().zip(sums).zip(counts) {
		if count > 0 {
			*centroid = sum.into_iter().map(|s| s / count as f32).collect();
		}
	}
}
