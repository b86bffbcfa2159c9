//! Association Graph
//!
//! Memories are linked when they were judged related: by embedding similarity
//! when a node is stored, or by the reasoning collaborator. Links are always
//! symmetric (`B ∈ A.associations ⟺ A ∈ B.associations`) and only join live
//! nodes.
//!
//! Adjacency lives on the nodes themselves; the functions here are the only
//! code that edits it, so symmetry holds by construction.
//!
//! Recall follows links exactly one hop from its strongest direct matches:
//!
//! `score(neighbor) = score(seed) × decay`

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use smallvec::SmallVec;

use crate::content::NodeId;
use crate::error::ConsistencyViolation;
use crate::importance::{recompute, ImportanceConfig};
use crate::node::NodeStore;

/// Link two live nodes in both directions and rescore both.
///
/// Returns `true` if the edge is new. Self-links and links to unknown ids are
/// ignored.
pub fn link(
	store: &mut NodeStore,
	a: &NodeId,
	b: &NodeId,
	now: DateTime<Utc>,
	config: &ImportanceConfig,
) -> bool {
	if a == b || !store.contains(a) || !store.contains(b) {
		return false;
	}

	let mut added = false;
	for (from, to) in [(a, b), (b, a)] {
		if let Some(node) = store.get_mut(from) {
			added |= node.associations.insert(*to);
		}
	}

	if added {
		rescore(store, a, now, config);
		rescore(store, b, now, config);
	}
	added
}

/// Remove every edge pointing at `id` and rescore the former neighbors.
///
/// Call before or after removing `id` from the store; the node itself is not
/// touched.
pub fn detach(store: &mut NodeStore, id: &NodeId, now: DateTime<Utc>, config: &ImportanceConfig) {
	let neighbors: SmallVec<[NodeId; 8]> = store
		.get(id)
		.map(|node| node.associations.iter().copied().collect())
		.unwrap_or_default();

	for neighbor in &neighbors {
		let removed = store
			.get_mut(neighbor)
			.is_some_and(|node| node.associations.remove(id));
		if removed {
			rescore(store, neighbor, now, config);
		}
	}
}

fn rescore(store: &mut NodeStore, id: &NodeId, now: DateTime<Utc>, config: &ImportanceConfig) {
	if let Some(node) = store.get_mut(id) {
		node.importance = recompute(node, now, config);
	}
}

/// One-hop associative expansion.
///
/// For each of the first `max_seeds` seeds (in the given order), every linked
/// node not already in `seen` is added with `seed_score × decay`. Associations
/// of associations are not followed.
pub fn expand_one_hop(
	store: &NodeStore,
	seeds: &[(NodeId, f32)],
	max_seeds: usize,
	decay: f32,
	seen: &mut HashSet<NodeId>,
) -> Vec<(NodeId, f32)> {
	let mut expanded = Vec::new();

	for (seed, score) in seeds.iter().take(max_seeds) {
		let Some(node) = store.get(seed) else {
			continue;
		};
		for neighbor in &node.associations {
			if store.contains(neighbor) && seen.insert(*neighbor) {
				expanded.push((*neighbor, score * decay));
			}
		}
	}

	expanded
}

/// Number of undirected edges.
#[must_use]
pub fn edge_count(store: &NodeStore) -> usize {
	store.all().map(|n| n.associations.len()).sum::<usize>() / 2
}

/// Verify that every edge is symmetric and joins live nodes.
///
/// # Errors
///
/// Returns the first violation found, scanning nodes in id order.
pub fn check_symmetry(store: &NodeStore) -> Result<(), ConsistencyViolation> {
	for node in store.sorted() {
		for other in &node.associations {
			let Some(target) = store.get(other) else {
				return Err(ConsistencyViolation::DanglingAssociation {
					from: node.id,
					to: *other,
				});
			};
			if !target.associations.contains(&node.id) {
				return Err(ConsistencyViolation::AsymmetricAssociation {
					from: node.id,
					to: *other,
				});
			}
		}
	}
	Ok(())
}
