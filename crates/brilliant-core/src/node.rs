//! Memory Nodes
//!
//! [`NodeStore`] is the authoritative table of live memories, keyed by the
//! content-derived [`NodeId`]. Storing the same content twice never creates a
//! second node: the existing one is merged instead.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::content::{ContentMap, NodeId};
use crate::importance::clamp_unit;

/// A single stored memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryNode {
	/// Digest of the canonical content
	pub id: NodeId,
	/// Caller payload; the only input to the id and the embedding
	pub content: ContentMap,
	/// Unit-length embedding of the rendered content
	pub embedding: Vec<f32>,
	/// When the node was first stored
	pub created_at: DateTime<Utc>,
	/// Number of times recall returned this node as a direct match
	pub access_count: u32,
	/// Current importance in `[0, 1]`
	pub importance: f32,
	/// Time decay per day
	pub decay_rate: f32,
	/// Symmetric links to other live nodes
	pub associations: BTreeSet<NodeId>,
	/// Provenance metadata, never embedded
	pub context: ContentMap,
	/// External feedback signals
	pub success_metrics: BTreeMap<String, f32>,
}

/// Everything needed to create a node. The id is derived, never supplied.
#[derive(Debug, Clone)]
pub struct NodeDraft {
	/// Caller payload
	pub content: ContentMap,
	/// Unit-length embedding
	pub embedding: Vec<f32>,
	/// Provenance; `None` keeps an existing node's context on merge
	pub context: Option<ContentMap>,
	/// Seed importance
	pub importance: f32,
	/// Decay per day
	pub decay_rate: f32,
}

/// Result of [`NodeStore::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upserted {
	/// Id of the created or merged node
	pub id: NodeId,
	/// `true` when a new node was created
	pub created: bool,
}

/// Table of live memory nodes.
#[derive(Debug, Clone, Default)]
pub struct NodeStore {
	nodes: HashMap<NodeId, MemoryNode>,
}

impl NodeStore {
	/// Create an empty store.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Insert a new node or merge into the existing node with the same content.
	///
	/// Merging keeps `created_at`, `embedding`, `associations`, `access_count`
	/// and feedback, replaces `context` when one is supplied, and keeps the
	/// larger of the existing and incoming importance.
	pub fn upsert(&mut self, draft: NodeDraft, now: DateTime<Utc>) -> Upserted {
		let id = NodeId::for_content(&draft.content);

		if self.nodes.contains_key(&id) {
			let _ = self.merge(&id, draft.context, draft.importance);
			return Upserted { id, created: false };
		}

		let node = MemoryNode {
			id,
			content: draft.content,
			embedding: draft.embedding,
			created_at: now,
			access_count: 0,
			importance: clamp_unit(draft.importance),
			decay_rate: draft.decay_rate,
			associations: BTreeSet::new(),
			context: draft.context.unwrap_or_default(),
			success_metrics: BTreeMap::new(),
		};
		let _ = self.nodes.insert(id, node);

		Upserted { id, created: true }
	}

	/// Merge a repeated store into an existing node. Returns `false` if absent.
	pub fn merge(&mut self, id: &NodeId, context: Option<ContentMap>, importance: f32) -> bool {
		let Some(node) = self.nodes.get_mut(id) else {
			return false;
		};
		if let Some(context) = context {
			node.context = context;
		}
		node.importance = node.importance.max(clamp_unit(importance));
		true
	}

	/// Insert a fully formed node, e.g. from a snapshot. Replaces any node with the same id.
	pub fn insert_node(&mut self, node: MemoryNode) {
		let _ = self.nodes.insert(node.id, node);
	}

	/// Look up a node.
	#[must_use]
	pub fn get(&self, id: &NodeId) -> Option<&MemoryNode> {
		self.nodes.get(id)
	}

	/// Mutable lookup.
	pub fn get_mut(&mut self, id: &NodeId) -> Option<&mut MemoryNode> {
		self.nodes.get_mut(id)
	}

	/// Remove a node, returning it.
	///
	/// Does not touch other nodes' associations; see [`crate::graph::detach`].
	pub fn remove(&mut self, id: &NodeId) -> Option<MemoryNode> {
		self.nodes.remove(id)
	}

	/// Whether a node is stored.
	#[must_use]
	pub fn contains(&self, id: &NodeId) -> bool {
		self.nodes.contains_key(id)
	}

	/// Number of live nodes.
	#[must_use]
	pub fn len(&self) -> usize {
		self.nodes.len()
	}

	/// Whether the store is empty.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.nodes.is_empty()
	}

	/// All live nodes, in no particular order.
	pub fn all(&self) -> impl Iterator<Item = &MemoryNode> {
		self.nodes.values()
	}

	/// All live nodes, mutable.
	pub fn all_mut(&mut self) -> impl Iterator<Item = &mut MemoryNode> {
		self.nodes.values_mut()
	}

	/// All live nodes sorted by id.
	#[must_use]
	pub fn sorted(&self) -> Vec<&MemoryNode> {
		let mut nodes: Vec<&MemoryNode> = self.nodes.values().collect();
		nodes.sort_by(|a, b| a.id.cmp(&b.id));
		nodes
	}

	/// The `n` most recently created nodes, newest first (ties by smaller id).
	#[must_use]
	pub fn most_recent(&self, n: usize) -> Vec<&MemoryNode> {
		let mut nodes: Vec<&MemoryNode> = self.nodes.values().collect();
		nodes.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
		nodes.truncate(n);
		nodes
	}

	/// Nodes ranked by importance, highest first (ties by smaller id).
	#[must_use]
	pub fn by_importance(&self) -> Vec<&MemoryNode> {
		let mut nodes: Vec<&MemoryNode> = self.nodes.values().collect();
		nodes.sort_by(|a, b| {
			b.importance
				.total_cmp(&a.importance)
				.then_with(|| a.id.cmp(&b.id))
		});
		nodes
	}
}
