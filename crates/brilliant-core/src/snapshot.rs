//! Snapshot Persistence
//!
//! A snapshot is a versioned JSON document carrying every node field
//! verbatim, the cluster table and the recorded patterns. The vector index is
//! not stored: loading rebuilds it from the node embeddings.
//!
//! Loading is all-or-nothing. Any record that fails validation rejects the
//! whole snapshot with a [`LoadError`].

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cluster::MemoryCluster;
use crate::content::NodeId;
use crate::error::{ConsistencyViolation, LoadError, MemoryError};
use crate::graph::check_symmetry;
use crate::index::{is_unit, l2_norm};
use crate::node::{MemoryNode, NodeStore};
use crate::patterns::{retain_live, DiscoveredPattern};

/// Format version written by this build.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serialized engine state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
	/// Format version
	pub version: u32,
	/// Embedding dimension of every node
	pub dimensions: usize,
	/// When the snapshot was taken
	pub saved_at: DateTime<Utc>,
	/// Live nodes, by id
	pub nodes: Vec<MemoryNode>,
	/// Cluster table
	pub clusters: Vec<MemoryCluster>,
	/// Recorded patterns, oldest first
	#[serde(default)]
	pub patterns: Vec<DiscoveredPattern>,
}

/// State reconstructed from a validated snapshot.
#[derive(Debug)]
pub struct Restored {
	/// Node table
	pub store: NodeStore,
	/// Cluster table
	pub clusters: Vec<MemoryCluster>,
	/// Recorded patterns
	pub patterns: Vec<DiscoveredPattern>,
}

impl Snapshot {
	/// Capture the given state. Nodes are written in id order.
	#[must_use]
	pub fn capture(
		dimensions: usize,
		store: &NodeStore,
		clusters: &[MemoryCluster],
		patterns: &[DiscoveredPattern],
		now: DateTime<Utc>,
	) -> Self {
		Self {
			version: SNAPSHOT_VERSION,
			dimensions,
			saved_at: now,
			nodes: store.sorted().into_iter().cloned().collect(),
			clusters: clusters.to_vec(),
			patterns: patterns.to_vec(),
		}
	}

	/// Parse a snapshot, checking the version before the schema.
	///
	/// # Errors
	///
	/// [`LoadError::Parse`] for invalid JSON or schema,
	/// [`LoadError::UnsupportedVersion`] for any version but [`SNAPSHOT_VERSION`].
	pub fn from_json(bytes: &[u8]) -> Result<Self, LoadError> {
		let value: serde_json::Value = serde_json::from_slice(bytes)?;
		let found = value
			.get("version")
			.and_then(serde_json::Value::as_u64)
			.map_or(0, |v| u32::try_from(v).unwrap_or(u32::MAX));
		if found != SNAPSHOT_VERSION {
			return Err(LoadError::UnsupportedVersion {
				found,
				supported: SNAPSHOT_VERSION,
			});
		}
		Ok(serde_json::from_value(value)?)
	}

	/// Read and parse a snapshot file.
	///
	/// # Errors
	///
	/// [`LoadError::Io`] if the file cannot be read, otherwise as [`Snapshot::from_json`].
	pub fn read(path: &Path) -> Result<Self, LoadError> {
		let bytes = fs::read(path).map_err(|source| LoadError::Io {
			path: path.to_path_buf(),
			source,
		})?;
		Self::from_json(&bytes)
	}

	/// Write the snapshot atomically: a sibling temp file, then a rename.
	///
	/// # Errors
	///
	/// [`MemoryError::Serialize`] or [`MemoryError::Save`].
	pub fn write(&self, path: &Path) -> Result<(), MemoryError> {
		let bytes = serde_json::to_vec(self)?;
		let tmp = temp_path(path);

		let save_err = |source| MemoryError::Save {
			path: path.to_path_buf(),
			source,
		};
		fs::write(&tmp, bytes).map_err(save_err)?;
		fs::rename(&tmp, path).map_err(|source| {
			let _ = fs::remove_file(&tmp);
			save_err(source)
		})
	}

	/// Validate every record against `dimensions` and rebuild the node table.
	///
	/// # Errors
	///
	/// [`LoadError::MalformedNode`], [`LoadError::MalformedCluster`] or
	/// [`LoadError::Inconsistent`] for the first problem found.
	pub fn restore(self, dimensions: usize) -> Result<Restored, LoadError> {
		if self.dimensions != dimensions {
			return Err(LoadError::MalformedNode {
				id: "*".into(),
				reason: format!("snapshot dimension {} differs from engine dimension {dimensions}", self.dimensions),
			});
		}

		let mut store = NodeStore::new();
		let mut seen: HashSet<NodeId> = HashSet::with_capacity(self.nodes.len());
		for node in self.nodes {
			validate_node(&node, dimensions)?;
			if !seen.insert(node.id) {
				return Err(malformed_node(&node.id, "duplicate id"));
			}
			store.insert_node(node);
		}
		check_symmetry(&store)?;

		for cluster in &self.clusters {
			if cluster.centroid.len() != dimensions {
				return Err(LoadError::MalformedCluster {
					id: cluster.id.clone(),
					reason: format!("centroid has {} dimensions", cluster.centroid.len()),
				});
			}
			if let Some(member) = cluster.members.iter().find(|m| !store.contains(m)) {
				return Err(ConsistencyViolation::DanglingClusterMember {
					cluster: cluster.id.clone(),
					member: *member,
				}
				.into());
			}
		}

		let mut patterns = self.patterns;
		retain_live(&mut patterns, |id| store.contains(id));

		Ok(Restored {
			store,
			clusters: self.clusters,
			patterns,
		})
	}
}

fn malformed_node(id: &NodeId, reason: impl Into<String>) -> LoadError {
	LoadError::MalformedNode {
		id: id.to_hex(),
		reason: reason.into(),
	}
}

fn validate_node(node: &MemoryNode, dimensions: usize) -> Result<(), LoadError> {
	if NodeId::for_content(&node.content) != node.id {
		return Err(malformed_node(&node.id, "id does not match content digest"));
	}
	if node.embedding.len() != dimensions {
		return Err(malformed_node(
			&node.id,
			format!("embedding has {} dimensions, expected {dimensions}", node.embedding.len()),
		));
	}
	if !is_unit(&node.embedding) {
		return Err(malformed_node(
			&node.id,
			format!("embedding norm {} is not 1", l2_norm(&node.embedding)),
		));
	}
	if !(0.0..=1.0).contains(&node.importance) {
		return Err(malformed_node(&node.id, format!("importance {} outside [0, 1]", node.importance)));
	}
	if !node.decay_rate.is_finite() || node.decay_rate < 0.0 {
		return Err(malformed_node(&node.id, format!("invalid decay rate {}", node.decay_rate)));
	}
	if node.associations.contains(&node.id) {
		return Err(malformed_node(&node.id, "associated with itself"));
	}
	if let Some((metric, value)) = node.success_metrics.iter().find(|(_, v)| !v.is_finite()) {
		return Err(malformed_node(&node.id, format!("feedback {metric} = {value} is not finite")));
	}
	Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
	let mut name: OsString = path.as_os_str().to_owned();
	name.push(".tmp");
	PathBuf::from(name)
}
