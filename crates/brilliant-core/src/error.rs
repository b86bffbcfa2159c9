//! Error types for memory engine operations.
//!
//! Failures fall into five classes:
//!
//! - [`EmbeddingError`] is fatal to the call that needed a vector (`store`, `recall`).
//! - [`CollaboratorError`] is never fatal; enrichment that hits one is skipped.
//! - [`LoadError`] is fatal to snapshot loading only.
//! - [`ConfigError`] is fatal to engine construction.
//! - [`ConsistencyViolation`] signals a broken invariant, i.e. a bug.

use std::path::PathBuf;

use crate::content::NodeId;

/// Errors produced while turning text into an embedding.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
	/// The embedding backend did not answer in time.
	#[error("Embedding timed out after {seconds}s")]
	Timeout {
		/// Timeout duration in seconds
		seconds: u64,
	},

	/// The backend returned a vector of the wrong length.
	#[error("Embedding has {actual} dimensions, engine expects {expected}")]
	DimensionMismatch {
		/// Dimension configured on the engine
		expected: usize,
		/// Dimension returned by the backend
		actual: usize,
	},

	/// Zero-length or non-finite vector that cannot be normalized.
	#[error("Embedding is degenerate (zero norm or non-finite values)")]
	Degenerate,

	/// Any other backend failure.
	#[error("Embedding backend error: {0}")]
	Backend(String),

	/// ONNX Runtime error.
	#[cfg(feature = "onnx")]
	#[error("ONNX Runtime error: {0}")]
	Ort(#[from] ort::Error),

	/// Tokenizer error.
	#[cfg(feature = "onnx")]
	#[error("Tokenizer error: {0}")]
	Tokenizer(String),

	/// Model files not found.
	#[cfg(feature = "onnx")]
	#[error("Model files not found: {0}")]
	NotFound(String),

	/// Shape error from ndarray.
	#[cfg(feature = "onnx")]
	#[error("Shape error: {0}")]
	Shape(#[from] ndarray::ShapeError),
}

impl EmbeddingError {
	/// Check if the backend simply ran out of time.
	#[must_use]
	pub const fn is_timeout(&self) -> bool {
		matches!(self, Self::Timeout { .. })
	}
}

/// Errors from the reasoning collaborator. Always degraded to "skip".
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
	/// The collaborator did not answer in time.
	#[error("Collaborator timed out after {seconds}s")]
	Timeout {
		/// Timeout duration in seconds
		seconds: u64,
	},

	/// The answer could not be parsed into the requested structure.
	#[error("Malformed collaborator response: {0}")]
	Malformed(String),

	/// Transport or service failure.
	#[error("Collaborator backend error: {0}")]
	Backend(String),
}

impl CollaboratorError {
	/// Check if retrying later could help.
	#[must_use]
	pub const fn is_recoverable(&self) -> bool {
		matches!(self, Self::Timeout { .. } | Self::Backend(_))
	}
}

/// A broken engine invariant. Never produced by a healthy engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConsistencyViolation {
	/// `to` lists `from` but not the other way round.
	#[error("Association {from} -> {to} has no reverse edge")]
	AsymmetricAssociation {
		/// Node holding the edge
		from: NodeId,
		/// Node missing the reverse edge
		to: NodeId,
	},

	/// A node lists an association to an id that is not stored.
	#[error("Node {from} is associated with unknown node {to}")]
	DanglingAssociation {
		/// Node holding the edge
		from: NodeId,
		/// Missing target
		to: NodeId,
	},

	/// Vector index and node store disagree.
	#[error("Vector index holds {indexed} vectors for {stored} stored nodes")]
	IndexMismatch {
		/// Vectors in the index
		indexed: usize,
		/// Nodes in the store
		stored: usize,
	},

	/// Importance escaped `[0, 1]`.
	#[error("Node {id} has importance {importance} outside [0, 1]")]
	ImportanceOutOfRange {
		/// Offending node
		id: NodeId,
		/// Offending value
		importance: f32,
	},

	/// Embedding is not unit length.
	#[error("Node {id} has embedding norm {norm}")]
	NonUnitEmbedding {
		/// Offending node
		id: NodeId,
		/// Measured L2 norm
		norm: f32,
	},

	/// A cluster references a node that is not stored.
	#[error("Cluster {cluster} references unknown node {member}")]
	DanglingClusterMember {
		/// Cluster id
		cluster: String,
		/// Missing member
		member: NodeId,
	},
}

/// Errors from loading a persisted snapshot.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
	/// Snapshot file could not be read.
	#[error("Failed to read snapshot {path}: {source}")]
	Io {
		/// Snapshot path
		path: PathBuf,
		/// Underlying error
		#[source]
		source: std::io::Error,
	},

	/// Snapshot is not valid JSON for the snapshot schema.
	#[error("Failed to parse snapshot: {0}")]
	Parse(#[from] serde_json::Error),

	/// Snapshot was written by an incompatible format version.
	#[error("Unsupported snapshot version {found} (supported: {supported})")]
	UnsupportedVersion {
		/// Version found in the file
		found: u32,
		/// Version this build reads
		supported: u32,
	},

	/// A node record failed validation.
	#[error("Malformed node {id}: {reason}")]
	MalformedNode {
		/// Node id as written in the snapshot
		id: String,
		/// What was wrong
		reason: String,
	},

	/// A cluster record failed validation.
	#[error("Malformed cluster {id}: {reason}")]
	MalformedCluster {
		/// Cluster id as written in the snapshot
		id: String,
		/// What was wrong
		reason: String,
	},

	/// Records are individually valid but inconsistent with each other.
	#[error("Inconsistent snapshot: {0}")]
	Inconsistent(#[from] ConsistencyViolation),

	/// The engine the snapshot was loaded into is misconfigured.
	#[error(transparent)]
	Config(#[from] ConfigError),
}

/// Errors from loading or validating a [`crate::MemoryConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	/// Config file could not be read.
	#[error("Failed to read config {path}: {source}")]
	Io {
		/// Config path
		path: PathBuf,
		/// Underlying error
		#[source]
		source: std::io::Error,
	},

	/// Config file is not valid JSON for the config schema.
	#[error("Failed to parse config: {0}")]
	Parse(#[from] serde_json::Error),

	/// A value is outside its allowed range.
	#[error("Invalid config value for {field}: {reason}")]
	Invalid {
		/// Dotted field path
		field: &'static str,
		/// What was wrong
		reason: String,
	},
}

/// Errors surfaced by the [`crate::MemoryEngine`] facade.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
	/// Embedding the content or query failed.
	#[error(transparent)]
	Embedding(#[from] EmbeddingError),

	/// The referenced node is not stored.
	#[error("Unknown memory node: {0}")]
	UnknownNode(NodeId),

	/// A feedback value that cannot be scored or persisted.
	#[error("Feedback {metric} = {value} is not a finite number")]
	InvalidFeedback {
		/// Metric name
		metric: String,
		/// Rejected value
		value: f32,
	},

	/// Writing a snapshot failed.
	#[error("Failed to write snapshot {path}: {source}")]
	Save {
		/// Snapshot path
		path: PathBuf,
		/// Underlying error
		#[source]
		source: std::io::Error,
	},

	/// Serializing a snapshot failed.
	#[error("Failed to serialize snapshot: {0}")]
	Serialize(#[from] serde_json::Error),
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, MemoryError>;
