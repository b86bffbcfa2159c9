//! # Brilliant Core
//!
//! Associative memory for autonomous agents: content-addressable storage with
//! exact vector recall, a symmetric association graph, importance decay and
//! periodic consolidation.
//!
//! ## Core Concepts
//!
//! ### Content identity
//!
//! A memory's id is the truncated SHA-256 of its canonical content. Storing
//! the same content twice merges into the existing node instead of creating a
//! second one.
//!
//! ### Recall
//!
//! Queries are embedded, matched against every stored vector by inner product
//! (embeddings are unit length, so this is cosine similarity), expanded one hop
//! through the association graph and ranked by
//!
//! ```text
//! rank = similarity × importance
//! ```
//!
//! ### Importance
//!
//! Every node carries a score in `[0, 1]` combining four factors:
//!
//! ```text
//! importance = 0.3 · e^(−decay · age_days)
//!            + 0.2 · min(1, accesses / 10)
//!            + 0.3 · mean(success metrics)
//!            + 0.2 · min(1, associations / 5)
//! ```
//!
//! ### Consolidation
//!
//! Every `interval` new memories, nodes whose importance fell below the
//! eviction threshold are removed, the index is rebuilt and survivors are
//! re-clustered with k-means.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use brilliant_core::{map_from_json, HashingEmbedder, MemoryConfig, MemoryEngine, NoopReasoner};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = MemoryEngine::new(
//! 	MemoryConfig::with_dimensions(128),
//! 	Arc::new(HashingEmbedder::new(128)),
//! 	Arc::new(NoopReasoner),
//! )?;
//!
//! let finding = map_from_json(json!({"type": "reentrancy", "target": "vault withdraw"}))?;
//! let id = engine.store(finding.clone(), None, None).await?;
//!
//! let hits = engine.recall(&finding, 5, 0.5).await?;
//! assert_eq!(hits[0].node.id, id);
//! # Ok(())
//! # }
//! ```
//!
//! ## Collaborators
//!
//! Embedding and reasoning are external. Implement [`Embedder`] for your model
//! (or enable the `onnx` feature for a local sentence-transformer) and
//! [`Reasoner`] for association hints, synthesis and pattern abstraction.
//! [`PromptReasoner`] adapts any text-completion client.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cluster;
pub mod config;
pub mod consolidation;
pub mod content;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod graph;
pub mod importance;
pub mod index;
pub mod insights;
pub mod node;
pub mod patterns;
pub mod reasoning;
pub mod recall;
pub mod snapshot;

pub use cluster::{cluster_embeddings, ClusteringConfig, MemoryCluster};
pub use config::{AssociationConfig, CollaboratorConfig, MemoryConfig, NoveltyConfig};
pub use consolidation::{ConsolidationConfig, ConsolidationReport};
pub use content::{
	canonical_json, content_to_text, map_from_json, ContentMap, ContentValue, HeadlineField, NodeId, TextConfig,
};
pub use embedding::{Embedder, HashingEmbedder};
#[cfg(feature = "onnx")]
pub use embedding::{OnnxEmbedder, OnnxModelConfig};
pub use engine::{MemoryEngine, MemoryStats};
pub use error::{CollaboratorError, ConfigError, ConsistencyViolation, EmbeddingError, LoadError, MemoryError};
pub use importance::{breakdown, ImportanceBreakdown, ImportanceConfig};
pub use index::VectorIndex;
pub use insights::{InsightQuery, InsightSummary, TagBucket};
pub use node::MemoryNode;
pub use patterns::{DiscoveredPattern, PatternConfig, PatternInstance, PatternTemplate};
pub use reasoning::{
	AssociationCandidate, CompletionClient, NoopReasoner, PromptConfig, PromptReasoner, Reasoner,
};
pub use recall::{RecallConfig, RecallHit};
pub use snapshot::{Snapshot, SNAPSHOT_VERSION};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
