//! Memory Engine
//!
//! The facade owning every component. One `RwLock` guards the node table,
//! the index pointer, the cluster table and the pattern log:
//!
//! - Embedding and reasoner calls run with no lock held, under a timeout.
//! - Index scans clone the `Arc` and run without the lock.
//! - Every structural change (insert, link, recall side effects, eviction,
//!   pointer swap) is a short write.
//!
//! `store` commits the node before any enrichment starts. Enrichment failures
//! are logged and skipped, and dropping a `store` future mid-enrichment never
//! undoes the insert.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::cluster::MemoryCluster;
use crate::config::MemoryConfig;
use crate::consolidation::{evict, prune_clusters, rebuild, reconcile, ConsolidationReport};
use crate::content::{content_to_text, ContentMap, ContentValue, NodeId};
use crate::embedding::{prepare, Embedder};
use crate::error::{CollaboratorError, ConfigError, ConsistencyViolation, EmbeddingError, LoadError, MemoryError, Result};
use crate::graph::{check_symmetry, edge_count, link};
use crate::importance::recompute;
use crate::index::{is_unit, l2_norm, VectorIndex};
use crate::insights::{summarize, InsightQuery, InsightSummary};
use crate::node::{MemoryNode, NodeDraft, NodeStore};
use crate::patterns::{abstraction_content, detect_patterns, record_pattern, retain_live, DiscoveredPattern};
use crate::reasoning::{AssociationCandidate, Reasoner};
use crate::recall::{candidate_count, rank, touch_and_expand, RecallHit, RecallRequest};
use crate::snapshot::Snapshot;

/// Counters describing the engine's current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
	/// Live nodes
	pub nodes: usize,
	/// Vectors in the index
	pub indexed: usize,
	/// Clusters in the current table
	pub clusters: usize,
	/// Undirected association edges
	pub associations: usize,
	/// Recorded patterns
	pub patterns: usize,
	/// Nodes created since the last consolidation
	pub inserts_since_consolidation: usize,
}

#[derive(Debug)]
struct MemoryState {
	nodes: NodeStore,
	index: Arc<VectorIndex>,
	clusters: Arc<Vec<MemoryCluster>>,
	patterns: Vec<DiscoveredPattern>,
	inserts_since_consolidation: usize,
}

impl MemoryState {
	fn empty(dimensions: usize) -> Self {
		Self {
			nodes: NodeStore::new(),
			index: Arc::new(VectorIndex::new(dimensions)),
			clusters: Arc::new(Vec::new()),
			patterns: Vec::new(),
			inserts_since_consolidation: 0,
		}
	}
}

/// Result of the base insert of a `store`.
struct Inserted {
	id: NodeId,
	created: bool,
	embedding: Vec<f32>,
}

/// Content-addressable associative memory.
pub struct MemoryEngine {
	config: MemoryConfig,
	embedder: Arc<dyn Embedder>,
	reasoner: Arc<dyn Reasoner>,
	state: RwLock<MemoryState>,
	consolidation: Mutex<()>,
}

impl std::fmt::Debug for MemoryEngine {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MemoryEngine")
			.field("config", &self.config)
			.field("stats", &self.stats())
			.finish_non_exhaustive()
	}
}

impl MemoryEngine {
	/// Create an empty engine.
	///
	/// # Errors
	///
	/// [`ConfigError::Invalid`] if the config fails validation or the embedder's
	/// dimension differs from `config.embedding_dim`.
	pub fn new(
		config: MemoryConfig,
		embedder: Arc<dyn Embedder>,
		reasoner: Arc<dyn Reasoner>,
	) -> std::result::Result<Self, ConfigError> {
		config.validate()?;
		if embedder.dimensions() != config.embedding_dim {
			return Err(ConfigError::Invalid {
				field: "embedding_dim",
				reason: format!(
					"embedder produces {} dimensions, config expects {}",
					embedder.dimensions(),
					config.embedding_dim
				),
			});
		}

		let state = MemoryState::empty(config.embedding_dim);
		Ok(Self {
			config,
			embedder,
			reasoner,
			state: RwLock::new(state),
			consolidation: Mutex::new(()),
		})
	}

	/// Active configuration.
	#[must_use]
	pub const fn config(&self) -> &MemoryConfig {
		&self.config
	}

	// ========================================================================
	// Store
	// ========================================================================

	/// Store `content`, or merge into the node that already holds it.
	///
	/// New nodes are linked to similar memories, may be linked further by the
	/// reasoner, and may complete a recurring pattern. Every
	/// `consolidation.interval` new nodes trigger a consolidation pass.
	///
	/// # Errors
	///
	/// [`MemoryError::Embedding`] if the content cannot be embedded. Nothing is
	/// stored in that case.
	#[instrument(skip_all, fields(importance = importance))]
	pub async fn store(&self, content: ContentMap, context: Option<ContentMap>, importance: Option<f32>) -> Result<NodeId> {
		let importance = importance.unwrap_or(self.config.default_importance);
		let inserted = self.store_and_associate(content, context, importance).await?;

		if inserted.created {
			self.discover_patterns().await;
			self.maybe_consolidate();
		}
		Ok(inserted.id)
	}

	/// Base insert plus association building. Never detects patterns, so
	/// abstractions stored from pattern detection cannot recurse.
	async fn store_and_associate(
		&self,
		content: ContentMap,
		context: Option<ContentMap>,
		importance: f32,
	) -> Result<Inserted> {
		let inserted = self.insert(content, context, importance).await?;
		if inserted.created {
			self.build_associations(&inserted.id, &inserted.embedding).await;
		}
		Ok(inserted)
	}

	async fn insert(&self, content: ContentMap, context: Option<ContentMap>, importance: f32) -> Result<Inserted> {
		let text = content_to_text(&content, &self.config.text);
		let embedding = self.embed(&text).await?;
		let id = NodeId::for_content(&content);
		let now = Utc::now();

		let created = {
			let mut guard = self.state.write();
			let state = &mut *guard;
			if !state.nodes.contains(&id) {
				Arc::make_mut(&mut state.index).insert(id, &embedding)?;
			}
			let upserted = state.nodes.upsert(
				NodeDraft {
					content,
					embedding: embedding.clone(),
					context,
					importance,
					decay_rate: self.config.importance.default_decay_rate,
				},
				now,
			);
			if upserted.created {
				state.inserts_since_consolidation += 1;
			}
			upserted.created
		};

		debug!(%id, created, "Stored memory");
		Ok(Inserted { id, created, embedding })
	}

	async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
		let limit = self.config.collaborators.embedding_timeout();
		let raw = tokio::time::timeout(limit, self.embedder.embed(text))
			.await
			.map_err(|_| EmbeddingError::Timeout {
				seconds: limit.as_secs(),
			})??;
		prepare(raw, self.config.embedding_dim)
	}

	/// Run a reasoner call under the timeout; any failure becomes `None`.
	async fn consult<T>(
		&self,
		task: &'static str,
		call: impl Future<Output = std::result::Result<T, CollaboratorError>> + Send,
	) -> Option<T> {
		let limit = self.config.collaborators.reasoning_timeout();
		let outcome = tokio::time::timeout(limit, call)
			.await
			.unwrap_or(Err(CollaboratorError::Timeout {
				seconds: limit.as_secs(),
			}));

		match outcome {
			Ok(value) => Some(value),
			Err(error) => {
				warn!(task, %error, recoverable = error.is_recoverable(), "Reasoner failed; skipping enrichment");
				None
			}
		}
	}

	// ========================================================================
	// Associations
	// ========================================================================

	async fn build_associations(&self, id: &NodeId, embedding: &[f32]) {
		let cfg = &self.config.association;
		let hits = self.recall_vector(embedding, cfg.k, cfg.search_threshold, Some(id));

		let linked = {
			let mut state = self.state.write();
			let now = Utc::now();
			hits.iter()
				.filter(|hit| hit.score > cfg.link_threshold)
				.filter(|hit| link(&mut state.nodes, id, &hit.node.id, now, &self.config.importance))
				.count()
		};
		debug!(%id, candidates = hits.len(), linked, "Linked similar memories");

		if hits.len() < cfg.reasoner_min_candidates {
			return;
		}
		let Some(current) = self.get(id).map(|node| node.content) else {
			return;
		};
		let candidates: Vec<AssociationCandidate> = hits
			.iter()
			.take(cfg.reasoner_candidates)
			.map(|hit| AssociationCandidate {
				id: hit.node.id,
				content: hit.node.content.clone(),
				score: hit.score,
			})
			.collect();

		let Some(suggested) = self
			.consult("associate", self.reasoner.associate(&current, &candidates))
			.await
		else {
			return;
		};

		let mut unknown = 0_usize;
		{
			let mut state = self.state.write();
			let now = Utc::now();
			for other in &suggested {
				if !state.nodes.contains(other) || other == id {
					unknown += 1;
					continue;
				}
				let _ = link(&mut state.nodes, id, other, now, &self.config.importance);
			}
		}
		if unknown > 0 {
			warn!(%id, unknown, "Reasoner suggested unknown associations; dropped");
		}
	}

	// ========================================================================
	// Recall
	// ========================================================================

	/// Recall with the configured `k` and threshold.
	///
	/// # Errors
	///
	/// As [`MemoryEngine::recall`].
	pub async fn recall_default(&self, query: &ContentMap) -> Result<Vec<RecallHit>> {
		self.recall(query, self.config.recall.default_k, self.config.recall.default_threshold)
			.await
	}

	/// The `k` memories most similar to `query`, with associative expansion.
	///
	/// Direct matches count as accesses: their `access_count` grows and their
	/// importance is recomputed.
	///
	/// # Errors
	///
	/// [`MemoryError::Embedding`] if the query cannot be embedded.
	#[instrument(skip_all, fields(k = k, threshold = threshold))]
	pub async fn recall(&self, query: &ContentMap, k: usize, threshold: f32) -> Result<Vec<RecallHit>> {
		if k == 0 {
			return Ok(Vec::new());
		}
		let text = content_to_text(query, &self.config.text);
		let vector = self.embed(&text).await?;
		let hits = self.recall_vector(&vector, k, threshold, None);
		debug!(results = hits.len(), "Recall complete");
		Ok(hits)
	}

	fn recall_vector(&self, query: &[f32], k: usize, threshold: f32, exclude: Option<&NodeId>) -> Vec<RecallHit> {
		if k == 0 {
			return Vec::new();
		}

		// Scan a snapshot of the index without holding the lock
		let index = Arc::clone(&self.state.read().index);
		let fetch = candidate_count(k, &self.config.recall) + usize::from(exclude.is_some());
		let candidates = index.search(query, fetch);

		let request = RecallRequest { threshold, exclude };
		let mut hits = {
			let mut state = self.state.write();
			touch_and_expand(
				&mut state.nodes,
				&candidates,
				&request,
				Utc::now(),
				&self.config.recall,
				&self.config.importance,
			)
		};
		rank(&mut hits, k);
		hits
	}

	// ========================================================================
	// Synthesis, patterns, insights
	// ========================================================================

	/// Ask the reasoner to combine a diverse sample into a new memory.
	///
	/// Returns `None` when the store is empty or the reasoner fails, times out,
	/// answers malformed output or declines. Nothing is stored in that case.
	///
	/// # Errors
	///
	/// [`MemoryError::Embedding`] if the synthesized content cannot be embedded.
	#[instrument(skip_all)]
	pub async fn generate_novel_combination(&self, context: &ContentMap) -> Result<Option<MemoryNode>> {
		let sample: Vec<ContentMap> = self
			.diverse_sample(self.config.novelty.sample_size)
			.into_iter()
			.map(|node| node.content)
			.collect();
		if sample.is_empty() {
			return Ok(None);
		}

		let Some(Some(content)) = self
			.consult("synthesize", self.reasoner.synthesize(&sample, context))
			.await
		else {
			return Ok(None);
		};

		let provenance = provenance("creative_combination");
		let id = self
			.store(content, Some(provenance), Some(self.config.novelty.importance))
			.await?;
		info!(%id, sample = sample.len(), "Stored novel combination");
		Ok(self.get(&id))
	}

	/// One representative per cluster, then the most important remaining nodes.
	fn diverse_sample(&self, size: usize) -> Vec<MemoryNode> {
		let state = self.state.read();
		let mut chosen: Vec<NodeId> = Vec::with_capacity(size);

		for cluster in state.clusters.iter() {
			if chosen.len() >= size {
				break;
			}
			if let Some(rep) = cluster.representative() {
				if state.nodes.contains(rep) && !chosen.contains(rep) {
					chosen.push(*rep);
				}
			}
		}
		for node in state.nodes.by_importance() {
			if chosen.len() >= size {
				break;
			}
			if !chosen.contains(&node.id) {
				chosen.push(node.id);
			}
		}

		chosen.iter().filter_map(|id| state.nodes.get(id).cloned()).collect()
	}

	async fn discover_patterns(&self) {
		let cfg = &self.config.patterns;
		if cfg.templates.is_empty() {
			return;
		}

		let fresh: Vec<DiscoveredPattern> = {
			let mut guard = self.state.write();
			let state = &mut *guard;
			let found = detect_patterns(&state.nodes.most_recent(cfg.window), cfg, Utc::now());
			found
				.into_iter()
				.filter(|pattern| record_pattern(&mut state.patterns, pattern.clone(), cfg.max_patterns))
				.collect()
		};

		for pattern in fresh {
			info!(kind = %pattern.kind, instances = pattern.instances.len(), confidence = pattern.confidence, "Discovered pattern");

			let Some(Some(abstraction)) = self
				.consult("abstract", self.reasoner.abstract_pattern(&pattern))
				.await
			else {
				continue;
			};

			let content = abstraction_content(&pattern, abstraction);
			if let Err(error) = self
				.store_and_associate(content, Some(provenance("pattern_abstraction")), cfg.abstraction_importance)
				.await
			{
				warn!(kind = %pattern.kind, %error, "Failed to store abstraction");
			}
		}
	}

	/// Insight summary with the configured query.
	#[must_use]
	pub fn get_insights(&self) -> InsightSummary {
		self.insights(&self.config.insights)
	}

	/// Read-only aggregate over the most recent nodes.
	#[must_use]
	pub fn insights(&self, query: &InsightQuery) -> InsightSummary {
		let state = self.state.read();
		summarize(&state.nodes.most_recent(query.window), &state.patterns, query)
	}

	/// Record an external feedback signal and rescore the node.
	///
	/// Returns the new importance.
	///
	/// # Errors
	///
	/// [`MemoryError::InvalidFeedback`] for NaN or infinite values,
	/// [`MemoryError::UnknownNode`] if `id` is not stored.
	pub fn record_feedback(&self, id: &NodeId, metric: impl Into<String>, value: f32) -> Result<f32> {
		let metric = metric.into();
		if !value.is_finite() {
			return Err(MemoryError::InvalidFeedback { metric, value });
		}
		let mut state = self.state.write();
		let node = state.nodes.get_mut(id).ok_or(MemoryError::UnknownNode(*id))?;
		let _ = node.success_metrics.insert(metric, value);
		node.importance = recompute(node, Utc::now(), &self.config.importance);
		Ok(node.importance)
	}

	// ========================================================================
	// Consolidation
	// ========================================================================

	fn consolidation_due(&self) -> bool {
		self.state.read().inserts_since_consolidation >= self.config.consolidation.interval
	}

	/// Run a pass if one is due and none is running. Stores that race past the
	/// interval together trigger a single pass.
	fn maybe_consolidate(&self) {
		if !self.consolidation_due() {
			return;
		}
		let Some(running) = self.consolidation.try_lock() else {
			debug!("Consolidation already running; skipped");
			return;
		};
		if !self.consolidation_due() {
			return;
		}
		if let Err(error) = self.consolidate_locked(&running) {
			warn!(%error, "Automatic consolidation failed");
		}
	}

	/// Evict low-importance nodes, rebuild the index and re-cluster.
	///
	/// Passes are serialized. The rebuild runs without the state lock; nodes
	/// stored meanwhile are folded in before the swap.
	///
	/// # Errors
	///
	/// [`MemoryError::Embedding`] if a stored embedding has the wrong length,
	/// which a healthy engine never produces.
	#[instrument(skip_all)]
	pub fn consolidate(&self) -> Result<ConsolidationReport> {
		let running = self.consolidation.lock();
		self.consolidate_locked(&running)
	}

	fn consolidate_locked(&self, _running: &MutexGuard<'_, ()>) -> Result<ConsolidationReport> {
		let cfg = &self.config.consolidation;
		let now = Utc::now();

		let (evicted, survivors) = {
			let mut guard = self.state.write();
			let state = &mut *guard;
			let evicted = evict(&mut state.nodes, cfg.eviction_threshold, now, &self.config.importance);
			if !evicted.is_empty() {
				prune_clusters(Arc::make_mut(&mut state.clusters), &state.nodes);
				retain_live(&mut state.patterns, |id| state.nodes.contains(id));
			}
			state.inserts_since_consolidation = 0;

			let survivors: Vec<(NodeId, Vec<f32>)> = state
				.nodes
				.sorted()
				.into_iter()
				.map(|node| (node.id, node.embedding.clone()))
				.collect();
			(evicted, survivors)
		};

		let mut rebuilt = rebuild(self.config.embedding_dim, &survivors, &cfg.clustering)?;

		let report = {
			let mut guard = self.state.write();
			let state = &mut *guard;
			let folded_in = reconcile(&mut rebuilt, &state.nodes)?;
			state.index = Arc::new(rebuilt.index);
			state.clusters = Arc::new(rebuilt.clusters);
			ConsolidationReport {
				evicted,
				survivors: state.nodes.len(),
				clusters: state.clusters.len(),
				folded_in,
			}
		};

		info!(
			evicted = report.evicted.len(),
			survivors = report.survivors,
			clusters = report.clusters,
			folded_in = report.folded_in,
			"Consolidation complete"
		);
		Ok(report)
	}

	// ========================================================================
	// Introspection
	// ========================================================================

	/// Copy of a stored node.
	#[must_use]
	pub fn get(&self, id: &NodeId) -> Option<MemoryNode> {
		self.state.read().nodes.get(id).cloned()
	}

	/// Number of live nodes.
	#[must_use]
	pub fn len(&self) -> usize {
		self.state.read().nodes.len()
	}

	/// Whether nothing is stored.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.state.read().nodes.is_empty()
	}

	/// Current cluster table.
	#[must_use]
	pub fn clusters(&self) -> Vec<MemoryCluster> {
		self.state.read().clusters.as_ref().clone()
	}

	/// Recorded patterns, oldest first.
	#[must_use]
	pub fn patterns(&self) -> Vec<DiscoveredPattern> {
		self.state.read().patterns.clone()
	}

	/// Current counters.
	#[must_use]
	pub fn stats(&self) -> MemoryStats {
		let state = self.state.read();
		MemoryStats {
			nodes: state.nodes.len(),
			indexed: state.index.len(),
			clusters: state.clusters.len(),
			associations: edge_count(&state.nodes),
			patterns: state.patterns.len(),
			inserts_since_consolidation: state.inserts_since_consolidation,
		}
	}

	/// Check every structural invariant.
	///
	/// # Errors
	///
	/// The first [`ConsistencyViolation`] found. A healthy engine never returns one.
	pub fn verify_invariants(&self) -> std::result::Result<(), ConsistencyViolation> {
		let state = self.state.read();

		for node in state.nodes.sorted() {
			if !(0.0..=1.0).contains(&node.importance) {
				return Err(ConsistencyViolation::ImportanceOutOfRange {
					id: node.id,
					importance: node.importance,
				});
			}
			if !is_unit(&node.embedding) {
				return Err(ConsistencyViolation::NonUnitEmbedding {
					id: node.id,
					norm: l2_norm(&node.embedding),
				});
			}
		}
		check_symmetry(&state.nodes)?;

		let all_indexed = state.nodes.all().all(|node| state.index.contains(&node.id));
		if state.index.len() != state.nodes.len() || !all_indexed {
			return Err(ConsistencyViolation::IndexMismatch {
				indexed: state.index.len(),
				stored: state.nodes.len(),
			});
		}

		for cluster in state.clusters.iter() {
			if let Some(member) = cluster.members.iter().find(|m| !state.nodes.contains(m)) {
				return Err(ConsistencyViolation::DanglingClusterMember {
					cluster: cluster.id.clone(),
					member: *member,
				});
			}
		}
		Ok(())
	}

	// ========================================================================
	// Persistence
	// ========================================================================

	/// Write a snapshot atomically.
	///
	/// # Errors
	///
	/// [`MemoryError::Serialize`] or [`MemoryError::Save`].
	pub fn save(&self, path: &Path) -> Result<()> {
		let snapshot = {
			let state = self.state.read();
			Snapshot::capture(
				self.config.embedding_dim,
				&state.nodes,
				&state.clusters,
				&state.patterns,
				Utc::now(),
			)
		};
		snapshot.write(path)?;
		info!(path = %path.display(), nodes = snapshot.nodes.len(), "Saved memory snapshot");
		Ok(())
	}

	/// Create an engine from a snapshot file.
	///
	/// # Errors
	///
	/// Any [`LoadError`]; partial state is never installed.
	pub fn load(
		path: &Path,
		config: MemoryConfig,
		embedder: Arc<dyn Embedder>,
		reasoner: Arc<dyn Reasoner>,
	) -> std::result::Result<Self, LoadError> {
		let engine = Self::new(config, embedder, reasoner)?;
		let restored = Snapshot::read(path)?.restore(engine.config.embedding_dim)?;

		let index = VectorIndex::from_entries(
			engine.config.embedding_dim,
			restored.store.sorted().into_iter().map(|n| (n.id, n.embedding.as_slice())),
		)
		.map_err(|e| LoadError::MalformedNode {
			id: "*".into(),
			reason: e.to_string(),
		})?;

		let nodes = restored.store.len();
		{
			let mut state = engine.state.write();
			*state = MemoryState {
				nodes: restored.store,
				index: Arc::new(index),
				clusters: Arc::new(restored.clusters),
				patterns: restored.patterns,
				inserts_since_consolidation: 0,
			};
		}

		info!(path = %path.display(), nodes, "Loaded memory snapshot");
		Ok(engine)
	}

	/// Like [`MemoryEngine::load`], but a missing or rejected snapshot yields an
	/// empty engine.
	///
	/// # Errors
	///
	/// [`ConfigError`] only; snapshot problems are logged.
	pub fn load_or_empty(
		path: &Path,
		config: MemoryConfig,
		embedder: Arc<dyn Embedder>,
		reasoner: Arc<dyn Reasoner>,
	) -> std::result::Result<Self, ConfigError> {
		match Self::load(path, config.clone(), Arc::clone(&embedder), Arc::clone(&reasoner)) {
			Ok(engine) => Ok(engine),
			Err(LoadError::Config(error)) => Err(error),
			Err(error) => {
				warn!(path = %path.display(), %error, "Snapshot not loaded; starting empty");
				Self::new(config, embedder, reasoner)
			}
		}
	}
}

fn provenance(method: &str) -> ContentMap {
	let mut context = ContentMap::new();
	let _ = context.insert("generated".into(), ContentValue::Bool(true));
	let _ = context.insert("method".into(), method.into());
	context
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
	use super::*;
	use crate::content::map_from_json;
	use crate::embedding::HashingEmbedder;
	use crate::patterns::PatternTemplate;
	use crate::reasoning::NoopReasoner;
	use async_trait::async_trait;
	use serde_json::json;
	use std::collections::HashMap;
	use std::time::Duration;

	// ========================================================================
	// Stubs
	// ========================================================================

	/// Fixed vectors for known texts, feature hashing for the rest.
	struct TableEmbedder {
		table: HashMap<String, Vec<f32>>,
		fallback: HashingEmbedder,
	}

	impl TableEmbedder {
		fn new(dimensions: usize, entries: &[(&str, Vec<f32>)]) -> Self {
			Self {
				table: entries.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect(),
				fallback: HashingEmbedder::new(dimensions),
			}
		}
	}

	#[async_trait]
	impl Embedder for TableEmbedder {
		fn dimensions(&self) -> usize {
			self.fallback.dimensions()
		}

		async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
			match self.table.get(text) {
				Some(v) => Ok(v.clone()),
				None => self.fallback.embed_sync(text),
			}
		}
	}

	/// Embeds `slot: <n>` as the n-th basis vector.
	struct SlotEmbedder(usize);

	#[async_trait]
	impl Embedder for SlotEmbedder {
		fn dimensions(&self) -> usize {
			self.0
		}

		async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
			let slot: usize = text
				.trim_start_matches("slot: ")
				.parse()
				.map_err(|_| EmbeddingError::Backend(format!("no slot in {text}")))?;
			let mut v = vec![0.0; self.0];
			v[slot % self.0] = 1.0;
			Ok(v)
		}
	}

	struct StalledEmbedder;

	#[async_trait]
	impl Embedder for StalledEmbedder {
		fn dimensions(&self) -> usize {
			4
		}

		async fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
			tokio::time::sleep(Duration::from_secs(3600)).await;
			Ok(vec![1.0, 0.0, 0.0, 0.0])
		}
	}

	/// Scripted reasoner.
	#[derive(Default)]
	struct Scripted {
		associate_with: Vec<NodeId>,
		synthesis: Option<std::result::Result<Option<ContentMap>, String>>,
		abstraction: Option<ContentMap>,
		stall: bool,
	}

	#[async_trait]
	impl Reasoner for Scripted {
		async fn associate(
			&self,
			_current: &ContentMap,
			_similar: &[AssociationCandidate],
		) -> std::result::Result<Vec<NodeId>, CollaboratorError> {
			if self.stall {
				tokio::time::sleep(Duration::from_secs(3600)).await;
			}
			Ok(self.associate_with.clone())
		}

		async fn synthesize(
			&self,
			_sample: &[ContentMap],
			_context: &ContentMap,
		) -> std::result::Result<Option<ContentMap>, CollaboratorError> {
			match &self.synthesis {
				Some(Ok(content)) => Ok(content.clone()),
				Some(Err(reason)) => Err(CollaboratorError::Malformed(reason.clone())),
				None => Ok(None),
			}
		}

		async fn abstract_pattern(
			&self,
			_pattern: &DiscoveredPattern,
		) -> std::result::Result<Option<ContentMap>, CollaboratorError> {
			Ok(self.abstraction.clone())
		}
	}

	fn content(value: serde_json::Value) -> ContentMap {
		map_from_json(value).unwrap()
	}

	fn slot(n: usize) -> ContentMap {
		content(json!({ "slot": n.to_string() }))
	}

	fn engine(config: MemoryConfig, embedder: impl Embedder + 'static, reasoner: impl Reasoner + 'static) -> MemoryEngine {
		MemoryEngine::new(config, Arc::new(embedder), Arc::new(reasoner)).unwrap()
	}

	fn hashing_engine() -> MemoryEngine {
		engine(MemoryConfig::with_dimensions(64), HashingEmbedder::new(64), NoopReasoner)
	}

	// ========================================================================
	// Construction
	// ========================================================================

	#[test]
	fn test_dimension_mismatch_rejected() {
		let result = MemoryEngine::new(
			MemoryConfig::with_dimensions(8),
			Arc::new(HashingEmbedder::new(4)),
			Arc::new(NoopReasoner),
		);
		assert!(matches!(result, Err(ConfigError::Invalid { field: "embedding_dim", .. })));
	}

	// ========================================================================
	// Store & recall
	// ========================================================================

	#[tokio::test]
	async fn test_store_is_idempotent() {
		let engine = hashing_engine();
		let c = content(json!({"type": "reentrancy", "target": "vault"}));

		let first = engine.store(c.clone(), None, None).await.unwrap();
		let second = engine
			.store(c, Some(content(json!({"source": "rescan"}))), Some(0.9))
			.await
			.unwrap();

		assert_eq!(first, second);
		assert_eq!(engine.len(), 1);
		let node = engine.get(&first).unwrap();
		assert!((node.importance - 0.9).abs() < f32::EPSILON);
		assert_eq!(node.context["source"].as_str(), Some("rescan"));
		assert_eq!(engine.stats().inserts_since_consolidation, 1);
		assert!(engine.verify_invariants().is_ok());
	}

	#[tokio::test]
	async fn test_self_recall() {
		let engine = hashing_engine();
		let c = content(json!({"type": "oracle manipulation", "protocol": "lending"}));
		let id = engine.store(c.clone(), None, None).await.unwrap();
		let _ = engine
			.store(content(json!({"type": "unchecked call"})), None, None)
			.await
			.unwrap();

		let hits = engine.recall(&c, 1, 0.7).await.unwrap();
		assert_eq!(hits.len(), 1);
		assert_eq!(hits[0].node.id, id);
		assert!((hits[0].score - 1.0).abs() < 1e-4);
		assert_eq!(hits[0].node.access_count, 1);
	}

	#[tokio::test]
	async fn test_reentrancy_scenario() {
		let embedder = TableEmbedder::new(
			4,
			&[
				("type: reentrancy", vec![1.0, 0.0, 0.0, 0.0]),
				("type: reentrancy_variant", vec![0.98, 0.2, 0.0, 0.0]),
			],
		);
		let engine = engine(MemoryConfig::with_dimensions(4), embedder, NoopReasoner);

		let a = engine.store(content(json!({"type": "reentrancy"})), None, None).await.unwrap();
		let b = engine
			.store(content(json!({"type": "reentrancy_variant"})), None, None)
			.await
			.unwrap();

		// Similar enough to be linked on store
		assert!(engine.get(&a).unwrap().associations.contains(&b));
		assert!(engine.get(&b).unwrap().associations.contains(&a));

		let hits = engine
			.recall(&content(json!({"type": "reentrancy"})), 2, 0.5)
			.await
			.unwrap();
		assert_eq!(hits.len(), 2);
		assert_eq!(hits[0].node.id, a);
		assert_eq!(hits[1].node.id, b);
		assert!((hits[0].score - 1.0).abs() < 1e-4);
		assert!((hits[1].score - 0.98).abs() < 0.01);
		assert!(engine.verify_invariants().is_ok());
	}

	#[tokio::test]
	async fn test_recall_k_bound() {
		let engine = hashing_engine();
		for i in 0..6 {
			let _ = engine
				.store(content(json!({"topic": "flash loan attack", "variant": format!("v{i}")})), None, None)
				.await
				.unwrap();
		}
		let query = content(json!({"topic": "flash loan attack"}));
		for k in [0, 1, 3, 20] {
			let hits = engine.recall(&query, k, -1.0).await.unwrap();
			assert!(hits.len() <= k);
		}
		assert!(engine.recall(&query, 0, 0.0).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_recall_on_empty_store() {
		let engine = hashing_engine();
		let hits = engine.recall_default(&content(json!({"anything": "x"}))).await.unwrap();
		assert!(hits.is_empty());
	}

	#[tokio::test]
	async fn test_importance_stays_bounded() {
		let engine = hashing_engine();
		let query = content(json!({"kind": "price oracle"}));
		let id = engine.store(query.clone(), None, Some(1.0)).await.unwrap();
		for _ in 0..25 {
			let _ = engine.recall(&query, 3, 0.0).await.unwrap();
		}
		let _ = engine.record_feedback(&id, "exploit_success", 40.0).unwrap();
		let node = engine.get(&id).unwrap();
		assert!((0.0..=1.0).contains(&node.importance));
		assert_eq!(node.access_count, 25);
		assert!(engine.verify_invariants().is_ok());
	}

	#[tokio::test(start_paused = true)]
	async fn test_embedding_timeout_fails_store() {
		let mut config = MemoryConfig::with_dimensions(4);
		config.collaborators.embedding_timeout_secs = 1;
		let engine = engine(config, StalledEmbedder, NoopReasoner);

		let err = engine.store(content(json!({"k": "v"})), None, None).await.unwrap_err();
		assert!(matches!(err, MemoryError::Embedding(EmbeddingError::Timeout { seconds: 1 })));
		assert!(engine.is_empty());

		let err = engine.recall(&content(json!({"k": "v"})), 3, 0.5).await.unwrap_err();
		assert!(matches!(err, MemoryError::Embedding(e) if e.is_timeout()));
	}

	// ========================================================================
	// Associations
	// ========================================================================

	fn fan_embedder() -> TableEmbedder {
		TableEmbedder::new(
			4,
			&[
				("name: c1", vec![0.9, 0.436, 0.0, 0.0]),
				("name: c2", vec![0.75, 0.0, 0.661, 0.0]),
				("name: c3", vec![0.75, 0.0, 0.0, 0.661]),
				("name: n", vec![1.0, 0.0, 0.0, 0.0]),
			],
		)
	}

	#[tokio::test]
	async fn test_reasoner_links_are_symmetric_and_filtered() {
		let c1 = content(json!({"name": "c1"}));
		let c2 = content(json!({"name": "c2"}));
		let c3 = content(json!({"name": "c3"}));
		let ghost = NodeId::for_content(&content(json!({"name": "ghost"})));

		let reasoner = Scripted {
			associate_with: vec![NodeId::for_content(&c2), ghost],
			..Scripted::default()
		};
		let engine = engine(MemoryConfig::with_dimensions(4), fan_embedder(), reasoner);

		let id1 = engine.store(c1, None, None).await.unwrap();
		let id2 = engine.store(c2, None, None).await.unwrap();
		let id3 = engine.store(c3, None, None).await.unwrap();
		let n = engine.store(content(json!({"name": "n"})), None, None).await.unwrap();

		let node = engine.get(&n).unwrap();
		// c1 by similarity (0.9), c2 by the reasoner, c3 by neither
		assert!(node.associations.contains(&id1));
		assert!(node.associations.contains(&id2));
		assert!(!node.associations.contains(&id3));
		assert!(!node.associations.contains(&ghost));
		assert!(engine.get(&id2).unwrap().associations.contains(&n));
		assert!(engine.verify_invariants().is_ok());
	}

	#[tokio::test(start_paused = true)]
	async fn test_stalled_reasoner_keeps_base_insert() {
		let mut config = MemoryConfig::with_dimensions(4);
		config.collaborators.reasoning_timeout_secs = 2;
		let reasoner = Scripted {
			stall: true,
			..Scripted::default()
		};
		let engine = engine(config, fan_embedder(), reasoner);

		let id1 = engine.store(content(json!({"name": "c1"})), None, None).await.unwrap();
		let _ = engine.store(content(json!({"name": "c2"})), None, None).await.unwrap();
		let _ = engine.store(content(json!({"name": "c3"})), None, None).await.unwrap();
		let n = engine.store(content(json!({"name": "n"})), None, None).await.unwrap();

		assert_eq!(engine.len(), 4);
		assert!(engine.get(&n).unwrap().associations.contains(&id1));
		assert!(engine.verify_invariants().is_ok());
	}

	// ========================================================================
	// Consolidation
	// ========================================================================

	#[allow(clippy::cast_precision_loss)]
	async fn store_spread(engine: &MemoryEngine, count: usize) -> Vec<(NodeId, f32)> {
		let mut stored = Vec::new();
		for i in 0..count {
			let importance = 0.02 + (0.95 - 0.02) * i as f32 / (count - 1) as f32;
			let id = engine.store(slot(i), None, Some(importance)).await.unwrap();
			stored.push((id, importance));
		}
		stored
	}

	#[tokio::test]
	async fn test_consolidation_scenario() {
		let engine = engine(MemoryConfig::with_dimensions(16), SlotEmbedder(16), NoopReasoner);
		let stored = store_spread(&engine, 12).await;

		let report = engine.consolidate().unwrap();

		for (id, importance) in &stored {
			assert_eq!(engine.get(id).is_some(), *importance >= 0.1, "seed {importance}");
		}
		assert_eq!(report.evicted.len(), 1);
		assert_eq!(report.survivors, 11);
		assert_eq!(report.clusters, 2);
		assert_eq!(engine.clusters().len(), 2);

		let stats = engine.stats();
		assert_eq!(stats.indexed, stats.nodes);
		assert!(engine.get_insights().examined <= 11);
		assert!(engine.verify_invariants().is_ok());
	}

	#[tokio::test]
	async fn test_no_node_below_threshold_after_consolidation() {
		let engine = hashing_engine();
		for i in 0..8 {
			let importance = if i % 2 == 0 { 0.01 } else { 0.6 };
			let _ = engine
				.store(content(json!({"note": format!("observation number {i}")})), None, Some(importance))
				.await
				.unwrap();
		}
		let _ = engine.consolidate().unwrap();

		let state = engine.state.read();
		assert!(state.nodes.all().all(|n| n.importance >= 0.1));
		assert_eq!(state.index.len(), state.nodes.len());
	}

	#[tokio::test]
	async fn test_automatic_consolidation() {
		let mut config = MemoryConfig::with_dimensions(8);
		config.consolidation.interval = 3;
		let engine = engine(config, SlotEmbedder(8), NoopReasoner);

		for i in 0..3 {
			let _ = engine.store(slot(i), None, Some(0.05)).await.unwrap();
		}

		assert!(engine.is_empty());
		assert_eq!(engine.stats().inserts_since_consolidation, 0);
		assert!(engine.verify_invariants().is_ok());
	}

	#[tokio::test]
	async fn test_automatic_consolidation_skips_running_pass() {
		let mut config = MemoryConfig::with_dimensions(8);
		config.consolidation.interval = 2;
		let engine = engine(config, SlotEmbedder(8), NoopReasoner);

		let _ = engine.store(slot(0), None, Some(0.05)).await.unwrap();
		{
			// A pass already in progress elsewhere
			let _running = engine.consolidation.lock();
			let _ = engine.store(slot(1), None, Some(0.05)).await.unwrap();
			assert_eq!(engine.len(), 2);
			assert_eq!(engine.stats().inserts_since_consolidation, 2);
		}

		// Due on the next trigger once the lock is free
		engine.maybe_consolidate();
		assert!(engine.is_empty());
		assert_eq!(engine.stats().inserts_since_consolidation, 0);

		// Nothing due: no pass, nothing evicted
		let _ = engine.store(slot(2), None, Some(0.05)).await.unwrap();
		engine.maybe_consolidate();
		assert_eq!(engine.len(), 1);
		assert_eq!(engine.stats().inserts_since_consolidation, 1);
	}

	#[tokio::test]
	async fn test_diverse_sample_starts_with_representatives() {
		let engine = engine(MemoryConfig::with_dimensions(16), SlotEmbedder(16), NoopReasoner);
		let _ = store_spread(&engine, 12).await;
		let _ = engine.consolidate().unwrap();

		let clusters = engine.clusters();
		let sample = engine.diverse_sample(10);
		assert_eq!(sample.len(), 10);
		for (cluster, node) in clusters.iter().zip(&sample) {
			assert_eq!(cluster.representative(), Some(&node.id));
		}
	}

	// ========================================================================
	// Synthesis & patterns
	// ========================================================================

	#[tokio::test]
	async fn test_malformed_synthesis_stores_nothing() {
		let reasoner = Scripted {
			synthesis: Some(Err("not json".into())),
			..Scripted::default()
		};
		let engine = engine(MemoryConfig::with_dimensions(64), HashingEmbedder::new(64), reasoner);
		let _ = engine.store(content(json!({"type": "reentrancy"})), None, None).await.unwrap();

		let result = engine.generate_novel_combination(&ContentMap::new()).await.unwrap();
		assert!(result.is_none());
		assert_eq!(engine.len(), 1);
	}

	#[tokio::test]
	async fn test_novel_combination_is_stored_with_provenance() {
		let reasoner = Scripted {
			synthesis: Some(Ok(Some(content(json!({"exploit_type": "oracle + reentrancy"}))))),
			..Scripted::default()
		};
		let engine = engine(MemoryConfig::with_dimensions(8), SlotEmbedder(8), reasoner);

		// Empty store: nothing to combine
		assert!(engine.generate_novel_combination(&ContentMap::new()).await.unwrap().is_none());

		let _ = engine.store(slot(1), None, None).await.unwrap();
		let err = engine.generate_novel_combination(&ContentMap::new()).await.unwrap_err();
		// The slot embedder cannot embed free text
		assert!(matches!(err, MemoryError::Embedding(EmbeddingError::Backend(_))));
		assert_eq!(engine.len(), 1);

		let reasoner = Scripted {
			synthesis: Some(Ok(Some(content(json!({"exploit_type": "oracle + reentrancy"}))))),
			..Scripted::default()
		};
		let engine = engine_with_hashing(reasoner);
		let _ = engine.store(content(json!({"type": "reentrancy"})), None, None).await.unwrap();
		let node = engine
			.generate_novel_combination(&content(json!({"target": "dex"})))
			.await
			.unwrap()
			.expect("combination stored");

		assert_eq!(engine.len(), 2);
		assert_eq!(node.context["method"].as_str(), Some("creative_combination"));
		assert_eq!(node.context["generated"], ContentValue::Bool(true));
		assert!(node.importance >= 0.45);
	}

	fn engine_with_hashing(reasoner: Scripted) -> MemoryEngine {
		engine(MemoryConfig::with_dimensions(64), HashingEmbedder::new(64), reasoner)
	}

	#[tokio::test]
	async fn test_pattern_abstraction_is_stored_once() {
		let mut config = MemoryConfig::with_dimensions(64);
		config.patterns.templates = vec![PatternTemplate::new("exploit_chain", ["vulnerability", "trigger"])];
		let reasoner = Scripted {
			abstraction: Some(content(json!({"principle": "callbacks before state updates"}))),
			..Scripted::default()
		};
		let engine = engine(config, HashingEmbedder::new(64), reasoner);

		for i in 0..2 {
			let _ = engine
				.store(content(json!({"vulnerability": format!("v{i}"), "trigger": "fallback"})), None, None)
				.await
				.unwrap();
		}
		assert!(engine.patterns().is_empty());

		let _ = engine
			.store(content(json!({"vulnerability": "v2", "trigger": "fallback"})), None, None)
			.await
			.unwrap();

		let patterns = engine.patterns();
		assert_eq!(patterns.len(), 1);
		assert_eq!(patterns[0].instances.len(), 3);
		assert_eq!(engine.len(), 4);

		let abstraction = content(json!({
			"type": "abstraction",
			"pattern": "exploit_chain",
			"abstraction": {"principle": "callbacks before state updates"},
		}));
		let node = engine.get(&NodeId::for_content(&abstraction)).unwrap();
		assert_eq!(node.context["method"].as_str(), Some("pattern_abstraction"));

		let summary = engine.get_insights();
		assert_eq!(summary.patterns.len(), 1);
	}

	#[tokio::test]
	async fn test_record_feedback_unknown_node() {
		let engine = hashing_engine();
		let ghost = NodeId::for_content(&content(json!({"ghost": true})));
		assert!(matches!(
			engine.record_feedback(&ghost, "m", 1.0),
			Err(MemoryError::UnknownNode(id)) if id == ghost
		));
	}

	#[tokio::test]
	async fn test_non_finite_feedback_keeps_snapshot_loadable() {
		let engine = hashing_engine();
		let id = engine.store(content(json!({"k": "v"})), None, None).await.unwrap();
		let before = engine.get(&id).unwrap();

		for value in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
			assert!(matches!(
				engine.record_feedback(&id, "m", value),
				Err(MemoryError::InvalidFeedback { ref metric, .. }) if metric == "m"
			));
		}
		assert_eq!(engine.get(&id), Some(before));
		let importance = engine.record_feedback(&id, "m", 0.9).unwrap();

		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("memory.json");
		engine.save(&path).unwrap();

		let loaded = MemoryEngine::load(
			&path,
			MemoryConfig::with_dimensions(64),
			Arc::new(HashingEmbedder::new(64)),
			Arc::new(NoopReasoner),
		)
		.unwrap();
		let node = loaded.get(&id).unwrap();
		assert_eq!(node.success_metrics.get("m"), Some(&0.9));
		assert!((node.importance - importance).abs() < f32::EPSILON);
	}

	// ========================================================================
	// Persistence & concurrency
	// ========================================================================

	#[tokio::test]
	async fn test_save_and_load() {
		let engine = engine(MemoryConfig::with_dimensions(16), SlotEmbedder(16), NoopReasoner);
		let stored = store_spread(&engine, 12).await;
		let _ = engine.consolidate().unwrap();

		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("memory.json");
		engine.save(&path).unwrap();

		let loaded = MemoryEngine::load(
			&path,
			MemoryConfig::with_dimensions(16),
			Arc::new(SlotEmbedder(16)),
			Arc::new(NoopReasoner),
		)
		.unwrap();

		assert_eq!(loaded.len(), engine.len());
		assert_eq!(loaded.clusters(), engine.clusters());
		let (id, _) = stored[5];
		assert_eq!(loaded.get(&id), engine.get(&id));
		assert!(loaded.verify_invariants().is_ok());

		let hits = loaded.recall(&slot(5), 1, 0.5).await.unwrap();
		assert_eq!(hits[0].node.id, id);
	}

	#[tokio::test]
	async fn test_load_or_empty_falls_back() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("corrupt.json");
		std::fs::write(&path, b"{\"version\": 99}").unwrap();

		let engine = MemoryEngine::load_or_empty(
			&path,
			MemoryConfig::with_dimensions(8),
			Arc::new(SlotEmbedder(8)),
			Arc::new(NoopReasoner),
		)
		.unwrap();
		assert!(engine.is_empty());

		let strict = MemoryEngine::load(
			&path,
			MemoryConfig::with_dimensions(8),
			Arc::new(SlotEmbedder(8)),
			Arc::new(NoopReasoner),
		);
		assert!(matches!(strict, Err(LoadError::UnsupportedVersion { found: 99, .. })));
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn test_concurrent_store_and_recall() {
		let mut config = MemoryConfig::with_dimensions(64);
		config.consolidation.interval = 25;
		let engine = Arc::new(engine(config, HashingEmbedder::new(64), NoopReasoner));

		let mut tasks = Vec::new();
		for agent in 0..8 {
			let engine = Arc::clone(&engine);
			tasks.push(tokio::spawn(async move {
				for i in 0..10 {
					let c = content(json!({"agent": format!("a{agent}"), "finding": format!("flash loan step {i}")}));
					let _ = engine.store(c.clone(), None, Some(0.5)).await.expect("store");
					let _ = engine.recall(&c, 5, 0.3).await.expect("recall");
				}
			}));
		}
		for task in tasks {
			task.await.unwrap();
		}

		assert!(engine.len() <= 80);
		engine.verify_invariants().unwrap();
	}
}
