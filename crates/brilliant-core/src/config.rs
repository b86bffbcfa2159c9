//! Engine configuration.
//!
//! Every section has defaults, so a config file only needs the values it
//! overrides:
//!
//! ```json
//! { "embedding_dim": 768, "consolidation": { "interval": 500 } }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::consolidation::ConsolidationConfig;
use crate::content::TextConfig;
use crate::error::ConfigError;
use crate::importance::ImportanceConfig;
use crate::insights::InsightQuery;
use crate::patterns::PatternConfig;
use crate::recall::RecallConfig;

/// How a newly stored node is linked to its neighbors.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AssociationConfig {
	/// Neighbors recalled for a new node
	pub k: usize,
	/// Recall threshold used for that search
	pub search_threshold: f32,
	/// Similarity above which an edge is added
	pub link_threshold: f32,
	/// Recalled neighbors needed before the reasoner is consulted
	pub reasoner_min_candidates: usize,
	/// Neighbors shown to the reasoner
	pub reasoner_candidates: usize,
}

impl Default for AssociationConfig {
	fn default() -> Self {
		Self {
			k: 5,
			search_threshold: 0.7,
			link_threshold: 0.8,
			reasoner_min_candidates: 3,
			reasoner_candidates: 3,
		}
	}
}

/// Novel-combination generation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NoveltyConfig {
	/// Diverse sample size
	pub sample_size: usize,
	/// Importance seeded on generated nodes
	pub importance: f32,
}

impl Default for NoveltyConfig {
	fn default() -> Self {
		Self {
			sample_size: 10,
			importance: 0.8,
		}
	}
}

/// Time limits on external calls.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaboratorConfig {
	/// Embedding call limit in seconds
	pub embedding_timeout_secs: u64,
	/// Reasoner call limit in seconds
	pub reasoning_timeout_secs: u64,
}

impl Default for CollaboratorConfig {
	fn default() -> Self {
		Self {
			embedding_timeout_secs: 30,
			reasoning_timeout_secs: 30,
		}
	}
}

impl CollaboratorConfig {
	/// Embedding call limit.
	#[must_use]
	pub const fn embedding_timeout(&self) -> Duration {
		Duration::from_secs(self.embedding_timeout_secs)
	}

	/// Reasoner call limit.
	#[must_use]
	pub const fn reasoning_timeout(&self) -> Duration {
		Duration::from_secs(self.reasoning_timeout_secs)
	}
}

/// Complete engine configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
	/// Embedding dimension `D`
	pub embedding_dim: usize,
	/// Importance seeded on `store` when the caller passes none
	pub default_importance: f32,
	/// Content-to-text rendering
	pub text: TextConfig,
	/// Importance formula
	pub importance: ImportanceConfig,
	/// Recall pipeline
	pub recall: RecallConfig,
	/// Association building
	pub association: AssociationConfig,
	/// Eviction and clustering
	pub consolidation: ConsolidationConfig,
	/// Novel combinations
	pub novelty: NoveltyConfig,
	/// Pattern detection
	pub patterns: PatternConfig,
	/// Default insight query
	pub insights: InsightQuery,
	/// External call limits
	pub collaborators: CollaboratorConfig,
}

impl Default for MemoryConfig {
	fn default() -> Self {
		Self {
			embedding_dim: 384,
			default_importance: 0.5,
			text: TextConfig::default(),
			importance: ImportanceConfig::default(),
			recall: RecallConfig::default(),
			association: AssociationConfig::default(),
			consolidation: ConsolidationConfig::default(),
			novelty: NoveltyConfig::default(),
			patterns: PatternConfig::default(),
			insights: InsightQuery::default(),
			collaborators: CollaboratorConfig::default(),
		}
	}
}

impl MemoryConfig {
	/// Defaults with a different embedding dimension.
	#[must_use]
	pub fn with_dimensions(embedding_dim: usize) -> Self {
		Self {
			embedding_dim,
			..Self::default()
		}
	}

	/// Load a (partial) JSON config file and validate it.
	///
	/// # Errors
	///
	/// [`ConfigError::Io`], [`ConfigError::Parse`] or [`ConfigError::Invalid`].
	pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
		let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
			path: path.to_path_buf(),
			source,
		})?;
		let config: Self = serde_json::from_str(&text)?;
		config.validate()?;
		Ok(config)
	}

	/// Reject values the engine cannot work with.
	///
	/// # Errors
	///
	/// [`ConfigError::Invalid`] naming the first offending field.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.embedding_dim == 0 {
			return Err(invalid("embedding_dim", "must be positive"));
		}
		unit_interval("default_importance", self.default_importance)?;
		unit_interval("novelty.importance", self.novelty.importance)?;
		unit_interval("patterns.abstraction_importance", self.patterns.abstraction_importance)?;
		unit_interval("consolidation.eviction_threshold", self.consolidation.eviction_threshold)?;
		unit_interval("recall.expansion_decay", self.recall.expansion_decay)?;
		similarity("recall.default_threshold", self.recall.default_threshold)?;
		similarity("association.search_threshold", self.association.search_threshold)?;
		similarity("association.link_threshold", self.association.link_threshold)?;

		if self.consolidation.interval == 0 {
			return Err(invalid("consolidation.interval", "must be positive"));
		}
		if self.recall.candidate_multiplier == 0 {
			return Err(invalid("recall.candidate_multiplier", "must be positive"));
		}
		if self.collaborators.embedding_timeout_secs == 0 || self.collaborators.reasoning_timeout_secs == 0 {
			return Err(invalid("collaborators", "timeouts must be positive"));
		}

		let weights = [
			self.importance.time_weight,
			self.importance.access_weight,
			self.importance.success_weight,
			self.importance.association_weight,
		];
		if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
			return Err(invalid("importance", "weights must be finite and non-negative"));
		}
		if !self.importance.default_decay_rate.is_finite() || self.importance.default_decay_rate < 0.0 {
			return Err(invalid("importance.default_decay_rate", "must be finite and non-negative"));
		}
		Ok(())
	}
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
	ConfigError::Invalid {
		field,
		reason: reason.into(),
	}
}

fn unit_interval(field: &'static str, value: f32) -> Result<(), ConfigError> {
	if (0.0..=1.0).contains(&value) {
		Ok(())
	} else {
		Err(invalid(field, format!("{value} is outside [0, 1]")))
	}
}

fn similarity(field: &'static str, value: f32) -> Result<(), ConfigError> {
	if (-1.0..=1.0).contains(&value) {
		Ok(())
	} else {
		Err(invalid(field, format!("{value} is outside [-1, 1]")))
	}
}
