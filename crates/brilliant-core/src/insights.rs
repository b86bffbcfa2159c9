//! Read-only aggregate view over the most recent memories.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::content::NodeId;
use crate::node::MemoryNode;
use crate::patterns::DiscoveredPattern;

/// What to aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightQuery {
	/// Number of most recent nodes examined
	pub window: usize,
	/// Content field whose value names the bucket; missing values go to `"unknown"`
	pub tag_field: String,
	/// Numeric content field averaged per bucket; missing values count as 0
	pub confidence_field: String,
	/// Buckets with fewer members are omitted
	pub min_frequency: usize,
	/// Importance above which a node counts as successful
	pub success_threshold: f32,
	/// Importance below which a node counts as failed
	pub failure_threshold: f32,
	/// Recorded patterns included in the summary
	pub max_patterns: usize,
}

impl Default for InsightQuery {
	fn default() -> Self {
		Self {
			window: 50,
			tag_field: "type".to_string(),
			confidence_field: "confidence".to_string(),
			min_frequency: 4,
			success_threshold: 0.8,
			failure_threshold: 0.3,
			max_patterns: 5,
		}
	}
}

/// Frequency bucket for one tag value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagBucket {
	/// Rendered tag value
	pub tag: String,
	/// Nodes in the window carrying this tag
	pub frequency: usize,
	/// Mean of the confidence field over those nodes
	pub avg_confidence: f64,
}

/// Result of an insight query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightSummary {
	/// Nodes examined
	pub examined: usize,
	/// Nodes above the success threshold, newest first
	pub successful: Vec<NodeId>,
	/// Nodes below the failure threshold, newest first
	pub failed: Vec<NodeId>,
	/// Tag buckets, most frequent first (ties by tag)
	pub buckets: Vec<TagBucket>,
	/// Most recently recorded patterns, newest first
	pub patterns: Vec<DiscoveredPattern>,
}

/// Aggregate over `recent` (newest first, already limited to the window).
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn summarize(recent: &[&MemoryNode], patterns: &[DiscoveredPattern], query: &InsightQuery) -> InsightSummary {
	let mut successful = Vec::new();
	let mut failed = Vec::new();
	let mut groups: BTreeMap<String, (usize, f64)> = BTreeMap::new();

	for node in recent {
		if node.importance > query.success_threshold {
			successful.push(node.id);
		} else if node.importance < query.failure_threshold {
			failed.push(node.id);
		}

		let tag = node
			.content
			.get(&query.tag_field)
			.map_or_else(|| "unknown".to_string(), crate::content::ContentValue::render);
		let confidence = node
			.content
			.get(&query.confidence_field)
			.and_then(|v| v.as_f64())
			.unwrap_or(0.0);

		let entry = groups.entry(tag).or_insert((0, 0.0));
		entry.0 += 1;
		entry.1 += confidence;
	}

	let mut buckets: Vec<TagBucket> = groups
		.into_iter()
		.filter(|(_, (count, _))| *count >= query.min_frequency)
		.map(|(tag, (frequency, total))| TagBucket {
			tag,
			frequency,
			avg_confidence: total / frequency as f64,
		})
		.collect();
	buckets.sort_by(|a, b| b.frequency.cmp(&a.frequency).then_with(|| a.tag.cmp(&b.tag)));

	InsightSummary {
		examined: recent.len(),
		successful,
		failed,
		buckets,
		patterns: patterns.iter().rev().take(query.max_patterns).cloned().collect(),
	}
}
