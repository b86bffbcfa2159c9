//! Recurring Patterns
//!
//! A template names a set of structure terms. A node matches when every term
//! occurs somewhere in its canonical content (keys or values). When enough of
//! the most recent nodes match, the pattern is recorded and the reasoning
//! collaborator may generalize it into an abstraction, which is stored back as
//! an ordinary memory.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::content::{canonical_json, ContentMap, ContentValue, NodeId};
use crate::node::MemoryNode;

/// A named set of structure terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternTemplate {
	/// Pattern kind recorded on matches
	pub name: String,
	/// Terms that must all occur in a node's content
	pub structure: Vec<String>,
}

impl PatternTemplate {
	/// Create a template.
	pub fn new(name: impl Into<String>, structure: impl IntoIterator<Item = impl Into<String>>) -> Self {
		Self {
			name: name.into(),
			structure: structure.into_iter().map(Into::into).collect(),
		}
	}
}

/// Configuration for pattern detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
	/// Templates to match; none by default
	pub templates: Vec<PatternTemplate>,
	/// Number of most recent nodes scanned
	pub window: usize,
	/// Matches needed to record a pattern
	pub min_instances: usize,
	/// Recorded patterns kept; oldest are dropped first
	pub max_patterns: usize,
	/// Importance seeded on stored abstractions
	pub abstraction_importance: f32,
}

impl Default for PatternConfig {
	fn default() -> Self {
		Self {
			templates: Vec::new(),
			window: 20,
			min_instances: 3,
			max_patterns: 256,
			abstraction_importance: 0.9,
		}
	}
}

/// A node that matched a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternInstance {
	/// Matching node
	pub node_id: NodeId,
	/// Match strength (1.0 for a full structural match)
	pub match_score: f32,
}

/// A recorded recurring pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredPattern {
	/// Template name
	pub kind: String,
	/// Matching nodes, newest first
	pub instances: Vec<PatternInstance>,
	/// When the pattern was recorded
	pub discovered_at: DateTime<Utc>,
	/// `instances / window`
	pub confidence: f32,
}

impl DiscoveredPattern {
	fn instance_ids(&self) -> BTreeSet<NodeId> {
		self.instances.iter().map(|i| i.node_id).collect()
	}
}

/// Whether every structure term occurs in the node's canonical content.
///
/// Templates without terms never match.
#[must_use]
pub fn matches_template(node: &MemoryNode, template: &PatternTemplate) -> bool {
	if template.structure.is_empty() {
		return false;
	}
	let text = canonical_json(&node.content);
	template.structure.iter().all(|term| text.contains(term.as_str()))
}

/// Match every template against `recent` (newest first).
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn detect_patterns(
	recent: &[&MemoryNode],
	config: &PatternConfig,
	now: DateTime<Utc>,
) -> Vec<DiscoveredPattern> {
	let window = config.window.max(1);
	let recent = &recent[..recent.len().min(window)];

	config
		.templates
		.iter()
		.filter_map(|template| {
			let instances: Vec<PatternInstance> = recent
				.iter()
				.filter(|node| matches_template(node, template))
				.map(|node| PatternInstance {
					node_id: node.id,
					match_score: 1.0,
				})
				.collect();

			if instances.len() < config.min_instances.max(1) {
				return None;
			}

			let confidence = instances.len() as f32 / window as f32;
			Some(DiscoveredPattern {
				kind: template.name.clone(),
				instances,
				discovered_at: now,
				confidence,
			})
		})
		.collect()
}

/// Record `pattern` unless the same kind over the same instances is known.
///
/// Returns `true` if recorded.
pub fn record_pattern(known: &mut Vec<DiscoveredPattern>, pattern: DiscoveredPattern, max_patterns: usize) -> bool {
	let ids = pattern.instance_ids();
	if known.iter().any(|p| p.kind == pattern.kind && p.instance_ids() == ids) {
		return false;
	}

	known.push(pattern);
	if known.len() > max_patterns {
		let excess = known.len() - max_patterns;
		let _ = known.drain(..excess);
	}
	true
}

/// Drop instances that reference evicted nodes; patterns left empty are removed.
pub fn retain_live(known: &mut Vec<DiscoveredPattern>, is_live: impl Fn(&NodeId) -> bool) {
	for pattern in known.iter_mut() {
		pattern.instances.retain(|i| is_live(&i.node_id));
	}
	known.retain(|p| !p.instances.is_empty());
}

/// Content stored for an abstraction of `pattern`.
#[must_use]
pub fn abstraction_content(pattern: &DiscoveredPattern, abstraction: ContentMap) -> ContentMap {
	let mut content = ContentMap::new();
	let _ = content.insert("type".into(), "abstraction".into());
	let _ = content.insert("pattern".into(), pattern.kind.clone().into());
	let _ = content.insert("abstraction".into(), ContentValue::Map(abstraction));
	content
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;
	use crate::content::map_from_json;
	use crate::node::{NodeDraft, NodeStore};
	use serde_json::json;

	fn chain_template() -> PatternTemplate {
		PatternTemplate::new("exploit_chain", ["vulnerability", "trigger", "payload", "impact"])
	}

	fn store(values: &[serde_json::Value]) -> NodeStore {
		let mut store = NodeStore::new();
		for v in values {
			let _ = store.upsert(
				NodeDraft {
					content: map_from_json(v.clone()).unwrap(),
					embedding: vec![1.0],
					context: None,
					importance: 0.5,
					decay_rate: 0.01,
				},
				Utc::now(),
			);
		}
		store
	}

	fn chain(n: i64) -> serde_json::Value {
		json!({"vulnerability": "reentrancy", "trigger": "fallback", "payload": n, "impact": "drain"})
	}

	#[test]
	fn test_template_matches_keys_and_values() {
		let store = store(&[
			chain(1),
			json!({"summary": "vulnerability with trigger, payload and impact"}),
			json!({"vulnerability": "x"}),
		]);
		let matched = store.all().filter(|n| matches_template(n, &chain_template())).count();
		assert_eq!(matched, 2);
	}

	#[test]
	fn test_detect_needs_min_instances() {
		let config = PatternConfig {
			templates: vec![chain_template()],
			..PatternConfig::default()
		};

		let two = store(&[chain(1), chain(2)]);
		assert!(detect_patterns(&two.most_recent(20), &config, Utc::now()).is_empty());

		let three = store(&[chain(1), chain(2), chain(3), json!({"other": "node"})]);
		let found = detect_patterns(&three.most_recent(20), &config, Utc::now());
		assert_eq!(found.len(), 1);
		assert_eq!(found[0].kind, "exploit_chain");
		assert_eq!(found[0].instances.len(), 3);
		assert!((found[0].confidence - 0.15).abs() < 1e-6);
	}

	#[test]
	fn test_record_dedupes_and_caps() {
		let config = PatternConfig {
			templates: vec![chain_template()],
			..PatternConfig::default()
		};
		let s = store(&[chain(1), chain(2), chain(3)]);
		let pattern = detect_patterns(&s.most_recent(20), &config, Utc::now()).remove(0);

		let mut known = Vec::new();
		assert!(record_pattern(&mut known, pattern.clone(), 1));
		assert!(!record_pattern(&mut known, pattern.clone(), 1));

		let mut other = pattern;
		other.instances.pop();
		assert!(record_pattern(&mut known, other.clone(), 1));
		assert_eq!(known, vec![other]);
	}

	#[test]
	fn test_retain_live() {
		let config = PatternConfig {
			templates: vec![chain_template()],
			..PatternConfig::default()
		};
		let s = store(&[chain(1), chain(2), chain(3)]);
		let mut known = detect_patterns(&s.most_recent(20), &config, Utc::now());
		let survivor = known[0].instances[0].node_id;

		retain_live(&mut known, |id| *id == survivor);
		assert_eq!(known[0].instances.len(), 1);

		retain_live(&mut known, |_| false);
		assert!(known.is_empty());
	}

	#[test]
	fn test_abstraction_content_shape() {
		let pattern = DiscoveredPattern {
			kind: "exploit_chain".into(),
			instances: Vec::new(),
			discovered_at: Utc::now(),
			confidence: 0.2,
		};
		let abstraction = map_from_json(json!({"principle": "p"})).unwrap();
		let content = abstraction_content(&pattern, abstraction);
		assert_eq!(content["type"].as_str(), Some("abstraction"));
		assert_eq!(content["pattern"].as_str(), Some("exploit_chain"));
		assert!(matches!(content["abstraction"], ContentValue::Map(_)));
	}
}
