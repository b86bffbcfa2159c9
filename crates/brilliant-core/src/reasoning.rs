//! Reasoning Collaborator
//!
//! Three best-effort enrichments are delegated to an external reasoner:
//!
//! - **associate**: pick non-obvious links among similar memories
//! - **synthesize**: combine a diverse sample into something new
//! - **abstract**: generalize a recurring pattern into a principle
//!
//! Every failure is a [`CollaboratorError`] and the engine degrades to
//! skipping the enrichment. [`PromptReasoner`] implements the trait on top of
//! any chat-completion service through [`CompletionClient`].

use std::fmt::Write;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::content::{map_from_json, ContentMap, NodeId};
use crate::error::CollaboratorError;
use crate::patterns::DiscoveredPattern;

/// A similar memory offered to [`Reasoner::associate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociationCandidate {
	/// Candidate id, the value the reasoner should echo back
	pub id: NodeId,
	/// Candidate content
	pub content: ContentMap,
	/// Similarity to the current memory
	pub score: f32,
}

/// External reasoning service.
#[async_trait]
pub trait Reasoner: Send + Sync {
	/// Ids among `similar` that should be associated with `current`.
	///
	/// Unknown ids are discarded by the engine; suggestions never create nodes.
	async fn associate(
		&self,
		current: &ContentMap,
		similar: &[AssociationCandidate],
	) -> Result<Vec<NodeId>, CollaboratorError>;

	/// New content combining `sample`, or `None` to decline.
	async fn synthesize(
		&self,
		sample: &[ContentMap],
		context: &ContentMap,
	) -> Result<Option<ContentMap>, CollaboratorError>;

	/// A general principle explaining `pattern`, or `None` to decline.
	async fn abstract_pattern(&self, pattern: &DiscoveredPattern) -> Result<Option<ContentMap>, CollaboratorError>;
}

/// Reasoner that never suggests anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReasoner;

#[async_trait]
impl Reasoner for NoopReasoner {
	async fn associate(
		&self,
		_current: &ContentMap,
		_similar: &[AssociationCandidate],
	) -> Result<Vec<NodeId>, CollaboratorError> {
		Ok(Vec::new())
	}

	async fn synthesize(
		&self,
		_sample: &[ContentMap],
		_context: &ContentMap,
	) -> Result<Option<ContentMap>, CollaboratorError> {
		Ok(None)
	}

	async fn abstract_pattern(&self, _pattern: &DiscoveredPattern) -> Result<Option<ContentMap>, CollaboratorError> {
		Ok(None)
	}
}

// ============================================================================
// Prompt-driven reasoner
// ============================================================================

/// A chat-completion service: one system message, one user message, text back.
#[async_trait]
pub trait CompletionClient: Send + Sync {
	/// Complete a single exchange.
	async fn complete(&self, system: &str, user: &str, temperature: f32) -> Result<String, CollaboratorError>;
}

/// Sampling temperatures per task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
	/// Association finding
	pub association_temperature: f32,
	/// Novel synthesis
	pub synthesis_temperature: f32,
	/// Pattern abstraction
	pub abstraction_temperature: f32,
}

impl Default for PromptConfig {
	fn default() -> Self {
		Self {
			association_temperature: 0.3,
			synthesis_temperature: 0.9,
			abstraction_temperature: 0.5,
		}
	}
}

const ASSOCIATION_SYSTEM: &str = "You are a pattern recognition expert.";
const SYNTHESIS_SYSTEM: &str = "You are a creative researcher who finds novel combinations of known ideas.";
const ABSTRACTION_SYSTEM: &str = "You are an expert at pattern abstraction.";

/// [`Reasoner`] that renders prompts and parses JSON answers.
#[derive(Debug, Clone)]
pub struct PromptReasoner<C> {
	client: C,
	config: PromptConfig,
}

impl<C: CompletionClient> PromptReasoner<C> {
	/// Wrap a completion client with default temperatures.
	pub fn new(client: C) -> Self {
		Self::with_config(client, PromptConfig::default())
	}

	/// Wrap a completion client.
	pub const fn with_config(client: C, config: PromptConfig) -> Self {
		Self { client, config }
	}
}

#[async_trait]
impl<C: CompletionClient> Reasoner for PromptReasoner<C> {
	async fn associate(
		&self,
		current: &ContentMap,
		similar: &[AssociationCandidate],
	) -> Result<Vec<NodeId>, CollaboratorError> {
		let prompt = prepare_association_prompt(current, similar);
		let answer = self
			.client
			.complete(ASSOCIATION_SYSTEM, &prompt, self.config.association_temperature)
			.await?;
		parse_id_list(&answer)
	}

	async fn synthesize(
		&self,
		sample: &[ContentMap],
		context: &ContentMap,
	) -> Result<Option<ContentMap>, CollaboratorError> {
		let prompt = prepare_synthesis_prompt(sample, context);
		let answer = self
			.client
			.complete(SYNTHESIS_SYSTEM, &prompt, self.config.synthesis_temperature)
			.await?;
		parse_object(&answer)
	}

	async fn abstract_pattern(&self, pattern: &DiscoveredPattern) -> Result<Option<ContentMap>, CollaboratorError> {
		let prompt = prepare_abstraction_prompt(pattern);
		let answer = self
			.client
			.complete(ABSTRACTION_SYSTEM, &prompt, self.config.abstraction_temperature)
			.await?;
		parse_object(&answer)
	}
}

fn pretty<T: Serialize + ?Sized>(value: &T) -> String {
	serde_json::to_string_pretty(value).unwrap_or_default()
}

/// Prompt asking which similar memories should be linked to `current`.
#[must_use]
pub fn prepare_association_prompt(current: &ContentMap, similar: &[AssociationCandidate]) -> String {
	let mut listing = String::new();
	for candidate in similar {
		let _ = write!(
			listing,
			"\n\nid: {} (similarity {:.2})\n{}",
			candidate.id,
			candidate.score,
			pretty(&candidate.content)
		);
	}

	format!(
		"Analyze these memories and find non-obvious associations.

Current:
{}

Similar memories:{listing}

Identify conceptual connections that might not be immediately apparent.
Respond with a JSON list of the ids of memories that should be associated with the current one.",
		pretty(current)
	)
}

/// Prompt asking for a novel combination of `sample`.
#[must_use]
pub fn prepare_synthesis_prompt(sample: &[ContentMap], context: &ContentMap) -> String {
	format!(
		"You have access to these previous memories:

{}

Current context:
{}

Create something NOVEL that combines elements from these memories in an unexpected way.
It should differ from anything seen before.

Requirements:
1. Combine at least 3 different concepts
2. Create an unexpected interaction
3. Be feasible

Respond with a single JSON object, or null if nothing worthwhile can be combined.",
		pretty(sample),
		pretty(context)
	)
}

/// Prompt asking for a general principle behind `pattern`.
#[must_use]
pub fn prepare_abstraction_prompt(pattern: &DiscoveredPattern) -> String {
	format!(
		"Based on this discovered pattern, create a higher-level abstraction.

Pattern type: {}
Instances: {}
Confidence: {:.2}

Create a general principle or rule that explains this pattern.
This will help recognize similar patterns in the future.

Respond with JSON: {{\"principle\": ..., \"conditions\": [...], \"applications\": [...]}}",
		pattern.kind,
		pattern.instances.len(),
		pattern.confidence
	)
}

/// Strip a surrounding Markdown code fence, if any.
#[must_use]
pub fn extract_json(answer: &str) -> &str {
	let trimmed = answer.trim();
	let Some(rest) = trimmed.strip_prefix("```") else {
		return trimmed;
	};
	// Drop the info string (```json)
	let body = rest.split_once('\n').map_or("", |(_, body)| body);
	body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn parse_value(answer: &str) -> Result<serde_json::Value, CollaboratorError> {
	serde_json::from_str(extract_json(answer)).map_err(|e| CollaboratorError::Malformed(e.to_string()))
}

/// Parse a JSON list of node ids. Entries that are not ids are skipped.
///
/// # Errors
///
/// [`CollaboratorError::Malformed`] unless the answer is a JSON list of strings.
pub fn parse_id_list(answer: &str) -> Result<Vec<NodeId>, CollaboratorError> {
	let serde_json::Value::Array(items) = parse_value(answer)? else {
		return Err(CollaboratorError::Malformed("expected a JSON list of ids".into()));
	};

	let mut ids = Vec::with_capacity(items.len());
	for item in items {
		let serde_json::Value::String(text) = item else {
			return Err(CollaboratorError::Malformed("expected string ids".into()));
		};
		match text.parse::<NodeId>() {
			Ok(id) => ids.push(id),
			Err(_) => tracing::debug!(id = %text, "Ignoring unparseable association id"),
		}
	}
	Ok(ids)
}

/// Parse a JSON object into content, `null` meaning "declined".
///
/// # Errors
///
/// [`CollaboratorError::Malformed`] for anything but an object or `null`.
pub fn parse_object(answer: &str) -> Result<Option<ContentMap>, CollaboratorError> {
	match parse_value(answer)? {
		serde_json::Value::Null => Ok(None),
		value @ serde_json::Value::Object(_) => map_from_json(value)
			.map(Some)
			.map_err(|e| CollaboratorError::Malformed(e.to_string())),
		_ => Err(CollaboratorError::Malformed("expected a JSON object".into())),
	}
}
