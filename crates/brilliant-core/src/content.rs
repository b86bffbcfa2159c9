//! Opaque Content
//!
//! Memory payloads are string-keyed maps of plain values. The engine never
//! interprets them: it only hashes their canonical form into a [`NodeId`] and
//! renders them to text for the embedding model.
//!
//! Canonical form is compact JSON with keys in sorted order at every level.
//! `ContentMap` is a `BTreeMap`, so serializing it already yields that form.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Number of digest bytes kept in a [`NodeId`].
pub const NODE_ID_BYTES: usize = 16;

/// String-keyed structured payload.
pub type ContentMap = BTreeMap<String, ContentValue>;

/// A single value inside a [`ContentMap`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentValue {
	/// JSON `null`
	Null,
	/// Boolean flag
	Bool(bool),
	/// Whole number
	Integer(i64),
	/// Floating point number. Non-finite values have no JSON form and
	/// canonicalize to `null`; build them through `From<f64>` to get [`ContentValue::Null`].
	Float(f64),
	/// UTF-8 text
	Text(String),
	/// Ordered list of values
	List(Vec<ContentValue>),
	/// Nested map
	Map(ContentMap),
}

impl ContentValue {
	/// Borrow the text of a `Text` value.
	#[must_use]
	pub fn as_str(&self) -> Option<&str> {
		match self {
			Self::Text(s) => Some(s),
			_ => None,
		}
	}

	/// Numeric view of `Integer` and `Float` values.
	#[must_use]
	#[allow(clippy::cast_precision_loss)]
	pub const fn as_f64(&self) -> Option<f64> {
		match self {
			Self::Integer(i) => Some(*i as f64),
			Self::Float(f) => Some(*f),
			_ => None,
		}
	}

	/// Render as a grouping label: text verbatim, everything else as canonical JSON.
	#[must_use]
	pub fn render(&self) -> String {
		match self {
			Self::Text(s) => s.clone(),
			Self::Null => "null".to_string(),
			Self::Bool(b) => b.to_string(),
			Self::Integer(i) => i.to_string(),
			Self::Float(f) => f.to_string(),
			Self::List(_) | Self::Map(_) => {
				serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"))
			}
		}
	}
}

impl From<&str> for ContentValue {
	fn from(value: &str) -> Self {
		Self::Text(value.to_string())
	}
}

impl From<String> for ContentValue {
	fn from(value: String) -> Self {
		Self::Text(value)
	}
}

impl From<bool> for ContentValue {
	fn from(value: bool) -> Self {
		Self::Bool(value)
	}
}

impl From<i64> for ContentValue {
	fn from(value: i64) -> Self {
		Self::Integer(value)
	}
}

impl From<f64> for ContentValue {
	/// NaN and infinities become `Null`, the value they canonicalize to.
	fn from(value: f64) -> Self {
		if value.is_finite() {
			Self::Float(value)
		} else {
			Self::Null
		}
	}
}

impl From<ContentMap> for ContentValue {
	fn from(value: ContentMap) -> Self {
		Self::Map(value)
	}
}

/// Convert arbitrary JSON into a content map.
///
/// # Errors
///
/// Returns an error if `value` is not a JSON object.
pub fn map_from_json(value: serde_json::Value) -> Result<ContentMap, serde_json::Error> {
	serde_json::from_value(value)
}

/// Canonical JSON text of a content map (sorted keys, compact).
#[must_use]
pub fn canonical_json(content: &ContentMap) -> String {
	serde_json::to_string(content).unwrap_or_else(|_| format!("{content:?}"))
}

// ============================================================================
// Node Identity
// ============================================================================

/// Content-derived node identifier: truncated SHA-256 of the canonical form.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId([u8; NODE_ID_BYTES]);

impl NodeId {
	/// Derive the id of a content map.
	///
	/// Identical content always maps to the same id, regardless of the order
	/// in which keys were inserted. A non-finite `Float` hashes as `null`, so
	/// `{"x": NaN}` and `{"x": null}` are the same content.
	#[must_use]
	pub fn for_content(content: &ContentMap) -> Self {
		let mut hasher = Sha256::new();
		if serde_json::to_writer(&mut hasher, content).is_err() {
			// String-keyed maps of plain values always serialize; stay deterministic regardless.
			hasher = Sha256::new();
			hasher.update(format!("{content:?}").as_bytes());
		}
		let digest = hasher.finalize();
		let mut bytes = [0u8; NODE_ID_BYTES];
		bytes.copy_from_slice(&digest[..NODE_ID_BYTES]);
		Self(bytes)
	}

	/// Raw id bytes.
	#[must_use]
	pub const fn as_bytes(&self) -> &[u8; NODE_ID_BYTES] {
		&self.0
	}

	/// Lower-case hex form.
	#[must_use]
	pub fn to_hex(&self) -> String {
		hex::encode(self.0)
	}
}

impl fmt::Display for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_hex())
	}
}

impl fmt::Debug for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "NodeId({})", self.to_hex())
	}
}

/// Error parsing a [`NodeId`] from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid node id {0:?}: expected 32 hex characters")]
pub struct ParseNodeIdError(pub String);

impl FromStr for NodeId {
	type Err = ParseNodeIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let mut bytes = [0u8; NODE_ID_BYTES];
		hex::decode_to_slice(s.trim(), &mut bytes).map_err(|_| ParseNodeIdError(s.to_string()))?;
		Ok(Self(bytes))
	}
}

impl Serialize for NodeId {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.to_hex())
	}
}

impl<'de> Deserialize<'de> for NodeId {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		s.parse().map_err(serde::de::Error::custom)
	}
}

// ============================================================================
// Text Rendering
// ============================================================================

/// A field rendered ahead of the generic `key: value` listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadlineField {
	/// Content key
	pub key: String,
	/// Prefix written as `label: value`; bare value when `None`
	pub label: Option<String>,
}

/// Configuration for rendering content to embedding text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextConfig {
	/// Fields rendered first, in this order
	pub headline_fields: Vec<HeadlineField>,
	/// Keys never rendered
	pub skip_fields: Vec<String>,
}

impl Default for TextConfig {
	fn default() -> Self {
		Self {
			headline_fields: Vec::new(),
			skip_fields: vec!["id".to_string(), "timestamp".to_string()],
		}
	}
}

/// Render content to the text handed to the embedding model.
///
/// Headline fields come first, then every top-level text value as
/// `key: value` in key order. Nested maps and lists are not rendered. When
/// nothing renders, the canonical JSON form is used so the text is never empty
/// for non-empty content.
#[must_use]
pub fn content_to_text(content: &ContentMap, config: &TextConfig) -> String {
	let mut parts: Vec<String> = Vec::new();

	for field in &config.headline_fields {
		if let Some(value) = content.get(&field.key) {
			let rendered = value.render();
			parts.push(match &field.label {
				Some(label) => format!("{label}: {rendered}"),
				None => rendered,
			});
		}
	}

	for (key, value) in content {
		if config.skip_fields.iter().any(|s| s == key) {
			continue;
		}
		if let Some(text) = value.as_str() {
			parts.push(format!("{key}: {text}"));
		}
	}

	if parts.is_empty() && !content.is_empty() {
		return canonical_json(content);
	}

	parts.join(" ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;
	use serde_json::json;

	fn map(value: serde_json::Value) -> ContentMap {
		map_from_json(value).unwrap()
	}

	#[test]
	fn test_id_ignores_insertion_order() {
		let mut a = ContentMap::new();
		let _ = a.insert("b".into(), "2".into());
		let _ = a.insert("a".into(), "1".into());

		let b = map(json!({"a": "1", "b": "2"}));

		assert_eq!(NodeId::for_content(&a), NodeId::for_content(&b));
		assert_ne!(
			NodeId::for_content(&a),
			NodeId::for_content(&map(json!({"a": "1", "b": "3"})))
		);
	}

	#[test]
	fn test_id_hex_round_trip() {
		let id = NodeId::for_content(&map(json!({"type": "reentrancy"})));
		let hex = id.to_hex();
		assert_eq!(hex.len(), NODE_ID_BYTES * 2);
		assert_eq!(hex.parse::<NodeId>().unwrap(), id);
		assert!("xyz".parse::<NodeId>().is_err());
	}

	#[test]
	fn test_untagged_values() {
		let content = map(json!({
			"n": 3,
			"f": 0.5,
			"t": "text",
			"flag": true,
			"nested": {"k": [1, "two"]},
			"nothing": null,
		}));

		assert_eq!(content["n"], ContentValue::Integer(3));
		assert_eq!(content["f"], ContentValue::Float(0.5));
		assert_eq!(content["t"].as_str(), Some("text"));
		assert_eq!(content["flag"], ContentValue::Bool(true));
		assert_eq!(content["nothing"], ContentValue::Null);
		assert!(matches!(content["nested"], ContentValue::Map(_)));
		assert_eq!(content["n"].as_f64(), Some(3.0));
	}

	#[test]
	fn test_text_renders_strings_in_key_order() {
		let content = map(json!({"type": "reentrancy", "id": "skip-me", "score": 3, "a": "first"}));
		let text = content_to_text(&content, &TextConfig::default());
		assert_eq!(text, "a: first type: reentrancy");
	}

	#[test]
	fn test_text_headlines_come_first() {
		let config = TextConfig {
			headline_fields: vec![HeadlineField {
				key: "impact".into(),
				label: Some("Impact".into()),
			}],
			..TextConfig::default()
		};
		let content = map(json!({"impact": "drain", "b": "x"}));
		assert_eq!(content_to_text(&content, &config), "Impact: drain b: x impact: drain");
	}

	#[test]
	fn test_text_falls_back_to_canonical_json() {
		let content = map(json!({"n": 1}));
		assert_eq!(content_to_text(&content, &TextConfig::default()), "{\"n\":1}");
		assert_eq!(content_to_text(&ContentMap::new(), &TextConfig::default()), "");
	}

	#[test]
	fn test_non_finite_floats_are_null() {
		assert_eq!(ContentValue::from(f64::NAN), ContentValue::Null);
		assert_eq!(ContentValue::from(f64::INFINITY), ContentValue::Null);
		assert_eq!(ContentValue::from(1.5), ContentValue::Float(1.5));

		let mut built = ContentMap::new();
		let _ = built.insert("x".into(), f64::NAN.into());
		assert_eq!(built, map(json!({"x": null})));

		// The raw variant still hashes as null
		let mut raw = ContentMap::new();
		let _ = raw.insert("x".into(), ContentValue::Float(f64::NAN));
		assert_eq!(NodeId::for_content(&raw), NodeId::for_content(&built));
		assert_ne!(NodeId::for_content(&built), NodeId::for_content(&map(json!({"x": 0.0}))));
	}
}
