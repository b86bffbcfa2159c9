//! Importance Model
//!
//! How much a memory is worth keeping.
//!
//! Four signals combine linearly, each mapped to `[0, 1]` first:
//!
//! 1. **Time** - exponential decay with age: `exp(-λ · age_days)`
//! 2. **Access** - recall frequency, saturating at 10 accesses
//! 3. **Success** - mean of external feedback metrics (0.5 when none)
//! 4. **Associations** - graph richness, saturating at 5 links
//!
//! ```text
//! I = clamp(0.3·time + 0.2·access + 0.3·success + 0.2·associations, 0, 1)
//! ```
//!
//! Everything here is pure; callers decide when a recomputed value is persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::node::MemoryNode;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Weights and saturation points of the importance formula.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportanceConfig {
	/// Weight of the time-decay factor
	pub time_weight: f32,
	/// Weight of the access-frequency factor
	pub access_weight: f32,
	/// Weight of the success-feedback factor
	pub success_weight: f32,
	/// Weight of the association-richness factor
	pub association_weight: f32,
	/// Access count at which the access factor saturates
	pub access_saturation: u32,
	/// Association count at which the association factor saturates
	pub association_saturation: usize,
	/// Success factor used when a node has no feedback
	pub default_success: f32,
	/// Decay rate per day assigned to new nodes
	pub default_decay_rate: f32,
}

impl Default for ImportanceConfig {
	fn default() -> Self {
		Self {
			time_weight: 0.3,
			access_weight: 0.2,
			success_weight: 0.3,
			association_weight: 0.2,
			access_saturation: 10,
			association_saturation: 5,
			default_success: 0.5,
			default_decay_rate: 0.01,
		}
	}
}

/// Breakdown of importance components for a single node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImportanceBreakdown {
	/// `exp(-decay_rate · age_days)`
	pub time_factor: f32,
	/// `min(1, access_count / saturation)`
	pub access_factor: f32,
	/// Mean feedback, or the default
	pub success_factor: f32,
	/// `min(1, |associations| / saturation)`
	pub association_factor: f32,
	/// Weighted, clamped total
	pub total: f32,
}

/// Clamp to `[0, 1]`, mapping NaN to 0.
#[inline]
#[must_use]
pub fn clamp_unit(value: f32) -> f32 {
	if value.is_nan() {
		0.0
	} else {
		value.clamp(0.0, 1.0)
	}
}

/// Age in fractional days. Future timestamps (clock skew) count as age 0.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn age_days(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
	let millis = (now - created_at).num_milliseconds().max(0);
	millis as f64 / 1000.0 / SECONDS_PER_DAY
}

/// Exponential time decay: `exp(-decay_rate · age_days)`.
#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn time_factor(decay_rate: f32, age_days: f64) -> f32 {
	(-f64::from(decay_rate) * age_days).exp() as f32
}

/// Saturating access frequency.
#[inline]
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn access_factor(access_count: u32, saturation: u32) -> f32 {
	if saturation == 0 {
		return 1.0;
	}
	(access_count as f32 / saturation as f32).min(1.0)
}

/// Mean of the feedback metrics, or `default` when there are none.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn success_factor<'a, I>(metrics: I, default: f32) -> f32
where
	I: IntoIterator<Item = &'a f32>,
{
	let (sum, count) = metrics
		.into_iter()
		.fold((0.0_f32, 0_usize), |(sum, count), &v| (sum + v, count + 1));
	if count == 0 {
		default
	} else {
		sum / count as f32
	}
}

/// Saturating association richness.
#[inline]
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn association_factor(association_count: usize, saturation: usize) -> f32 {
	if saturation == 0 {
		return 1.0;
	}
	(association_count as f32 / saturation as f32).min(1.0)
}

/// Full importance breakdown for a node at `now`.
#[must_use]
pub fn breakdown(node: &MemoryNode, now: DateTime<Utc>, config: &ImportanceConfig) -> ImportanceBreakdown {
	let time = time_factor(node.decay_rate, age_days(node.created_at, now));
	let access = access_factor(node.access_count, config.access_saturation);
	let success = success_factor(node.success_metrics.values(), config.default_success);
	let association = association_factor(node.associations.len(), config.association_saturation);

	let total = clamp_unit(
		config.time_weight * time
			+ config.access_weight * access
			+ config.success_weight * success
			+ config.association_weight * association,
	);

	ImportanceBreakdown {
		time_factor: time,
		access_factor: access,
		success_factor: success,
		association_factor: association,
		total,
	}
}

/// Recompute a node's importance from its usage signals.
///
/// Called whenever recall touches a node and whenever its associations change.
#[inline]
#[must_use]
pub fn recompute(node: &MemoryNode, now: DateTime<Utc>, config: &ImportanceConfig) -> f32 {
	breakdown(node, now, config).total
}

/// Whether a node carries any usage evidence the formula can score.
#[inline]
#[must_use]
pub fn has_usage_evidence(node: &MemoryNode) -> bool {
	node.access_count > 0 || !node.associations.is_empty() || !node.success_metrics.is_empty()
}

/// Importance used by consolidation.
///
/// Nodes with usage evidence get the full [`recompute`]. Untouched nodes keep
/// the importance they were stored with, attenuated by time decay, so a caller's
/// low seed is not overwritten by the neutral defaults of the formula.
#[must_use]
pub fn refresh(node: &MemoryNode, now: DateTime<Utc>, config: &ImportanceConfig) -> f32 {
	if has_usage_evidence(node) {
		recompute(node, now, config)
	} else {
		clamp_unit(node.importance * time_factor(node.decay_rate, age_days(node.created_at, now)))
	}
}
