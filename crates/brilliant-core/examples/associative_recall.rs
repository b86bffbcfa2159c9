//! Associative Recall Example
//!
//! Walks through the engine's life cycle with offline collaborators:
//! 1. Store findings from a security review
//! 2. Recall by similarity, with associative expansion
//! 3. Ask the reasoner for a novel combination
//! 4. Consolidate, summarize and snapshot
//!
//! Run with: `RUST_LOG=brilliant_core=debug cargo run --example associative_recall`

use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use brilliant_core::{
	map_from_json, CollaboratorError, CompletionClient, HashingEmbedder, MemoryConfig, MemoryEngine, PromptReasoner,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

/// Stands in for a language model: answers every prompt with a fixed reply.
struct OfflineClient;

#[async_trait]
impl CompletionClient for OfflineClient {
	async fn complete(&self, system: &str, _user: &str, _temperature: f32) -> Result<String, CollaboratorError> {
		let reply = if system.contains("combin") || system.contains("novel") {
			json!({
				"type": "composite",
				"description": "Manipulate the price oracle, then re-enter withdraw before the balance update",
				"confidence": 0.6,
			})
		} else {
			json!([])
		};
		Ok(reply.to_string())
	}
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("brilliant_core=info")))
		.init();

	println!("=== Associative Recall ===\n");

	let engine = MemoryEngine::new(
		MemoryConfig::with_dimensions(256),
		Arc::new(HashingEmbedder::new(256)),
		Arc::new(PromptReasoner::new(OfflineClient)),
	)?;

	let findings = [
		json!({"type": "reentrancy", "target": "vault withdraw", "confidence": 0.9}),
		json!({"type": "reentrancy", "target": "vault withdraw callback", "confidence": 0.8}),
		json!({"type": "oracle manipulation", "target": "lending price feed", "confidence": 0.7}),
		json!({"type": "access control", "target": "admin upgrade path", "confidence": 0.5}),
	];
	for finding in findings {
		let id = engine.store(map_from_json(finding)?, None, None).await?;
		println!("stored {id}");
	}

	println!("\n--- Recall: reentrancy in withdraw ---");
	let query = map_from_json(json!({"type": "reentrancy", "target": "vault withdraw"}))?;
	for hit in engine.recall(&query, 3, 0.3).await? {
		println!(
			"  {:.3} x {:.3}{}  {}",
			hit.score,
			hit.node.importance,
			if hit.associative { " (assoc)" } else { "" },
			hit.node.content.get("target").and_then(|v| v.as_str()).unwrap_or("?")
		);
	}

	println!("\n--- Novel combination ---");
	let context = map_from_json(json!({"protocol": "lending"}))?;
	match engine.generate_novel_combination(&context).await? {
		Some(node) => println!("  {}", brilliant_core::canonical_json(&node.content)),
		None => println!("  (reasoner declined)"),
	}

	println!("\n--- Consolidation ---");
	let report = engine.consolidate()?;
	println!(
		"  evicted {}, survivors {}, clusters {}",
		report.evicted.len(),
		report.survivors,
		report.clusters
	);

	let insights = engine.get_insights();
	println!("\n--- Insights ({} examined) ---", insights.examined);
	for bucket in &insights.buckets {
		println!("  {}: {} (avg confidence {:.2})", bucket.tag, bucket.frequency, bucket.avg_confidence);
	}

	let dir = std::env::temp_dir().join("brilliant-demo");
	std::fs::create_dir_all(&dir)?;
	let path = dir.join("memory.json");
	engine.save(&path)?;
	println!("\nsnapshot written to {}", path.display());

	Ok(())
}
