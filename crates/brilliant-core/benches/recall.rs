//! Benchmarks for exact vector recall
//!
//! Covers the two hot paths of a query:
//! - Flat index scan at various store sizes and dimensions
//! - Recall side effects plus one-hop associative expansion

#![allow(clippy::expect_used, clippy::cast_possible_truncation)] // Fine in benchmarks

use brilliant_core::content::{ContentMap, NodeId};
use brilliant_core::graph::link;
use brilliant_core::importance::ImportanceConfig;
use brilliant_core::index::VectorIndex;
use brilliant_core::node::{NodeDraft, NodeStore};
use brilliant_core::recall::{touch_and_expand, RecallConfig, RecallRequest};
use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;

/// Generate normalized random embeddings
fn generate_embeddings(count: usize, dimensions: usize) -> Vec<Vec<f32>> {
	let mut rng = rand::thread_rng();
	(0..count)
		.map(|_| {
			let mut vec: Vec<f32> = (0..dimensions).map(|_| rng.gen::<f32>() - 0.5).collect();
			let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
			if norm > 0.0 {
				for x in &mut vec {
					*x /= norm;
				}
			}
			vec
		})
		.collect()
}

fn content(i: usize) -> ContentMap {
	let mut map = ContentMap::new();
	let _ = map.insert("finding".into(), format!("observation {i}").into());
	map
}

/// Store with random embeddings and about `links_per_node` random associations each
fn generate_store(count: usize, dimensions: usize, links_per_node: usize) -> (NodeStore, Vec<(NodeId, Vec<f32>)>) {
	let mut rng = rand::thread_rng();
	let now = Utc::now();
	let config = ImportanceConfig::default();
	let mut store = NodeStore::new();
	let mut entries = Vec::with_capacity(count);

	for (i, embedding) in generate_embeddings(count, dimensions).into_iter().enumerate() {
		let id = store
			.upsert(
				NodeDraft {
					content: content(i),
					embedding: embedding.clone(),
					context: None,
					importance: rng.gen_range(0.0..1.0),
					decay_rate: 0.01,
				},
				now,
			)
			.id;
		entries.push((id, embedding));
	}
	for (id, _) in &entries {
		for _ in 0..links_per_node {
			let (other, _) = &entries[rng.gen_range(0..count)];
			let _ = link(&mut store, id, other, now, &config);
		}
	}
	(store, entries)
}

fn bench_index_search(c: &mut Criterion) {
	let mut group = c.benchmark_group("index_search");

	for dim in &[384, 768] {
		for count in &[1_000, 10_000] {
			let vectors = generate_embeddings(*count, *dim);
			let ids: Vec<NodeId> = (0..*count).map(|i| NodeId::for_content(&content(i))).collect();
			let index = VectorIndex::from_entries(*dim, ids.iter().copied().zip(vectors.iter().map(Vec::as_slice)))
				.expect("index");
			let query = generate_embeddings(1, *dim).pop().expect("query");

			let _ = group.throughput(Throughput::Elements(*count as u64));
			let _ = group.bench_with_input(
				BenchmarkId::new(format!("dim_{dim}"), count),
				&(&index, &query),
				|b, (index, query)| {
					b.iter(|| index.search(black_box(query), black_box(20)));
				},
			);
		}
	}

	group.finish();
}

fn bench_touch_and_expand(c: &mut Criterion) {
	let mut group = c.benchmark_group("touch_and_expand");
	let dim = 384;
	let recall = RecallConfig::default();
	let importance = ImportanceConfig::default();

	for links in &[0, 3, 8] {
		let (store, entries) = generate_store(2_000, dim, *links);
		let index = VectorIndex::from_entries(dim, entries.iter().map(|(id, v)| (*id, v.as_slice()))).expect("index");
		let query = generate_embeddings(1, dim).pop().expect("query");
		let candidates = index.search(&query, 20);
		let request = RecallRequest {
			threshold: -1.0,
			exclude: None,
		};

		let _ = group.bench_with_input(BenchmarkId::new("links_per_node", links), links, |b, _| {
			b.iter_batched(
				|| store.clone(),
				|mut store| touch_and_expand(&mut store, black_box(&candidates), &request, Utc::now(), &recall, &importance),
				criterion::BatchSize::LargeInput,
			);
		});
	}

	group.finish();
}

criterion_group!(benches, bench_index_search, bench_touch_and_expand);
criterion_main!(benches);
