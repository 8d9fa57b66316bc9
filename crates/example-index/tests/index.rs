use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tunegate_core_types::ExampleId;
use tunegate_example_index::{
    spawn_compactor, Example, ExampleIndex, IndexConfig, IndexError, InMemoryExampleIndex,
    PartitionKey,
};

fn key() -> PartitionKey {
    PartitionKey::new("draft_response", "gpt_4o_mini_dicl", "billing")
}

fn example(id: &str, embedding: Vec<f32>) -> Example {
    let mut example = Example::new(key(), embedding, json!({"q": id}), json!({"a": id}));
    example.id = ExampleId::from(id);
    example
}

fn small_index(buffer_capacity: usize) -> Arc<InMemoryExampleIndex> {
    InMemoryExampleIndex::new(IndexConfig {
        buffer_capacity,
        ..IndexConfig::default()
    })
}

fn ids(results: &[tunegate_example_index::ScoredExample]) -> Vec<String> {
    results
        .iter()
        .map(|scored| scored.example.id.as_str().to_string())
        .collect()
}

#[test]
fn large_magnitude_embeddings_rank_by_direction() {
    let index = small_index(2);
    index.upsert(example("zzz-parallel", vec![1e20, 1e20])).unwrap();
    index.upsert(example("aaa-orthogonal", vec![1.0, -1.0])).unwrap();
    index.upsert(example("mmm-opposite", vec![-3e38, -3e38])).unwrap();

    let key = key();
    let results = index
        .query(&key.function, &key.variant, &key.namespace, &[1e20, 1e20], 3)
        .unwrap();
    assert_eq!(ids(&results), vec!["zzz-parallel", "aaa-orthogonal", "mmm-opposite"]);
    assert!((results[0].score - 1.0).abs() < 1e-6);
    assert!(results[1].score.abs() < 1e-6);
    assert!((results[2].score + 1.0).abs() < 1e-6);
    assert!(results.iter().all(|scored| scored.score.is_finite()));
}

#[test]
fn equal_scores_are_ordered_by_id() {
    let index = small_index(3);
    for id in ["e", "c", "a", "d", "b", "f"] {
        index.upsert(example(id, vec![1.0, 0.0])).unwrap();
    }
    let first = index
        .query("draft_response", "gpt_4o_mini_dicl", "billing", &[2.0, 0.0], 5)
        .unwrap();
    assert_eq!(ids(&first), vec!["a", "b", "c", "d", "e"]);
    for _ in 0..10 {
        let again = index
            .query("draft_response", "gpt_4o_mini_dicl", "billing", &[2.0, 0.0], 5)
            .unwrap();
        assert_eq!(ids(&again), ids(&first));
    }
}

#[test]
fn results_rank_by_similarity() {
    let index = small_index(2);
    index.upsert(example("far", vec![0.0, 1.0])).unwrap();
    index.upsert(example("near", vec![1.0, 0.1])).unwrap();
    index.upsert(example("mid", vec![1.0, 1.0])).unwrap();
    let results = index
        .query("draft_response", "gpt_4o_mini_dicl", "billing", &[1.0, 0.0], 2)
        .unwrap();
    assert_eq!(ids(&results), vec!["near", "mid"]);
    assert!(results[0].score > results[1].score);
}

#[test]
fn unknown_key_returns_empty() {
    let index = small_index(4);
    let results = index
        .query("draft_response", "gpt_4o_mini_dicl", "nobody", &[1.0, 0.0], 5)
        .unwrap();
    assert!(results.is_empty());
}

#[test]
fn partitions_are_isolated() {
    let index = small_index(4);
    index.upsert(example("a", vec![1.0, 0.0])).unwrap();
    let mut other = example("b", vec![1.0, 0.0]);
    other.key = PartitionKey::new("draft_response", "gpt_4o_mini_dicl", "general");
    index.upsert(other).unwrap();

    let billing = index
        .query("draft_response", "gpt_4o_mini_dicl", "billing", &[1.0, 0.0], 5)
        .unwrap();
    assert_eq!(ids(&billing), vec!["a"]);
    assert_eq!(index.keys().len(), 2);
}

#[test]
fn dimension_mismatch_is_rejected() {
    let index = small_index(4);
    index.upsert(example("a", vec![1.0, 0.0, 0.0])).unwrap();
    assert_eq!(
        index.upsert(example("b", vec![1.0, 0.0])).unwrap_err(),
        IndexError::DimensionMismatch {
            expected: 3,
            actual: 2
        }
    );
    assert!(matches!(
        index.query("draft_response", "gpt_4o_mini_dicl", "billing", &[1.0], 1),
        Err(IndexError::DimensionMismatch { .. })
    ));
}

#[test]
fn invalid_embeddings_are_rejected() {
    let index = small_index(4);
    assert!(matches!(
        index.upsert(example("a", vec![])),
        Err(IndexError::InvalidEmbedding(_))
    ));
    assert!(matches!(
        index.upsert(example("a", vec![f32::NAN, 1.0])),
        Err(IndexError::InvalidEmbedding(_))
    ));
    assert_eq!(index.len(&key()), 0);
    assert_eq!(index.metrics().snapshot().rejected, 2);
}

#[test]
fn upsert_supersedes_previous_copy() {
    let index = small_index(2);
    index.upsert(example("a", vec![1.0, 0.0])).unwrap();
    index.upsert(example("b", vec![0.0, 1.0])).unwrap();
    // Same id again, now pointing the other way; the first copy is already sealed.
    index.upsert(example("a", vec![0.0, 1.0])).unwrap();

    assert_eq!(index.len(&key()), 2);
    let results = index
        .query("draft_response", "gpt_4o_mini_dicl", "billing", &[1.0, 0.0], 5)
        .unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|scored| scored.score.abs() < 1e-6));
}

#[test]
fn compaction_preserves_query_results() {
    let index = small_index(2);
    for i in 0..9 {
        let angle = i as f32 * 0.2;
        index
            .upsert(example(&format!("ex-{i}"), vec![angle.cos(), angle.sin()]))
            .unwrap();
    }
    index.upsert(example("ex-3", vec![1.0, 0.0])).unwrap();
    let before = index
        .query("draft_response", "gpt_4o_mini_dicl", "billing", &[1.0, 0.0], 5)
        .unwrap();
    let stats_before = index.stats();
    assert!(stats_before.segments >= 2);

    let report = index.compact();
    assert_eq!(report.partitions_compacted, 1);
    assert_eq!(report.superseded_dropped, 1);

    let after = index
        .query("draft_response", "gpt_4o_mini_dicl", "billing", &[1.0, 0.0], 5)
        .unwrap();
    assert_eq!(ids(&after), ids(&before));
    let stats_after = index.stats();
    assert_eq!(stats_after.segments, 1);
    assert_eq!(stats_after.examples, stats_before.examples);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_upserts_and_queries_stay_consistent() {
    let index = small_index(8);
    let writers = (0..4)
        .map(|w| {
            let index = Arc::clone(&index);
            tokio::spawn(async move {
                for i in 0..250 {
                    index
                        .upsert(example(&format!("w{w}-{i:04}"), vec![1.0, 0.0]))
                        .unwrap();
                }
            })
        })
        .collect::<Vec<_>>();
    let readers = (0..4)
        .map(|_| {
            let index = Arc::clone(&index);
            tokio::spawn(async move {
                for _ in 0..200 {
                    let results = index
                        .query("draft_response", "gpt_4o_mini_dicl", "billing", &[1.0, 0.0], 50)
                        .unwrap();
                    let mut seen = ids(&results);
                    let total = seen.len();
                    seen.dedup();
                    assert_eq!(seen.len(), total, "an example appeared twice");
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect::<Vec<_>>();
    for handle in writers.into_iter().chain(readers) {
        handle.await.unwrap();
    }
    assert_eq!(index.len(&key()), 1000);
    assert_eq!(index.stats().examples, 1000);
}

#[tokio::test(start_paused = true)]
async fn compactor_runs_until_cancelled() {
    let index = small_index(1);
    for i in 0..4 {
        index
            .upsert(example(&format!("ex-{i}"), vec![1.0, i as f32]))
            .unwrap();
    }
    assert_eq!(index.stats().segments, 4);

    let cancel = CancellationToken::new();
    let handle = spawn_compactor(Arc::clone(&index), Duration::from_secs(10), cancel.clone());
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(index.stats().segments, 1);

    cancel.cancel();
    handle.await.unwrap();
}
