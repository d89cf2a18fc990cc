#![allow(missing_docs)]

use std::sync::{Arc, Once};

use serde_json::json;
use shardscan::config::{ConnectionProperties, ReadOptions};
use shardscan::query::{DataType, Field, QueryDefinition, Schema};
use shardscan::reader::{LocalScheduler, TotalRowCounter};
use shardscan::remote::eval::JsonRow;
use shardscan::remote::{MemoryEngine, RemoteError};
use shardscan::{Batch, ReadError};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("shardscan=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

fn fields() -> Vec<Field> {
    vec![
        Field::new("id", DataType::Long).required(),
        Field::new("label", DataType::String),
    ]
}

fn json_rows(count: i64) -> Vec<JsonRow> {
    (0..count)
        .map(|i| match json!({ "id": i, "label": format!("row-{i}") }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        })
        .collect()
}

fn open(engine: &MemoryEngine, partitions: usize, batch: u64) -> Batch {
    Batch::open(
        Arc::new(engine.connector()),
        QueryDefinition::from_view(None, "events"),
        Schema::new(fields()),
        ConnectionProperties::default(),
        &ReadOptions {
            num_partitions: partitions,
            batch_size: batch,
            query: None,
        },
    )
    .expect("open batch")
}

#[test]
fn persistent_fault_fails_only_its_partition() {
    init_tracing();
    let engine = MemoryEngine::new().with_view(None, "events", fields(), json_rows(200));
    let batch = open(&engine, 4, 20);
    let broken = batch.partitions()[2].clone();
    let range = broken.range().expect("range");
    engine.fail_fetches(range, usize::MAX, "XDMP-FORESTNID: forest unavailable");
    let expected_broken = engine
        .row_ids(None, "events")
        .iter()
        .filter(|id| range.contains(**id))
        .count();

    let outcomes = LocalScheduler::new(4)
        .with_max_attempts(3)
        .run(batch.partitions(), &batch.reader_factory());
    assert_eq!(outcomes.len(), 4);

    let mut ok_rows = 0;
    for outcome in &outcomes {
        if outcome.partition == broken.id {
            assert_eq!(outcome.attempts, 3);
            match &outcome.result {
                Err(ReadError::Fetch {
                    partition, source, ..
                }) => {
                    assert_eq!(*partition, broken.id);
                    assert!(matches!(source, RemoteError::Status { status_code: 503, .. }));
                }
                other => panic!("expected fetch error, got {other:?}"),
            }
        } else {
            assert_eq!(outcome.attempts, 1);
            ok_rows += outcome.result.as_ref().expect("healthy partition").len();
        }
    }
    assert_eq!(ok_rows, 200 - expected_broken);
    assert_eq!(engine.stats().open_connections(), 0);
}

#[test]
fn transient_fault_is_retried_by_the_task() {
    init_tracing();
    let engine = MemoryEngine::new().with_view(None, "events", fields(), json_rows(120));
    let batch = open(&engine, 3, 15);
    let flaky = batch.partitions()[1].clone();
    engine.fail_fetches(flaky.range().expect("range"), 1, "connection reset");

    let outcomes = LocalScheduler::new(2)
        .with_max_attempts(2)
        .run(batch.partitions(), &batch.reader_factory());
    let attempts: Vec<usize> = outcomes.iter().map(|o| o.attempts).collect();
    assert_eq!(attempts, [1, 2, 1]);
    let total: usize = outcomes
        .into_iter()
        .map(|o| o.result.expect("recovered").len())
        .sum();
    assert_eq!(total, 120);
}

#[test]
fn metrics_count_only_the_final_attempt() {
    init_tracing();
    let engine = MemoryEngine::new().with_view(None, "events", fields(), json_rows(120));
    let batch = open(&engine, 3, 15);
    let flaky = batch.partitions()[1].clone();
    assert!(flaky.buckets.len() > 1);
    let last = flaky.buckets.last().expect("bucket");
    engine.fail_fetches(last.range, 1, "connection reset");

    let counter = Arc::new(TotalRowCounter::new());
    let factory = batch.reader_factory().with_metrics_sink(counter.clone());
    let outcomes = LocalScheduler::new(3)
        .with_max_attempts(2)
        .run(batch.partitions(), &factory);
    assert_eq!(outcomes[1].attempts, 2);
    let rows: usize = outcomes
        .into_iter()
        .map(|o| o.result.expect("recovered").len())
        .sum();
    assert_eq!(rows, 120);
    assert_eq!(counter.total(), 120);
    assert_eq!(counter.readers(), 3);
}

#[test]
fn single_attempt_surfaces_the_first_failure() {
    init_tracing();
    let engine = MemoryEngine::new().with_view(None, "events", fields(), json_rows(60));
    let batch = open(&engine, 2, 10);
    engine.fail_fetches(batch.partitions()[0].range().expect("range"), 1, "timeout");

    let err = LocalScheduler::new(2)
        .collect_rows(batch.partitions(), &batch.reader_factory())
        .expect_err("first partition fails");
    assert!(matches!(err, ReadError::Fetch { partition: 0, .. }));
    assert!(err.is_retryable());
}

#[test]
fn undecodable_row_fails_its_partition() {
    init_tracing();
    let mut rows = json_rows(80);
    rows[17].remove("id");
    let engine = MemoryEngine::new().with_view(None, "events", fields(), rows);
    let batch = open(&engine, 4, 10);

    let outcomes = LocalScheduler::new(4).run(batch.partitions(), &batch.reader_factory());
    let failed: Vec<_> = outcomes.iter().filter(|o| o.result.is_err()).collect();
    assert_eq!(failed.len(), 1);
    assert!(matches!(
        failed[0].result,
        Err(ReadError::Decode { partition, .. }) if partition == failed[0].partition
    ));
    let ok_rows: usize = outcomes
        .iter()
        .filter_map(|o| o.result.as_ref().ok())
        .map(Vec::len)
        .sum();
    assert!(ok_rows < 80);
    assert!(ok_rows > 0);
}
