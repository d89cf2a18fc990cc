#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::sync::{Arc, Once};
use std::thread;

use serde_json::json;
use shardscan::config::{ConnectionProperties, ReadOptions};
use shardscan::query::{Comparator, DataType, Field, Filter, QueryDefinition, ScanBuilder, Schema};
use shardscan::reader::{LocalScheduler, PartitionMetrics, ReaderState, TotalRowCounter};
use shardscan::remote::eval::JsonRow;
use shardscan::remote::MemoryEngine;
use shardscan::{Batch, Result, Value};
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

fn schema() -> Schema {
    Schema::new(vec![
        Field::new("CitationID", DataType::Long),
        Field::new("LastName", DataType::String),
    ])
}

fn authors(count: i64) -> MemoryEngine {
    let rows: Vec<JsonRow> = (0..count)
        .map(|i| {
            match json!({ "CitationID": i, "LastName": format!("Author{i}") }) {
                serde_json::Value::Object(map) => map,
                _ => unreachable!(),
            }
        })
        .collect();
    MemoryEngine::new().with_view(Some("Medical"), "Authors", schema().fields().to_vec(), rows)
}

fn open(engine: &MemoryEngine, query: QueryDefinition, partitions: usize, batch: u64) -> Batch {
    Batch::open(
        Arc::new(engine.connector()),
        query,
        schema(),
        ConnectionProperties::default(),
        &ReadOptions {
            num_partitions: partitions,
            batch_size: batch,
            query: None,
        },
    )
    .expect("open batch")
}

fn base() -> QueryDefinition {
    QueryDefinition::from_view(Some("Medical"), "Authors")
}

fn citation_ids(rows: &[shardscan::Row]) -> Vec<i64> {
    rows.iter()
        .filter_map(|row| match row.get(0) {
            Some(Value::Int(id)) => Some(*id),
            _ => None,
        })
        .collect()
}

#[test]
fn four_partitions_read_every_row_once() -> Result<()> {
    init_tracing();
    let engine = authors(250);
    let batch = open(&engine, base(), 4, 100);
    assert_eq!(batch.partitions().len(), 4);
    assert!(batch.partitions().iter().all(|p| p.buckets.len() == 1));

    let counter = Arc::new(TotalRowCounter::new());
    let factory = batch.reader_factory().with_metrics_sink(counter.clone());
    let outcomes = LocalScheduler::new(4).run(batch.partitions(), &factory);

    let ids: Vec<usize> = outcomes.iter().map(|o| o.partition).collect();
    assert_eq!(ids, [0, 1, 2, 3]);
    let mut seen = BTreeSet::new();
    for outcome in outcomes {
        assert_eq!(outcome.attempts, 1);
        for id in citation_ids(&outcome.result?) {
            assert!(seen.insert(id), "row {id} read twice");
        }
    }
    assert_eq!(seen.len(), 250);
    assert_eq!(counter.total(), 250);
    assert_eq!(counter.readers(), 4);
    assert_eq!(engine.stats().fetch_requests(), 4);
    assert_eq!(engine.stats().open_connections(), 0);
    Ok(())
}

#[test]
fn partition_rows_match_their_row_id_range() -> Result<()> {
    init_tracing();
    let engine = authors(120);
    let row_ids = engine.row_ids(Some("Medical"), "Authors");
    let batch = open(&engine, base(), 3, 7);
    let factory = batch.reader_factory();

    for partition in batch.partitions() {
        let range = partition.range().expect("non-empty partition");
        let expected = row_ids.iter().filter(|id| range.contains(**id)).count();
        let mut reader = factory.create_reader(partition);
        let mut count = 0;
        while reader.advance()? {
            count += 1;
        }
        assert_eq!(reader.state(), ReaderState::Exhausted);
        assert_eq!(count, expected);
        assert_eq!(
            reader.metrics().total_requests(),
            partition.buckets.len() as u64
        );
    }
    Ok(())
}

#[test]
fn rows_stream_in_row_id_order() -> Result<()> {
    init_tracing();
    let engine = authors(64);
    let batch = open(&engine, base(), 5, 4);
    let rows = LocalScheduler::new(2).collect_rows(batch.partitions(), &batch.reader_factory())?;

    // Output order depends only on row ids, never on the worker count.
    let serial = LocalScheduler::new(1).collect_rows(batch.partitions(), &batch.reader_factory())?;
    assert_eq!(citation_ids(&rows), citation_ids(&serial));
    assert_eq!(rows.len(), 64);
    Ok(())
}

#[test]
fn readers_run_on_independent_threads() -> Result<()> {
    init_tracing();
    let engine = authors(500);
    let batch = open(&engine, base(), 8, 16);
    let factory = batch.reader_factory();

    let handles: Vec<_> = batch
        .partitions()
        .iter()
        .cloned()
        .map(|partition| {
            let factory = factory.clone();
            thread::spawn(move || {
                let reader = factory.create_reader(&partition);
                reader.count()
            })
        })
        .collect();
    let total: usize = handles
        .into_iter()
        .map(|h| h.join().expect("reader thread"))
        .sum();
    assert_eq!(total, 500);
    assert_eq!(engine.stats().open_connections(), 0);
    Ok(())
}

#[test]
fn empty_result_creates_no_partitions() -> Result<()> {
    init_tracing();
    let engine = authors(50);
    let mut builder = ScanBuilder::new(base()).with_schema(schema());
    builder.push_filter(Filter::compare(
        "LastName",
        Comparator::Eq,
        Value::from("Nobody"),
    ));
    let (query, _) = builder.build()?;
    let batch = open(&engine, query, 4, 10);
    assert!(batch.partitions().is_empty());
    assert_eq!(batch.analysis().estimated_rows(), 0);

    let outcomes = LocalScheduler::default().run(batch.partitions(), &batch.reader_factory());
    assert!(outcomes.is_empty());
    assert_eq!(engine.stats().connections_opened(), 1);
    assert_eq!(engine.stats().fetch_requests(), 0);
    Ok(())
}

#[test]
fn closure_sinks_receive_each_partition_once() -> Result<()> {
    init_tracing();
    let engine = authors(90);
    let batch = open(&engine, base(), 3, 10);
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = {
        let seen = Arc::clone(&seen);
        move |metrics: &PartitionMetrics| seen.lock().push(metrics.record())
    };
    let factory = batch.reader_factory().with_metrics_sink(Arc::new(sink));
    LocalScheduler::new(3).collect_rows(batch.partitions(), &factory)?;

    let mut records = seen.lock().clone();
    records.sort_by_key(|r| r["partitionId"].as_u64());
    assert_eq!(records.len(), 3);
    let total: u64 = records
        .iter()
        .filter_map(|r| r["totalRowCount"].as_u64())
        .sum();
    assert_eq!(total, 90);
    for (id, record) in records.iter().enumerate() {
        assert_eq!(record["partitionId"].as_u64(), Some(id as u64));
        assert!(record["rowsPerSecond"].is_string());
    }
    Ok(())
}
