#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use csv::ReaderBuilder;
use serde_json::{json, Value};
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    dataset: PathBuf,
    config: PathBuf,
}

fn setup(rows: i64) -> Fixture {
    let dir = TempDir::new().expect("tempdir");
    let dataset = dir.path().join("authors.json");
    let config = dir.path().join("read.toml");
    write_dataset(&dataset, rows);
    fs::write(
        &config,
        "[read]\nnum_partitions = 3\nbatch_size = 10\n\n[connection]\nhost = \"localhost\"\nport = 8003\n",
    )
    .expect("write config");
    Fixture {
        _dir: dir,
        dataset,
        config,
    }
}

fn write_dataset(path: &Path, rows: i64) {
    let rows: Vec<Value> = (0..rows)
        .map(|i| json!({ "CitationID": i, "LastName": format!("Author{i}"), "Score": i as f64 / 2.0 }))
        .collect();
    let doc = json!({
        "views": [{
            "schema": "Medical",
            "name": "Authors",
            "fields": [
                { "name": "CitationID", "type": "long", "nullable": false },
                { "name": "LastName", "type": "string" },
                { "name": "Score", "type": "double" }
            ],
            "rows": rows
        }]
    });
    fs::write(path, serde_json::to_vec_pretty(&doc).expect("encode")).expect("write dataset");
}

fn base_args(fixture: &Fixture) -> Vec<String> {
    vec![
        "--config".into(),
        fixture.config.display().to_string(),
    ]
}

fn read_args(fixture: &Fixture) -> Vec<String> {
    vec![
        "--dataset".into(),
        fixture.dataset.display().to_string(),
        "--schema".into(),
        "Medical".into(),
        "--view".into(),
        "Authors".into(),
    ]
}

#[test]
fn plan_json_reports_partitions_and_pushdown() {
    let fixture = setup(60);
    let filter = r#"{"leaf":{"attribute":"CitationID","comparator":"ge","values":[{"t":"Int","v":30}]}}"#;
    let output = cargo_bin_cmd!("shardscan")
        .args(base_args(&fixture))
        .arg("plan")
        .args(read_args(&fixture))
        .args(["--filter", filter, "--format", "json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let doc: Value = serde_json::from_slice(&output).expect("plan json");

    assert_eq!(doc["estimatedRows"], 30);
    let partitions = doc["partitions"].as_array().expect("partitions");
    assert_eq!(partitions.len(), 3);
    for partition in partitions {
        assert_eq!(partition["buckets"].as_array().map(Vec::len), Some(1));
    }
    assert_eq!(doc["params"]["shardscan_param_0"]["value"], 30);
    assert_eq!(doc["plan"]["fn"], "operators");
    let ops: Vec<&str> = doc["plan"]["args"]
        .as_array()
        .expect("operator chain")
        .iter()
        .filter_map(|op| op["fn"].as_str())
        .collect();
    assert_eq!(ops, ["from-view", "where"]);
    assert_eq!(doc["pushdown"]["pushed"].as_array().map(Vec::len), Some(1));
}

#[test]
fn plan_text_lists_each_partition() {
    let fixture = setup(25);
    let output = cargo_bin_cmd!("shardscan")
        .args(base_args(&fixture))
        .arg("plan")
        .args(read_args(&fixture))
        .args(["--partitions", "2"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    assert!(text.contains("estimated rows: 25"));
    assert!(text.contains("partition   0"));
    assert!(text.contains("partition   1"));
    assert!(!text.contains("partition   2"));
}

#[test]
fn read_csv_returns_filtered_rows() {
    let fixture = setup(40);
    let filter = r#"{"leaf":{"attribute":"LastName","comparator":"ends-with","values":[{"t":"String","v":"7"}]}}"#;
    let output = cargo_bin_cmd!("shardscan")
        .args(base_args(&fixture))
        .arg("read")
        .args(read_args(&fixture))
        .args(["--filter", filter, "--columns", "CitationID,LastName"])
        .args(["--workers", "2"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let mut reader = ReaderBuilder::new().from_reader(output.as_slice());
    let headers = reader.headers().expect("headers").clone();
    assert_eq!(headers.iter().collect::<Vec<_>>(), ["CitationID", "LastName"]);
    let mut ids: Vec<i64> = reader
        .records()
        .map(|record| record.expect("record")[0].parse().expect("id"))
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, [7, 17, 27, 37]);
}

#[test]
fn read_json_honors_limit() {
    let fixture = setup(50);
    let output = cargo_bin_cmd!("shardscan")
        .args(base_args(&fixture))
        .arg("read")
        .args(read_args(&fixture))
        .args(["--limit", "5", "--output", "json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let lines: Vec<Value> = String::from_utf8(output)
        .expect("utf8")
        .lines()
        .map(|line| serde_json::from_str(line).expect("json row"))
        .collect();
    assert_eq!(lines.len(), 5);
    assert!(lines.iter().all(|row| row["Score"].is_number()));
}

#[test]
fn empty_result_prints_no_rows() {
    let fixture = setup(10);
    let filter = r#"{"leaf":{"attribute":"CitationID","comparator":"gt","values":[{"t":"Int","v":1000}]}}"#;
    let output = cargo_bin_cmd!("shardscan")
        .args(base_args(&fixture))
        .arg("read")
        .args(read_args(&fixture))
        .args(["--filter", filter, "--output", "json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert!(output.is_empty());
}

#[test]
fn invalid_partition_hint_is_rejected() {
    let fixture = setup(10);
    let output = cargo_bin_cmd!("shardscan")
        .args(base_args(&fixture))
        .arg("plan")
        .args(read_args(&fixture))
        .args(["--partitions", "0"])
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8(output).expect("utf8");
    assert!(stderr.contains("shardscan.num_partitions"));
    assert!(stderr.contains("must be 1 or greater"));
}

#[test]
fn unknown_column_fails_strict_and_is_dropped_under_drop_policy() {
    let fixture = setup(10);
    let missing = r#"{"leaf":{"attribute":"Missing","comparator":"eq","values":[{"t":"Int","v":1}]}}"#;
    cargo_bin_cmd!("shardscan")
        .args(base_args(&fixture))
        .arg("plan")
        .args(read_args(&fixture))
        .args(["--filter", missing])
        .assert()
        .failure();

    let combined = format!(
        r#"{{"composite":{{"function":"and","children":[{missing},{{"leaf":{{"attribute":"CitationID","comparator":"is-defined"}}}}]}}}}"#
    );
    let output = cargo_bin_cmd!("shardscan")
        .args(base_args(&fixture))
        .arg("plan")
        .args(read_args(&fixture))
        .args(["--filter", combined.as_str(), "--policy", "drop"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    assert!(text.contains("dropped:  [UnknownAttribute]"));
    assert!(text.contains("estimated rows: 10"));
}

#[test]
fn read_refuses_a_partially_pushed_filter() {
    let fixture = setup(10);
    let partial = r#"{"composite":{"function":"and","children":[
        {"leaf":{"attribute":"CitationID","comparator":"eq","values":[{"t":"Int","v":1}]}},
        {"leaf":{"attribute":"Missing","comparator":"eq","values":[{"t":"Int","v":1}]}}]}}"#;
    let output = cargo_bin_cmd!("shardscan")
        .args(base_args(&fixture))
        .arg("read")
        .args(read_args(&fixture))
        .args(["--filter", partial, "--policy", "drop", "--limit", "1"])
        .assert()
        .failure()
        .get_output()
        .clone();
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8(output.stderr).expect("utf8");
    assert!(stderr.contains("could not be fully pushed down (UnknownAttribute)"));

    // Nothing to drop: the drop policy reads normally.
    let complete = r#"{"leaf":{"attribute":"CitationID","comparator":"eq","values":[{"t":"Int","v":1}]}}"#;
    let output = cargo_bin_cmd!("shardscan")
        .args(base_args(&fixture))
        .arg("read")
        .args(read_args(&fixture))
        .args(["--filter", complete, "--policy", "drop", "--output", "json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let rows: Vec<Value> = String::from_utf8(output)
        .expect("utf8")
        .lines()
        .map(|line| serde_json::from_str(line).expect("json row"))
        .collect();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["CitationID"], 1);
}

#[test]
fn malformed_query_option_is_named() {
    let fixture = setup(10);
    let output = cargo_bin_cmd!("shardscan")
        .args(base_args(&fixture))
        .arg("plan")
        .args(["--dataset", &fixture.dataset.display().to_string()])
        .args(["--query", "not json"])
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8(output).expect("utf8");
    assert!(stderr.contains("Value of 'shardscan.query' option is not a valid plan"));
}
