//! Command-line front end: plans and runs partitioned reads against a JSON
//! dataset served by the in-process engine.
#![forbid(unsafe_code)]

use std::error::Error;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use nu_ansi_term::{Color, Style};
use serde_json::json;
use shardscan::config::{
    ConnectionProperties, Options, ReadConfig, ReadOptions, BATCH_SIZE, NUM_PARTITIONS, QUERY,
};
use shardscan::plan::PlanAnalysis;
use shardscan::query::{
    FallbackPolicy, Filter, PushdownReport, QueryDefinition, ScanBuilder, Schema,
};
use shardscan::reader::{LocalScheduler, Row, TotalRowCounter};
use shardscan::remote::memory::Dataset;
use shardscan::remote::MemoryEngine;
use shardscan::Batch;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "shardscan",
    version,
    about = "Plan and run partitioned reads with predicate pushdown",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "SHARDSCAN_CONFIG",
        value_name = "FILE",
        help = "TOML config file (defaults to the user config directory)"
    )]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print how the read would be partitioned.
    Plan {
        #[command(flatten)]
        read: ReadArgs,

        #[arg(long, value_enum, default_value_t = PlanFormat::Text)]
        format: PlanFormat,
    },
    /// Read every partition and print the rows.
    Read {
        #[command(flatten)]
        read: ReadArgs,

        #[arg(long, value_enum, default_value_t = RowFormat::Csv)]
        output: RowFormat,

        #[arg(long, help = "Worker threads (defaults to available parallelism)")]
        workers: Option<usize>,

        #[arg(long, default_value_t = 1, help = "Attempts per partition task")]
        max_attempts: usize,
    },
}

#[derive(Args, Debug)]
struct ReadArgs {
    #[arg(long, value_name = "FILE", help = "JSON dataset to serve")]
    dataset: PathBuf,

    #[arg(long, help = "View to read (ignored when a query is given)")]
    view: Option<String>,

    #[arg(long, help = "Schema owning the view")]
    schema: Option<String>,

    #[arg(long, value_name = "JSON", help = "Serialized plan to read")]
    query: Option<String>,

    #[arg(long, value_name = "JSON", help = "Filter tree to push down")]
    filter: Option<String>,

    #[arg(long, value_enum, default_value_t = PolicyArg::Strict)]
    policy: PolicyArg,

    #[arg(long, value_delimiter = ',', help = "Columns to fetch")]
    columns: Vec<String>,

    #[arg(long, help = "Maximum rows to read")]
    limit: Option<u64>,

    #[arg(long, help = "Partition-count hint")]
    partitions: Option<String>,

    #[arg(long, help = "Rows-per-bucket hint")]
    batch_size: Option<String>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum PlanFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum RowFormat {
    Csv,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum PolicyArg {
    Strict,
    Drop,
}

impl From<PolicyArg> for FallbackPolicy {
    fn from(value: PolicyArg) -> Self {
        match value {
            PolicyArg::Strict => FallbackPolicy::Strict,
            PolicyArg::Drop => FallbackPolicy::DropUnsupported,
        }
    }
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shardscan=warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .try_init();
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = ReadConfig::load(cli.config.clone())?;
    match cli.command {
        Command::Plan { read, format } => {
            let prepared = prepare(&read, &config, true)?;
            match format {
                PlanFormat::Json => {
                    let doc = json!({
                        "plan": prepared.batch.query().plan().to_json(),
                        "params": prepared.batch.query().render_params(),
                        "estimatedRows": prepared.batch.analysis().estimated_rows(),
                        "partitions": prepared.batch.partitions(),
                        "pushdown": prepared.report,
                    });
                    println!("{}", serde_json::to_string_pretty(&doc)?);
                }
                PlanFormat::Text => print_plan_text(prepared.batch.analysis(), &prepared.report),
            }
        }
        Command::Read {
            read,
            output,
            workers,
            max_attempts,
        } => {
            let prepared = prepare(&read, &config, false)?;
            let counter = Arc::new(TotalRowCounter::new());
            let factory = prepared
                .batch
                .reader_factory()
                .with_metrics_sink(counter.clone());
            let scheduler = match workers {
                Some(n) => LocalScheduler::new(n),
                None => LocalScheduler::default(),
            }
            .with_max_attempts(max_attempts);
            let rows = scheduler.collect_rows(prepared.batch.partitions(), &factory)?;
            write_rows(&prepared.schema, &rows, output)?;
            tracing::info!(
                rows = counter.total(),
                readers = counter.readers(),
                "read complete"
            );
        }
    }
    Ok(())
}

struct Prepared {
    batch: Batch,
    schema: Schema,
    report: PushdownReport,
}

/// `allow_dropped` is false for commands that print rows: nothing on the host
/// side re-applies a dropped predicate, so fetched rows would escape it.
fn prepare(
    args: &ReadArgs,
    config: &ReadConfig,
    allow_dropped: bool,
) -> Result<Prepared, Box<dyn Error>> {
    let mut options = Options::new();
    if let Some(partitions) = &args.partitions {
        options.insert(NUM_PARTITIONS, partitions.clone());
    }
    if let Some(batch) = &args.batch_size {
        options.insert(BATCH_SIZE, batch.clone());
    }
    if let Some(query) = &args.query {
        options.insert(QUERY, query.clone());
    }
    options.merge_missing(config.options());
    let read_options = ReadOptions::from_options(&options)?;
    let properties = ConnectionProperties::from_options(&options)?;

    let text = fs::read_to_string(&args.dataset)
        .map_err(|err| format!("failed to read dataset {}: {err}", args.dataset.display()))?;
    let dataset: Dataset = serde_json::from_str(&text)
        .map_err(|err| format!("invalid dataset {}: {err}", args.dataset.display()))?;
    let engine = MemoryEngine::from_dataset(dataset);

    let base = match (&read_options.query, &args.view) {
        (Some(_), _) => read_options.query_definition()?,
        (None, Some(view)) => QueryDefinition::from_view(args.schema.as_deref(), view),
        (None, None) => return Err("either --view or --query is required".into()),
    };
    let (schema_name, view) = base
        .source_view()
        .ok_or("query does not name a source view")?;
    let view_schema = engine
        .view_schema(schema_name, view)
        .ok_or_else(|| format!("unknown view '{view}'"))?;

    let mut builder = ScanBuilder::new(base.clone())
        .with_schema(view_schema.clone())
        .with_policy(args.policy.into());
    if let Some(filter) = &args.filter {
        let filter = Filter::parse(filter).map_err(|err| format!("invalid --filter: {err}"))?;
        builder.push_filter(filter);
    }
    let schema = if args.columns.is_empty() {
        view_schema
    } else {
        builder.prune_columns(&args.columns);
        view_schema
            .project(&args.columns)
            .ok_or("--columns names an unknown column")?
    };
    if let Some(limit) = args.limit {
        builder.push_limit(limit);
    }
    let (query, report) = builder.build()?;
    if !allow_dropped && !report.dropped.is_empty() {
        let codes: Vec<&str> = report.dropped.iter().map(|err| err.code()).collect();
        return Err(format!(
            "--filter could not be fully pushed down ({}); read has no host-side filter, \
             use --policy strict or fix the filter",
            codes.join(", ")
        )
        .into());
    }

    let batch = Batch::open(
        Arc::new(engine.connector()),
        query,
        schema.clone(),
        properties,
        &read_options,
    )?;
    Ok(Prepared {
        batch,
        schema,
        report,
    })
}

fn print_plan_text(analysis: &PlanAnalysis, report: &PushdownReport) {
    let paint = io::stdout().is_terminal();
    let heading = |title: &str| {
        if paint {
            println!("{}", Style::new().bold().fg(Color::Cyan).paint(title));
        } else {
            println!("{title}");
        }
    };

    heading("Plan");
    println!("  estimated rows: {}", analysis.estimated_rows());
    println!("  partitions:     {}", analysis.partitions().len());
    println!("  buckets:        {}", analysis.bucket_count());
    for partition in analysis.partitions() {
        let range = partition
            .range()
            .map(|r| r.to_string())
            .unwrap_or_default();
        println!(
            "  partition {:>3}: {} bucket(s) {range}",
            partition.id,
            partition.buckets.len()
        );
    }

    heading("Pushdown");
    for pushed in &report.pushed {
        println!("  pushed:   {pushed}");
    }
    for residual in &report.residual {
        println!("  residual: {residual}");
    }
    for dropped in &report.dropped {
        println!("  dropped:  [{}] {dropped}", dropped.code());
    }
    if let Some(columns) = &report.columns {
        println!("  columns:  {}", columns.join(","));
    }
    if let Some(limit) = report.limit {
        println!("  limit:    {limit}");
    }
}

fn write_rows(schema: &Schema, rows: &[Row], format: RowFormat) -> Result<(), Box<dyn Error>> {
    let stdout = io::stdout();
    match format {
        RowFormat::Csv => {
            let mut writer = csv::Writer::from_writer(stdout.lock());
            writer.write_record(schema.fields().iter().map(|f| f.name.as_str()))?;
            for row in rows {
                writer.write_record(row.values().iter().map(|value| match value.to_json() {
                    serde_json::Value::String(text) => text,
                    serde_json::Value::Null => String::new(),
                    other => other.to_string(),
                }))?;
            }
            writer.flush()?;
        }
        RowFormat::Json => {
            let mut out = stdout.lock();
            for row in rows {
                writeln!(out, "{}", row.to_json(schema))?;
            }
        }
    }
    Ok(())
}
